//! Background outbox worker tests.
//!
//! The worker polls the service on an interval, drains every pending row in
//! one poll, survives store outages and stops on cancellation.

#[path = "../outbox/support.rs"]
mod support;

use std::sync::Arc;
use std::time::Duration;

use sourced_outbox::{
    CancellationToken, DomainEvent, InMemoryOutboxStore, OutboxService, OutboxWorker,
    Specification,
};

use support::{config, init_tracing, stage, wait_until, RecordingPublisher};

fn service(batch_size: usize, poll: Duration) -> Arc<OutboxService<InMemoryOutboxStore, RecordingPublisher>> {
    init_tracing();
    Arc::new(OutboxService::with_config(
        InMemoryOutboxStore::new(),
        RecordingPublisher::new(),
        config("bg-worker")
            .with_batch_size(batch_size)
            .with_poll_interval(poll),
    ))
}

// ============================================================================
// Test 1: events committed before and after spawn are delivered
// ============================================================================

#[tokio::test]
async fn worker_delivers_committed_events() {
    let service = service(10, Duration::from_millis(10));
    stage(&service, vec![DomainEvent::json("ClientCreated", "{}")]).await;

    let worker = OutboxWorker::spawn(service.clone());
    assert!(wait_until(|| service.publisher().published().len() == 1).await);

    stage(
        &service,
        vec![
            DomainEvent::json("ClientRenamed", "{}"),
            DomainEvent::json("ClientSuspended", "{}"),
        ],
    )
    .await;
    assert!(wait_until(|| service.publisher().published().len() == 3).await);

    let stats = worker.stop().await;
    assert_eq!(stats.messages_processed, 3);
    assert_eq!(stats.messages_failed, 0);
    assert!(stats.polls >= 2);
    assert_eq!(
        service.publisher().published_types(),
        vec!["ClientCreated", "ClientRenamed", "ClientSuspended"]
    );
}

// ============================================================================
// Test 2: one poll drains more rows than a batch holds
// ============================================================================

#[tokio::test]
async fn one_poll_drains_every_batch() {
    // the poll interval is far longer than the test waits
    let service = service(2, Duration::from_secs(60));
    let events: Vec<DomainEvent> = (0..5)
        .map(|i| DomainEvent::json(format!("E{i}"), "{}"))
        .collect();
    stage(&service, events).await;

    let worker = OutboxWorker::spawn(service.clone());
    assert!(wait_until(|| service.publisher().published().len() == 5).await);

    let stats = worker.stop().await;
    assert_eq!(stats.messages_processed, 5);
    assert_eq!(stats.polls, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_batch_of_failures_waits_for_the_next_poll() {
    init_tracing();
    let service = Arc::new(OutboxService::with_config(
        InMemoryOutboxStore::new(),
        RecordingPublisher::new().failing_on("ClientSuspended"),
        config("bg-busy")
            .with_batch_size(2)
            .with_poll_interval(Duration::from_secs(10)),
    ));
    stage(
        &service,
        vec![
            DomainEvent::json("ClientSuspended", "{}"),
            DomainEvent::json("ClientSuspended", "{}"),
        ],
    )
    .await;

    let worker = OutboxWorker::spawn(service.clone());
    assert!(wait_until(|| service.publisher().attempts() == 2).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stats = worker.stop().await;
    assert_eq!(stats.polls, 1);
    assert_eq!(stats.messages_failed, 2);
    assert_eq!(service.publisher().attempts(), 2);

    let pending = service.find_pending(&Specification::all()).await.unwrap();
    assert!(pending.iter().all(|m| m.retry_count == 1));
}

// ============================================================================
// Test 3: store outages are counted and survived
// ============================================================================

#[tokio::test]
async fn worker_keeps_polling_through_store_outages() {
    let service = service(10, Duration::from_millis(10));
    stage(&service, vec![DomainEvent::json("ClientCreated", "{}")]).await;
    service.store().set_offline(true);

    let worker = OutboxWorker::spawn(service.clone());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(service.publisher().published().is_empty());

    service.store().set_offline(false);
    assert!(wait_until(|| service.publisher().published().len() == 1).await);

    let stats = worker.stop().await;
    assert!(stats.errors >= 1);
    assert_eq!(stats.messages_processed, 1);
}

// ============================================================================
// Test 4: failures are counted, not fatal
// ============================================================================

#[tokio::test]
async fn publish_failures_show_up_in_stats() {
    init_tracing();
    let service = Arc::new(OutboxService::with_config(
        InMemoryOutboxStore::new(),
        RecordingPublisher::new().failing_on("ClientSuspended"),
        config("bg-failing").with_max_retries(1),
    ));
    stage(
        &service,
        vec![
            DomainEvent::json("ClientCreated", "{}"),
            DomainEvent::json("ClientSuspended", "{}"),
        ],
    )
    .await;

    let worker = OutboxWorker::spawn(service.clone());
    assert!(wait_until(|| service.publisher().attempts() == 2).await);
    tokio::time::sleep(Duration::from_millis(30)).await;

    let stats = worker.stop().await;
    assert_eq!(stats.messages_processed, 1);
    assert_eq!(stats.messages_failed, 1);
    assert_eq!(service.dead_letters().await.unwrap().len(), 1);
}

// ============================================================================
// Test 5: a parent token stops the worker
// ============================================================================

#[tokio::test]
async fn cancelling_the_parent_token_stops_the_worker() {
    let service = service(10, Duration::from_millis(10));
    let shutdown = CancellationToken::new();

    let worker = OutboxWorker::spawn_with_token(service.clone(), shutdown.child_token());
    assert!(worker.is_running());

    shutdown.cancel();
    assert!(wait_until(|| !worker.is_running()).await);

    let stats = worker.stop().await;
    assert!(stats.polls >= 1);
}

#[tokio::test]
async fn dropping_the_worker_stops_it() {
    let service = service(10, Duration::from_millis(10));
    let worker = OutboxWorker::spawn(service.clone());
    drop(worker);

    tokio::time::sleep(Duration::from_millis(30)).await;
    stage(&service, vec![DomainEvent::json("ClientCreated", "{}")]).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(service.publisher().published().is_empty());
}
