//! Staging events alongside business writes.

use sourced_outbox::{
    CancellationToken, DomainEvent, InMemoryOutboxStore, LogPublisher, OutboxError,
    OutboxService, OutboxStore, PayloadCodec, PersistenceError, UnitOfWork, ValidationError,
};
use uuid::Uuid;

use crate::support::{config, service, stage, ClientCreated, RecordingPublisher};

// ============================================================================
// Test 1: save + commit yields exactly one pending message
// ============================================================================

#[tokio::test]
async fn committed_event_becomes_one_pending_message() {
    let service = service(RecordingPublisher::new());
    let event = DomainEvent::json("ClientCreated", r#"{"client_id":"c1"}"#);
    let id = event.id;

    stage(&service, vec![event]).await;

    let message = service.find_by_event_id(id).await.unwrap().unwrap();
    assert_eq!(message.id, id);
    assert_eq!(message.event_type, "ClientCreated");
    assert!(!message.processed);
    assert_eq!(message.retry_count, 0);
    assert!(message.last_error.is_none());
    assert_eq!(service.store().len().unwrap(), 1);
}

#[tokio::test]
async fn unknown_event_id_is_none() {
    let service = service(RecordingPublisher::new());
    assert!(service.find_by_event_id(Uuid::new_v4()).await.unwrap().is_none());
}

// ============================================================================
// Test 2: business row and outbox rows share one commit
// ============================================================================

#[tokio::test]
async fn business_write_and_events_commit_together() {
    let service = service(RecordingPublisher::new());
    let event = DomainEvent::json("ClientCreated", r#"{"client_id":"c1"}"#);
    let id = event.id;

    let mut uow = service.store().begin().await.unwrap();
    uow.upsert_raw("client:c1", br#"{"status":"active"}"#.to_vec());
    service.save_events(&mut uow, [event], &CancellationToken::new()).await.unwrap();

    // nothing visible before the commit
    assert!(service.find_by_event_id(id).await.unwrap().is_none());
    assert!(service.store().get_raw("client:c1").unwrap().is_none());

    assert_eq!(uow.save_changes().await.unwrap(), 2);

    assert!(service.find_by_event_id(id).await.unwrap().is_some());
    assert_eq!(
        service.store().get_raw("client:c1").unwrap().unwrap(),
        br#"{"status":"active"}"#.to_vec()
    );
}

#[tokio::test]
async fn abandoned_unit_of_work_leaves_no_trace() {
    let service = service(RecordingPublisher::new());
    let event = DomainEvent::json("ClientCreated", "{}");
    let id = event.id;

    {
        let mut uow = service.store().begin().await.unwrap();
        uow.upsert_raw("client:c1", b"{}".to_vec());
        service.save_events(&mut uow, [event], &CancellationToken::new()).await.unwrap();
    }

    assert!(service.find_by_event_id(id).await.unwrap().is_none());
    assert!(service.store().get_raw("client:c1").unwrap().is_none());

    let result = service
        .process_outbox_messages(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.claimed, 0);
    assert!(service.publisher().published().is_empty());
}

// ============================================================================
// Test 3: validation is all-or-nothing
// ============================================================================

#[tokio::test]
async fn invalid_events_are_rejected_before_staging() {
    let service = service(RecordingPublisher::new());
    let mut uow = service.store().begin().await.unwrap();

    let nil = DomainEvent::with_id(Uuid::nil(), "ClientCreated", PayloadCodec::Json, b"{}".to_vec());
    let err = service
        .save_events(
            &mut uow,
            [DomainEvent::json("ClientCreated", "{}"), nil],
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OutboxError::Validation(ValidationError::MissingId)));

    let untyped = DomainEvent::json("", "{}");
    let untyped_id = untyped.id;
    let err = service
        .save_events(&mut uow, [untyped], &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OutboxError::Validation(ValidationError::MissingEventType(id)) if id == untyped_id
    ));

    let twice = DomainEvent::json("ClientCreated", "{}");
    let twice_id = twice.id;
    let err = service
        .save_events(&mut uow, [twice.clone(), twice], &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OutboxError::Validation(ValidationError::DuplicateId(id)) if id == twice_id
    ));

    assert_eq!(uow.pending_changes(), 0);
    assert_eq!(uow.save_changes().await.unwrap(), 0);
    assert!(service.store().is_empty().unwrap());
}

#[tokio::test]
async fn cancelled_staging_leaves_the_business_write_uncommitted() {
    let service = service(RecordingPublisher::new());
    let event = DomainEvent::json("ClientCreated", "{}");
    let id = event.id;
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let mut uow = service.store().begin().await.unwrap();
    uow.upsert_raw("client:c1", b"{}".to_vec());
    let err = service
        .save_events(&mut uow, [event], &shutdown)
        .await
        .unwrap_err();
    assert!(matches!(err, OutboxError::Cancelled));
    drop(uow);

    assert!(service.find_by_event_id(id).await.unwrap().is_none());
    assert!(service.store().get_raw("client:c1").unwrap().is_none());
}

// ============================================================================
// Test 4: one message per event id
// ============================================================================

#[tokio::test]
async fn staging_the_same_event_twice_violates_the_store_constraint() {
    let service = service(RecordingPublisher::new());
    let event = DomainEvent::json("ClientCreated", "{}");
    let id = event.id;
    stage(&service, vec![event.clone()]).await;

    let mut uow = service.store().begin().await.unwrap();
    uow.upsert_raw("client:c1", b"{}".to_vec());
    service.save_events(&mut uow, [event], &CancellationToken::new()).await.unwrap();

    let err = uow.save_changes().await.unwrap_err();
    assert!(matches!(err, PersistenceError::DuplicateId(dup) if dup == id));
    assert_eq!(service.store().len().unwrap(), 1);
    assert!(service.store().get_raw("client:c1").unwrap().is_none());
}

// ============================================================================
// Test 5: typed payloads and metadata survive the trip
// ============================================================================

#[tokio::test]
async fn typed_payloads_round_trip_through_the_outbox() {
    let store = InMemoryOutboxStore::new();
    let service = OutboxService::with_config(
        store,
        RecordingPublisher::new(),
        config("typed").with_codec(PayloadCodec::Bitcode),
    );

    let payload = ClientCreated {
        client_id: "c1".into(),
        name: "Acme".into(),
    };
    let event = service
        .encode_event(&payload)
        .unwrap()
        .with_correlation_id("req-42")
        .with_causation_id("cmd-7");
    stage(&service, vec![event]).await;

    service
        .process_outbox_messages(&CancellationToken::new())
        .await
        .unwrap();

    let published = service.publisher().published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].codec, PayloadCodec::Bitcode);
    assert_eq!(published[0].decode::<ClientCreated>().unwrap(), payload);
    assert_eq!(published[0].correlation_id(), Some("req-42"));
    assert_eq!(published[0].causation_id(), Some("cmd-7"));
}

#[tokio::test]
async fn log_publisher_drains_staged_events() {
    let buffer = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let service = service(LogPublisher::with_buffer(buffer.clone()));
    stage(
        &service,
        vec![DomainEvent::json("ClientCreated", r#"{"client_id":"c1"}"#)],
    )
    .await;

    let result = service
        .process_outbox_messages(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.processed, 1);
    let lines = buffer.lock().unwrap();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains(r#"{"client_id":"c1"}"#));
}
