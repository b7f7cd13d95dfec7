//! Client lifecycle scenarios.

use sourced_outbox::{CancellationToken, DomainEvent, InMemoryQueue};

use crate::support::{service, stage, ClientCreated, ClientSuspended, RecordingPublisher};

// ============================================================================
// Scenario A/B: two events, both delivered in order
// ============================================================================

#[tokio::test]
async fn created_then_suspended_are_both_delivered_in_order() {
    let service = service(InMemoryQueue::new());
    let created = DomainEvent::encode(&ClientCreated {
        client_id: "c1".into(),
        name: "Acme".into(),
    })
    .unwrap();
    let suspended = DomainEvent::encode(&ClientSuspended {
        client_id: "c1".into(),
        reason: "overdue".into(),
    })
    .unwrap();
    let (a, b) = (created.id, suspended.id);

    stage(&service, vec![created, suspended]).await;
    let result = service
        .process_outbox_messages(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.processed, 2);
    assert_eq!(result.failed, 0);

    let subscriber = service.publisher().new_subscriber();
    let first = subscriber.poll().unwrap().unwrap();
    let second = subscriber.poll().unwrap().unwrap();
    assert!(subscriber.poll().unwrap().is_none());

    assert_eq!(first.id, a);
    assert_eq!(second.id, b);
    assert_eq!(first.decode::<ClientCreated>().unwrap().name, "Acme");
    assert_eq!(second.decode::<ClientSuspended>().unwrap().reason, "overdue");

    for id in [a, b] {
        let message = service.find_by_event_id(id).await.unwrap().unwrap();
        assert!(message.processed);
        assert_eq!(message.retry_count, 0);
    }
}

// ============================================================================
// Scenario C: the only event fails
// ============================================================================

#[tokio::test]
async fn single_failing_event_is_kept_for_retry() {
    let service = service(RecordingPublisher::new().failing_on("ClientCreated"));
    let event = DomainEvent::encode(&ClientCreated {
        client_id: "c2".into(),
        name: "Globex".into(),
    })
    .unwrap();
    let id = event.id;

    stage(&service, vec![event]).await;
    let result = service
        .process_outbox_messages(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.processed, 0);
    assert_eq!(result.failed, 1);

    let message = service.find_by_event_id(id).await.unwrap().unwrap();
    assert!(!message.processed);
    assert_eq!(message.retry_count, 1);
    assert!(message.last_error.is_some());
}
