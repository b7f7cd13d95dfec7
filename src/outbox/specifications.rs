//! Named outbox queries.

use uuid::Uuid;

use super::OutboxMessage;
use crate::specification::Specification;

/// The message staged for `event_id`, if any.
pub fn by_domain_event_id(event_id: Uuid) -> Specification<OutboxMessage> {
    Specification::new(move |m: &OutboxMessage| m.id == event_id)
        .named(format!("by_domain_event_id({event_id})"))
        .take(1)
}

/// Unprocessed messages, oldest first.
pub fn pending() -> Specification<OutboxMessage> {
    Specification::new(|m: &OutboxMessage| !m.processed)
        .named("pending")
        .order_by(oldest_first)
}

/// Messages that failed at least once and were never delivered.
pub fn failed() -> Specification<OutboxMessage> {
    Specification::new(|m: &OutboxMessage| !m.processed && m.retry_count > 0)
        .named("failed")
        .order_by(oldest_first)
}

pub fn processed() -> Specification<OutboxMessage> {
    Specification::new(|m: &OutboxMessage| m.processed)
        .named("processed")
        .order_by(oldest_first)
}

/// Messages that hit the retry cap and will not be claimed again.
pub fn exhausted(max_retries: u32) -> Specification<OutboxMessage> {
    Specification::new(move |m: &OutboxMessage| !m.processed && m.retry_count >= max_retries)
        .named(format!("exhausted({max_retries})"))
        .order_by(oldest_first)
}

pub(crate) fn oldest_first(a: &OutboxMessage, b: &OutboxMessage) -> std::cmp::Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.sequence.cmp(&b.sequence))
}
