//! Outbox integration tests.
//!
//! Exercises the service end to end against the in-memory store:
//! - Staging events in the caller's unit of work
//! - Draining in order with per-message commits
//! - Failure recording, retries and the retry cap
//! - Claiming, cancellation and redelivery

mod staging;
mod scenarios;
