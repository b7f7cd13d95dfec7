mod message;
mod service;
pub mod specifications;
mod worker;

pub use message::OutboxMessage;
pub use service::{DrainResult, OutboxService};
pub use worker::{OutboxWorker, WorkerStats};
