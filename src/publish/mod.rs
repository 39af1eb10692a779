//! Quota-aware publication of match videos

mod metadata;
mod publisher;
mod queue;
mod quota;
mod remote;
mod retry;
mod task;
#[cfg(test)]
mod tests;

pub use metadata::{MetadataBuilder, PublicationMetadata};
pub use publisher::{DrainReport, Publisher};
pub use queue::PublicationQueue;
pub use quota::QuotaLedger;
pub use remote::{classify_failure, HttpRemoteHost, RemoteHost};
pub use retry::{AttemptOutcome, RetryPolicy, RetryResult};
pub use task::{Enqueued, PublicationTask, QueueCounts, TaskState};
