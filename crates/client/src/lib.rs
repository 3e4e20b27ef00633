//! HTTP client for the remote task center.
//!
//! [`TaskClient`](task_client::TaskClient) fetches workflow jobs, submits
//! results, and probes reachability. Transient transport faults are retried
//! with exponential backoff per [`retry::RetryPolicy`]; the method contracts
//! themselves degrade to "no task" / "submission failed" instead of raising.

pub mod retry;
pub mod submission;
pub mod task_client;

pub use retry::RetryPolicy;
pub use submission::ResultSubmission;
pub use task_client::{TaskClient, TaskClientError};
