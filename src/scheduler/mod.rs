//! Admission, ordering and hand-off of prompt jobs.
//!
//! HTTP handlers talk to the scheduler through [`PromptScheduler`]; the
//! inference worker talks to it through [`JobSource`]. [`SchedulerGateway`]
//! implements both over a single lock.

use chrono::{DateTime, Utc};
use serde::Serialize;

pub mod error;
pub mod gateway;
pub mod id_alloc;
pub mod job;
pub mod queue;
pub mod store;

pub use error::SchedulerError;
pub use gateway::{GatewayConfig, SchedulerGateway};
pub use id_alloc::IdAllocator;
pub use job::{Job, JobId, JobRequest, JobResult, Priority};
pub use queue::{PriorityQueue, QueueEntry};
pub use store::JobStore;

/// Returned to a submitter on admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub id: JobId,
    /// Rank at the moment of insertion. Informational only.
    pub position: usize,
}

/// What the worker receives from `pull`.
#[derive(Debug, Clone, PartialEq)]
pub struct PulledJob {
    pub id: JobId,
    pub prompt: String,
    pub model: String,
    pub priority: Priority,
    pub mirostat: Option<u32>,
}

/// What the worker reports back through `complete`.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub response: String,
    pub elapsed_ms: f64,
    pub tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    /// `position` is `None` while the job is in flight.
    Pending { position: Option<usize> },
    Complete(JobResult),
}

/// A poller's view of one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobView {
    pub id: JobId,
    pub prompt: String,
    pub model: String,
    pub priority: Priority,
    pub queued_at: DateTime<Utc>,
    pub state: JobState,
}

/// Lifetime counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub submitted: u64,
    pub completed: u64,
    pub elapsed_ms: f64,
    pub tokens: u64,
}

/// Consistent copy of scheduler state taken under the lock.
#[derive(Debug, Clone)]
pub struct GatewaySnapshot {
    pub queue: Vec<QueueEntry>,
    pub jobs: Vec<Job>,
    pub totals: Totals,
    pub in_flight: Option<JobId>,
}

/// Submitter and poller face of the scheduler.
pub trait PromptScheduler: Send + Sync {
    fn submit(&self, request: JobRequest) -> Result<SubmitReceipt, SchedulerError>;

    fn query(&self, id: JobId) -> Option<JobView>;

    fn snapshot(&self) -> GatewaySnapshot;
}

/// Worker face of the scheduler.
pub trait JobSource: Send + Sync {
    /// Blocks until a job is available; `Ok(None)` means shut down. An `Err`
    /// is an invariant violation and the caller must stop pulling.
    fn pull(&self) -> Result<Option<PulledJob>, SchedulerError>;

    fn complete(&self, completion: Completion) -> Result<Option<JobId>, SchedulerError>;

    /// Reports the previous result, if any, then fetches the next job.
    fn next_job(&self, previous: Option<Completion>) -> Result<Option<PulledJob>, SchedulerError> {
        if let Some(completion) = previous {
            self.complete(completion)?;
        }
        self.pull()
    }
}
