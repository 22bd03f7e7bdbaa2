//! Background job system with priority, retry, backoff, and dead-letter handling.
//!
//! ## Design
//!
//! - Jobs are typed; the payload is a tagged enum validated at submission
//! - Each job type is its own queue with its own concurrency limit
//! - Retry policy with exponential backoff, honouring upstream `retry_after`
//! - Dead-letter queue for jobs that exhausted retries or failed fatally
//! - Visibility into queue depth, failures, and per-job attempt history
//!
//! ## Components
//!
//! - `Job`: Core job abstraction with payload and metadata
//! - `JobStore`: Persistence for jobs, partitioned per job type
//! - `Dispatcher`: Submission, claiming, and the retry/dead-letter state machine
//! - `WorkerPool`: Per-type worker threads running registered handlers

pub mod dispatcher;
pub mod executor;
pub mod payload;
pub mod store;
pub mod types;

pub use dispatcher::{
    DispatchError, Dispatcher, DispatcherConfig, FailOutcome, JobQueue, QueueLimits, QueueStats,
    SubmitError,
};
pub use executor::{ExecutorStats, JobHandler, JobOutcome, WorkerPool, WorkerPoolHandle};
pub use payload::{
    CertificatePayload, CleanupPayload, EmailPayload, EmployeeSyncPayload, JobPayload,
    OrgSyncPayload, SkillDetectionPayload, WebhookPayload,
};
pub use store::{InMemoryJobStore, JobStore, JobStoreError, QueueCounts};
pub use types::{
    priority, FailureKind, Job, JobAttemptRecord, JobError, JobId, JobOptions, JobResult,
    JobStatus, JobType, RetryPolicy,
};
pub(crate) use types::to_chrono;
