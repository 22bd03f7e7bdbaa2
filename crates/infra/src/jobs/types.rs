//! Core job types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::payload::JobPayload;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Stable id of a child job: the same parent and name always yield the
    /// same id, so re-running the parent cannot enqueue the child twice.
    pub fn derived(parent: JobId, name: &str) -> Self {
        Self(Uuid::new_v5(&parent.0, name.as_bytes()))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job type: selects the queue, its concurrency limit and its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    OrgSync,
    EmployeeSync,
    SkillDetection,
    CertificateGeneration,
    EmailSend,
    WebhookProcess,
    Cleanup,
}

impl JobType {
    pub const ALL: [JobType; 7] = [
        JobType::OrgSync,
        JobType::EmployeeSync,
        JobType::SkillDetection,
        JobType::CertificateGeneration,
        JobType::EmailSend,
        JobType::WebhookProcess,
        JobType::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::OrgSync => "org-sync",
            JobType::EmployeeSync => "employee-sync",
            JobType::SkillDetection => "skill-detection",
            JobType::CertificateGeneration => "certificate-generation",
            JobType::EmailSend => "email-send",
            JobType::WebhookProcess => "webhook-process",
            JobType::Cleanup => "cleanup",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job execution status.
///
/// A job whose attempt failed with a retryable error goes back to `Waiting`
/// with `delay_until` set to the end of its backoff; `attempts` and
/// `last_error` record the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting to be picked up
    Waiting,
    /// Currently being executed
    Active,
    /// Completed successfully
    Completed,
    /// Exhausted retries or hit a non-retryable error
    DeadLettered,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::DeadLettered)
    }

    /// Whether a worker may claim from this status (subject to `delay_until`).
    pub fn is_claimable(&self) -> bool {
        matches!(self, JobStatus::Waiting)
    }
}

/// Priority values; lower numbers are serviced first.
pub mod priority {
    pub const HIGH: i32 = 1;
    pub const NORMAL: i32 = 5;
    pub const LOW: i32 = 10;
}

/// Retry policy: exponential backoff `base_delay * 2^attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts before the job is dead-lettered
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Backoff after the `attempts`-th failed attempt.
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        let factor = 2u32.checked_pow(attempts).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Check if another attempt is allowed after `attempts` failures.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Submission options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    pub priority: i32,
    pub delay: Option<Duration>,
    /// Overrides the dispatcher default when set.
    pub max_attempts: Option<u32>,
    /// Fixed id instead of a fresh one; submitting it twice is rejected.
    pub job_id: Option<JobId>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: priority::NORMAL,
            delay: None,
            max_attempts: None,
            job_id: None,
        }
    }
}

impl JobOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }
}

/// A background job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub payload: JobPayload,
    /// Lower is sooner
    pub priority: i32,
    /// Not claimable before this instant
    pub delay_until: Option<DateTime<Utc>>,
    pub status: JobStatus,
    /// Failed attempts so far (only ever increases)
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Submission order within the store, used for FIFO tie-breaking
    pub sequence: u64,
    /// Execution history (one record per finished attempt)
    pub history: Vec<JobAttemptRecord>,
}

/// Record of a job execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAttemptRecord {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl Job {
    pub(crate) fn new(
        payload: JobPayload,
        options: &JobOptions,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: options.job_id.unwrap_or_default(),
            job_type: payload.job_type(),
            payload,
            priority: options.priority,
            delay_until: options.delay.map(|d| now + to_chrono(d)),
            status: JobStatus::Waiting,
            attempts: 0,
            max_attempts,
            last_error: None,
            result: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            sequence: 0,
            history: Vec::new(),
        }
    }

    /// Check if the job can be claimed at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.delay_until.is_none_or(|at| now >= at)
    }

    /// Waiting for another attempt after a retryable failure.
    pub fn is_retry_pending(&self) -> bool {
        self.status == JobStatus::Waiting && self.attempts > 0
    }

    pub(crate) fn mark_active(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Active;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    pub(crate) fn mark_completed(&mut self, result: serde_json::Value, now: DateTime<Utc>) {
        self.record_attempt(true, None, now);
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Record a failed attempt; the caller decides the follow-up status.
    pub(crate) fn mark_attempt_failed(&mut self, error: &str, now: DateTime<Utc>) {
        self.record_attempt(false, Some(error.to_string()), now);
        self.attempts += 1;
        self.last_error = Some(error.to_string());
        self.updated_at = now;
    }

    fn record_attempt(&mut self, success: bool, error: Option<String>, now: DateTime<Utc>) {
        let started_at = self.started_at.unwrap_or(now);
        self.history.push(JobAttemptRecord {
            started_at,
            finished_at: now,
            success,
            error,
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
        });
    }
}

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transient (network timeout, upstream 5xx): retry with backoff.
    Retryable,
    /// Upstream asked us to slow down; retry no sooner than `retry_after`.
    RateLimited { retry_after: Duration },
    /// Never retry (auth failure, bad input, bug).
    Fatal,
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureKind::Fatal)
    }
}

/// Classified error returned by every job handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct JobError {
    pub kind: FailureKind,
    pub message: String,
}

impl JobError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Retryable,
            message: message.into(),
        }
    }

    pub fn rate_limited(retry_after: Duration, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::RateLimited { retry_after },
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            message: message.into(),
        }
    }
}

/// Outcome of handler execution.
pub type JobResult = Result<serde_json::Value, JobError>;

/// Longest delay representable on a timestamp; larger backoffs are capped.
const MAX_DELAY_DAYS: i64 = 36_500;

pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
    let cap = chrono::Duration::days(MAX_DELAY_DAYS);
    chrono::Duration::from_std(d).map_or(cap, |d| d.min(cap))
}
