//! Dispatcher: typed submission, claiming, retry scheduling and dead letters.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use skillgraph_core::{DomainError, DomainResult};

use super::payload::JobPayload;
use super::store::{JobStore, JobStoreError, QueueCounts};
use super::types::{
    to_chrono, FailureKind, Job, JobError, JobId, JobOptions, JobStatus, JobType, RetryPolicy,
};

/// Per-type worker concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct QueueLimits {
    pub org_sync: usize,
    pub employee_sync: usize,
    pub skill_detection: usize,
    pub certificate_generation: usize,
    pub email_send: usize,
    pub webhook_process: usize,
    pub cleanup: usize,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            org_sync: 2,
            employee_sync: 5,
            skill_detection: 5,
            certificate_generation: 3,
            email_send: 10,
            webhook_process: 10,
            cleanup: 1,
        }
    }
}

impl QueueLimits {
    pub fn get(&self, job_type: JobType) -> usize {
        match job_type {
            JobType::OrgSync => self.org_sync,
            JobType::EmployeeSync => self.employee_sync,
            JobType::SkillDetection => self.skill_detection,
            JobType::CertificateGeneration => self.certificate_generation,
            JobType::EmailSend => self.email_send,
            JobType::WebhookProcess => self.webhook_process,
            JobType::Cleanup => self.cleanup,
        }
    }

    pub fn with(mut self, job_type: JobType, limit: usize) -> Self {
        let slot = match job_type {
            JobType::OrgSync => &mut self.org_sync,
            JobType::EmployeeSync => &mut self.employee_sync,
            JobType::SkillDetection => &mut self.skill_detection,
            JobType::CertificateGeneration => &mut self.certificate_generation,
            JobType::EmailSend => &mut self.email_send,
            JobType::WebhookProcess => &mut self.webhook_process,
            JobType::Cleanup => &mut self.cleanup,
        };
        *slot = limit;
        self
    }
}

/// Dispatcher configuration (`[dispatcher]` section of the settings file).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherConfig {
    pub queues: QueueLimits,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Attempts running longer than this are force-failed.
    pub job_timeout_secs: u64,
    /// Idle worker sleep between claims.
    pub poll_interval_ms: u64,
    pub completed_retention_days: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queues: QueueLimits::default(),
            max_attempts: 3,
            base_delay_ms: 2_000,
            job_timeout_secs: 300,
            poll_interval_ms: 100,
            completed_retention_days: 7,
        }
    }
}

impl DispatcherConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> DomainResult<()> {
        for job_type in JobType::ALL {
            if self.queues.get(job_type) == 0 {
                return Err(DomainError::validation(format!(
                    "queue concurrency for {job_type} must be at least 1"
                )));
            }
        }
        if self.max_attempts == 0 {
            return Err(DomainError::validation("max_attempts must be at least 1"));
        }
        if self.job_timeout_secs == 0 {
            return Err(DomainError::validation("job_timeout_secs must be at least 1"));
        }
        if self.poll_interval_ms == 0 {
            return Err(DomainError::validation("poll_interval_ms must be at least 1"));
        }
        if self.completed_retention_days == 0 {
            return Err(DomainError::validation(
                "completed_retention_days must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Submission failure.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid job: {0}")]
    Validation(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// Failure of a dispatcher operation on an existing job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("cannot {action} job {job_id} in status {status:?}")]
    InvalidTransition {
        job_id: JobId,
        status: JobStatus,
        action: &'static str,
    },

    #[error("job store error: {0}")]
    Store(JobStoreError),
}

impl From<JobStoreError> for DispatchError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::NotFound(id) => DispatchError::NotFound(id),
            JobStoreError::InvalidTransition {
                job_id,
                status,
                action,
            } => DispatchError::InvalidTransition {
                job_id,
                status,
                action,
            },
            other => DispatchError::Store(other),
        }
    }
}

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Retrying {
        attempts: u32,
        delay: Duration,
        delay_until: DateTime<Utc>,
    },
    DeadLettered {
        attempts: u32,
    },
}

/// Queue depth and failure counts for one job type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    /// Retries pending; these jobs are also in `waiting` or `delayed`.
    pub failed: usize,
    pub dead_lettered: usize,
    pub concurrency_limit: usize,
}

impl QueueStats {
    fn from_counts(counts: QueueCounts, concurrency_limit: usize) -> Self {
        Self {
            waiting: counts.waiting,
            delayed: counts.delayed,
            active: counts.active,
            completed: counts.completed,
            failed: counts.failed,
            dead_lettered: counts.dead_lettered,
            concurrency_limit,
        }
    }
}

/// Submission surface handed to processors that fan out follow-up work.
pub trait JobQueue: Send + Sync {
    fn submit(&self, payload: JobPayload, options: JobOptions) -> Result<JobId, SubmitError>;

    /// Delete completed jobs older than `older_than`.
    fn purge_completed(&self, older_than: Duration) -> Result<usize, DispatchError>;
}

/// Job dispatcher.
///
/// Owns the state machine `waiting -> active -> {completed | waiting(retry) |
/// dead_lettered}`. Every transition goes through the store's per-queue atomic
/// update, so there is no global lock.
pub struct Dispatcher<S: JobStore> {
    store: S,
    config: DispatcherConfig,
    retry: RetryPolicy,
}

impl<S: JobStore> Dispatcher<S> {
    pub fn new(store: S, config: DispatcherConfig) -> Self {
        let retry = config.retry_policy();
        Self {
            store,
            config,
            retry,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn concurrency(&self, job_type: JobType) -> usize {
        self.config.queues.get(job_type)
    }

    /// Validate and enqueue a job. Never waits on execution.
    pub fn submit(&self, payload: JobPayload, options: JobOptions) -> Result<JobId, SubmitError> {
        payload.validate()?;
        let max_attempts = options.max_attempts.unwrap_or(self.retry.max_attempts);
        if max_attempts == 0 {
            return Err(DomainError::validation("max_attempts must be at least 1").into());
        }

        let job = Job::new(payload, &options, max_attempts, Utc::now());
        let job_type = job.job_type;
        let id = self.store.insert(job)?;
        debug!(job_id = %id, job_type = %job_type, priority = options.priority, "job submitted");
        Ok(id)
    }

    /// Submit an untyped payload, parsed as the payload of `job_type`.
    pub fn submit_json(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<JobId, SubmitError> {
        let payload = JobPayload::from_json(job_type, payload)?;
        self.submit(payload, options)
    }

    pub fn claim(&self, job_type: JobType) -> Result<Option<Job>, DispatchError> {
        self.claim_at(job_type, Utc::now())
    }

    /// Claim the next eligible job of `job_type` as of `now`.
    pub fn claim_at(
        &self,
        job_type: JobType,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, DispatchError> {
        let job = self
            .store
            .claim_next(job_type, self.concurrency(job_type), now)?;
        if let Some(job) = &job {
            debug!(job_id = %job.id, job_type = %job_type, attempts = job.attempts, "job claimed");
        }
        Ok(job)
    }

    /// Mark an active job completed.
    pub fn complete(&self, job_id: JobId, result: serde_json::Value) -> Result<Job, DispatchError> {
        let now = Utc::now();
        let mut result = Some(result);
        let job = self.store.update_with(job_id, &mut |job| {
            ensure_active(job, "complete")?;
            job.mark_completed(result.take().unwrap_or_default(), now);
            Ok(())
        })?;
        debug!(job_id = %job_id, job_type = %job.job_type, "job completed");
        Ok(job)
    }

    pub fn fail(&self, job_id: JobId, error: &JobError) -> Result<FailOutcome, DispatchError> {
        self.fail_at(job_id, error, Utc::now())
    }

    /// Record a failed attempt at `now` and either schedule a retry or dead-letter.
    ///
    /// The attempt counter is incremented first; the job is retried while it
    /// stays below `max_attempts`, after `base_delay * 2^attempts` (or the
    /// upstream's `retry_after`, whichever is longer).
    pub fn fail_at(
        &self,
        job_id: JobId,
        error: &JobError,
        now: DateTime<Utc>,
    ) -> Result<FailOutcome, DispatchError> {
        let base_delay = self.retry.base_delay;
        let mut outcome = None;

        let job = self.store.update_with(job_id, &mut |job| {
            ensure_active(job, "fail")?;
            job.mark_attempt_failed(&error.message, now);

            let policy = RetryPolicy::exponential(job.max_attempts, base_delay);
            if error.kind.is_retryable() && policy.should_retry(job.attempts) {
                let backoff = policy.delay_for_attempt(job.attempts);
                let delay = match error.kind {
                    FailureKind::RateLimited { retry_after } => retry_after.max(backoff),
                    _ => backoff,
                };
                let delay_until = now + to_chrono(delay);
                job.status = JobStatus::Waiting;
                job.delay_until = Some(delay_until);
                outcome = Some(FailOutcome::Retrying {
                    attempts: job.attempts,
                    delay,
                    delay_until,
                });
            } else {
                job.status = JobStatus::DeadLettered;
                job.completed_at = Some(now);
                outcome = Some(FailOutcome::DeadLettered {
                    attempts: job.attempts,
                });
            }
            Ok(())
        })?;

        let outcome = outcome.ok_or_else(|| {
            DispatchError::Store(JobStoreError::Storage("failure outcome not recorded".into()))
        })?;

        match outcome {
            FailOutcome::Retrying { attempts, delay, .. } => warn!(
                job_id = %job_id,
                job_type = %job.job_type,
                attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "job failed, retry scheduled"
            ),
            FailOutcome::DeadLettered { attempts } => warn!(
                job_id = %job_id,
                job_type = %job.job_type,
                attempts,
                retryable = error.kind.is_retryable(),
                error = %error,
                "job dead-lettered"
            ),
        }
        Ok(outcome)
    }

    pub fn get(&self, job_id: JobId) -> Result<Option<Job>, DispatchError> {
        Ok(self.store.get(job_id)?)
    }

    pub fn list(
        &self,
        job_type: JobType,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, DispatchError> {
        Ok(self.store.list(job_type, status, limit)?)
    }

    /// Dead-lettered jobs, of one type or of all types.
    pub fn list_dead_letters(&self, job_type: Option<JobType>) -> Result<Vec<Job>, DispatchError> {
        let types = match job_type {
            Some(t) => vec![t],
            None => JobType::ALL.to_vec(),
        };

        let mut jobs = Vec::new();
        for t in types {
            jobs.extend(self.store.list(t, Some(JobStatus::DeadLettered), usize::MAX)?);
        }
        Ok(jobs)
    }

    /// Re-submit a dead letter with a fresh attempt budget.
    ///
    /// The job keeps its id, so handlers keyed on it stay idempotent across the
    /// replay. Concurrent replays of one dead letter enqueue it exactly once.
    pub fn retry_dead_letter(&self, job_id: JobId) -> Result<JobId, DispatchError> {
        let dead = self.take_dead_letter(job_id, "retry")?;

        let options = JobOptions::default()
            .with_priority(dead.priority)
            .with_max_attempts(dead.max_attempts)
            .with_job_id(job_id);
        let fresh = Job::new(dead.payload.clone(), &options, dead.max_attempts, Utc::now());
        if let Err(e) = self.store.insert(fresh) {
            // Put the dead letter back rather than lose it.
            self.store.insert(dead)?;
            return Err(e.into());
        }

        info!(job_id = %job_id, job_type = %dead.job_type, "dead letter re-submitted");
        Ok(job_id)
    }

    pub fn delete_dead_letter(&self, job_id: JobId) -> Result<Job, DispatchError> {
        let dead = self.take_dead_letter(job_id, "delete")?;
        info!(job_id = %job_id, job_type = %dead.job_type, "dead letter deleted");
        Ok(dead)
    }

    fn take_dead_letter(&self, job_id: JobId, action: &'static str) -> Result<Job, DispatchError> {
        self.store
            .take(job_id, JobStatus::DeadLettered)
            .map_err(|err| match err {
                JobStoreError::InvalidTransition { status, .. } => {
                    DispatchError::InvalidTransition {
                        job_id,
                        status,
                        action,
                    }
                }
                other => other.into(),
            })
    }

    pub fn stats_for(&self, job_type: JobType) -> Result<QueueStats, DispatchError> {
        let counts = self.store.counts(job_type, Utc::now())?;
        Ok(QueueStats::from_counts(counts, self.concurrency(job_type)))
    }

    /// Queue depth and failure counts per job type.
    pub fn stats(&self) -> Result<BTreeMap<JobType, QueueStats>, DispatchError> {
        JobType::ALL
            .into_iter()
            .map(|t| Ok((t, self.stats_for(t)?)))
            .collect()
    }

    /// Delete completed jobs that finished before `cutoff`.
    pub fn purge_completed_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DispatchError> {
        let mut purged = 0;
        for job_type in JobType::ALL {
            purged += self.store.remove_where(job_type, &|job| {
                job.status == JobStatus::Completed && job.completed_at.is_some_and(|at| at < cutoff)
            })?;
        }
        if purged > 0 {
            info!(purged, cutoff = %cutoff, "purged completed jobs");
        }
        Ok(purged)
    }
}

impl<S: JobStore> JobQueue for Dispatcher<S> {
    fn submit(&self, payload: JobPayload, options: JobOptions) -> Result<JobId, SubmitError> {
        Dispatcher::submit(self, payload, options)
    }

    fn purge_completed(&self, older_than: Duration) -> Result<usize, DispatchError> {
        self.purge_completed_before(Utc::now() - to_chrono(older_than))
    }
}

fn ensure_active(job: &Job, action: &'static str) -> Result<(), JobStoreError> {
    if job.status != JobStatus::Active {
        return Err(JobStoreError::InvalidTransition {
            job_id: job.id,
            status: job.status,
            action,
        });
    }
    Ok(())
}
