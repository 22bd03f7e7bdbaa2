//! Job storage implementations.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};

use super::types::{Job, JobId, JobStatus, JobType};

/// Job store abstraction.
///
/// Implementations must make `claim_next` and `update_with` atomic per job,
/// and must not serialize unrelated job types behind one lock.
pub trait JobStore: Send + Sync {
    /// Persist a new job, assigning its submission sequence.
    fn insert(&self, job: Job) -> Result<JobId, JobStoreError>;

    /// Get a job by ID.
    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Claim the most urgent ready job of `job_type` (lowest priority value,
    /// then oldest), unless `max_active` jobs of that type are already active.
    fn claim_next(
        &self,
        job_type: JobType,
        max_active: usize,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, JobStoreError>;

    /// Atomically apply `f` to a non-terminal job. Nothing is written if `f` fails.
    fn update_with(
        &self,
        job_id: JobId,
        f: &mut dyn FnMut(&mut Job) -> Result<(), JobStoreError>,
    ) -> Result<Job, JobStoreError>;

    /// List jobs of a type, oldest first.
    fn list(
        &self,
        job_type: JobType,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError>;

    /// Atomically delete a job, but only while it is in `status`.
    ///
    /// Of several concurrent callers at most one gets the job back.
    fn take(&self, job_id: JobId, status: JobStatus) -> Result<Job, JobStoreError>;

    /// Delete every job of a type matching `predicate`; active jobs are never removed.
    fn remove_where(
        &self,
        job_type: JobType,
        predicate: &dyn Fn(&Job) -> bool,
    ) -> Result<usize, JobStoreError>;

    /// Per-status counts for one job type.
    fn counts(&self, job_type: JobType, now: DateTime<Utc>) -> Result<QueueCounts, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("cannot {action} job {job_id} in status {status:?}")]
    InvalidTransition {
        job_id: JobId,
        status: JobStatus,
        action: &'static str,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueCounts {
    /// Waiting and due
    pub waiting: usize,
    /// Waiting but not yet due
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    /// Waiting jobs with a failed attempt behind them; also counted in
    /// `waiting` or `delayed`.
    pub failed: usize,
    pub dead_lettered: usize,
}

impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    fn insert(&self, job: Job) -> Result<JobId, JobStoreError> {
        (**self).insert(job)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).get(job_id)
    }

    fn claim_next(
        &self,
        job_type: JobType,
        max_active: usize,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, JobStoreError> {
        (**self).claim_next(job_type, max_active, now)
    }

    fn update_with(
        &self,
        job_id: JobId,
        f: &mut dyn FnMut(&mut Job) -> Result<(), JobStoreError>,
    ) -> Result<Job, JobStoreError> {
        (**self).update_with(job_id, f)
    }

    fn list(
        &self,
        job_type: JobType,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        (**self).list(job_type, status, limit)
    }

    fn take(&self, job_id: JobId, status: JobStatus) -> Result<Job, JobStoreError> {
        (**self).take(job_id, status)
    }

    fn remove_where(
        &self,
        job_type: JobType,
        predicate: &dyn Fn(&Job) -> bool,
    ) -> Result<usize, JobStoreError> {
        (**self).remove_where(job_type, predicate)
    }

    fn counts(&self, job_type: JobType, now: DateTime<Utc>) -> Result<QueueCounts, JobStoreError> {
        (**self).counts(job_type, now)
    }
}

type ReadyKey = (i32, u64, JobId);

/// One job type's partition.
#[derive(Debug, Default)]
struct Queue {
    jobs: HashMap<JobId, Job>,
    /// Claimable jobs ordered by (priority, sequence).
    ready: BTreeSet<ReadyKey>,
    active: usize,
}

impl Queue {
    fn ready_key(job: &Job) -> ReadyKey {
        (job.priority, job.sequence, job.id)
    }

    fn track(&mut self, job: &Job) {
        if job.status.is_claimable() {
            self.ready.insert(Self::ready_key(job));
        }
        if job.status == JobStatus::Active {
            self.active += 1;
        }
    }

    fn untrack(&mut self, job: &Job) {
        if job.status.is_claimable() {
            self.ready.remove(&Self::ready_key(job));
        }
        if job.status == JobStatus::Active {
            self.active = self.active.saturating_sub(1);
        }
    }
}

/// In-memory job store for tests/dev.
///
/// Each job type lives in its own mutex-guarded partition, so claims and
/// transitions on one queue never wait on another queue.
#[derive(Debug)]
pub struct InMemoryJobStore {
    queues: HashMap<JobType, Mutex<Queue>>,
    locations: RwLock<HashMap<JobId, JobType>>,
    sequence: AtomicU64,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            queues: JobType::ALL
                .into_iter()
                .map(|t| (t, Mutex::new(Queue::default())))
                .collect(),
            locations: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn queue(&self, job_type: JobType) -> Result<MutexGuard<'_, Queue>, JobStoreError> {
        self.queues
            .get(&job_type)
            .ok_or_else(|| JobStoreError::Storage(format!("no queue for {job_type}")))?
            .lock()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))
    }

    fn location(&self, job_id: JobId) -> Result<Option<JobType>, JobStoreError> {
        let locations = self
            .locations
            .read()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))?;
        Ok(locations.get(&job_id).copied())
    }

    fn forget(&self, job_ids: &[JobId]) -> Result<(), JobStoreError> {
        let mut locations = self
            .locations
            .write()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))?;
        for id in job_ids {
            locations.remove(id);
        }
        Ok(())
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, mut job: Job) -> Result<JobId, JobStoreError> {
        let id = job.id;
        {
            let mut locations = self
                .locations
                .write()
                .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))?;
            if locations.contains_key(&id) {
                return Err(JobStoreError::AlreadyExists(id));
            }
            locations.insert(id, job.job_type);
        }

        job.sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut queue = self.queue(job.job_type)?;
        queue.track(&job);
        queue.jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let Some(job_type) = self.location(job_id)? else {
            return Ok(None);
        };
        let queue = self.queue(job_type)?;
        Ok(queue.jobs.get(&job_id).cloned())
    }

    fn claim_next(
        &self,
        job_type: JobType,
        max_active: usize,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, JobStoreError> {
        let mut queue = self.queue(job_type)?;
        if queue.active >= max_active {
            return Ok(None);
        }

        // Ready set is ordered by (priority, sequence); skip jobs still backing off.
        let next = queue.ready.iter().copied().find(|(_, _, id)| {
            queue
                .jobs
                .get(id)
                .is_some_and(|job| job.is_ready(now))
        });

        let Some(key) = next else {
            return Ok(None);
        };

        queue.ready.remove(&key);
        queue.active += 1;
        let job = queue
            .jobs
            .get_mut(&key.2)
            .ok_or(JobStoreError::NotFound(key.2))?;
        job.mark_active(now);
        Ok(Some(job.clone()))
    }

    fn update_with(
        &self,
        job_id: JobId,
        f: &mut dyn FnMut(&mut Job) -> Result<(), JobStoreError>,
    ) -> Result<Job, JobStoreError> {
        let job_type = self
            .location(job_id)?
            .ok_or(JobStoreError::NotFound(job_id))?;
        let mut queue = self.queue(job_type)?;

        let current = queue
            .jobs
            .get(&job_id)
            .ok_or(JobStoreError::NotFound(job_id))?;
        if current.status.is_terminal() {
            return Err(JobStoreError::InvalidTransition {
                job_id,
                status: current.status,
                action: "modify",
            });
        }

        let mut next = current.clone();
        f(&mut next)?;

        let previous = current.clone();
        queue.untrack(&previous);
        queue.track(&next);
        queue.jobs.insert(job_id, next.clone());
        Ok(next)
    }

    fn list(
        &self,
        job_type: JobType,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        let queue = self.queue(job_type)?;
        let mut result: Vec<_> = queue
            .jobs
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();

        result.sort_by_key(|j| j.sequence);
        result.truncate(limit);
        Ok(result)
    }

    fn take(&self, job_id: JobId, status: JobStatus) -> Result<Job, JobStoreError> {
        let job_type = self
            .location(job_id)?
            .ok_or(JobStoreError::NotFound(job_id))?;

        let taken = {
            let mut queue = self.queue(job_type)?;
            let current = queue
                .jobs
                .get(&job_id)
                .map(|job| job.status)
                .ok_or(JobStoreError::NotFound(job_id))?;
            if current != status {
                return Err(JobStoreError::InvalidTransition {
                    job_id,
                    status: current,
                    action: "take",
                });
            }
            let job = queue
                .jobs
                .remove(&job_id)
                .ok_or(JobStoreError::NotFound(job_id))?;
            queue.untrack(&job);
            job
        };

        self.forget(&[job_id])?;
        Ok(taken)
    }

    fn remove_where(
        &self,
        job_type: JobType,
        predicate: &dyn Fn(&Job) -> bool,
    ) -> Result<usize, JobStoreError> {
        let removed: Vec<JobId> = {
            let mut queue = self.queue(job_type)?;
            let ids: Vec<JobId> = queue
                .jobs
                .values()
                .filter(|j| j.status != JobStatus::Active && predicate(j))
                .map(|j| j.id)
                .collect();
            for id in &ids {
                if let Some(job) = queue.jobs.remove(id) {
                    queue.untrack(&job);
                }
            }
            ids
        };

        self.forget(&removed)?;
        Ok(removed.len())
    }

    fn counts(&self, job_type: JobType, now: DateTime<Utc>) -> Result<QueueCounts, JobStoreError> {
        let queue = self.queue(job_type)?;
        let mut counts = QueueCounts::default();

        for job in queue.jobs.values() {
            match job.status {
                JobStatus::Waiting if job.is_ready(now) => counts.waiting += 1,
                JobStatus::Waiting => counts.delayed += 1,
                JobStatus::Active => counts.active += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::DeadLettered => counts.dead_lettered += 1,
            }
            if job.is_retry_pending() {
                counts.failed += 1;
            }
        }

        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::payload::{CleanupPayload, JobPayload};
    use crate::jobs::types::JobOptions;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn cleanup_job(options: JobOptions) -> Job {
        Job::new(
            JobPayload::Cleanup(CleanupPayload {
                completed_job_retention_days: 7,
                stale_skill_days: None,
            }),
            &options,
            3,
            Utc::now(),
        )
    }

    #[test]
    fn insert_and_claim() {
        let store = InMemoryJobStore::new();
        let job_id = store.insert(cleanup_job(JobOptions::default())).unwrap();

        let claimed = store
            .claim_next(JobType::Cleanup, 1, Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, job_id);
        assert_eq!(claimed.status, JobStatus::Active);

        // No more jobs
        assert!(store.claim_next(JobType::Cleanup, 5, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let store = InMemoryJobStore::new();
        let job = cleanup_job(JobOptions::default());
        store.insert(job.clone()).unwrap();
        assert_eq!(
            store.insert(job.clone()),
            Err(JobStoreError::AlreadyExists(job.id))
        );
    }

    #[test]
    fn lower_priority_value_is_claimed_first_then_fifo() {
        let store = InMemoryJobStore::new();
        let prioritized = |p| cleanup_job(JobOptions::default().with_priority(p));
        let low = store.insert(prioritized(10)).unwrap();
        let first_high = store.insert(prioritized(1)).unwrap();
        let second_high = store.insert(prioritized(1)).unwrap();

        let order: Vec<JobId> = (0..3)
            .map(|_| {
                store
                    .claim_next(JobType::Cleanup, 10, Utc::now())
                    .unwrap()
                    .unwrap()
                    .id
            })
            .collect();
        assert_eq!(order, vec![first_high, second_high, low]);
    }

    #[test]
    fn delayed_jobs_are_skipped_until_due() {
        let store = InMemoryJobStore::new();
        let delayed = store
            .insert(cleanup_job(
                JobOptions::default()
                    .with_priority(1)
                    .with_delay(Duration::from_secs(60)),
            ))
            .unwrap();
        let immediate = store.insert(cleanup_job(JobOptions::default())).unwrap();

        let now = Utc::now();
        let claimed = store.claim_next(JobType::Cleanup, 10, now).unwrap().unwrap();
        assert_eq!(claimed.id, immediate);
        assert!(store.claim_next(JobType::Cleanup, 10, now).unwrap().is_none());

        let later = now + chrono::Duration::seconds(61);
        let claimed = store.claim_next(JobType::Cleanup, 10, later).unwrap().unwrap();
        assert_eq!(claimed.id, delayed);
    }

    #[test]
    fn concurrency_limit_blocks_claims() {
        let store = InMemoryJobStore::new();
        store.insert(cleanup_job(JobOptions::default())).unwrap();
        store.insert(cleanup_job(JobOptions::default())).unwrap();

        let first = store.claim_next(JobType::Cleanup, 1, Utc::now()).unwrap().unwrap();
        assert!(store.claim_next(JobType::Cleanup, 1, Utc::now()).unwrap().is_none());

        store
            .update_with(first.id, &mut |job| {
                job.mark_completed(serde_json::Value::Null, Utc::now());
                Ok(())
            })
            .unwrap();
        assert!(store.claim_next(JobType::Cleanup, 1, Utc::now()).unwrap().is_some());
    }

    #[test]
    fn terminal_jobs_are_immutable() {
        let store = InMemoryJobStore::new();
        let id = store.insert(cleanup_job(JobOptions::default())).unwrap();
        store.claim_next(JobType::Cleanup, 1, Utc::now()).unwrap();
        store
            .update_with(id, &mut |job| {
                job.mark_completed(serde_json::Value::Null, Utc::now());
                Ok(())
            })
            .unwrap();

        let err = store.update_with(id, &mut |_| Ok(())).unwrap_err();
        assert!(matches!(
            err,
            JobStoreError::InvalidTransition {
                status: JobStatus::Completed,
                ..
            }
        ));
    }

    #[test]
    fn failed_update_leaves_job_untouched() {
        let store = InMemoryJobStore::new();
        let id = store.insert(cleanup_job(JobOptions::default())).unwrap();

        let result = store.update_with(id, &mut |job| {
            job.priority = 99;
            Err(JobStoreError::Storage("nope".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(store.get(id).unwrap().unwrap().priority, 5);
    }

    #[test]
    fn remove_where_spares_active_jobs() {
        let store = InMemoryJobStore::new();
        let active = store.insert(cleanup_job(JobOptions::default())).unwrap();
        store.insert(cleanup_job(JobOptions::default())).unwrap();
        store.claim_next(JobType::Cleanup, 1, Utc::now()).unwrap();

        let removed = store.remove_where(JobType::Cleanup, &|_| true).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(active).unwrap().is_some());
        assert!(matches!(
            store.take(active, JobStatus::DeadLettered),
            Err(JobStoreError::InvalidTransition { action: "take", .. })
        ));
    }

    #[test]
    fn take_only_removes_jobs_in_the_expected_status() {
        let store = InMemoryJobStore::new();
        let id = store.insert(cleanup_job(JobOptions::default())).unwrap();

        assert!(store.take(id, JobStatus::Completed).is_err());
        let taken = store.take(id, JobStatus::Waiting).unwrap();
        assert_eq!(taken.id, id);
        assert!(store.get(id).unwrap().is_none());
        assert_eq!(store.take(id, JobStatus::Waiting).unwrap_err(), JobStoreError::NotFound(id));
        assert_eq!(store.counts(JobType::Cleanup, Utc::now()).unwrap().waiting, 0);

        // the id is free again
        let again = cleanup_job(JobOptions::default().with_job_id(id));
        assert_eq!(store.insert(again).unwrap(), id);
    }

    #[test]
    fn counts_track_statuses() {
        let store = InMemoryJobStore::new();
        for _ in 0..3 {
            store.insert(cleanup_job(JobOptions::default())).unwrap();
        }
        store
            .insert(cleanup_job(JobOptions::default().with_delay(Duration::from_secs(600))))
            .unwrap();
        store.claim_next(JobType::Cleanup, 10, Utc::now()).unwrap();

        let counts = store.counts(JobType::Cleanup, Utc::now()).unwrap();
        assert_eq!(counts.waiting, 2);
        assert_eq!(counts.delayed, 1);
        assert_eq!(counts.active, 1);
        assert_eq!(store.counts(JobType::EmailSend, Utc::now()).unwrap(), QueueCounts::default());
    }

    #[test]
    fn concurrent_claims_never_hand_out_a_job_twice() {
        let store = InMemoryJobStore::arc();
        for _ in 0..200 {
            store.insert(cleanup_job(JobOptions::default())).unwrap();
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let mut claimed = Vec::new();
                    while let Some(job) =
                        store.claim_next(JobType::Cleanup, usize::MAX, Utc::now()).unwrap()
                    {
                        claimed.push(job.id);
                    }
                    claimed
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id), "job {id} claimed twice");
            }
        }
        assert_eq!(seen.len(), 200);
    }

    #[test]
    fn contended_claims_stay_within_active_limit() {
        const JOBS: usize = 40;
        const LIMIT: usize = 3;

        let store = InMemoryJobStore::arc();
        for _ in 0..JOBS {
            store.insert(cleanup_job(JobOptions::default())).unwrap();
        }

        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let running = running.clone();
                let peak = peak.clone();
                let done = done.clone();
                std::thread::spawn(move || {
                    while done.load(Ordering::SeqCst) < JOBS {
                        let claimed = store.claim_next(JobType::Cleanup, LIMIT, Utc::now());
                        let Some(job) = claimed.unwrap() else {
                            std::thread::yield_now();
                            continue;
                        };
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(1));
                        running.fetch_sub(1, Ordering::SeqCst);

                        store
                            .update_with(job.id, &mut |job| {
                                job.mark_completed(serde_json::Value::Null, Utc::now());
                                Ok(())
                            })
                            .unwrap();
                        done.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= LIMIT);
        let counts = store.counts(JobType::Cleanup, Utc::now()).unwrap();
        assert_eq!(counts.completed, JOBS);
        assert_eq!(counts.active, 0);
    }
}
