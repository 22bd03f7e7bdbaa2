//! Worker pool: per-type worker threads that run registered handlers.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::dispatcher::{DispatchError, Dispatcher, FailOutcome};
use super::store::JobStore;
use super::types::{Job, JobError, JobResult, JobType};

/// Processes one kind of job.
///
/// Handlers must be idempotent unless registered with
/// [`WorkerPool::register_non_idempotent`].
pub trait JobHandler: Send + Sync + 'static {
    fn handle(&self, job: &Job) -> JobResult;
}

impl<F> JobHandler for F
where
    F: Fn(&Job) -> JobResult + Send + Sync + 'static,
{
    fn handle(&self, job: &Job) -> JobResult {
        self(job)
    }
}

#[derive(Clone)]
struct Registration {
    handler: Arc<dyn JobHandler>,
    idempotent: bool,
}

/// Result of executing one claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(FailOutcome),
}

/// Worker pool runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub jobs_dead_lettered: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// Handle to a running worker pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    stop: Arc<AtomicBool>,
    workers: Vec<thread::JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
    started: Instant,
}

impl WorkerPoolHandle {
    /// Stop claiming new jobs and wait for in-flight jobs to finish.
    pub fn shutdown(self) {
        self.stop.store(true, Ordering::SeqCst);
        for worker in self.workers {
            if worker.join().is_err() {
                error!("worker thread panicked");
            }
        }
        info!("worker pool stopped");
    }

    pub fn stats(&self) -> ExecutorStats {
        let mut stats = lock_stats(&self.stats).clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

/// Handler registry plus the claim/execute loop for every registered type.
pub struct WorkerPool<S: JobStore> {
    dispatcher: Arc<Dispatcher<S>>,
    handlers: HashMap<JobType, Registration>,
    job_timeout: Duration,
    poll_interval: Duration,
}

impl<S: JobStore + 'static> WorkerPool<S> {
    pub fn new(dispatcher: Arc<Dispatcher<S>>) -> Self {
        let job_timeout = dispatcher.config().job_timeout();
        let poll_interval = dispatcher.config().poll_interval();
        Self {
            dispatcher,
            handlers: HashMap::new(),
            job_timeout,
            poll_interval,
        }
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher<S>> {
        &self.dispatcher
    }

    /// Register the handler for a job type, replacing any previous one.
    pub fn register<H: JobHandler>(&mut self, job_type: JobType, handler: H) {
        self.insert(job_type, Arc::new(handler), true);
    }

    /// Register a handler whose side effects must not be repeated; its
    /// retryable failures are treated as fatal.
    pub fn register_non_idempotent<H: JobHandler>(&mut self, job_type: JobType, handler: H) {
        self.insert(job_type, Arc::new(handler), false);
    }

    fn insert(&mut self, job_type: JobType, handler: Arc<dyn JobHandler>, idempotent: bool) {
        if self
            .handlers
            .insert(job_type, Registration { handler, idempotent })
            .is_some()
        {
            warn!(job_type = %job_type, "handler replaced");
        }
    }

    pub fn registered_types(&self) -> Vec<JobType> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort();
        types
    }

    /// Claim and execute at most one job of `job_type` on the calling thread.
    pub fn run_once(&self, job_type: JobType) -> Result<Option<JobOutcome>, DispatchError> {
        match self.dispatcher.claim(job_type)? {
            Some(job) => self.execute(job).map(Some),
            None => Ok(None),
        }
    }

    /// Execute a claimed job and report the result to the dispatcher.
    ///
    /// Does not return before the handler thread has exited, even when the
    /// attempt was already failed for exceeding the timeout; the calling worker
    /// therefore never runs more than one handler at a time.
    fn execute(&self, job: Job) -> Result<JobOutcome, DispatchError> {
        let job_id = job.id;
        let job_type = job.job_type;

        let Some(registration) = self.handlers.get(&job_type).cloned() else {
            warn!(job_id = %job_id, job_type = %job_type, "no handler for job");
            let err = JobError::fatal(format!("no handler registered for {job_type}"));
            return self.dispatcher.fail(job_id, &err).map(JobOutcome::Failed);
        };

        let started = Instant::now();
        let (result, handler_thread) =
            run_with_timeout(registration.handler, job, self.job_timeout);

        let outcome = match result {
            Ok(value) => self.dispatcher.complete(job_id, value).map(|_| {
                debug!(
                    job_id = %job_id,
                    job_type = %job_type,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "job succeeded"
                );
                JobOutcome::Completed
            }),
            Err(err) => {
                let err = if !registration.idempotent && err.kind.is_retryable() {
                    JobError::fatal(format!("{err} (not retried: handler is not idempotent)"))
                } else {
                    err
                };
                self.dispatcher.fail(job_id, &err).map(JobOutcome::Failed)
            }
        };

        if let Some(thread) = handler_thread {
            if !thread.is_finished() {
                warn!(
                    job_id = %job_id,
                    job_type = %job_type,
                    "waiting for timed-out handler to exit"
                );
            }
            if thread.join().is_err() {
                error!(job_id = %job_id, "handler thread panicked outside the handler");
            }
        }
        outcome
    }

    /// Start `concurrency(type)` worker threads for every registered type.
    pub fn spawn(self) -> std::io::Result<WorkerPoolHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(ExecutorStats::default()));
        let types = self.registered_types();
        let pool = Arc::new(self);
        let mut workers = Vec::new();

        for job_type in types {
            for n in 0..pool.dispatcher.concurrency(job_type) {
                let name = format!("{job_type}-{n}");
                let spawned = {
                    let pool = pool.clone();
                    let stop = stop.clone();
                    let stats = stats.clone();
                    let name = name.clone();
                    thread::Builder::new()
                        .name(name.clone())
                        .spawn(move || worker_loop(&pool, job_type, &name, &stop, &stats))
                };

                match spawned {
                    Ok(handle) => workers.push(handle),
                    Err(e) => {
                        error!(worker = %name, error = %e, "failed to spawn worker");
                        stop.store(true, Ordering::SeqCst);
                        for worker in workers {
                            let _ = worker.join();
                        }
                        return Err(e);
                    }
                }
            }
        }

        info!(workers = workers.len(), "worker pool started");
        Ok(WorkerPoolHandle {
            stop,
            workers,
            stats,
            started: Instant::now(),
        })
    }
}

fn worker_loop<S: JobStore + 'static>(
    pool: &WorkerPool<S>,
    job_type: JobType,
    name: &str,
    stop: &AtomicBool,
    stats: &Mutex<ExecutorStats>,
) {
    debug!(worker = %name, job_type = %job_type, "worker started");

    while !stop.load(Ordering::SeqCst) {
        match pool.dispatcher.claim(job_type) {
            Ok(Some(job)) => {
                let job_id = job.id;
                lock_stats(stats).current_running += 1;

                let result = pool.execute(job);

                let mut s = lock_stats(stats);
                s.current_running = s.current_running.saturating_sub(1);
                s.jobs_processed += 1;
                match result {
                    Ok(JobOutcome::Completed) => s.jobs_succeeded += 1,
                    Ok(JobOutcome::Failed(FailOutcome::Retrying { .. })) => s.jobs_retried += 1,
                    Ok(JobOutcome::Failed(FailOutcome::DeadLettered { .. })) => {
                        s.jobs_dead_lettered += 1
                    }
                    Err(ref e) => {
                        error!(
                            worker = %name,
                            job_id = %job_id,
                            error = %e,
                            "failed to record job outcome"
                        );
                    }
                }
            }
            Ok(None) => thread::sleep(pool.poll_interval),
            Err(e) => {
                error!(worker = %name, job_type = %job_type, error = %e, "failed to claim job");
                thread::sleep(pool.poll_interval);
            }
        }
    }

    debug!(worker = %name, "worker stopped");
}

/// Run the handler on its own thread so a hung or panicking handler cannot take
/// the worker down. A handler still running at the deadline yields a timeout
/// error and its eventual result is dropped.
///
/// Returns the handler thread so the caller can wait for it to exit.
fn run_with_timeout(
    handler: Arc<dyn JobHandler>,
    job: Job,
    timeout: Duration,
) -> (JobResult, Option<thread::JoinHandle<()>>) {
    let job_id = job.id;
    let (tx, rx) = mpsc::channel();

    let spawned = thread::Builder::new()
        .name(format!("job-{job_id}"))
        .spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&job)));
            // Receiver is gone if the job already timed out.
            let _ = tx.send(result);
        });
    let thread = match spawned {
        Ok(thread) => thread,
        Err(e) => {
            let err = JobError::retryable(format!("failed to start handler thread: {e}"));
            return (Err(err), None);
        }
    };

    let result = match rx.recv_timeout(timeout) {
        Ok(Ok(result)) => result,
        Ok(Err(payload)) => {
            let message = panic_message(payload.as_ref());
            error!(job_id = %job_id, panic = %message, "job handler panicked");
            Err(JobError::fatal(format!("handler panicked: {message}")))
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            warn!(job_id = %job_id, timeout_ms = timeout.as_millis() as u64, "job timed out");
            Err(JobError::retryable(format!(
                "timed out after {}ms",
                timeout.as_millis()
            )))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(JobError::fatal("handler thread exited without a result"))
        }
    };
    (result, Some(thread))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn lock_stats(stats: &Mutex<ExecutorStats>) -> MutexGuard<'_, ExecutorStats> {
    stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
