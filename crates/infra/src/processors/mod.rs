//! Job handlers, one per job type.
//!
//! Every processor is idempotent except [`EmailProcessor`], which is
//! registered as non-idempotent so a flaky send is never repeated.

mod certificate;
mod cleanup;
mod email;
mod employee_sync;
mod org_sync;
mod skill_detection;
mod webhook;

use std::collections::HashMap;
use std::sync::Arc;

use skillgraph_scoring::SignalSource;
use tracing::debug;

use crate::external::{
    CertificateRenderer, IntegrationStatusSink, Mailer, OrganizationDirectory, SignalExtractor,
};
use crate::jobs::{
    Job, JobError, JobId, JobOptions, JobPayload, JobQueue, JobStore, JobStoreError, JobType,
    SubmitError, WorkerPool,
};
use crate::skills::{Reconciler, SkillCatalog, SkillRecordStore};

pub use certificate::CertificateProcessor;
pub use cleanup::CleanupProcessor;
pub use email::EmailProcessor;
pub use employee_sync::EmployeeSyncProcessor;
pub use org_sync::OrgSyncProcessor;
pub use skill_detection::SkillDetectionProcessor;
pub use webhook::WebhookProcessor;

/// Reconciler over type-erased stores, shared by the processors.
pub type SharedReconciler = Reconciler<Arc<dyn SkillRecordStore>, Arc<dyn SkillCatalog>>;

/// Everything the processors talk to.
#[derive(Clone)]
pub struct ProcessorDeps {
    pub queue: Arc<dyn JobQueue>,
    pub directory: Arc<dyn OrganizationDirectory>,
    pub extractors: HashMap<SignalSource, Arc<dyn SignalExtractor>>,
    pub status_sink: Arc<dyn IntegrationStatusSink>,
    pub reconciler: Arc<SharedReconciler>,
    pub records: Arc<dyn SkillRecordStore>,
    pub mailer: Arc<dyn Mailer>,
    pub renderer: Arc<dyn CertificateRenderer>,
}

/// Register a processor for every job type.
pub fn register_all<S: JobStore + 'static>(pool: &mut WorkerPool<S>, deps: ProcessorDeps) {
    pool.register(
        JobType::OrgSync,
        OrgSyncProcessor::new(deps.directory.clone(), deps.queue.clone()),
    );
    pool.register(
        JobType::EmployeeSync,
        EmployeeSyncProcessor::new(deps.directory.clone(), deps.queue.clone()),
    );
    pool.register(
        JobType::SkillDetection,
        SkillDetectionProcessor::new(
            deps.extractors,
            deps.reconciler,
            deps.status_sink,
        ),
    );
    pool.register(
        JobType::WebhookProcess,
        WebhookProcessor::new(deps.directory, deps.queue.clone()),
    );
    pool.register(
        JobType::CertificateGeneration,
        CertificateProcessor::new(deps.records.clone(), deps.renderer),
    );
    pool.register_non_idempotent(JobType::EmailSend, EmailProcessor::new(deps.mailer));
    pool.register(JobType::Cleanup, CleanupProcessor::new(deps.queue, deps.records));
}

fn unexpected_payload(job: &Job) -> JobError {
    JobError::fatal(format!(
        "{} job {} carries a {} payload",
        job.job_type,
        job.id,
        job.payload.job_type()
    ))
}

/// Follow-up submissions: a rejected payload is a bug, a storage error is transient.
fn submit_error(err: SubmitError) -> JobError {
    match err {
        SubmitError::Validation(e) => JobError::fatal(format!("follow-up job rejected: {e}")),
        SubmitError::Store(e) => {
            JobError::retryable(format!("failed to enqueue follow-up job: {e}"))
        }
    }
}

/// Enqueue a follow-up job under an id derived from the parent job and `name`.
///
/// A child that already exists was enqueued by an earlier attempt of the same
/// parent and is not submitted again.
fn submit_child(
    queue: &dyn JobQueue,
    parent: &Job,
    name: &str,
    payload: JobPayload,
    options: JobOptions,
) -> Result<JobId, JobError> {
    let child = JobId::derived(parent.id, name);
    match queue.submit(payload, options.with_job_id(child)) {
        Ok(id) => Ok(id),
        Err(SubmitError::Store(JobStoreError::AlreadyExists(id))) => {
            debug!(job_id = %parent.id, child_job_id = %id, "follow-up job already enqueued");
            Ok(id)
        }
        Err(e) => Err(submit_error(e)),
    }
}

fn collaborator_error(what: &str, err: anyhow::Error) -> JobError {
    JobError::retryable(format!("{what} failed: {err:#}"))
}
