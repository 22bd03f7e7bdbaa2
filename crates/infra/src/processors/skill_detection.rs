use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use skillgraph_scoring::SignalSource;

use crate::external::{EmployeeRef, IntegrationStatusSink, SignalExtractor};
use crate::jobs::{Job, JobError, JobHandler, JobPayload, JobResult};
use crate::skills::ReconcileError;

use super::{unexpected_payload, SharedReconciler};

/// Extracts observations from one source, then scores and reconciles each.
///
/// Observations are stamped with the job id as their run id, so a retried job
/// replays into the same evidence entries instead of counting twice.
pub struct SkillDetectionProcessor {
    extractors: HashMap<SignalSource, Arc<dyn SignalExtractor>>,
    reconciler: Arc<SharedReconciler>,
    status_sink: Arc<dyn IntegrationStatusSink>,
}

impl SkillDetectionProcessor {
    pub fn new(
        extractors: HashMap<SignalSource, Arc<dyn SignalExtractor>>,
        reconciler: Arc<SharedReconciler>,
        status_sink: Arc<dyn IntegrationStatusSink>,
    ) -> Self {
        Self {
            extractors,
            reconciler,
            status_sink,
        }
    }
}

impl JobHandler for SkillDetectionProcessor {
    fn handle(&self, job: &Job) -> JobResult {
        let JobPayload::SkillDetection(payload) = &job.payload else {
            return Err(unexpected_payload(job));
        };
        let employee = EmployeeRef {
            organization_id: payload.organization_id,
            employee_id: payload.employee_id,
        };
        let source = &payload.source;

        let extractor = self.extractors.get(&source.provider).ok_or_else(|| {
            JobError::fatal(format!("no signal extractor for {}", source.provider))
        })?;

        let observations = match extractor.extract(&employee, source) {
            Ok(observations) => observations,
            Err(e) => {
                if e.is_credential_failure() {
                    warn!(
                        job_id = %job.id,
                        employee_id = %employee.employee_id,
                        provider = %source.provider,
                        account = %source.account,
                        "credential rejected, flagging integration"
                    );
                    self.status_sink
                        .credential_rejected(&employee, source, &e.to_string());
                }
                return Err(e.into());
            }
        };

        let run_id = job.id.as_uuid();
        let mut updated = 0usize;
        let mut skipped = 0usize;

        for observation in observations {
            if observation.employee_id != employee.employee_id {
                warn!(
                    job_id = %job.id,
                    skill = %observation.skill_name,
                    "observation belongs to another employee, skipped"
                );
                skipped += 1;
                continue;
            }

            match self.reconciler.apply(&observation.with_run_id(run_id)) {
                Ok(_) => updated += 1,
                Err(ReconcileError::InvalidObservation(e)) => {
                    warn!(job_id = %job.id, error = %e, "invalid observation skipped");
                    skipped += 1;
                }
                Err(e) => return Err(JobError::retryable(e.to_string())),
            }
        }

        info!(
            job_id = %job.id,
            employee_id = %employee.employee_id,
            provider = %source.provider,
            incremental = payload.incremental,
            skills_updated = updated,
            skipped,
            "skill detection finished"
        );
        Ok(json!({ "skills_updated": updated, "skipped": skipped }))
    }
}
