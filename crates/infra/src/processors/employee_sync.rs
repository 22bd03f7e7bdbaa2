use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use crate::external::{EmployeeRef, OrganizationDirectory};
use crate::jobs::{
    Job, JobHandler, JobOptions, JobPayload, JobQueue, JobResult, SkillDetectionPayload,
};

use super::{collaborator_error, submit_child, unexpected_payload};

/// Fans an employee out into one full `skill-detection` job per connected source.
pub struct EmployeeSyncProcessor {
    directory: Arc<dyn OrganizationDirectory>,
    queue: Arc<dyn JobQueue>,
}

impl EmployeeSyncProcessor {
    pub fn new(directory: Arc<dyn OrganizationDirectory>, queue: Arc<dyn JobQueue>) -> Self {
        Self { directory, queue }
    }
}

impl JobHandler for EmployeeSyncProcessor {
    fn handle(&self, job: &Job) -> JobResult {
        let JobPayload::EmployeeSync(payload) = &job.payload else {
            return Err(unexpected_payload(job));
        };
        let employee = EmployeeRef {
            organization_id: payload.organization_id,
            employee_id: payload.employee_id,
        };

        let sources = self
            .directory
            .sources(&employee)
            .map_err(|e| collaborator_error("source listing", e))?;

        if sources.is_empty() {
            debug!(job_id = %job.id, employee_id = %employee.employee_id, "no connected sources");
        }

        for source in &sources {
            let name = format!(
                "{}:{}:{}",
                source.provider,
                source.account,
                source.repository.as_deref().unwrap_or_default()
            );
            submit_child(
                self.queue.as_ref(),
                job,
                &name,
                JobPayload::SkillDetection(SkillDetectionPayload {
                    organization_id: employee.organization_id,
                    employee_id: employee.employee_id,
                    source: source.clone(),
                    incremental: false,
                }),
                JobOptions::default(),
            )?;
        }

        info!(
            job_id = %job.id,
            employee_id = %employee.employee_id,
            sources = sources.len(),
            "employee sync fanned out"
        );
        Ok(json!({ "sources": sources.len() }))
    }
}
