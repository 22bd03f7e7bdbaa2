use std::sync::Arc;

use serde_json::json;
use tracing::info;

use crate::external::OrganizationDirectory;
use crate::jobs::{
    EmployeeSyncPayload, Job, JobHandler, JobOptions, JobPayload, JobQueue, JobResult,
};

use super::{collaborator_error, submit_child, unexpected_payload};

/// Fans an organization out into one `employee-sync` job per employee.
pub struct OrgSyncProcessor {
    directory: Arc<dyn OrganizationDirectory>,
    queue: Arc<dyn JobQueue>,
}

impl OrgSyncProcessor {
    pub fn new(directory: Arc<dyn OrganizationDirectory>, queue: Arc<dyn JobQueue>) -> Self {
        Self { directory, queue }
    }
}

impl JobHandler for OrgSyncProcessor {
    fn handle(&self, job: &Job) -> JobResult {
        let JobPayload::OrgSync(payload) = &job.payload else {
            return Err(unexpected_payload(job));
        };

        let employees = self
            .directory
            .employees(payload.organization_id)
            .map_err(|e| collaborator_error("employee listing", e))?;

        for employee_id in &employees {
            submit_child(
                self.queue.as_ref(),
                job,
                &employee_id.to_string(),
                JobPayload::EmployeeSync(EmployeeSyncPayload {
                    organization_id: payload.organization_id,
                    employee_id: *employee_id,
                }),
                JobOptions::default(),
            )?;
        }

        info!(
            job_id = %job.id,
            organization_id = %payload.organization_id,
            employees = employees.len(),
            "organization sync fanned out"
        );
        Ok(json!({ "employees": employees.len() }))
    }
}
