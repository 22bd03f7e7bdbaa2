//! In-process doubles for the external collaborators.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use skillgraph_core::{EmployeeId, OrganizationId};
use skillgraph_scoring::{SignalSource, SkillObservation, SkillRecord};

use crate::external::{
    CertificateRenderer, EmployeeRef, IntegrationStatusSink, Mailer, OrganizationDirectory,
    SourceRef,
};
use crate::jobs::{DispatchError, JobId, JobOptions, JobPayload, JobQueue, SubmitError};

pub fn observation(employee_id: EmployeeId, skill_name: &str) -> SkillObservation {
    SkillObservation {
        employee_id,
        skill_name: skill_name.to_string(),
        category: "language".to_string(),
        frequency: 2_000.0,
        recency_days: 12,
        complexity_score: 0.6,
        duration_months: 8.0,
        depth_score: 6_000.0,
        projects_used: 3,
        lines_of_code: Some(2_500),
        observed_at: Utc::now(),
        source: SignalSource::Github,
        run_id: Uuid::nil(),
    }
}

/// Queue that records submissions instead of running them.
#[derive(Debug, Default)]
pub struct RecordingQueue {
    pub submitted: Mutex<Vec<(JobPayload, JobOptions)>>,
    pub purged_with: Mutex<Vec<Duration>>,
}

impl RecordingQueue {
    pub fn payloads(&self) -> Vec<JobPayload> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Ids requested through `JobOptions::job_id`, in submission order.
    pub fn job_ids(&self) -> Vec<JobId> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, o)| o.job_id)
            .collect()
    }
}

impl JobQueue for RecordingQueue {
    fn submit(&self, payload: JobPayload, options: JobOptions) -> Result<JobId, SubmitError> {
        payload.validate()?;
        let id = options.job_id.unwrap_or_default();
        self.submitted.lock().unwrap().push((payload, options));
        Ok(id)
    }

    fn purge_completed(&self, older_than: Duration) -> Result<usize, DispatchError> {
        self.purged_with.lock().unwrap().push(older_than);
        Ok(4)
    }
}

#[derive(Debug, Default)]
pub struct StaticDirectory {
    employees: HashMap<OrganizationId, Vec<EmployeeId>>,
    sources: HashMap<EmployeeId, Vec<SourceRef>>,
    accounts: HashMap<(SignalSource, String), EmployeeId>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_employee(
        mut self,
        organization_id: OrganizationId,
        employee_id: EmployeeId,
        sources: Vec<SourceRef>,
    ) -> Self {
        self.employees
            .entry(organization_id)
            .or_default()
            .push(employee_id);
        for source in &sources {
            self.accounts
                .insert((source.provider, source.account.clone()), employee_id);
        }
        self.sources.insert(employee_id, sources);
        self
    }
}

impl OrganizationDirectory for StaticDirectory {
    fn employees(&self, organization_id: OrganizationId) -> anyhow::Result<Vec<EmployeeId>> {
        Ok(self
            .employees
            .get(&organization_id)
            .cloned()
            .unwrap_or_default())
    }

    fn sources(&self, employee: &EmployeeRef) -> anyhow::Result<Vec<SourceRef>> {
        Ok(self
            .sources
            .get(&employee.employee_id)
            .cloned()
            .unwrap_or_default())
    }

    fn employee_for_account(
        &self,
        _organization_id: OrganizationId,
        provider: SignalSource,
        account: &str,
    ) -> anyhow::Result<Option<EmployeeId>> {
        Ok(self.accounts.get(&(provider, account.to_string())).copied())
    }
}

#[derive(Debug, Default)]
pub struct RecordingStatusSink {
    pub rejected: Mutex<Vec<(EmployeeRef, SourceRef, String)>>,
}

impl IntegrationStatusSink for RecordingStatusSink {
    fn credential_rejected(&self, employee: &EmployeeRef, source: &SourceRef, reason: &str) {
        self.rejected
            .lock()
            .unwrap()
            .push((*employee, source.clone(), reason.to_string()));
    }
}

#[derive(Debug, Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(String, String, serde_json::Value)>>,
    pub fail: bool,
}

impl Mailer for RecordingMailer {
    fn send(&self, to: &str, template: &str, variables: &serde_json::Value) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("smtp relay refused connection");
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), template.to_string(), variables.clone()));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct PathRenderer;

impl CertificateRenderer for PathRenderer {
    fn render(&self, record: &SkillRecord) -> anyhow::Result<String> {
        Ok(format!(
            "certificates/{}/{}-{}.pdf",
            record.employee_id, record.skill_id, record.level
        ))
    }
}
