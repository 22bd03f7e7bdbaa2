use std::sync::Arc;

use serde_json::json;
use tracing::info;

use skillgraph_scoring::SkillKey;

use crate::external::CertificateRenderer;
use crate::jobs::{Job, JobError, JobHandler, JobPayload, JobResult};
use crate::skills::SkillRecordStore;

use super::{collaborator_error, unexpected_payload};

/// Renders a certificate for a level the stored record has reached.
pub struct CertificateProcessor {
    records: Arc<dyn SkillRecordStore>,
    renderer: Arc<dyn CertificateRenderer>,
}

impl CertificateProcessor {
    pub fn new(records: Arc<dyn SkillRecordStore>, renderer: Arc<dyn CertificateRenderer>) -> Self {
        Self { records, renderer }
    }
}

impl JobHandler for CertificateProcessor {
    fn handle(&self, job: &Job) -> JobResult {
        let JobPayload::CertificateGeneration(payload) = &job.payload else {
            return Err(unexpected_payload(job));
        };
        let key = SkillKey::new(payload.employee_id, payload.skill_id);

        let record = self
            .records
            .load(key)
            .map_err(|e| JobError::retryable(e.to_string()))?
            .ok_or_else(|| JobError::fatal(format!("no skill record for {key}")))?
            .value;

        if record.level < payload.level {
            return Err(JobError::fatal(format!(
                "{key} is at {}, certificate requested for {}",
                record.level, payload.level
            )));
        }

        let location = self
            .renderer
            .render(&record)
            .map_err(|e| collaborator_error("certificate rendering", e))?;

        info!(
            job_id = %job.id,
            key = %key,
            level = %payload.level,
            location = %location,
            "certificate rendered"
        );
        Ok(json!({ "location": location, "level": payload.level }))
    }
}
