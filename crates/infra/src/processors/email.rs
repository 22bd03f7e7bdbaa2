use std::sync::Arc;

use serde_json::json;
use tracing::info;

use crate::external::Mailer;
use crate::jobs::{Job, JobHandler, JobPayload, JobResult};

use super::{collaborator_error, unexpected_payload};

/// Hands a templated message to the mailer. Not idempotent.
pub struct EmailProcessor {
    mailer: Arc<dyn Mailer>,
}

impl EmailProcessor {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

impl JobHandler for EmailProcessor {
    fn handle(&self, job: &Job) -> JobResult {
        let JobPayload::EmailSend(payload) = &job.payload else {
            return Err(unexpected_payload(job));
        };

        self.mailer
            .send(&payload.to, &payload.template, &payload.variables)
            .map_err(|e| collaborator_error("mail delivery", e))?;

        info!(job_id = %job.id, template = %payload.template, "email sent");
        Ok(json!({ "template": payload.template }))
    }
}
