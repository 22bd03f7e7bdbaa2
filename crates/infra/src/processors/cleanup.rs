use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::jobs::{to_chrono, Job, JobError, JobHandler, JobPayload, JobQueue, JobResult};
use crate::skills::SkillRecordStore;

use super::unexpected_payload;

const SECS_PER_DAY: u64 = 86_400;

/// Data retention: purges old completed jobs, compacts skill evidence from runs
/// past that same window and, optionally, drops stale skill records.
pub struct CleanupProcessor {
    queue: Arc<dyn JobQueue>,
    records: Arc<dyn SkillRecordStore>,
}

impl CleanupProcessor {
    pub fn new(queue: Arc<dyn JobQueue>, records: Arc<dyn SkillRecordStore>) -> Self {
        Self { queue, records }
    }
}

impl JobHandler for CleanupProcessor {
    fn handle(&self, job: &Job) -> JobResult {
        let JobPayload::Cleanup(payload) = &job.payload else {
            return Err(unexpected_payload(job));
        };

        let retention =
            Duration::from_secs(u64::from(payload.completed_job_retention_days) * SECS_PER_DAY);
        let jobs_purged = self
            .queue
            .purge_completed(retention)
            .map_err(|e| JobError::retryable(e.to_string()))?;

        // Runs older than job retention can no longer be replayed.
        let evidence_compacted = self
            .records
            .compact_evidence(Utc::now() - to_chrono(retention))
            .map_err(|e| JobError::retryable(e.to_string()))?;

        let skills_removed = match payload.stale_skill_days {
            Some(days) => {
                let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
                self.records
                    .remove_stale(cutoff)
                    .map_err(|e| JobError::retryable(e.to_string()))?
            }
            None => 0,
        };

        info!(
            job_id = %job.id,
            jobs_purged,
            evidence_compacted,
            skills_removed,
            "retention cleanup finished"
        );
        Ok(json!({
            "jobs_purged": jobs_purged,
            "evidence_compacted": evidence_compacted,
            "skills_removed": skills_removed,
        }))
    }
}
