use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::external::{OrganizationDirectory, SourceRef};
use crate::jobs::{
    priority, Job, JobHandler, JobOptions, JobPayload, JobQueue, JobResult, SkillDetectionPayload,
    WebhookPayload,
};

use super::{collaborator_error, submit_child, unexpected_payload};

/// Events that carry new code activity.
const ACTIVITY_EVENTS: [&str; 4] = ["push", "pull_request", "Push Hook", "Merge Request Hook"];

/// Turns a code-activity webhook into a high-priority incremental detection
/// for the employee behind the sender account.
pub struct WebhookProcessor {
    directory: Arc<dyn OrganizationDirectory>,
    queue: Arc<dyn JobQueue>,
}

impl WebhookProcessor {
    pub fn new(directory: Arc<dyn OrganizationDirectory>, queue: Arc<dyn JobQueue>) -> Self {
        Self { directory, queue }
    }
}

/// Sender login: `sender.login` on GitHub-style bodies, `user_username` on GitLab ones.
fn sender(body: &Value) -> Option<&str> {
    body.pointer("/sender/login")
        .or_else(|| body.get("user_username"))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn repository(body: &Value) -> Option<&str> {
    body.pointer("/repository/full_name")
        .or_else(|| body.pointer("/project/path_with_namespace"))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn ignored(payload: &WebhookPayload, reason: &str) -> JobResult {
    debug!(delivery_id = %payload.delivery_id, event = %payload.event, reason, "webhook ignored");
    Ok(json!({ "ignored": true, "reason": reason }))
}

impl JobHandler for WebhookProcessor {
    fn handle(&self, job: &Job) -> JobResult {
        let JobPayload::WebhookProcess(payload) = &job.payload else {
            return Err(unexpected_payload(job));
        };

        if !ACTIVITY_EVENTS.contains(&payload.event.as_str()) {
            return ignored(payload, "event carries no code activity");
        }
        let Some(login) = sender(&payload.body) else {
            return ignored(payload, "no sender account");
        };

        let employee_id = self
            .directory
            .employee_for_account(payload.organization_id, payload.provider, login)
            .map_err(|e| collaborator_error("account lookup", e))?;
        let Some(employee_id) = employee_id else {
            return ignored(payload, "sender is not a known employee");
        };

        let mut source = SourceRef::new(payload.provider, login);
        if let Some(repo) = repository(&payload.body) {
            source = source.with_repository(repo);
        }

        let detection = submit_child(
            self.queue.as_ref(),
            job,
            "skill-detection",
            JobPayload::SkillDetection(SkillDetectionPayload {
                organization_id: payload.organization_id,
                employee_id,
                source,
                incremental: true,
            }),
            JobOptions::default().with_priority(priority::HIGH),
        )?;

        info!(
            job_id = %job.id,
            delivery_id = %payload.delivery_id,
            employee_id = %employee_id,
            detection_job_id = %detection,
            "webhook scheduled incremental skill detection"
        );
        Ok(json!({ "skill_detection_job": detection }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobOptions;
    use crate::testing::{RecordingQueue, StaticDirectory};
    use chrono::Utc;
    use skillgraph_core::{EmployeeId, OrganizationId};
    use skillgraph_scoring::SignalSource;

    fn webhook_job(organization_id: OrganizationId, event: &str, body: Value) -> Job {
        Job::new(
            JobPayload::WebhookProcess(WebhookPayload {
                organization_id,
                provider: SignalSource::Github,
                delivery_id: "d-1".to_string(),
                event: event.to_string(),
                body,
            }),
            &JobOptions::default(),
            3,
            Utc::now(),
        )
    }

    fn setup() -> (OrganizationId, EmployeeId, Arc<RecordingQueue>, WebhookProcessor) {
        let org = OrganizationId::new();
        let employee = EmployeeId::new();
        let directory = StaticDirectory::new().with_employee(
            org,
            employee,
            vec![SourceRef::new(SignalSource::Github, "octocat")],
        );
        let queue = Arc::new(RecordingQueue::default());
        let processor = WebhookProcessor::new(Arc::new(directory), queue.clone());
        (org, employee, queue, processor)
    }

    #[test]
    fn push_from_known_sender_schedules_incremental_detection() {
        let (org, employee, queue, processor) = setup();
        let body = json!({
            "sender": { "login": "octocat" },
            "repository": { "full_name": "acme/api" },
        });

        let result = processor.handle(&webhook_job(org, "push", body)).unwrap();
        assert!(result.get("skill_detection_job").is_some());

        let submitted = queue.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        let (payload, options) = &submitted[0];
        assert_eq!(options.priority, priority::HIGH);
        match payload {
            JobPayload::SkillDetection(p) => {
                assert_eq!(p.employee_id, employee);
                assert!(p.incremental);
                assert_eq!(p.source.repository.as_deref(), Some("acme/api"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn unrelated_events_and_unknown_senders_are_ignored() {
        let (org, _, queue, processor) = setup();

        let star = processor
            .handle(&webhook_job(org, "star", json!({ "sender": { "login": "octocat" } })))
            .unwrap();
        assert_eq!(star["ignored"], true);

        let stranger = processor
            .handle(&webhook_job(org, "push", json!({ "sender": { "login": "someone" } })))
            .unwrap();
        assert_eq!(stranger["ignored"], true);

        let anonymous = processor.handle(&webhook_job(org, "push", json!({}))).unwrap();
        assert_eq!(anonymous["reason"], "no sender account");

        assert!(queue.submitted.lock().unwrap().is_empty());
    }
}
