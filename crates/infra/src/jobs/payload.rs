//! Typed job payloads, one variant per job type.
//!
//! Payloads are validated at submission time; a malformed payload is rejected
//! synchronously and never enqueued.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use skillgraph_core::{DomainError, DomainResult, EmployeeId, OrganizationId, SkillId};
use skillgraph_scoring::{Level, SignalSource};

use super::types::JobType;
use crate::external::SourceRef;

/// Payload of a job, tagged by job type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum JobPayload {
    OrgSync(OrgSyncPayload),
    EmployeeSync(EmployeeSyncPayload),
    SkillDetection(SkillDetectionPayload),
    CertificateGeneration(CertificatePayload),
    EmailSend(EmailPayload),
    WebhookProcess(WebhookPayload),
    Cleanup(CleanupPayload),
}

/// Sync every employee of an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrgSyncPayload {
    pub organization_id: OrganizationId,
}

/// Sync every connected source of one employee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmployeeSyncPayload {
    pub organization_id: OrganizationId,
    pub employee_id: EmployeeId,
}

/// Extract, score and reconcile skills from one source of one employee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkillDetectionPayload {
    pub organization_id: OrganizationId,
    pub employee_id: EmployeeId,
    pub source: SourceRef,
    /// Webhook-triggered runs only look at the changed repository.
    #[serde(default)]
    pub incremental: bool,
}

/// Render a certificate for a skill level the employee has attained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificatePayload {
    pub employee_id: EmployeeId,
    pub skill_id: SkillId,
    pub level: Level,
}

/// Send a templated notification email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmailPayload {
    pub to: String,
    pub template: String,
    #[serde(default = "empty_object")]
    pub variables: serde_json::Value,
}

/// Process an already signature-verified webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookPayload {
    pub organization_id: OrganizationId,
    pub provider: SignalSource,
    pub delivery_id: String,
    pub event: String,
    pub body: serde_json::Value,
}

/// Apply data retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanupPayload {
    /// Completed jobs older than this are purged.
    pub completed_job_retention_days: u32,
    /// Skill records unused for this long are removed; `None` keeps them.
    #[serde(default)]
    pub stale_skill_days: Option<u32>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::OrgSync(_) => JobType::OrgSync,
            JobPayload::EmployeeSync(_) => JobType::EmployeeSync,
            JobPayload::SkillDetection(_) => JobType::SkillDetection,
            JobPayload::CertificateGeneration(_) => JobType::CertificateGeneration,
            JobPayload::EmailSend(_) => JobType::EmailSend,
            JobPayload::WebhookProcess(_) => JobType::WebhookProcess,
            JobPayload::Cleanup(_) => JobType::Cleanup,
        }
    }

    /// Parse an untyped payload for `job_type`, then validate it.
    pub fn from_json(job_type: JobType, value: serde_json::Value) -> DomainResult<Self> {
        let payload = match job_type {
            JobType::OrgSync => JobPayload::OrgSync(parse(job_type, value)?),
            JobType::EmployeeSync => JobPayload::EmployeeSync(parse(job_type, value)?),
            JobType::SkillDetection => JobPayload::SkillDetection(parse(job_type, value)?),
            JobType::CertificateGeneration => {
                JobPayload::CertificateGeneration(parse(job_type, value)?)
            }
            JobType::EmailSend => JobPayload::EmailSend(parse(job_type, value)?),
            JobType::WebhookProcess => JobPayload::WebhookProcess(parse(job_type, value)?),
            JobType::Cleanup => JobPayload::Cleanup(parse(job_type, value)?),
        };
        payload.validate()?;
        Ok(payload)
    }

    pub fn validate(&self) -> DomainResult<()> {
        match self {
            JobPayload::OrgSync(p) => non_nil("organization_id", p.organization_id.is_nil()),
            JobPayload::EmployeeSync(p) => {
                non_nil("organization_id", p.organization_id.is_nil())?;
                non_nil("employee_id", p.employee_id.is_nil())
            }
            JobPayload::SkillDetection(p) => {
                non_nil("organization_id", p.organization_id.is_nil())?;
                non_nil("employee_id", p.employee_id.is_nil())?;
                p.source.validate()
            }
            JobPayload::CertificateGeneration(p) => {
                non_nil("employee_id", p.employee_id.is_nil())?;
                non_nil("skill_id", p.skill_id.is_nil())
            }
            JobPayload::EmailSend(p) => p.validate(),
            JobPayload::WebhookProcess(p) => p.validate(),
            JobPayload::Cleanup(p) => {
                if p.completed_job_retention_days == 0 {
                    return Err(DomainError::validation(
                        "completed_job_retention_days must be at least 1",
                    ));
                }
                if p.stale_skill_days == Some(0) {
                    return Err(DomainError::validation("stale_skill_days must be at least 1"));
                }
                Ok(())
            }
        }
    }
}

impl EmailPayload {
    fn validate(&self) -> DomainResult<()> {
        match self.to.trim().split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
            _ => {
                return Err(DomainError::validation(format!(
                    "invalid recipient address: {:?}",
                    self.to
                )));
            }
        }
        not_blank("template", &self.template)?;
        if !self.variables.is_object() {
            return Err(DomainError::validation("variables must be a JSON object"));
        }
        Ok(())
    }
}

impl WebhookPayload {
    fn validate(&self) -> DomainResult<()> {
        non_nil("organization_id", self.organization_id.is_nil())?;
        not_blank("delivery_id", &self.delivery_id)?;
        not_blank("event", &self.event)?;
        if !self.body.is_object() {
            return Err(DomainError::validation("webhook body must be a JSON object"));
        }
        Ok(())
    }
}

fn parse<T: DeserializeOwned>(job_type: JobType, value: serde_json::Value) -> DomainResult<T> {
    serde_json::from_value(value)
        .map_err(|e| DomainError::validation(format!("malformed {job_type} payload: {e}")))
}

fn non_nil(field: &str, is_nil: bool) -> DomainResult<()> {
    if is_nil {
        return Err(DomainError::validation(format!("{field} cannot be nil")));
    }
    Ok(())
}

pub(crate) fn not_blank(field: &str, value: &str) -> DomainResult<()> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_typed_payload_from_json() {
        let employee = EmployeeId::new();
        let org = OrganizationId::new();
        let payload = JobPayload::from_json(
            JobType::SkillDetection,
            json!({
                "organization_id": org,
                "employee_id": employee,
                "source": { "provider": "github", "account": "octocat" },
            }),
        )
        .unwrap();

        match payload {
            JobPayload::SkillDetection(p) => {
                assert_eq!(p.employee_id, employee);
                assert_eq!(p.source.provider, SignalSource::Github);
                assert!(!p.incremental);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn rejects_payload_of_the_wrong_shape() {
        let err = JobPayload::from_json(JobType::OrgSync, json!({ "employee_id": "x" }))
            .unwrap_err();
        match err {
            DomainError::Validation(msg) => assert!(msg.contains("org-sync")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_fields() {
        let org = OrganizationId::new();
        let result = JobPayload::from_json(
            JobType::OrgSync,
            json!({ "organization_id": org, "extra": true }),
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_nil_identifiers() {
        let payload = JobPayload::OrgSync(OrgSyncPayload {
            organization_id: OrganizationId::from_uuid(uuid::Uuid::nil()),
        });
        assert!(payload.validate().is_err());
    }

    #[test]
    fn email_requires_plausible_address_and_object_variables() {
        let mut payload = EmailPayload {
            to: "dev@example.com".to_string(),
            template: "level-up".to_string(),
            variables: json!({ "skill": "Rust" }),
        };
        assert!(payload.validate().is_ok());

        payload.to = "not-an-address".to_string();
        assert!(payload.validate().is_err());

        payload.to = "dev@example.com".to_string();
        payload.variables = json!(["skill"]);
        assert!(payload.validate().is_err());
    }

    #[test]
    fn email_variables_default_to_empty_object() {
        let payload = JobPayload::from_json(
            JobType::EmailSend,
            json!({ "to": "a@b.io", "template": "welcome" }),
        )
        .unwrap();
        match payload {
            JobPayload::EmailSend(p) => assert_eq!(p.variables, json!({})),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn cleanup_requires_positive_retention() {
        let result = JobPayload::from_json(
            JobType::Cleanup,
            json!({ "completed_job_retention_days": 0 }),
        );
        assert!(result.is_err());
    }

    #[test]
    fn tagged_serialization_carries_job_type() {
        let payload = JobPayload::Cleanup(CleanupPayload {
            completed_job_retention_days: 3,
            stale_skill_days: Some(365),
        });
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["type"], "cleanup");
        assert_eq!(payload.job_type(), JobType::Cleanup);
    }
}
