//! External collaborator boundaries.
//!
//! These traits are implemented outside this crate (source-host clients, the
//! employee directory, mail and PDF services). The worker processors only
//! consume them.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use skillgraph_core::{DomainResult, EmployeeId, OrganizationId};
use skillgraph_scoring::{SignalSource, SkillObservation, SkillRecord};

use crate::jobs::payload::not_blank;
use crate::jobs::JobError;

/// Employee whose activity is being analysed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmployeeRef {
    pub organization_id: OrganizationId,
    pub employee_id: EmployeeId,
}

/// One connected account on an external system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceRef {
    pub provider: SignalSource,
    /// Login/handle on the provider.
    pub account: String,
    /// Narrow extraction to one repository (incremental runs).
    #[serde(default)]
    pub repository: Option<String>,
}

impl SourceRef {
    pub fn new(provider: SignalSource, account: impl Into<String>) -> Self {
        Self {
            provider,
            account: account.into(),
            repository: None,
        }
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        not_blank("source.account", &self.account)?;
        if let Some(repo) = &self.repository {
            not_blank("source.repository", repo)?;
        }
        Ok(())
    }
}

/// Extraction failure, classified by whether retrying can help.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("network error: {0}")]
    Network(String),

    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("credential rejected: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl ExtractError {
    /// Whether the failure means the stored credential no longer works.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, ExtractError::Unauthorized(_))
    }
}

/// Backoff floor for a 429 that arrived without a `Retry-After` hint.
const DEFAULT_RATE_LIMIT_PAUSE: Duration = Duration::from_secs(60);

impl From<ExtractError> for JobError {
    fn from(err: ExtractError) -> Self {
        let message = err.to_string();
        match err {
            ExtractError::Network(_) => JobError::retryable(message),
            ExtractError::Upstream { status: 429, .. } => {
                JobError::rate_limited(DEFAULT_RATE_LIMIT_PAUSE, message)
            }
            ExtractError::Upstream { status, .. } if status == 408 || status >= 500 => {
                JobError::retryable(message)
            }
            ExtractError::RateLimited { retry_after } => {
                JobError::rate_limited(retry_after, message)
            }
            ExtractError::Upstream { .. }
            | ExtractError::Unauthorized(_)
            | ExtractError::NotFound(_) => JobError::fatal(message),
        }
    }
}

/// Per-source signal adapter (commit history, language bytes, CI config...).
pub trait SignalExtractor: Send + Sync + 'static {
    fn extract(
        &self,
        employee: &EmployeeRef,
        source: &SourceRef,
    ) -> Result<Vec<SkillObservation>, ExtractError>;
}

impl<F> SignalExtractor for F
where
    F: Fn(&EmployeeRef, &SourceRef) -> Result<Vec<SkillObservation>, ExtractError>
        + Send
        + Sync
        + 'static,
{
    fn extract(
        &self,
        employee: &EmployeeRef,
        source: &SourceRef,
    ) -> Result<Vec<SkillObservation>, ExtractError> {
        self(employee, source)
    }
}

/// Employee directory and connected-account lookup.
pub trait OrganizationDirectory: Send + Sync + 'static {
    fn employees(&self, organization_id: OrganizationId) -> anyhow::Result<Vec<EmployeeId>>;

    fn sources(&self, employee: &EmployeeRef) -> anyhow::Result<Vec<SourceRef>>;

    /// Resolve a provider login (e.g. a webhook sender) to an employee.
    fn employee_for_account(
        &self,
        organization_id: OrganizationId,
        provider: SignalSource,
        account: &str,
    ) -> anyhow::Result<Option<EmployeeId>>;
}

/// Receives credential failures so the owning integration can be deactivated.
pub trait IntegrationStatusSink: Send + Sync + 'static {
    fn credential_rejected(&self, employee: &EmployeeRef, source: &SourceRef, reason: &str);
}

/// Outbound mail transport.
pub trait Mailer: Send + Sync + 'static {
    fn send(&self, to: &str, template: &str, variables: &serde_json::Value) -> anyhow::Result<()>;
}

/// Certificate rendering service; returns where the document was stored.
pub trait CertificateRenderer: Send + Sync + 'static {
    fn render(&self, record: &SkillRecord) -> anyhow::Result<String>;
}
