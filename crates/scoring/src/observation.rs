//! Skill observations: one source's evidence about one employee's use of one
//! skill, produced by a single job run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use skillgraph_core::{DomainError, DomainResult, EmployeeId};

/// External system that produced an observation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Github,
    Gitlab,
    Bitbucket,
    Slack,
    Jira,
    Linear,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Github => "github",
            SignalSource::Gitlab => "gitlab",
            SignalSource::Bitbucket => "bitbucket",
            SignalSource::Slack => "slack",
            SignalSource::Jira => "jira",
            SignalSource::Linear => "linear",
        }
    }
}

impl core::fmt::Display for SignalSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw, un-normalized evidence for a single skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillObservation {
    pub employee_id: EmployeeId,
    pub skill_name: String,
    pub category: String,

    /// Activity volume (commits, messages, tickets touched).
    pub frequency: f64,
    /// Days since the most recent activity.
    pub recency_days: u32,
    /// Artifact size/popularity score, already in \[0, 1\].
    pub complexity_score: f64,
    /// Span of observed activity.
    pub duration_months: f64,
    /// Volume of code/time attributable to the skill.
    pub depth_score: f64,

    pub projects_used: u32,
    /// `None` when the source has no byte-count signal (e.g. CI/CD practices).
    pub lines_of_code: Option<u64>,

    pub observed_at: DateTime<Utc>,
    pub source: SignalSource,
    /// Job run that produced this observation; replays share the same id.
    #[serde(default)]
    pub run_id: Uuid,
}

impl SkillObservation {
    /// Stamp the producing run (the worker sets this to the job id).
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.skill_name.trim().is_empty() {
            return Err(DomainError::validation("skill_name cannot be empty"));
        }

        let non_negative = [
            ("frequency", self.frequency),
            ("duration_months", self.duration_months),
            ("depth_score", self.depth_score),
        ];
        for (name, v) in non_negative {
            if !(v.is_finite() && v >= 0.0) {
                return Err(DomainError::validation(format!(
                    "{name} must be a finite non-negative number (got {v})"
                )));
            }
        }

        if !(self.complexity_score.is_finite() && (0.0..=1.0).contains(&self.complexity_score)) {
            return Err(DomainError::validation(format!(
                "complexity_score must be within [0, 1] (got {})",
                self.complexity_score
            )));
        }
        Ok(())
    }
}
