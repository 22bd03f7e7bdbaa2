//! Persisted per-employee, per-skill records and the evidence they aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use skillgraph_core::{EmployeeId, SkillId};

use crate::level::Level;
use crate::observation::{SignalSource, SkillObservation};

/// Identity of a skill record: one per employee × skill.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SkillKey {
    pub employee_id: EmployeeId,
    pub skill_id: SkillId,
}

impl SkillKey {
    pub fn new(employee_id: EmployeeId, skill_id: SkillId) -> Self {
        Self {
            employee_id,
            skill_id,
        }
    }
}

impl core::fmt::Display for SkillKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.employee_id, self.skill_id)
    }
}

/// Run id of the per-source entry that holds compacted runs.
pub const COMPACTED_RUN: Uuid = Uuid::from_u128(u128::MAX);

/// Volume contributed by one (source, run) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub source: SignalSource,
    pub run_id: Uuid,
    pub projects_used: u32,
    pub lines_of_code: Option<u64>,
    /// Latest observation folded into this entry.
    pub observed_at: DateTime<Utc>,
}

impl Contribution {
    fn key(&self) -> (SignalSource, Uuid) {
        (self.source, self.run_id)
    }

    fn from_observation(obs: &SkillObservation) -> Self {
        Self {
            source: obs.source,
            run_id: obs.run_id,
            projects_used: obs.projects_used,
            lines_of_code: obs.lines_of_code,
            observed_at: obs.observed_at,
        }
    }

    /// Replays of the same run keep the larger reading of each counter.
    fn absorb(&mut self, other: &Contribution) {
        self.projects_used = self.projects_used.max(other.projects_used);
        self.lines_of_code = self.lines_of_code.max(other.lines_of_code);
        self.observed_at = self.observed_at.max(other.observed_at);
    }

    /// Distinct runs add up.
    fn add(&mut self, other: &Contribution) {
        self.projects_used = self.projects_used.saturating_add(other.projects_used);
        self.lines_of_code = match (self.lines_of_code, other.lines_of_code) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0).saturating_add(b.unwrap_or(0))),
        };
        self.observed_at = self.observed_at.max(other.observed_at);
    }
}

/// Cumulative volume evidence, kept sorted by (source, run).
///
/// Distinct runs add up; a run seen again is folded into its own entry, so
/// applying the same observation twice has no further effect.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Evidence {
    contributions: Vec<Contribution>,
}

impl Evidence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contributions(&self) -> &[Contribution] {
        &self.contributions
    }

    pub fn absorb(&mut self, obs: &SkillObservation) {
        let incoming = Contribution::from_observation(obs);
        match self
            .contributions
            .binary_search_by(|c| c.key().cmp(&incoming.key()))
        {
            Ok(idx) => self.contributions[idx].absorb(&incoming),
            Err(idx) => self.contributions.insert(idx, incoming),
        }
    }

    /// Evidence after absorbing `obs`, leaving `self` untouched.
    pub fn with(&self, obs: &SkillObservation) -> Self {
        let mut next = self.clone();
        next.absorb(obs);
        next
    }

    pub fn projects_used(&self) -> u32 {
        self.contributions
            .iter()
            .fold(0u32, |acc, c| acc.saturating_add(c.projects_used))
    }

    /// Fold every run last observed before `before` into one [`COMPACTED_RUN`]
    /// entry per source. Totals are unchanged; a run replayed after it was
    /// compacted counts again, so `before` must lie past job retention.
    ///
    /// Returns whether anything was folded.
    pub fn compact(&mut self, before: DateTime<Utc>) -> bool {
        let (old, mut kept): (Vec<_>, Vec<_>) = self
            .contributions
            .drain(..)
            .partition(|c| c.run_id != COMPACTED_RUN && c.observed_at < before);
        let folded = !old.is_empty();

        for run in old {
            match kept
                .iter_mut()
                .find(|c| c.source == run.source && c.run_id == COMPACTED_RUN)
            {
                Some(base) => base.add(&run),
                None => kept.push(Contribution {
                    run_id: COMPACTED_RUN,
                    ..run
                }),
            }
        }

        kept.sort_by_key(Contribution::key);
        self.contributions = kept;
        folded
    }

    /// Total lines, or `None` if no contribution carried a line-count signal.
    pub fn lines_of_code(&self) -> Option<u64> {
        self.contributions
            .iter()
            .filter_map(|c| c.lines_of_code)
            .fold(None, |acc: Option<u64>, l| {
                Some(acc.unwrap_or(0).saturating_add(l))
            })
    }
}

/// Cumulative skill record for one employee × skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillRecord {
    pub employee_id: EmployeeId,
    pub skill_id: SkillId,
    pub skill_name: String,
    pub category: String,
    pub level: Level,
    pub confidence: f64,
    pub projects_used: u32,
    pub lines_of_code: Option<u64>,
    pub last_used: DateTime<Utc>,
    /// Source of the most recent observation.
    pub source: SignalSource,
    pub is_auto_detected: bool,
    pub evidence: Evidence,
}

impl SkillRecord {
    pub fn key(&self) -> SkillKey {
        SkillKey::new(self.employee_id, self.skill_id)
    }

    /// See [`Evidence::compact`]; the record's totals, level and confidence
    /// are untouched.
    pub fn compact_evidence(&mut self, before: DateTime<Utc>) -> bool {
        self.evidence.compact(before)
    }
}
