//! Reconciliation: folding a new observation into a cumulative skill record.
//!
//! The fold is commutative and idempotent:
//! - confidence is the max of the stored and newly observed confidence
//! - volume comes from [`Evidence`], where distinct runs add and replays of a
//!   run collapse into one entry
//! - `last_used` and the descriptive fields follow the latest observation
//! - the level is always re-derived by the engine, never carried over

use crate::engine::ScoringEngine;
use crate::observation::SkillObservation;
use crate::record::{Evidence, SkillKey, SkillRecord};

/// Merge `observation` into `existing` (or start a new record for `key`).
pub fn merge(
    engine: &ScoringEngine,
    key: SkillKey,
    existing: Option<&SkillRecord>,
    observation: &SkillObservation,
) -> SkillRecord {
    let score = engine.score(observation, existing);
    let evidence = existing
        .map_or_else(Evidence::new, |r| r.evidence.clone())
        .with(observation);

    let incoming = Latest {
        at: observation.observed_at,
        source: observation.source,
        skill_name: &observation.skill_name,
        category: &observation.category,
    };
    let latest = match existing {
        Some(r) => incoming.max(Latest {
            at: r.last_used,
            source: r.source,
            skill_name: &r.skill_name,
            category: &r.category,
        }),
        None => incoming,
    };

    SkillRecord {
        employee_id: key.employee_id,
        skill_id: key.skill_id,
        skill_name: latest.skill_name.to_string(),
        category: latest.category.to_string(),
        level: score.level,
        confidence: score.confidence,
        projects_used: evidence.projects_used(),
        lines_of_code: evidence.lines_of_code(),
        last_used: latest.at,
        source: latest.source,
        is_auto_detected: existing.is_none_or(|r| r.is_auto_detected),
        evidence,
    }
}

/// Total order over "which observation is newest", ties broken field by field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Latest<'a> {
    at: chrono::DateTime<chrono::Utc>,
    source: crate::observation::SignalSource,
    skill_name: &'a str,
    category: &'a str,
}
