//! Persists merged skill records with an optimistic compare-and-merge loop.

use tracing::{debug, warn};

use skillgraph_core::{DomainError, ExpectedVersion};
use skillgraph_scoring::{merge, ScoringEngine, SkillKey, SkillObservation, SkillRecord};

use super::catalog::SkillCatalog;
use super::store::{SkillRecordStore, SkillStoreError};

const DEFAULT_MAX_RETRIES: u32 = 64;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("invalid observation: {0}")]
    InvalidObservation(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] SkillStoreError),

    #[error("gave up on {key} after {attempts} conflicting writes")]
    Contention { key: SkillKey, attempts: u32 },
}

/// Folds observations into stored skill records.
///
/// Each write re-reads the record, merges, and compare-and-swaps against the
/// version it read, so concurrent merges on one key serialize without a lock
/// and none of them is lost.
pub struct Reconciler<S, C> {
    engine: ScoringEngine,
    store: S,
    catalog: C,
    max_retries: u32,
}

impl<S: SkillRecordStore, C: SkillCatalog> Reconciler<S, C> {
    pub fn new(engine: ScoringEngine, store: S, catalog: C) -> Self {
        Self {
            engine,
            store,
            catalog,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn engine(&self) -> &ScoringEngine {
        &self.engine
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Merge one observation into its stored record and return the result.
    pub fn apply(&self, observation: &SkillObservation) -> Result<SkillRecord, ReconcileError> {
        observation.validate()?;
        let skill_id = self
            .catalog
            .resolve(&observation.skill_name, &observation.category)?;
        let key = SkillKey::new(observation.employee_id, skill_id);

        for attempt in 1..=self.max_retries {
            let current = self.store.load(key)?;
            let merged = merge(
                &self.engine,
                key,
                current.as_ref().map(|v| &v.value),
                observation,
            );

            // Replays leave the record unchanged; skip the write.
            if let Some(current) = &current
                && current.value == merged
            {
                return Ok(merged);
            }

            let expected = ExpectedVersion::from_observed(current.map(|v| v.version));
            match self.store.compare_and_swap(merged.clone(), expected) {
                Ok(version) => {
                    debug!(
                        key = %key,
                        version,
                        level = %merged.level,
                        confidence = merged.confidence,
                        "skill record merged"
                    );
                    return Ok(merged);
                }
                Err(SkillStoreError::Conflict { .. }) => {
                    debug!(
                        key = %key,
                        attempt,
                        "skill record changed concurrently, retrying merge"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(key = %key, attempts = self.max_retries, "skill record merge contention");
        Err(ReconcileError::Contention {
            key,
            attempts: self.max_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::{InMemorySkillCatalog, InMemorySkillRecordStore};
    use chrono::Utc;
    use skillgraph_core::EmployeeId;
    use skillgraph_scoring::{Level, SignalSource};
    use std::sync::Arc;
    use uuid::Uuid;

    type TestReconciler = Reconciler<Arc<InMemorySkillRecordStore>, Arc<InMemorySkillCatalog>>;

    fn reconciler() -> TestReconciler {
        Reconciler::new(
            ScoringEngine::default(),
            InMemorySkillRecordStore::arc(),
            InMemorySkillCatalog::arc(),
        )
    }

    fn observation(
        employee_id: EmployeeId,
        projects: u32,
        lines: u64,
        frequency: f64,
    ) -> SkillObservation {
        SkillObservation {
            employee_id,
            skill_name: "Rust".to_string(),
            category: "language".to_string(),
            frequency,
            recency_days: 10,
            complexity_score: 0.5,
            duration_months: 6.0,
            depth_score: 4_000.0,
            projects_used: projects,
            lines_of_code: Some(lines),
            observed_at: Utc::now(),
            source: SignalSource::Github,
            run_id: Uuid::now_v7(),
        }
    }

    #[test]
    fn first_observation_creates_record() {
        let r = reconciler();
        let employee = EmployeeId::new();
        let record = r.apply(&observation(employee, 2, 1_500, 500.0)).unwrap();

        assert_eq!(record.employee_id, employee);
        assert_eq!(record.projects_used, 2);
        assert_eq!(record.lines_of_code, Some(1_500));
        assert!(record.is_auto_detected);
        assert_eq!(r.store().load(record.key()).unwrap().unwrap().version, 1);
    }

    #[test]
    fn replaying_an_observation_does_not_write() {
        let r = reconciler();
        let obs = observation(EmployeeId::new(), 3, 2_000, 800.0);
        let first = r.apply(&obs).unwrap();
        let replay = r.apply(&obs).unwrap();

        assert_eq!(first, replay);
        assert_eq!(r.store().load(first.key()).unwrap().unwrap().version, 1);
    }

    #[test]
    fn weaker_observation_never_lowers_confidence() {
        let r = reconciler();
        let employee = EmployeeId::new();
        let strong = r.apply(&observation(employee, 6, 6_000, 9_000.0)).unwrap();
        let after = r.apply(&observation(employee, 0, 0, 1.0)).unwrap();

        assert!(after.confidence >= strong.confidence);
        assert!(after.level >= strong.level);
        assert_eq!(after.projects_used, 6);
    }

    #[test]
    fn invalid_observation_is_rejected() {
        let r = reconciler();
        let mut obs = observation(EmployeeId::new(), 1, 10, 1.0);
        obs.complexity_score = 3.0;
        assert!(matches!(r.apply(&obs), Err(ReconcileError::InvalidObservation(_))));
    }

    #[test]
    fn concurrent_merges_on_one_key_lose_nothing() {
        let r = Arc::new(reconciler().with_max_retries(10_000));
        let employee = EmployeeId::new();
        let observations: Vec<_> = (0..64)
            .map(|i| observation(employee, 1, 100, (i * 100) as f64))
            .collect();

        let handles: Vec<_> = observations
            .chunks(8)
            .map(|chunk| {
                let r = r.clone();
                let chunk = chunk.to_vec();
                std::thread::spawn(move || {
                    for obs in &chunk {
                        r.apply(obs).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stored = r.store().list_for_employee(employee).unwrap();
        assert_eq!(stored.len(), 1);
        let record = &stored[0];

        // same result as folding sequentially
        let sequential = reconciler();
        let mut expected = None;
        for obs in &observations {
            expected = Some(sequential.apply(obs).unwrap());
        }
        let expected = expected.unwrap();

        assert_eq!(record.projects_used, 64);
        assert_eq!(record.lines_of_code, Some(6_400));
        assert_eq!(record.confidence, expected.confidence);
        assert_eq!(record.level, expected.level);
        assert_eq!(record.evidence, expected.evidence);
        assert!(record.level >= Level::Beginner);
    }
}
