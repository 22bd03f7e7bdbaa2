//! Versioned skill record storage with compare-and-swap writes.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use skillgraph_core::{EmployeeId, ExpectedVersion};
use skillgraph_scoring::{SkillKey, SkillRecord};

/// A stored value together with its version (starting at 1).
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// Skill record store abstraction.
///
/// Writes are never blind: `compare_and_swap` only succeeds if the stored
/// version still matches what the caller read.
pub trait SkillRecordStore: Send + Sync {
    fn load(&self, key: SkillKey) -> Result<Option<Versioned<SkillRecord>>, SkillStoreError>;

    /// Store `record` if the current version matches `expected`; returns the new version.
    fn compare_and_swap(
        &self,
        record: SkillRecord,
        expected: ExpectedVersion,
    ) -> Result<u64, SkillStoreError>;

    fn list_for_employee(
        &self,
        employee_id: EmployeeId,
    ) -> Result<Vec<SkillRecord>, SkillStoreError>;

    /// Retention: delete records last used before `cutoff`.
    fn remove_stale(&self, cutoff: DateTime<Utc>) -> Result<usize, SkillStoreError>;

    /// Retention: fold evidence from runs observed before `cutoff` (see
    /// [`SkillRecord::compact_evidence`]). Every changed record gets a new
    /// version. Returns the number of records changed.
    fn compact_evidence(&self, cutoff: DateTime<Utc>) -> Result<usize, SkillStoreError>;
}

/// Skill record store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SkillStoreError {
    #[error("version conflict on {key}: expected {expected:?}, found {actual:?}")]
    Conflict {
        key: SkillKey,
        expected: ExpectedVersion,
        actual: Option<u64>,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

impl<S> SkillRecordStore for Arc<S>
where
    S: SkillRecordStore + ?Sized,
{
    fn load(&self, key: SkillKey) -> Result<Option<Versioned<SkillRecord>>, SkillStoreError> {
        (**self).load(key)
    }

    fn compare_and_swap(
        &self,
        record: SkillRecord,
        expected: ExpectedVersion,
    ) -> Result<u64, SkillStoreError> {
        (**self).compare_and_swap(record, expected)
    }

    fn list_for_employee(
        &self,
        employee_id: EmployeeId,
    ) -> Result<Vec<SkillRecord>, SkillStoreError> {
        (**self).list_for_employee(employee_id)
    }

    fn remove_stale(&self, cutoff: DateTime<Utc>) -> Result<usize, SkillStoreError> {
        (**self).remove_stale(cutoff)
    }

    fn compact_evidence(&self, cutoff: DateTime<Utc>) -> Result<usize, SkillStoreError> {
        (**self).compact_evidence(cutoff)
    }
}

const SHARDS: usize = 16;

type Shard = RwLock<HashMap<SkillKey, Versioned<SkillRecord>>>;

/// In-memory skill record store for tests/dev, sharded by key.
#[derive(Debug)]
pub struct InMemorySkillRecordStore {
    shards: Vec<Shard>,
}

impl InMemorySkillRecordStore {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn shard(&self, key: &SkillKey) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARDS]
    }
}

impl Default for InMemorySkillRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> SkillStoreError {
    SkillStoreError::Storage("lock poisoned".to_string())
}

impl SkillRecordStore for InMemorySkillRecordStore {
    fn load(&self, key: SkillKey) -> Result<Option<Versioned<SkillRecord>>, SkillStoreError> {
        let shard = self.shard(&key).read().map_err(poisoned)?;
        Ok(shard.get(&key).cloned())
    }

    fn compare_and_swap(
        &self,
        record: SkillRecord,
        expected: ExpectedVersion,
    ) -> Result<u64, SkillStoreError> {
        let key = record.key();
        let mut shard = self.shard(&key).write().map_err(poisoned)?;

        let actual = shard.get(&key).map(|v| v.version);
        if !expected.matches(actual) {
            return Err(SkillStoreError::Conflict {
                key,
                expected,
                actual,
            });
        }

        let version = actual.unwrap_or(0) + 1;
        shard.insert(
            key,
            Versioned {
                value: record,
                version,
            },
        );
        Ok(version)
    }

    fn list_for_employee(
        &self,
        employee_id: EmployeeId,
    ) -> Result<Vec<SkillRecord>, SkillStoreError> {
        let mut records = Vec::new();
        for shard in &self.shards {
            let shard = shard.read().map_err(poisoned)?;
            records.extend(
                shard
                    .values()
                    .filter(|v| v.value.employee_id == employee_id)
                    .map(|v| v.value.clone()),
            );
        }
        records.sort_by(|a, b| {
            a.skill_name
                .cmp(&b.skill_name)
                .then(a.skill_id.cmp(&b.skill_id))
        });
        Ok(records)
    }

    fn remove_stale(&self, cutoff: DateTime<Utc>) -> Result<usize, SkillStoreError> {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.write().map_err(poisoned)?;
            let before = shard.len();
            shard.retain(|_, v| v.value.last_used >= cutoff);
            removed += before - shard.len();
        }
        Ok(removed)
    }

    fn compact_evidence(&self, cutoff: DateTime<Utc>) -> Result<usize, SkillStoreError> {
        let mut changed = 0;
        for shard in &self.shards {
            let mut shard = shard.write().map_err(poisoned)?;
            for stored in shard.values_mut() {
                if stored.value.compact_evidence(cutoff) {
                    stored.version += 1;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }
}
