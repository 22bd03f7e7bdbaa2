//! `skillgraph-scoring`
//!
//! **Responsibility:** turn per-skill evidence into a confidence score and a
//! proficiency level, and fold new evidence into cumulative skill records.
//!
//! Everything in this crate is pure and deterministic:
//! - no IO, no clocks, no randomness
//! - the same observation and prior record always produce the same result
//! - storage and concurrency belong to `skillgraph-infra`

pub mod config;
pub mod engine;
pub mod level;
pub mod observation;
pub mod reconcile;
pub mod record;

pub use config::{
    ConfigError, FeatureWeights, LevelThreshold, LevelThresholds, NormalizationMaxima,
    RecencyBreakpoint, RecencyDecay, ScoringConfig,
};
pub use engine::{FeatureVector, Score, ScoringEngine};
pub use level::Level;
pub use observation::{SignalSource, SkillObservation};
pub use reconcile::merge;
pub use record::{Contribution, Evidence, SkillKey, SkillRecord, COMPACTED_RUN};
