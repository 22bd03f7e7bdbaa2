//! Scoring configuration: feature weights, level thresholds, recency decay and
//! normalization maxima.
//!
//! The configuration is read once at startup and never mutated afterwards.
//! Every field has a default so partial configuration files are accepted.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::level::Level;

/// Tolerance used when checking that weights sum to one.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("feature weights must sum to 1.0 (got {0})")]
    WeightSum(f64),

    #[error("feature weight `{0}` must be a finite non-negative number")]
    InvalidWeight(&'static str),

    #[error("normalization maximum `{0}` must be a finite positive number")]
    InvalidMaximum(&'static str),

    #[error("threshold for {level} is invalid: {reason}")]
    InvalidThreshold { level: Level, reason: String },

    #[error("recency breakpoints are invalid: {0}")]
    InvalidRecency(String),
}

/// Process-wide scoring configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: FeatureWeights,
    pub thresholds: LevelThresholds,
    pub recency: RecencyDecay,
    pub maxima: NormalizationMaxima,
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weights.validate()?;
        self.thresholds.validate()?;
        self.recency.validate()?;
        self.maxima.validate()
    }
}

/// Relative weight of each normalized feature in the confidence sum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureWeights {
    pub frequency: f64,
    pub recency: f64,
    pub complexity: f64,
    pub duration: f64,
    pub depth: f64,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            frequency: 0.25,
            recency: 0.20,
            complexity: 0.20,
            duration: 0.15,
            depth: 0.20,
        }
    }
}

impl FeatureWeights {
    pub fn sum(&self) -> f64 {
        self.frequency + self.recency + self.complexity + self.duration + self.depth
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let named = [
            ("frequency", self.frequency),
            ("recency", self.recency),
            ("complexity", self.complexity),
            ("duration", self.duration),
            ("depth", self.depth),
        ];
        for (name, w) in named {
            if !(w.is_finite() && w >= 0.0) {
                return Err(ConfigError::InvalidWeight(name));
            }
        }

        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSum(sum));
        }
        Ok(())
    }
}

/// Minimum evidence required for a level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelThreshold {
    pub confidence: f64,
    pub projects: u32,
    pub lines: u64,
}

impl LevelThreshold {
    pub const fn new(confidence: f64, projects: u32, lines: u64) -> Self {
        Self {
            confidence,
            projects,
            lines,
        }
    }
}

/// Per-level thresholds, EXPERT > ADVANCED > INTERMEDIATE > BEGINNER.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelThresholds {
    pub expert: LevelThreshold,
    pub advanced: LevelThreshold,
    pub intermediate: LevelThreshold,
    pub beginner: LevelThreshold,
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self {
            expert: LevelThreshold::new(0.8, 10, 10_000),
            advanced: LevelThreshold::new(0.6, 5, 5_000),
            intermediate: LevelThreshold::new(0.4, 2, 1_000),
            beginner: LevelThreshold::new(0.0, 0, 0),
        }
    }
}

impl LevelThresholds {
    pub fn for_level(&self, level: Level) -> &LevelThreshold {
        match level {
            Level::Expert => &self.expert,
            Level::Advanced => &self.advanced,
            Level::Intermediate => &self.intermediate,
            Level::Beginner => &self.beginner,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for level in Level::DESCENDING {
            let t = self.for_level(level);
            if !(t.confidence.is_finite() && (0.0..=1.0).contains(&t.confidence)) {
                return Err(ConfigError::InvalidThreshold {
                    level,
                    reason: format!("confidence {} outside [0, 1]", t.confidence),
                });
            }
        }

        // Each tier must demand at least as much as the tier below it.
        for pair in Level::DESCENDING.windows(2) {
            let (upper, lower) = (pair[0], pair[1]);
            let (u, l) = (self.for_level(upper), self.for_level(lower));
            if u.confidence < l.confidence || u.projects < l.projects || u.lines < l.lines {
                return Err(ConfigError::InvalidThreshold {
                    level: upper,
                    reason: format!("must not be lower than {lower}"),
                });
            }
        }
        Ok(())
    }
}

/// One step of the recency decay: activity at most `max_days` old scores `score`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecencyBreakpoint {
    pub max_days: u32,
    pub score: f64,
}

/// Step function from days-since-last-activity to a [0, 1] score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecencyDecay {
    /// Strictly increasing by `max_days`; boundaries are inclusive.
    pub breakpoints: Vec<RecencyBreakpoint>,
    /// Score for activity older than the last breakpoint.
    pub floor: f64,
}

impl Default for RecencyDecay {
    fn default() -> Self {
        let steps = [(30, 1.0), (90, 0.8), (180, 0.6), (365, 0.4), (730, 0.2)];
        Self {
            breakpoints: steps
                .into_iter()
                .map(|(max_days, score)| RecencyBreakpoint { max_days, score })
                .collect(),
            floor: 0.1,
        }
    }
}

impl RecencyDecay {
    pub fn score(&self, recency_days: u32) -> f64 {
        self.breakpoints
            .iter()
            .find(|b| recency_days <= b.max_days)
            .map_or(self.floor, |b| b.score)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let in_unit = |s: f64| s.is_finite() && (0.0..=1.0).contains(&s);

        if !in_unit(self.floor) {
            return Err(ConfigError::InvalidRecency(format!(
                "floor {} outside [0, 1]",
                self.floor
            )));
        }
        for b in &self.breakpoints {
            if !in_unit(b.score) {
                return Err(ConfigError::InvalidRecency(format!(
                    "score {} for {} days outside [0, 1]",
                    b.score, b.max_days
                )));
            }
        }
        if self
            .breakpoints
            .windows(2)
            .any(|w| w[0].max_days >= w[1].max_days)
        {
            return Err(ConfigError::InvalidRecency(
                "breakpoints must be strictly increasing by max_days".to_string(),
            ));
        }
        Ok(())
    }
}

/// Values at which a raw feature saturates to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationMaxima {
    pub frequency: f64,
    pub duration_months: f64,
    pub depth: f64,
}

impl Default for NormalizationMaxima {
    fn default() -> Self {
        Self {
            frequency: 10_000.0,
            duration_months: 10.0,
            depth: 10_000.0,
        }
    }
}

impl NormalizationMaxima {
    fn validate(&self) -> Result<(), ConfigError> {
        let named = [
            ("frequency", self.frequency),
            ("duration_months", self.duration_months),
            ("depth", self.depth),
        ];
        for (name, max) in named {
            if !(max.is_finite() && max > 0.0) {
                return Err(ConfigError::InvalidMaximum(name));
            }
        }
        Ok(())
    }
}
