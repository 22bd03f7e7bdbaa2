//! Discrete proficiency levels.

use serde::{Deserialize, Serialize};

/// Proficiency tier derived from confidence plus volume thresholds.
///
/// Ordering follows proficiency: `Beginner < Intermediate < Advanced < Expert`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Level {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl Level {
    /// Levels from the highest tier down, the order classification walks them.
    pub const DESCENDING: [Level; 4] = [
        Level::Expert,
        Level::Advanced,
        Level::Intermediate,
        Level::Beginner,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Beginner => "BEGINNER",
            Level::Intermediate => "INTERMEDIATE",
            Level::Advanced => "ADVANCED",
            Level::Expert => "EXPERT",
        }
    }

    /// Tiers that may be reached without any line-count signal.
    pub fn allows_missing_lines(&self) -> bool {
        matches!(self, Level::Beginner | Level::Intermediate)
    }
}

impl core::fmt::Display for Level {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
