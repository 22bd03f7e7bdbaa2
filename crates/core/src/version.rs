//! Optimistic concurrency primitives.

/// Optimistic concurrency expectation for a versioned record.
///
/// Version `0` means "no record stored yet".
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// The record must not exist yet.
    Absent,
    /// Require the record to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Expectation derived from an observed version (`None` = not stored).
    pub fn from_observed(version: Option<u64>) -> Self {
        match version {
            Some(v) => ExpectedVersion::Exact(v),
            None => ExpectedVersion::Absent,
        }
    }

    pub fn matches(self, actual: Option<u64>) -> bool {
        match self {
            ExpectedVersion::Absent => actual.is_none(),
            ExpectedVersion::Exact(v) => actual == Some(v),
        }
    }
}
