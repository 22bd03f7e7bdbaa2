//! `skillgraph-core` — shared building blocks.
//!
//! Pure primitives only (identifiers, domain errors, optimistic concurrency).
//! No infrastructure concerns live here.

pub mod error;
pub mod id;
pub mod version;

pub use error::{DomainError, DomainResult};
pub use id::{EmployeeId, OrganizationId, SkillId};
pub use version::ExpectedVersion;
