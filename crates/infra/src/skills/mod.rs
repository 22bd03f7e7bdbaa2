//! Skill record persistence and reconciliation.

pub mod catalog;
pub mod reconciler;
pub mod store;

pub use catalog::{CatalogEntry, InMemorySkillCatalog, SkillCatalog};
pub use reconciler::{ReconcileError, Reconciler};
pub use store::{InMemorySkillRecordStore, SkillRecordStore, SkillStoreError, Versioned};
