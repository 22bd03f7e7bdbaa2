//! Infrastructure layer: job orchestration, skill record persistence,
//! processors, collaborator boundaries and settings.

pub mod external;
pub mod jobs;
pub mod processors;
pub mod settings;
pub mod skills;

#[cfg(test)]
pub(crate) mod testing;

pub use settings::{Settings, SettingsError};
