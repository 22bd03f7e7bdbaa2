//! Skill catalog: maps detected skill names onto stable skill ids.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use skillgraph_core::SkillId;

use super::store::SkillStoreError;

pub trait SkillCatalog: Send + Sync {
    /// Id for `name`, registering the skill on first sight.
    fn resolve(&self, name: &str, category: &str) -> Result<SkillId, SkillStoreError>;
}

impl<C> SkillCatalog for Arc<C>
where
    C: SkillCatalog + ?Sized,
{
    fn resolve(&self, name: &str, category: &str) -> Result<SkillId, SkillStoreError> {
        (**self).resolve(name, category)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub skill_id: SkillId,
    pub name: String,
    pub category: String,
}

/// In-memory catalog; names match case-insensitively.
#[derive(Debug, Default)]
pub struct InMemorySkillCatalog {
    entries: RwLock<HashMap<String, CatalogEntry>>,
}

impl InMemorySkillCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn lookup(&self, name: &str) -> Option<CatalogEntry> {
        let entries = self.entries.read().ok()?;
        entries.get(&normalize(name)).cloned()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

impl SkillCatalog for InMemorySkillCatalog {
    fn resolve(&self, name: &str, category: &str) -> Result<SkillId, SkillStoreError> {
        let normalized = normalize(name);
        {
            let entries = self
                .entries
                .read()
                .map_err(|_| SkillStoreError::Storage("lock poisoned".to_string()))?;
            if let Some(entry) = entries.get(&normalized) {
                return Ok(entry.skill_id);
            }
        }

        let mut entries = self
            .entries
            .write()
            .map_err(|_| SkillStoreError::Storage("lock poisoned".to_string()))?;
        let entry = entries.entry(normalized).or_insert_with(|| CatalogEntry {
            skill_id: SkillId::new(),
            name: name.trim().to_string(),
            category: category.to_string(),
        });
        Ok(entry.skill_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve_case_insensitively() {
        let catalog = InMemorySkillCatalog::new();
        let id = catalog.resolve("TypeScript", "language").unwrap();
        assert_eq!(catalog.resolve(" typescript ", "language").unwrap(), id);
        assert_ne!(catalog.resolve("Rust", "language").unwrap(), id);

        let entry = catalog.lookup("TYPESCRIPT").unwrap();
        assert_eq!(entry.name, "TypeScript");
        assert!(catalog.lookup("Haskell").is_none());
    }
}
