//! Name→target registry with a doc string per entry, plus the reverse
//! id→name lookup used for `-list` and error messages.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{FabError, Result};
use crate::target::{Target, TargetId};

#[derive(Debug, Clone)]
struct Entry {
    target: Arc<dyn Target>,
    doc: String,
}

#[derive(Debug, Default)]
pub struct Registry {
    by_name: DashMap<String, Entry>,
    by_id: DashMap<TargetId, String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        doc: impl Into<String>,
        target: Arc<dyn Target>,
    ) -> Result<Arc<dyn Target>> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(FabError::Config(format!("target {name:?} is already registered")));
        }
        self.by_id.insert(target.id(), name.clone());
        self.by_name.insert(
            name,
            Entry {
                target: target.clone(),
                doc: doc.into(),
            },
        );
        Ok(target)
    }

    pub fn get(&self, name: &str) -> Option<(Arc<dyn Target>, String)> {
        self.by_name.get(name).map(|entry| (entry.target.clone(), entry.doc.clone()))
    }

    pub fn name_of(&self, id: TargetId) -> Option<String> {
        self.by_id.get(&id).map(|entry| entry.clone())
    }

    /// Names sorted alphabetically, for stable `-list` output.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn docs(&self) -> Vec<(String, String)> {
        self.names()
            .into_iter()
            .map(|name| {
                let doc = self.by_name.get(&name).map(|e| e.doc.clone()).unwrap_or_default();
                (name, doc)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::target::F;

    use super::*;

    fn dummy() -> Arc<dyn Target> {
        F::new("dummy", |_, _| Box::pin(async { Ok(()) }))
    }

    #[test]
    fn duplicate_name_registration_is_rejected() {
        let registry = Registry::new();
        registry.register("a", "first", dummy()).unwrap();
        let err = registry.register("a", "second", dummy()).unwrap_err();
        assert!(matches!(err, FabError::Config(_)));
    }

    #[test]
    fn names_are_returned_sorted() {
        let registry = Registry::new();
        registry.register("zebra", "", dummy()).unwrap();
        registry.register("apple", "", dummy()).unwrap();
        assert_eq!(registry.names(), vec!["apple".to_string(), "zebra".to_string()]);
    }
}
