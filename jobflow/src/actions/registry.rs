//! Registry mapping action names to factories.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::Action;
use crate::errors::JobflowError;

/// Factory function type for creating actions.
pub type ActionFactory<D> = Arc<dyn Fn() -> Arc<dyn Action<D>> + Send + Sync>;

/// Registry of action factories keyed by symbolic name.
///
/// Pipelines are assembled by name through the registry so job families
/// need no static wiring to concrete action types.
pub struct ActionRegistry<D: Send + Sync + ?Sized> {
    factories: RwLock<HashMap<String, ActionFactory<D>>>,
}

impl<D: Send + Sync + ?Sized> Default for ActionRegistry<D> {
    fn default() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }
}

impl<D: Send + Sync + ?Sized> ActionRegistry<D> {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under a name, replacing any previous one.
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn Action<D>> + Send + Sync + 'static,
    {
        let name = name.into();
        let previous = self.factories.write().insert(name.clone(), Arc::new(factory));
        if previous.is_some() {
            warn!(action = %name, "Replacing registered action factory");
        } else {
            debug!(action = %name, "Registered action factory");
        }
    }

    /// Constructs a fresh action by name.
    ///
    /// # Errors
    ///
    /// Returns [`JobflowError::UnknownAction`] if nothing is registered.
    pub fn create(&self, name: &str) -> Result<Arc<dyn Action<D>>, JobflowError> {
        let factory = self
            .factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| JobflowError::unknown_action(name))?;
        Ok(factory())
    }

    /// Checks if an action is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    /// Lists registered action names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of registered actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.read().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.read().is_empty()
    }
}

impl<D: Send + Sync + ?Sized> fmt::Debug for ActionRegistry<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticAction;

    #[test]
    fn test_register_and_create() {
        let registry: ActionRegistry<()> = ActionRegistry::new();
        registry.register("clean", || Arc::new(StaticAction::new("clean")));

        assert!(registry.contains("clean"));
        let action = registry.create("clean").unwrap();
        assert_eq!(action.name(), "clean");
    }

    #[test]
    fn test_unknown_action() {
        let registry: ActionRegistry<()> = ActionRegistry::new();
        let err = registry.create("missing").unwrap_err();

        assert!(matches!(err, JobflowError::UnknownAction { ref name } if name == "missing"));
    }

    #[test]
    fn test_factory_builds_fresh_instances() {
        let registry: ActionRegistry<()> = ActionRegistry::new();
        registry.register("parse", || Arc::new(StaticAction::new("parse")));

        let a = registry.create("parse").unwrap();
        let b = registry.create("parse").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_names_sorted_and_replace() {
        let registry: ActionRegistry<()> = ActionRegistry::new();
        registry.register("save", || Arc::new(StaticAction::new("save")));
        registry.register("clean", || Arc::new(StaticAction::new("clean")));
        registry.register("save", || Arc::new(StaticAction::new("save-v2")));

        assert_eq!(registry.names(), vec!["clean".to_string(), "save".to_string()]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.create("save").unwrap().name(), "save-v2");
    }
}
