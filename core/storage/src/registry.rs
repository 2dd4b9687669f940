//! Store registry for resolving a backend by name.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::store::Store;
use epgsync_common::{Error, Result};

/// Factory function type for creating stores.
pub type StoreFactory = Box<dyn Fn(Value) -> Result<Arc<dyn Store>> + Send + Sync>;

/// Registry for store factories.
///
/// Allows the host to pick a storage backend from configuration.
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a store factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: StoreFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::InvalidInput(format!(
                "Store '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a store by name and configuration.
    ///
    /// # Errors
    /// - Store not found
    /// - Configuration invalid
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn Store>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Store '{}' is not registered", name)))?;
        factory(config)
    }

    /// Get list of registered store names.
    pub fn stores(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a store is registered.
    pub fn has_store(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in stores.
///
/// - `memory`: ignores its configuration
/// - `sqlite`: requires `{"path": "<database file>"}`
pub fn create_default_registry() -> StoreRegistry {
    let mut registry = StoreRegistry::new();
    let factories: Vec<(&str, StoreFactory)> = vec![
        (
            "memory",
            Box::new(|_config| Ok(Arc::new(crate::memory::MemoryStore::new()) as Arc<dyn Store>)),
        ),
        (
            "sqlite",
            Box::new(|config| {
                let path = config
                    .get("path")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| Error::InvalidInput("SQLite store requires 'path'".to_string()))?;
                Ok(Arc::new(crate::sqlite::SqliteStore::open(path)?) as Arc<dyn Store>)
            }),
        ),
    ];

    for (name, factory) in factories {
        // Names are distinct literals, so registration cannot collide.
        let _ = registry.register(name, factory);
    }

    registry
}
