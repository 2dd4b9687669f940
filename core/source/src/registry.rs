//! Per-input source registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::source::ProgramSource;
use epgsync_common::{Error, InputId, Result};

/// Registry mapping TV inputs to the program source that feeds them.
#[derive(Default)]
pub struct SourceRegistry {
    sources: HashMap<InputId, Arc<dyn ProgramSource>>,
}

impl SourceRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the source of an input.
    ///
    /// # Errors
    /// - Returns error if the input already has a source
    pub fn register(&mut self, input: InputId, source: Arc<dyn ProgramSource>) -> Result<()> {
        if self.sources.contains_key(&input) {
            return Err(Error::InvalidInput(format!(
                "Input '{}' already has a source",
                input
            )));
        }
        self.sources.insert(input, source);
        Ok(())
    }

    /// Remove the source of an input, returning it if present.
    pub fn unregister(&mut self, input: &InputId) -> Option<Arc<dyn ProgramSource>> {
        self.sources.remove(input)
    }

    /// Resolve the source of an input.
    ///
    /// # Errors
    /// - `NotFound` if the input has no source
    pub fn resolve(&self, input: &InputId) -> Result<Arc<dyn ProgramSource>> {
        self.sources
            .get(input)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("No source registered for input '{}'", input)))
    }

    /// Get list of registered inputs.
    pub fn inputs(&self) -> Vec<InputId> {
        let mut inputs: Vec<InputId> = self.sources.keys().cloned().collect();
        inputs.sort();
        inputs
    }

    /// Check if an input has a source.
    pub fn has_input(&self, input: &InputId) -> bool {
        self.sources.contains_key(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::SampleSource;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = SourceRegistry::new();
        let input = InputId::new("input-a").unwrap();
        registry.register(input.clone(), Arc::new(SampleSource::new())).unwrap();

        assert!(registry.has_input(&input));
        assert_eq!(registry.resolve(&input).unwrap().name(), "sample");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = SourceRegistry::new();
        let input = InputId::new("input-a").unwrap();
        registry.register(input.clone(), Arc::new(SampleSource::new())).unwrap();

        assert!(registry.register(input, Arc::new(SampleSource::new())).is_err());
    }

    #[test]
    fn test_unregister() {
        let mut registry = SourceRegistry::new();
        let input = InputId::new("input-a").unwrap();
        registry.register(input.clone(), Arc::new(SampleSource::new())).unwrap();

        assert!(registry.unregister(&input).is_some());
        assert!(matches!(registry.resolve(&input), Err(Error::NotFound(_))));
        assert!(registry.inputs().is_empty());
    }
}
