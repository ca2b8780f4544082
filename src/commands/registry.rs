//! Handler registry.
//!
//! The only durable identifier for "what code runs" is the command name
//! persisted on each record, so the registry must be complete before the
//! scheduler starts. There is no dynamic instantiation: a finite map,
//! populated once at process start.

use std::collections::HashMap;
use std::sync::Arc;

use super::{CommandError, CommandHandler, Result};

/// Static name-to-handler binding.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn CommandHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own name.
    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) -> Result<()> {
        let name = handler.name();
        if self.handlers.contains_key(name) {
            return Err(CommandError::DuplicateHandler(name.to_string()));
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Resolve a name to its handler. An unresolved name is a fatal
    /// configuration error, never a per-record failure.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn CommandHandler>> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| CommandError::UnresolvedHandler(name.to_string()))
    }

    /// Handlers flagged permanent, reseeded at every boot.
    pub fn permanent_handlers(&self) -> impl Iterator<Item = &Arc<dyn CommandHandler>> {
        self.handlers.values().filter(|h| h.permanent())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{CommandRecord, ExecutionContext, Outcome};
    use async_trait::async_trait;

    struct NoopHandler(&'static str);

    #[async_trait]
    impl CommandHandler for NoopHandler {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn execute(
            &self,
            _command: &mut CommandRecord,
            _ctx: &mut ExecutionContext<'_>,
        ) -> crate::commands::Result<Outcome> {
            Ok(Outcome::empty())
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(NoopHandler("aCommand"))).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("aCommand").unwrap().name(), "aCommand");
    }

    #[test]
    fn test_resolve_unknown_is_error() {
        let registry = HandlerRegistry::new();
        match registry.resolve("missingCommand") {
            Err(CommandError::UnresolvedHandler(name)) => assert_eq!(name, "missingCommand"),
            other => panic!("expected UnresolvedHandler, got {:?}", other.map(|h| h.name())),
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(NoopHandler("aCommand"))).unwrap();
        assert!(matches!(
            registry.register(Arc::new(NoopHandler("aCommand"))),
            Err(CommandError::DuplicateHandler(_))
        ));
    }
}
