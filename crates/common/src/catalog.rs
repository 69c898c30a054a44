//! Component type catalog
//!
//! Persisted process documents name component types by string. The graph
//! loader resolves every name through a [`TypeCatalog`]; an unresolved name is
//! a load error.

use crate::actor::{
    Actor, AssertActor, AssignActor, AttachImageActor, DelayActor, FailActor, InvokeActor,
    LogActor,
};
use crate::{Error, Result};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Generic container
pub const SEQUENCE: &str = "Sequence";
/// Container holding a fixture's process
pub const FIXTURE: &str = "Fixture";
/// Container holding a test case's process
pub const TEST_CASE: &str = "TestCase";

/// Builds an actor from a node's property bag
pub type ActorFactory = Arc<dyn Fn(&Map<String, Value>) -> Result<Arc<dyn Actor>> + Send + Sync>;

/// Whether nodes of a type may have children
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Container,
    Actor,
}

#[derive(Clone)]
pub struct ComponentType {
    name: String,
    kind: ComponentKind,
    factory: Option<ActorFactory>,
}

impl std::fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentType")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

impl ComponentType {
    pub fn container(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ComponentKind::Container,
            factory: None,
        }
    }

    pub fn actor<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Result<Arc<dyn Actor>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: ComponentKind::Actor,
            factory: Some(Arc::new(factory)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn is_container(&self) -> bool {
        self.kind == ComponentKind::Container
    }

    /// Build an actor for a node of this type
    pub fn create_actor(&self, properties: &Map<String, Value>) -> Result<Arc<dyn Actor>> {
        match &self.factory {
            Some(factory) => factory(properties),
            None => Err(Error::Internal(format!(
                "{} is a container and cannot act",
                self.name
            ))),
        }
    }
}

/// Resolves component type names
pub trait TypeCatalog: Send + Sync {
    fn resolve(&self, type_name: &str) -> Option<ComponentType>;
}

/// Mutable catalog holding the built-in types plus any registered ones
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    types: RwLock<HashMap<String, ComponentType>>,
}

impl ComponentRegistry {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the built-in containers and actors
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for name in [SEQUENCE, FIXTURE, TEST_CASE] {
            registry.register(ComponentType::container(name));
        }
        registry.register(ComponentType::actor("Log", LogActor::from_properties));
        registry.register(ComponentType::actor("Assign", AssignActor::from_properties));
        registry.register(ComponentType::actor("Assert", AssertActor::from_properties));
        registry.register(ComponentType::actor("Invoke", InvokeActor::from_properties));
        registry.register(ComponentType::actor("Delay", DelayActor::from_properties));
        registry.register(ComponentType::actor("Fail", FailActor::from_properties));
        registry.register(ComponentType::actor("AttachImage", AttachImageActor::from_properties));
        registry
    }

    /// Register a type, replacing any type of the same name
    pub fn register(&self, component: ComponentType) {
        self.types.write().insert(component.name.clone(), component);
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl TypeCatalog for ComponentRegistry {
    fn resolve(&self, type_name: &str) -> Option<ComponentType> {
        self.types.read().get(type_name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtins_resolve() {
        let catalog = ComponentRegistry::with_builtins();
        assert!(catalog.resolve(SEQUENCE).unwrap().is_container());
        assert_eq!(catalog.resolve("Log").unwrap().kind(), ComponentKind::Actor);
        assert!(catalog.resolve("Click").is_none());
        assert!(catalog.names().contains(&"AttachImage".to_string()));
    }

    #[test]
    fn test_containers_cannot_act() {
        let catalog = ComponentRegistry::with_builtins();
        let props = json!({}).as_object().cloned().unwrap();
        assert!(catalog.resolve(FIXTURE).unwrap().create_actor(&props).is_err());
        let fail = catalog.resolve("Fail").unwrap();
        assert!(fail.create_actor(&props).is_ok());
    }
}
