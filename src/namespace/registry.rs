//! Namespace registry for resolving connect requests.
//!
//! Maps namespace names to [`Namespace`] implementations. Clients resolve
//! every CONNECT through it; an unresolved name is answered with an ERROR
//! packet by the client.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::Namespace;

/// Registry mapping namespace names to namespaces.
pub struct NamespaceRegistry {
    namespaces: RwLock<HashMap<String, Arc<dyn Namespace>>>,
}

impl NamespaceRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// Register a namespace under its own name, replacing any previous one.
    pub fn register(&self, namespace: Arc<dyn Namespace>) {
        let name = namespace.name().to_string();
        self.namespaces.write().insert(name, namespace);
    }

    /// Remove a namespace. Already-attached sockets are unaffected.
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Namespace>> {
        self.namespaces.write().remove(name)
    }

    /// Resolve a namespace by name.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Namespace>> {
        self.namespaces.read().get(name).cloned()
    }

    /// Check whether a namespace is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.namespaces.read().contains_key(name)
    }

    /// Registered namespace names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered namespaces.
    pub fn len(&self) -> usize {
        self.namespaces.read().len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.namespaces.read().is_empty()
    }
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::LocalNamespace;

    #[test]
    fn test_register_and_resolve() {
        let registry = NamespaceRegistry::new();
        registry.register(LocalNamespace::new("/chat"));

        let resolved = registry.resolve("/chat").unwrap();
        assert_eq!(resolved.name(), "/chat");
        assert!(registry.resolve("/nope").is_none());
    }

    #[test]
    fn test_register_replaces() {
        let registry = NamespaceRegistry::new();
        registry.register(LocalNamespace::new("/"));
        registry.register(LocalNamespace::new("/"));

        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_names_sorted() {
        let registry = NamespaceRegistry::new();
        registry.register(LocalNamespace::new("/b"));
        registry.register(LocalNamespace::new("/"));
        registry.register(LocalNamespace::new("/a"));

        assert_eq!(registry.names(), vec!["/", "/a", "/b"]);
    }

    #[test]
    fn test_unregister() {
        let registry = NamespaceRegistry::new();
        registry.register(LocalNamespace::new("/tmp"));

        assert!(registry.unregister("/tmp").is_some());
        assert!(!registry.contains("/tmp"));
        assert!(registry.is_empty());
    }
}
