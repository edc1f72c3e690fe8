use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::node::NodeDefinition;
use crate::core::types::Registration;

/// Lookup table of node classes by name.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    classes: Arc<RwLock<HashMap<String, Arc<NodeDefinition>>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a class. A different definition under a taken name is a
    /// recorded conflict and is ignored.
    pub fn register(&self, definition: Arc<NodeDefinition>) -> Registration {
        let mut classes = self.classes.write().unwrap_or_else(PoisonError::into_inner);
        let class = definition.class().to_string();
        match classes.get(&class) {
            Some(existing) if Arc::ptr_eq(existing, &definition) => Registration::Unchanged,
            Some(_) => {
                let msg = format!("node class '{class}' is already registered");
                log::error!("Node class registration conflict: {}", msg);
                Registration::Conflict(msg)
            }
            None => {
                classes.insert(class, definition);
                Registration::Added
            }
        }
    }

    pub fn unregister(&self, class: &str) -> Option<Arc<NodeDefinition>> {
        self.classes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(class)
    }

    pub fn get(&self, class: &str) -> Option<Arc<NodeDefinition>> {
        self.classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(class)
            .cloned()
    }

    pub fn contains(&self, class: &str) -> bool {
        self.get(class).is_some()
    }

    /// Registered class names, sorted.
    pub fn classes(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::Outputs;

    fn def(class: &str) -> Arc<NodeDefinition> {
        NodeDefinition::builder(class)
            .compute_sync(|_| Ok(Outputs::new()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_register_and_conflict() {
        let reg = NodeRegistry::new();
        let a = def("a");
        assert_eq!(reg.register(a.clone()), Registration::Added);
        assert_eq!(reg.register(a.clone()), Registration::Unchanged);
        assert!(matches!(reg.register(def("a")), Registration::Conflict(_)));
        assert!(Arc::ptr_eq(&reg.get("a").unwrap(), &a));
        assert_eq!(reg.classes(), vec!["a".to_string()]);
        assert!(reg.unregister("a").is_some());
        assert!(!reg.contains("a"));
    }
}
