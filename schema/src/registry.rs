//! The class schema registry, built once per simulation load.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{SchemaError, SchemaResult};
use crate::hash::registry_hash;
use crate::{ClassId, ClassSchema, TableDef};

/// Static limits enforced when a registry is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SchemaLimits {
    pub max_classes: usize,
    pub max_props_per_class: usize,
    pub max_depth: usize,
}

impl Default for SchemaLimits {
    fn default() -> Self {
        Self {
            max_classes: 512,
            max_props_per_class: 4096,
            max_depth: 16,
        }
    }
}

impl SchemaLimits {
    /// Small limits for tests.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_classes: 16,
            max_props_per_class: 64,
            max_depth: 4,
        }
    }
}

/// Collects class definitions before validation.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    classes: Vec<TableDef>,
    limits: SchemaLimits,
}

impl RegistryBuilder {
    #[must_use]
    pub fn new(limits: SchemaLimits) -> Self {
        Self {
            classes: Vec::new(),
            limits,
        }
    }

    /// Registers a class; its root table name becomes the class name.
    ///
    /// Ids are assigned in registration order.
    pub fn register(&mut self, root: TableDef) -> ClassId {
        let id = ClassId::new(u16::try_from(self.classes.len()).unwrap_or(u16::MAX));
        self.classes.push(root);
        id
    }

    /// Flattens and validates every class.
    pub fn build(self) -> SchemaResult<SchemaRegistry> {
        let limits = self.limits;
        if self.classes.len() > limits.max_classes || self.classes.len() > usize::from(u16::MAX) {
            return Err(SchemaError::TooManyClasses {
                count: self.classes.len(),
                max: limits.max_classes,
            });
        }

        let mut by_name = HashMap::with_capacity(self.classes.len());
        let mut classes = Vec::with_capacity(self.classes.len());
        for (position, root) in self.classes.iter().enumerate() {
            let id = ClassId::new(position as u16);
            if by_name.insert(root.name.clone(), id).is_some() {
                return Err(SchemaError::DuplicateClassName {
                    name: root.name.clone(),
                });
            }
            let class =
                ClassSchema::build(id, root, limits.max_props_per_class, limits.max_depth)?;
            classes.push(Arc::new(class));
        }

        let hash = registry_hash(classes.iter().map(AsRef::as_ref));
        Ok(SchemaRegistry {
            classes,
            by_name,
            hash,
        })
    }
}

/// Immutable set of class schemas shared read-only by every worker.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    classes: Vec<Arc<ClassSchema>>,
    by_name: HashMap<String, ClassId>,
    hash: u64,
}

impl SchemaRegistry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    #[must_use]
    pub fn class(&self, id: ClassId) -> Option<&Arc<ClassSchema>> {
        self.classes.get(usize::from(id.get()))
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Arc<ClassSchema>> {
        self.by_name.get(name).and_then(|id| self.class(*id))
    }

    #[must_use]
    pub fn classes(&self) -> &[Arc<ClassSchema>] {
        &self.classes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Combined hash of every class layout, in id order.
    #[must_use]
    pub const fn hash(&self) -> u64 {
        self.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PropCodec, PropDef};

    fn class(name: &str) -> TableDef {
        TableDef::new(name).prop(PropDef::scalar("v", 0, PropCodec::uint(8)))
    }

    #[test]
    fn ids_follow_registration_order() {
        let mut builder = SchemaRegistry::builder();
        let a = builder.register(class("A"));
        let b = builder.register(class("B"));
        let registry = builder.build().unwrap();

        assert_eq!(a.get(), 0);
        assert_eq!(b.get(), 1);
        assert_eq!(registry.class(b).unwrap().name(), "B");
        assert_eq!(registry.find("A").unwrap().id(), a);
        assert!(registry.find("C").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn rejects_too_many_classes() {
        let mut builder = RegistryBuilder::new(SchemaLimits {
            max_classes: 2,
            ..SchemaLimits::for_testing()
        });
        for name in ["A", "B", "C"] {
            builder.register(class(name));
        }
        assert_eq!(
            builder.build().unwrap_err(),
            SchemaError::TooManyClasses { count: 3, max: 2 }
        );
    }

    #[test]
    fn rejects_duplicate_class_names() {
        let mut builder = SchemaRegistry::builder();
        builder.register(class("A"));
        builder.register(class("A"));
        assert!(matches!(
            builder.build(),
            Err(SchemaError::DuplicateClassName { .. })
        ));
    }

    #[test]
    fn class_errors_propagate() {
        let mut builder = SchemaRegistry::builder();
        builder.register(TableDef::new("Empty"));
        assert!(matches!(builder.build(), Err(SchemaError::EmptyClass { .. })));
    }
}
