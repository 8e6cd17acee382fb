//! Dependency descriptors.
//!
//! A [`Descriptor`] states which keys a module requires, which it uses when
//! available, and which it provides. The module's own key is always one of
//! the provided keys.

use crate::{Error, Key, MAX_PRIORITY, Result};
use indexmap::IndexSet;

/// Immutable dependency declaration of a single module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor<K: Key> {
    key: K,
    required: IndexSet<K>,
    optional: IndexSet<K>,
    providers: IndexSet<K>,
    priority: u32,
}

impl<K: Key> Descriptor<K> {
    /// Start building a descriptor for the module identified by `key`.
    #[must_use]
    pub fn builder(key: K) -> DescriptorBuilder<K> {
        DescriptorBuilder::new(key)
    }

    /// The module's own key.
    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Keys that must be provided by at least one other module.
    #[must_use]
    pub fn required(&self) -> &IndexSet<K> {
        &self.required
    }

    /// Keys used if some module provides them.
    #[must_use]
    pub fn optional(&self) -> &IndexSet<K> {
        &self.optional
    }

    /// Keys provided by this module, including its own key.
    ///
    /// Providers are always optional: nobody is forced to consume them.
    #[must_use]
    pub fn providers(&self) -> &IndexSet<K> {
        &self.providers
    }

    /// Execution priority.
    ///
    /// Lifts the module up in the execution order as long as its dependencies
    /// are satisfied.
    #[must_use]
    pub fn priority(&self) -> u32 {
        self.priority
    }
}

/// Fluent builder for [`Descriptor`].
#[derive(Debug, Clone)]
pub struct DescriptorBuilder<K: Key> {
    key: K,
    required: IndexSet<K>,
    optional: IndexSet<K>,
    providers: IndexSet<K>,
    priority: u32,
}

impl<K: Key> DescriptorBuilder<K> {
    /// Register a module under `key`; the key is also its first provided key.
    #[must_use]
    pub fn new(key: K) -> Self {
        let mut providers = IndexSet::new();
        providers.insert(key.clone());
        Self {
            key,
            required: IndexSet::new(),
            optional: IndexSet::new(),
            providers,
            priority: 0,
        }
    }

    /// Require `key`; building the graph fails if nobody provides it.
    #[must_use]
    pub fn requires(mut self, key: K) -> Self {
        self.required.insert(key);
        self
    }

    /// Use `key` when some module provides it.
    #[must_use]
    pub fn requires_optionally(mut self, key: K) -> Self {
        self.optional.insert(key);
        self
    }

    /// Provide `key` in addition to the module's own key.
    #[must_use]
    pub fn provides(mut self, key: K) -> Self {
        self.providers.insert(key);
        self
    }

    /// Set the execution priority (0..=100000).
    #[must_use]
    pub fn execution_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Finish the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPriority`] if the priority exceeds
    /// [`MAX_PRIORITY`].
    pub fn build(self) -> Result<Descriptor<K>> {
        if self.priority > MAX_PRIORITY {
            return Err(Error::InvalidPriority {
                module: crate::error::render_key(&self.key),
                priority: self.priority,
            });
        }
        Ok(Descriptor {
            key: self.key,
            required: self.required,
            optional: self.optional,
            providers: self.providers,
            priority: self.priority,
        })
    }
}

/// Module types that carry their own descriptor.
///
/// Implement this for your module type to build a graph directly from a set
/// of modules with [`GraphBuilder::from_modules`](crate::GraphBuilder::from_modules).
pub trait Describe {
    /// Key type used to match producers to consumers.
    type Key: Key;

    /// The module's dependency declaration.
    fn descriptor(&self) -> &Descriptor<Self::Key>;
}
