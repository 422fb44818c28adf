use super::{BillTextHook, Hook};
use crate::config::HookDescriptor;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds a hook from its configured parameters
pub type HookFactory = Box<dyn Fn(&HookDescriptor) -> Result<Arc<dyn Hook>> + Send + Sync>;

/// Maps hook type names from configuration to constructors.
///
/// Built once at startup and handed to [`HookManager::from_config`](super::HookManager::from_config).
/// Tests build their own registry with fake hooks.
#[derive(Default)]
pub struct HookRegistry {
    factories: BTreeMap<String, HookFactory>,
}

impl HookRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the hooks shipped in this crate
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("legiscan", |descriptor| {
            Ok(Arc::new(BillTextHook::from_descriptor(descriptor)?) as Arc<dyn Hook>)
        });
        registry
    }

    /// Add or replace the constructor for a type name
    pub fn register<F>(&mut self, hook_type: impl Into<String>, factory: F)
    where
        F: Fn(&HookDescriptor) -> Result<Arc<dyn Hook>> + Send + Sync + 'static,
    {
        self.factories.insert(hook_type.into(), Box::new(factory));
    }

    /// Registered type names, sorted
    pub fn types(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn contains(&self, hook_type: &str) -> bool {
        self.factories.contains_key(hook_type)
    }

    /// Instantiate the hook a descriptor names
    pub fn create(&self, descriptor: &HookDescriptor) -> Result<Arc<dyn Hook>> {
        let hook_type = descriptor.hook_type.as_deref().ok_or_else(|| {
            Error::MissingHookType(if descriptor.description.is_empty() {
                "unnamed descriptor".to_string()
            } else {
                format!("'{}'", descriptor.description)
            })
        })?;

        let factory = self
            .factories
            .get(hook_type)
            .ok_or_else(|| Error::UnknownHookType {
                name: hook_type.to_string(),
                available: self.types(),
            })?;

        factory(descriptor)
    }
}
