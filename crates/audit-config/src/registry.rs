use std::collections::BTreeMap;
use std::sync::Arc;

use pagegauge_core_types::artifacts::RESERVED_ARTIFACTS;
use pagegauge_core_types::Audit;
use pagegauge_gather::GathererFactory;
use parking_lot::RwLock;
use tracing::debug;

use crate::errors::ConfigError;

/// Name of the layer every registry starts with.
pub const BUILTIN_LAYER: &str = "builtin";

pub type AuditFactory = fn() -> Arc<dyn Audit>;

/// Something a registry can hold, checked once when it is registered.
pub trait RegistryEntry: Copy + Send + Sync + 'static {
    const KIND: &'static str;

    fn validate(&self, id: &str) -> Result<(), String>;
}

impl RegistryEntry for GathererFactory {
    const KIND: &'static str = "gatherer";

    fn validate(&self, id: &str) -> Result<(), String> {
        if RESERVED_ARTIFACTS.contains(&id) {
            return Err(format!("{id} is an artifact the gather runner provides"));
        }
        let gatherer = self();
        if gatherer.name() != id {
            return Err(format!("instance is named {}", gatherer.name()));
        }
        Ok(())
    }
}

impl RegistryEntry for AuditFactory {
    const KIND: &'static str = "audit";

    fn validate(&self, id: &str) -> Result<(), String> {
        let meta = self().meta();
        if meta.name.trim().is_empty() {
            return Err("meta.name is empty".into());
        }
        if meta.description.trim().is_empty() {
            return Err("meta.description is empty".into());
        }
        if meta.name != id {
            return Err(format!("meta.name is {}", meta.name));
        }
        Ok(())
    }
}

struct Layer<F> {
    name: String,
    entries: BTreeMap<String, F>,
}

/// Id to factory map in layers. Lookups go through layers in the order
/// they were added, so built-ins shadow later plugin layers.
pub struct Registry<F> {
    layers: RwLock<Vec<Layer<F>>>,
}

impl<F: RegistryEntry> Default for Registry<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: RegistryEntry> Registry<F> {
    pub fn new() -> Self {
        Self {
            layers: RwLock::new(vec![Layer {
                name: BUILTIN_LAYER.to_string(),
                entries: BTreeMap::new(),
            }]),
        }
    }

    /// A registry whose built-in layer holds `entries`.
    pub fn with_builtins<'a>(
        entries: impl IntoIterator<Item = (&'a str, F)>,
    ) -> Result<Self, ConfigError> {
        let registry = Self::new();
        for (id, factory) in entries {
            registry.register(BUILTIN_LAYER, id, factory)?;
        }
        Ok(registry)
    }

    /// Adds `factory` under `id` to `layer`, appending the layer if it is new.
    pub fn register(&self, layer: &str, id: &str, factory: F) -> Result<(), ConfigError> {
        factory
            .validate(id)
            .map_err(|reason| ConfigError::InvalidEntry {
                kind: F::KIND,
                id: id.to_string(),
                reason,
            })?;

        let mut layers = self.layers.write();
        if let Some(shadowing) = layers
            .iter()
            .take_while(|existing| existing.name != layer)
            .find(|existing| existing.entries.contains_key(id))
        {
            debug!(
                target: "config",
                kind = F::KIND,
                id,
                layer,
                shadowed_by = %shadowing.name,
                "registered entry is shadowed by an earlier layer"
            );
        }

        let index = match layers.iter().position(|existing| existing.name == layer) {
            Some(index) => index,
            None => {
                layers.push(Layer {
                    name: layer.to_string(),
                    entries: BTreeMap::new(),
                });
                layers.len() - 1
            }
        };
        let entries = &mut layers[index].entries;
        if entries.contains_key(id) {
            return Err(ConfigError::DuplicateEntry {
                kind: F::KIND,
                id: id.to_string(),
                layer: layer.to_string(),
            });
        }
        entries.insert(id.to_string(), factory);
        Ok(())
    }

    pub fn resolve(&self, id: &str) -> Option<F> {
        self.layers
            .read()
            .iter()
            .find_map(|layer| layer.entries.get(id).copied())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resolve(id).is_some()
    }

    /// Every id visible through the registry, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .layers
            .read()
            .iter()
            .flat_map(|layer| layer.entries.keys().cloned())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn layer_names(&self) -> Vec<String> {
        self.layers
            .read()
            .iter()
            .map(|layer| layer.name.clone())
            .collect()
    }
}
