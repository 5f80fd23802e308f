//! Turns a config document into runnable passes and audits.
//!
//! Gatherer and audit ids resolve through layered [`Registry`]s, built-ins
//! first. Resolution validates pass names, applies audit selection and
//! prunes gatherers and passes no selected audit needs.

pub mod defaults;
pub mod errors;
pub mod loader;
pub mod model;
pub mod registry;
pub mod resolve;

pub use defaults::{default_config, DEFAULT_CONFIG_YAML};
pub use errors::ConfigError;
pub use loader::{load_config, locate_config, parse_config};
pub use model::{ConfigJson, PassJson};
pub use registry::{AuditFactory, Registry, RegistryEntry, BUILTIN_LAYER};
pub use resolve::{resolve, validate_passes, ResolvedConfig};
