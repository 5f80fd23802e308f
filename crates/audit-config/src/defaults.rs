use crate::errors::ConfigError;
use crate::model::ConfigJson;

/// Built-in config, compiled into the binary.
pub const DEFAULT_CONFIG_YAML: &str = include_str!("default-config.yaml");

pub fn default_config() -> Result<ConfigJson, ConfigError> {
    serde_yaml::from_str(DEFAULT_CONFIG_YAML)
        .map_err(|err| ConfigError::Invalid(format!("built-in config: {err}")))
}
