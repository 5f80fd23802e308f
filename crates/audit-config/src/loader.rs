use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use pagegauge_core_types::Settings;
use tracing::{debug, info};

use crate::defaults::default_config;
use crate::errors::ConfigError;
use crate::model::{ConfigJson, EXTENDS_DEFAULT};

const PROJECT_CONFIG: &str = "config/pagegauge.yaml";
const USER_CONFIG_DIR: &str = "pagegauge";
const USER_CONFIG_FILE: &str = "config.yaml";
const ENV_SETTINGS_JSON: &str = "PAGEGAUGE_SETTINGS_JSON";

/// First config file that applies: the explicit path, then the project
/// file, then the per-user file. `None` means the built-in config.
pub fn locate_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let project = PathBuf::from(PROJECT_CONFIG);
    if project.exists() {
        return Some(project);
    }
    dirs::config_dir()
        .map(|dir| dir.join(USER_CONFIG_DIR).join(USER_CONFIG_FILE))
        .filter(|path| path.exists())
}

/// Loads the effective config document, settings overlay from the
/// environment included.
pub fn load_config(explicit: Option<&Path>) -> Result<ConfigJson, ConfigError> {
    let config = match locate_config(explicit) {
        Some(path) => {
            info!(target: "config", path = %path.display(), "loading config");
            let content = fs::read_to_string(&path).map_err(|err| ConfigError::Io {
                path: path.clone(),
                message: err.to_string(),
            })?;
            let is_json = path.extension().map_or(false, |ext| ext == "json");
            parse_config(&content, is_json)?
        }
        None => {
            debug!(target: "config", "no config file found, using built-in config");
            default_config()?
        }
    };
    apply_env_settings(config, env::var(ENV_SETTINGS_JSON).ok().as_deref())
}

/// Parses a YAML or JSON document and resolves `extends`.
pub fn parse_config(content: &str, is_json: bool) -> Result<ConfigJson, ConfigError> {
    let config: ConfigJson = if is_json {
        serde_json::from_str(content).map_err(|err| ConfigError::Invalid(err.to_string()))?
    } else {
        serde_yaml::from_str(content).map_err(|err| ConfigError::Invalid(err.to_string()))?
    };
    match config.extends.as_deref() {
        None => Ok(config),
        Some(EXTENDS_DEFAULT) => Ok(config.merged_over(default_config()?)),
        Some(other) => Err(ConfigError::UnsupportedExtends(other.to_string())),
    }
}

/// Overlays a JSON object of settings on the config's settings.
pub fn apply_env_settings(
    mut config: ConfigJson,
    raw: Option<&str>,
) -> Result<ConfigJson, ConfigError> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(config);
    };
    let overlay: Settings = serde_json::from_str(raw)
        .map_err(|err| ConfigError::Invalid(format!("{ENV_SETTINGS_JSON}: {err}")))?;
    debug!(target: "config", "applying settings from {ENV_SETTINGS_JSON}");
    config.settings = config.settings.merge(overlay);
    Ok(config)
}
