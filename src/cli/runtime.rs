use std::path::PathBuf;

use anyhow::{Context, Result};
use pagegauge_config::{load_config as load_config_file, locate_config, ConfigJson};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_logging(level: &str, debug: bool, json: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

pub struct LoadedConfig {
    pub config: ConfigJson,
    /// `None` when the built-in config was used.
    pub path: Option<PathBuf>,
}

pub fn load_config(config_path: Option<&PathBuf>) -> Result<LoadedConfig> {
    let path = locate_config(config_path.map(PathBuf::as_path));
    let config = load_config_file(config_path.map(PathBuf::as_path)).with_context(|| match &path {
        Some(path) => format!("Failed to load config from {}", path.display()),
        None => "Failed to load the built-in config".to_string(),
    })?;
    info!(
        target: "runner",
        path = %path.as_ref().map_or("<built-in>".into(), |p| p.display().to_string()),
        passes = config.passes.len(),
        audits = config.audits.len(),
        "configuration loaded"
    );
    Ok(LoadedConfig { config, path })
}
