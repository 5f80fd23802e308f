use std::path::PathBuf;

use pagegauge_core_types::{GatherError, GatherErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("unsupported extends target: {0}")]
    UnsupportedExtends(String),
    #[error("passes[{0}] requires a passName")]
    MissingPassName(usize),
    #[error("Passes must have unique names (repeated passName: {0})")]
    DuplicatePassName(String),
    #[error("Unable to locate gatherer: {0}")]
    UnknownGatherer(String),
    #[error("Unable to locate audit: {0}")]
    UnknownAudit(String),
    #[error("{kind} {id} is registered twice in layer {layer}")]
    DuplicateEntry {
        kind: &'static str,
        id: String,
        layer: String,
    },
    #[error("{kind} {id} is invalid: {reason}")]
    InvalidEntry {
        kind: &'static str,
        id: String,
        reason: String,
    },
}

impl From<ConfigError> for GatherError {
    fn from(value: ConfigError) -> Self {
        GatherError::new(GatherErrorKind::InvalidInput, value.to_string())
    }
}
