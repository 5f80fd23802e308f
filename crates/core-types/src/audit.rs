use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::artifacts::Artifacts;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditMeta {
    pub name: String,
    pub description: String,
    pub required_artifacts: Vec<String>,
}

/// Result of one audit over a set of artifacts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditOutcome {
    /// Score in `[0, 1]`.
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_value: Option<String>,
    #[serde(default)]
    pub details: Value,
}

impl AuditOutcome {
    pub fn pass() -> Self {
        Self {
            score: 1.0,
            display_value: None,
            details: Value::Null,
        }
    }

    pub fn fail() -> Self {
        Self {
            score: 0.0,
            ..Self::pass()
        }
    }

    pub fn binary(passed: bool) -> Self {
        if passed {
            Self::pass()
        } else {
            Self::fail()
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display_value = Some(display.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum AuditError {
    #[error("Required {0} gatherer did not run.")]
    MissingArtifact(String),
    #[error("Required {name} gatherer encountered an error: {message}")]
    ArtifactError { name: String, message: String },
    #[error("{0}")]
    Failed(String),
}

/// An audit consumes artifacts and never touches the browser.
pub trait Audit: Send + Sync {
    fn meta(&self) -> AuditMeta;

    fn audit(&self, artifacts: &Artifacts) -> Result<AuditOutcome, AuditError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_artifact_messages() {
        assert_eq!(
            AuditError::MissingArtifact("Manifest".into()).to_string(),
            "Required Manifest gatherer did not run."
        );
        assert_eq!(
            AuditError::ArtifactError {
                name: "Manifest".into(),
                message: "no manifest".into()
            }
            .to_string(),
            "Required Manifest gatherer encountered an error: no manifest"
        );
    }
}
