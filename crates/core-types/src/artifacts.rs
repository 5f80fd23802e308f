use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::GatherError;
use crate::protocol::{Notification, Trace};

/// Artifact names owned by the gather runner itself. Gatherers may not use them.
pub const RESERVED_ARTIFACTS: &[&str] = &[
    "traces",
    "devtoolsLogs",
    "UserAgent",
    "FetchTime",
    "RunWarnings",
    "URL",
];

/// A gathered artifact is either a value or the error that replaced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactValue {
    Value(Value),
    Error(GatherError),
}

impl ArtifactValue {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            ArtifactValue::Value(value) => Some(value),
            ArtifactValue::Error(_) => None,
        }
    }

    pub fn as_error(&self) -> Option<&GatherError> {
        match self {
            ArtifactValue::Error(err) => Some(err),
            ArtifactValue::Value(_) => None,
        }
    }
}

/// Everything a run collected, keyed by artifact name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifacts {
    pub gathered: BTreeMap<String, ArtifactValue>,
    pub traces: BTreeMap<String, Trace>,
    pub devtools_logs: BTreeMap<String, Vec<Notification>>,
}

impl Artifacts {
    pub fn insert(&mut self, name: impl Into<String>, value: ArtifactValue) {
        self.gathered.insert(name.into(), value);
    }

    pub fn insert_value(&mut self, name: impl Into<String>, value: Value) {
        self.insert(name, ArtifactValue::Value(value));
    }

    pub fn get(&self, name: &str) -> Option<&ArtifactValue> {
        self.gathered.get(name)
    }

    /// Value of an artifact, `None` if absent or errored.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(ArtifactValue::as_value)
    }

    /// Whether `name` is available to an audit. `traces` and `devtoolsLogs`
    /// are always present once a run completes.
    pub fn has(&self, name: &str) -> bool {
        match name {
            "traces" => !self.traces.is_empty(),
            "devtoolsLogs" => !self.devtools_logs.is_empty(),
            other => self.gathered.contains_key(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatherErrorKind;
    use serde_json::json;

    #[test]
    fn errored_artifact_has_no_value() {
        let mut artifacts = Artifacts::default();
        artifacts.insert_value("ViewportDimensions", json!({ "innerWidth": 412 }));
        artifacts.insert(
            "Manifest",
            ArtifactValue::Error(GatherError::new(GatherErrorKind::Gatherer, "no manifest")),
        );

        assert_eq!(
            artifacts.value("ViewportDimensions").unwrap()["innerWidth"],
            412
        );
        assert!(artifacts.has("Manifest"));
        assert!(artifacts.value("Manifest").is_none());
        assert!(artifacts.get("Manifest").unwrap().as_error().is_some());
    }

    #[test]
    fn serializes_value_and_error_variants_by_tag() {
        let mut artifacts = Artifacts::default();
        artifacts.insert_value("A", json!(1));
        artifacts.insert(
            "B",
            ArtifactValue::Error(GatherError::gatherer("boom").recoverable(true)),
        );
        let json = serde_json::to_value(&artifacts).unwrap();
        assert_eq!(json["gathered"]["A"]["value"], 1);
        assert_eq!(json["gathered"]["B"]["error"]["message"], "boom");
        assert!(json["devtoolsLogs"].is_object());
    }
}
