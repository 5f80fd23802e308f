use pagegauge_core_types::{Artifacts, Audit, AuditError, AuditMeta, AuditOutcome};
use serde_json::{json, Value};

use super::artifact;

pub const NAME: &str = "webapp-manifest";

const ARTIFACT: &str = "Manifest";

const INSTALLABLE_DISPLAY: &[&str] = &["fullscreen", "standalone", "minimal-ui"];

/// The page links a parseable manifest carrying the fields an installable
/// app needs.
#[derive(Debug, Default)]
pub struct WebappManifest;

impl Audit for WebappManifest {
    fn meta(&self) -> AuditMeta {
        AuditMeta {
            name: NAME.to_string(),
            description: "Web app manifest meets the installability requirements".to_string(),
            required_artifacts: vec![ARTIFACT.to_string()],
        }
    }

    fn audit(&self, artifacts: &Artifacts) -> Result<AuditOutcome, AuditError> {
        let manifest = artifact(artifacts, ARTIFACT)?;
        if manifest.is_null() {
            return Ok(AuditOutcome::fail().with_display("No manifest was fetched"));
        }
        if let Some(debug) = manifest.get("debugString").and_then(Value::as_str) {
            return Ok(AuditOutcome::fail().with_display(debug));
        }

        let value = manifest.get("value").unwrap_or(&Value::Null);
        let failures = missing_fields(value);
        let outcome = AuditOutcome::binary(failures.is_empty());
        let outcome = if failures.is_empty() {
            outcome
        } else {
            outcome.with_display(format!("Failures: {}.", failures.join(", ")))
        };
        Ok(outcome.with_details(json!({
            "manifestUrl": manifest.get("url").cloned().unwrap_or(Value::Null),
            "failures": failures,
        })))
    }
}

fn non_empty_str(value: &Value, field: &str) -> bool {
    value
        .get(field)
        .and_then(Value::as_str)
        .is_some_and(|text| !text.trim().is_empty())
}

fn missing_fields(value: &Value) -> Vec<&'static str> {
    let mut failures = Vec::new();
    if !non_empty_str(value, "name") && !non_empty_str(value, "short_name") {
        failures.push("Manifest does not have a name or short_name");
    }
    if !non_empty_str(value, "start_url") {
        failures.push("Manifest does not contain a start_url");
    }
    let has_icons = value
        .get("icons")
        .and_then(Value::as_array)
        .is_some_and(|icons| !icons.is_empty());
    if !has_icons {
        failures.push("Manifest does not have icons");
    }
    let display = value.get("display").and_then(Value::as_str);
    if !display.is_some_and(|display| INSTALLABLE_DISPLAY.contains(&display)) {
        failures.push("Manifest's display value is not one of: fullscreen, standalone, minimal-ui");
    }
    failures
}
