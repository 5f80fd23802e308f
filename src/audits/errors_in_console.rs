use pagegauge_core_types::{Artifacts, Audit, AuditError, AuditMeta, AuditOutcome};
use serde_json::{json, Value};

use super::artifact;

pub const NAME: &str = "errors-in-console";

const ARTIFACT: &str = "ConsoleMessages";

/// Console entries logged at the `error` level during load.
#[derive(Debug, Default)]
pub struct ErrorsInConsole;

impl Audit for ErrorsInConsole {
    fn meta(&self) -> AuditMeta {
        AuditMeta {
            name: NAME.to_string(),
            description: "No browser errors logged to the console".to_string(),
            required_artifacts: vec![ARTIFACT.to_string()],
        }
    }

    fn audit(&self, artifacts: &Artifacts) -> Result<AuditOutcome, AuditError> {
        let entries = artifact(artifacts, ARTIFACT)?
            .as_array()
            .ok_or_else(|| AuditError::Failed(format!("{ARTIFACT} is not a list")))?;

        let errors: Vec<Value> = entries
            .iter()
            .filter(|entry| entry.get("level").and_then(Value::as_str) == Some("error"))
            .map(|entry| {
                json!({
                    "source": entry.get("source").cloned().unwrap_or(Value::Null),
                    "description": entry.get("text").cloned().unwrap_or(Value::Null),
                    "url": entry.get("url").cloned().unwrap_or(Value::Null),
                })
            })
            .collect();

        let outcome = AuditOutcome::binary(errors.is_empty());
        let outcome = match errors.len() {
            0 => outcome,
            1 => outcome.with_display("1 error logged"),
            n => outcome.with_display(format!("{n} errors logged")),
        };
        Ok(outcome.with_details(json!({ "items": errors })))
    }
}
