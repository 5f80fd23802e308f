use pagegauge_core_types::{Artifacts, Audit, AuditError, AuditMeta, AuditOutcome};
use serde_json::{json, Value};

use super::artifact;

pub const NAME: &str = "viewport";

const ARTIFACT: &str = "ViewportDimensions";

/// Page content is as wide as the window it renders in.
#[derive(Debug, Default)]
pub struct Viewport;

impl Audit for Viewport {
    fn meta(&self) -> AuditMeta {
        AuditMeta {
            name: NAME.to_string(),
            description: "Content is sized correctly for the viewport".to_string(),
            required_artifacts: vec![ARTIFACT.to_string()],
        }
    }

    fn audit(&self, artifacts: &Artifacts) -> Result<AuditOutcome, AuditError> {
        let dimensions = artifact(artifacts, ARTIFACT)?;
        let width = |field: &str| {
            dimensions.get(field).and_then(Value::as_f64).ok_or_else(|| {
                AuditError::Failed(format!("{ARTIFACT} is missing {field}"))
            })
        };
        let inner = width("innerWidth")?;
        let outer = width("outerWidth")?;

        let outcome = AuditOutcome::binary(inner == outer);
        let outcome = if inner == outer {
            outcome
        } else {
            outcome.with_display(format!(
                "The viewport size is {outer}px, whereas the window size is {inner}px."
            ))
        };
        Ok(outcome.with_details(json!({ "innerWidth": inner, "outerWidth": outer })))
    }
}
