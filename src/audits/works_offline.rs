use pagegauge_core_types::{Artifacts, Audit, AuditError, AuditMeta, AuditOutcome};
use serde_json::{json, Value};

use super::artifact;

pub const NAME: &str = "works-offline";

const ARTIFACT: &str = "Offline";

#[derive(Debug, Default)]
pub struct WorksOffline;

impl Audit for WorksOffline {
    fn meta(&self) -> AuditMeta {
        AuditMeta {
            name: NAME.to_string(),
            description: "Responds with a 200 when offline".to_string(),
            required_artifacts: vec![ARTIFACT.to_string()],
        }
    }

    fn audit(&self, artifacts: &Artifacts) -> Result<AuditOutcome, AuditError> {
        let status = artifact(artifacts, ARTIFACT)?
            .as_i64()
            .ok_or_else(|| AuditError::Failed(format!("{ARTIFACT} is not a status code")))?;

        let outcome = AuditOutcome::binary(status == 200);
        let outcome = match status {
            200 => outcome,
            -1 => outcome.with_display("The page did not load while offline"),
            code => outcome.with_display(format!("Offline load answered with {code}")),
        };
        Ok(outcome.with_details(json!({ "statusCode": Value::from(status) })))
    }
}
