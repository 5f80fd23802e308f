use pagegauge_core_types::{Artifacts, Audit, AuditError, AuditMeta, AuditOutcome};
use serde_json::{json, Value};

use super::{default_pass_records, final_url, DEVTOOLS_LOGS};

pub const NAME: &str = "redirects";

/// Redirect hops taken by the main document before it started loading.
#[derive(Debug, Default)]
pub struct Redirects;

impl Audit for Redirects {
    fn meta(&self) -> AuditMeta {
        AuditMeta {
            name: NAME.to_string(),
            description: "Avoids page redirects".to_string(),
            required_artifacts: vec!["URL".to_string(), DEVTOOLS_LOGS.to_string()],
        }
    }

    fn audit(&self, artifacts: &Artifacts) -> Result<AuditOutcome, AuditError> {
        let final_url = final_url(artifacts)?;
        let records = default_pass_records(artifacts)?;
        let main = records
            .find_by_url_excluding_fragment(&final_url)
            .ok_or_else(|| {
                AuditError::Failed(format!("Unable to find the main resource for {final_url}"))
            })?;

        let chain = records.redirect_chain(main.id);
        let hops: Vec<Value> = chain
            .windows(2)
            .map(|pair| {
                let wasted_ms = (pair[1].start_time - pair[0].start_time) * 1_000.0;
                json!({ "url": pair[0].url, "wastedMs": wasted_ms })
            })
            .collect();

        let outcome = AuditOutcome::binary(hops.is_empty());
        let outcome = match hops.len() {
            0 => outcome,
            1 => outcome.with_display("1 redirect"),
            n => outcome.with_display(format!("{n} redirects")),
        };
        Ok(outcome.with_details(json!({ "items": hops })))
    }
}
