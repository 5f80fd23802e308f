use pagegauge_core_types::{Artifacts, Audit, AuditError, AuditMeta, AuditOutcome};
use serde_json::{json, Value};

use super::{artifact, default_pass_records, DEVTOOLS_LOGS};

pub const NAME: &str = "network-requests";

const SUMMARY: &str = "NetworkSummary";

/// Lists every request the default pass made. Informative only.
#[derive(Debug, Default)]
pub struct NetworkRequests;

impl Audit for NetworkRequests {
    fn meta(&self) -> AuditMeta {
        AuditMeta {
            name: NAME.to_string(),
            description: "Network Requests".to_string(),
            required_artifacts: vec![SUMMARY.to_string(), DEVTOOLS_LOGS.to_string()],
        }
    }

    fn audit(&self, artifacts: &Artifacts) -> Result<AuditOutcome, AuditError> {
        let summary = artifact(artifacts, SUMMARY)?;
        let records = default_pass_records(artifacts)?;
        let origin = records
            .iter()
            .map(|record| record.start_time)
            .fold(f64::INFINITY, f64::min);

        let items: Vec<Value> = records
            .iter()
            .map(|record| {
                json!({
                    "url": record.url,
                    "startTime": (record.start_time - origin) * 1_000.0,
                    "endTime": record.end_time.map(|end| (end - origin) * 1_000.0),
                    "transferSize": record.transfer_size,
                    "statusCode": record.status_code,
                    "mimeType": record.mime_type,
                    "resourceType": record.resource_type,
                })
            })
            .collect();

        let count = summary
            .get("requestCount")
            .and_then(Value::as_u64)
            .unwrap_or(items.len() as u64);
        let kib = summary
            .get("transferSize")
            .and_then(Value::as_u64)
            .unwrap_or(0) as f64
            / 1024.0;
        Ok(AuditOutcome::pass()
            .with_display(format!("{count} requests • {kib:.0} KiB"))
            .with_details(json!({ "items": items, "summary": summary })))
    }
}
