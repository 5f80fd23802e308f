use pagegauge_core_types::{Artifacts, Audit, AuditError, AuditMeta, AuditOutcome};
use serde_json::{json, Value};
use url::Url;

use super::{artifact, final_url};

pub const NAME: &str = "service-worker";

const ARTIFACT: &str = "ServiceWorker";

/// An activated service worker from the page's own origin.
#[derive(Debug, Default)]
pub struct ServiceWorkerAudit;

impl Audit for ServiceWorkerAudit {
    fn meta(&self) -> AuditMeta {
        AuditMeta {
            name: NAME.to_string(),
            description: "Registers a Service Worker".to_string(),
            required_artifacts: vec!["URL".to_string(), ARTIFACT.to_string()],
        }
    }

    fn audit(&self, artifacts: &Artifacts) -> Result<AuditOutcome, AuditError> {
        let page = final_url(artifacts)?;
        let page_origin = Url::parse(&page)
            .map(|url| url.origin())
            .map_err(|err| AuditError::Failed(format!("invalid final url {page}: {err}")))?;

        let versions = artifact(artifacts, ARTIFACT)?
            .get("versions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let matching: Vec<&Value> = versions
            .iter()
            .filter(|version| version.get("status").and_then(Value::as_str) == Some("activated"))
            .filter(|version| {
                version
                    .get("scriptURL")
                    .and_then(Value::as_str)
                    .and_then(|script| Url::parse(script).ok())
                    .is_some_and(|script| script.origin() == page_origin)
            })
            .collect();

        Ok(AuditOutcome::binary(!matching.is_empty()).with_details(json!({
            "scriptUrls": matching
                .iter()
                .filter_map(|version| version.get("scriptURL").cloned())
                .collect::<Vec<_>>(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifacts(versions: Value) -> Artifacts {
        let mut artifacts = Artifacts::default();
        artifacts.insert_value(
            "URL",
            json!({ "requestedUrl": "https://example.com/", "finalUrl": "https://example.com/app/" }),
        );
        artifacts.insert_value(ARTIFACT, json!({ "versions": versions, "registrations": [] }));
        artifacts
    }

    #[test]
    fn activated_same_origin_worker_passes() {
        let outcome = ServiceWorkerAudit
            .audit(&artifacts(json!([
                { "versionId": "1", "status": "activated", "scriptURL": "https://example.com/sw.js" }
            ])))
            .unwrap();
        assert_eq!(outcome.score, 1.0);
        assert_eq!(outcome.details["scriptUrls"][0], "https://example.com/sw.js");
    }

    #[test]
    fn foreign_or_inactive_workers_fail() {
        let outcome = ServiceWorkerAudit
            .audit(&artifacts(json!([
                { "versionId": "1", "status": "activated", "scriptURL": "https://cdn.example.net/sw.js" },
                { "versionId": "2", "status": "installing", "scriptURL": "https://example.com/sw.js" }
            ])))
            .unwrap();
        assert_eq!(outcome.score, 0.0);
    }
}
