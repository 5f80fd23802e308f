//! Built-in audits. Each one reads artifacts only and never talks to the
//! browser.

pub mod critical_request_chains;
pub mod errors_in_console;
pub mod network_requests;
pub mod redirects;
pub mod service_worker;
pub mod user_timings;
pub mod viewport;
pub mod webapp_manifest;
pub mod works_offline;

use std::sync::Arc;

use network_recorder::{NetworkRecorder, NetworkRecords};
use pagegauge_config::AuditFactory;
use pagegauge_core_types::{ArtifactValue, Artifacts, Audit, AuditError, Trace, DEFAULT_PASS};
use serde_json::Value;

pub use critical_request_chains::CriticalRequestChains;
pub use errors_in_console::ErrorsInConsole;
pub use network_requests::NetworkRequests;
pub use redirects::Redirects;
pub use service_worker::ServiceWorkerAudit;
pub use user_timings::UserTimings;
pub use viewport::Viewport;
pub use webapp_manifest::WebappManifest;
pub use works_offline::WorksOffline;

pub const DEVTOOLS_LOGS: &str = "devtoolsLogs";
pub const TRACES: &str = "traces";

fn create<A: Audit + Default + 'static>() -> Arc<dyn Audit> {
    Arc::new(A::default())
}

/// Ids and constructors of every built-in audit.
pub fn builtin() -> Vec<(&'static str, AuditFactory)> {
    vec![
        (
            critical_request_chains::NAME,
            create::<CriticalRequestChains> as AuditFactory,
        ),
        (redirects::NAME, create::<Redirects> as AuditFactory),
        (viewport::NAME, create::<Viewport> as AuditFactory),
        (errors_in_console::NAME, create::<ErrorsInConsole> as AuditFactory),
        (service_worker::NAME, create::<ServiceWorkerAudit> as AuditFactory),
        (webapp_manifest::NAME, create::<WebappManifest> as AuditFactory),
        (network_requests::NAME, create::<NetworkRequests> as AuditFactory),
        (works_offline::NAME, create::<WorksOffline> as AuditFactory),
        (user_timings::NAME, create::<UserTimings> as AuditFactory),
    ]
}

/// The gathered value of `name`, or the error an audit reports instead.
pub fn artifact<'a>(artifacts: &'a Artifacts, name: &str) -> Result<&'a Value, AuditError> {
    match artifacts.get(name) {
        None => Err(AuditError::MissingArtifact(name.to_string())),
        Some(ArtifactValue::Error(err)) => Err(AuditError::ArtifactError {
            name: name.to_string(),
            message: err.message.clone(),
        }),
        Some(ArtifactValue::Value(value)) => Ok(value),
    }
}

/// Network records replayed from the default pass's devtools log.
pub fn default_pass_records(artifacts: &Artifacts) -> Result<NetworkRecords, AuditError> {
    let log = artifacts
        .devtools_logs
        .get(DEFAULT_PASS)
        .ok_or_else(|| AuditError::MissingArtifact(DEVTOOLS_LOGS.to_string()))?;
    Ok(NetworkRecorder::records_from_logs(log))
}

pub fn default_pass_trace(artifacts: &Artifacts) -> Result<&Trace, AuditError> {
    artifacts
        .traces
        .get(DEFAULT_PASS)
        .ok_or_else(|| AuditError::MissingArtifact(TRACES.to_string()))
}

/// `URL.finalUrl`, the page the audits judge.
pub fn final_url(artifacts: &Artifacts) -> Result<String, AuditError> {
    artifact(artifacts, "URL")?
        .get("finalUrl")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AuditError::Failed("URL artifact has no finalUrl".into()))
}
