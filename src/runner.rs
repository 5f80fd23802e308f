use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use cdp_adapter::{CdpTransport, TrafficSnapshot};
use pagegauge_config::ResolvedConfig;
use pagegauge_core_types::{
    ArtifactValue, Artifacts, Audit, AuditError, AuditOutcome, GatherError, GatherErrorKind,
};
use pagegauge_driver::Driver;
use pagegauge_gather::{GatherOptions, GatherRunner};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::artifacts_io::{load_artifacts, save_artifacts, ArtifactsIoError};

/// Where artifacts are written to or read from, if anywhere.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Save gathered artifacts here. Without `audit_mode` the run stops after
    /// gathering.
    pub gather_mode: Option<PathBuf>,
    /// Audit the artifacts saved here instead of gathering, unless
    /// `gather_mode` is also set.
    pub audit_mode: Option<PathBuf>,
}

impl RunOptions {
    fn gathers(&self) -> bool {
        self.audit_mode.is_none() || self.gather_mode.is_some()
    }

    fn audits(&self) -> bool {
        self.gather_mode.is_none() || self.audit_mode.is_some()
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("{0}")]
    Gather(#[from] GatherError),
    #[error(transparent)]
    Artifacts(#[from] ArtifactsIoError),
}

impl RunError {
    pub fn gather_kind(&self) -> Option<GatherErrorKind> {
        match self {
            RunError::Gather(err) => Some(err.kind),
            RunError::Artifacts(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditResult {
    pub name: String,
    pub description: String,
    /// `None` when the audit could not run.
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_value: Option<String>,
    pub details: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    pub total_ms: u64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub requested_url: String,
    pub final_url: String,
    pub fetch_time: Option<String>,
    pub user_agent: Option<String>,
    pub run_warnings: Vec<String>,
    pub audits: Vec<AuditResult>,
    pub metrics: TrafficSnapshot,
    pub timing: Timing,
}

impl RunResult {
    pub fn audit(&self, name: &str) -> Option<&AuditResult> {
        self.audits.iter().find(|audit| audit.name == name)
    }
}

/// Gathers, audits and assembles the result of one run.
pub struct Runner;

impl Runner {
    pub async fn run(
        transport: Arc<dyn CdpTransport>,
        url: Option<&str>,
        config: &ResolvedConfig,
        options: &RunOptions,
    ) -> Result<RunResult, RunError> {
        let driver = Driver::from_transport(transport);
        Self::run_with_driver(&driver, url, config, options).await
    }

    pub async fn run_with_driver(
        driver: &Driver,
        url: Option<&str>,
        config: &ResolvedConfig,
        options: &RunOptions,
    ) -> Result<RunResult, RunError> {
        let started = Instant::now();

        let artifacts = match (&options.audit_mode, options.gathers()) {
            (Some(dir), false) => load_artifacts(dir).await?,
            _ => {
                let url = validate_url(url.unwrap_or_default())?;
                let gather = GatherOptions {
                    url,
                    settings: config.settings.clone(),
                    passes: config.passes.clone(),
                };
                let artifacts = GatherRunner::run(driver, &gather).await?;
                if let Some(dir) = &options.gather_mode {
                    save_artifacts(dir, &artifacts).await?;
                }
                artifacts
            }
        };

        let audits = if options.audits() {
            run_audits(&artifacts, &config.audits)
        } else {
            info!(target: "runner", "gather-mode only, skipping audits");
            Vec::new()
        };

        Ok(build_result(&artifacts, audits, driver.connection().traffic(), started))
    }
}

/// Accepts absolute http(s) urls with a host and returns them normalized.
pub fn validate_url(raw: &str) -> Result<String, GatherError> {
    let invalid = || {
        GatherError::new(
            GatherErrorKind::InvalidInput,
            format!("The url provided should have a proper protocol and hostname: {raw}"),
        )
    };
    if raw.trim().is_empty() {
        return Err(GatherError::new(
            GatherErrorKind::InvalidInput,
            "You must provide a url to the runner",
        ));
    }
    let url = Url::parse(raw.trim()).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid());
    }
    Ok(url.to_string())
}

/// Runs each audit against `artifacts`. A failing audit yields a result
/// carrying its error and never stops the others.
pub fn run_audits(artifacts: &Artifacts, audits: &[Arc<dyn Audit>]) -> Vec<AuditResult> {
    audits
        .iter()
        .map(|audit| {
            let meta = audit.meta();
            let outcome = check_requirements(artifacts, &meta.required_artifacts)
                .and_then(|()| audit.audit(artifacts))
                .and_then(check_score);
            match outcome {
                Ok(outcome) => AuditResult {
                    name: meta.name,
                    description: meta.description,
                    score: Some(outcome.score),
                    display_value: outcome.display_value,
                    details: outcome.details,
                    error_message: None,
                },
                Err(err) => {
                    warn!(target: "runner", audit = %meta.name, %err, "audit could not run");
                    AuditResult {
                        name: meta.name,
                        description: meta.description,
                        score: None,
                        display_value: None,
                        details: Value::Null,
                        error_message: Some(err.to_string()),
                    }
                }
            }
        })
        .collect()
}

fn check_requirements(artifacts: &Artifacts, required: &[String]) -> Result<(), AuditError> {
    for name in required {
        if !artifacts.has(name) {
            return Err(AuditError::MissingArtifact(name.clone()));
        }
        if let Some(ArtifactValue::Error(err)) = artifacts.get(name) {
            return Err(AuditError::ArtifactError {
                name: name.clone(),
                message: err.message.clone(),
            });
        }
    }
    Ok(())
}

fn check_score(outcome: AuditOutcome) -> Result<AuditOutcome, AuditError> {
    if (0.0..=1.0).contains(&outcome.score) {
        Ok(outcome)
    } else {
        Err(AuditError::Failed(format!(
            "Invalid score: {}",
            outcome.score
        )))
    }
}

fn string_artifact(artifacts: &Artifacts, name: &str) -> Option<String> {
    artifacts
        .value(name)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn build_result(
    artifacts: &Artifacts,
    audits: Vec<AuditResult>,
    traffic: TrafficSnapshot,
    started: Instant,
) -> RunResult {
    let urls = artifacts.value("URL");
    let url_field = |field: &str| {
        urls.and_then(|urls| urls.get(field))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let run_warnings = artifacts
        .value("RunWarnings")
        .and_then(Value::as_array)
        .map(|warnings| {
            warnings
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    RunResult {
        requested_url: url_field("requestedUrl"),
        final_url: url_field("finalUrl"),
        fetch_time: string_artifact(artifacts, "FetchTime"),
        user_agent: string_artifact(artifacts, "UserAgent"),
        run_warnings,
        audits,
        metrics: traffic,
        timing: Timing {
            total_ms: started.elapsed().as_millis() as u64,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagegauge_core_types::AuditMeta;
    use serde_json::json;

    struct Fixed {
        score: f64,
        needs: Vec<String>,
    }

    impl Audit for Fixed {
        fn meta(&self) -> AuditMeta {
            AuditMeta {
                name: "fixed".into(),
                description: "fixed score".into(),
                required_artifacts: self.needs.clone(),
            }
        }

        fn audit(&self, _artifacts: &Artifacts) -> Result<AuditOutcome, AuditError> {
            Ok(AuditOutcome {
                score: self.score,
                ..AuditOutcome::pass()
            })
        }
    }

    fn fixed(score: f64, needs: &[&str]) -> Arc<dyn Audit> {
        Arc::new(Fixed {
            score,
            needs: needs.iter().map(|n| n.to_string()).collect(),
        })
    }

    #[test]
    fn urls_need_a_web_scheme_and_host() {
        assert_eq!(
            validate_url("https://example.com").unwrap(),
            "https://example.com/"
        );
        assert!(validate_url("http://localhost:8080/a?b=c").is_ok());
        for bad in ["", "   ", "example.com", "ftp://example.com/", "file:///tmp/a.html"] {
            let err = validate_url(bad).unwrap_err();
            assert_eq!(err.kind, GatherErrorKind::InvalidInput, "{bad}");
        }
    }

    #[test]
    fn unmet_requirements_become_error_results() {
        let mut artifacts = Artifacts::default();
        artifacts.insert(
            "Manifest",
            ArtifactValue::Error(GatherError::gatherer("boom")),
        );
        let results = run_audits(
            &artifacts,
            &[
                fixed(1.0, &["ViewportDimensions"]),
                fixed(1.0, &["Manifest"]),
                fixed(1.0, &["traces"]),
                fixed(1.5, &[]),
                fixed(0.5, &[]),
            ],
        );
        let messages: Vec<Option<&str>> = results
            .iter()
            .map(|r| r.error_message.as_deref())
            .collect();
        assert_eq!(
            messages,
            vec![
                Some("Required ViewportDimensions gatherer did not run."),
                Some("Required Manifest gatherer encountered an error: boom"),
                Some("Required traces gatherer did not run."),
                Some("Invalid score: 1.5"),
                None,
            ]
        );
        assert_eq!(results[4].score, Some(0.5));
        assert!(results[0].score.is_none());
    }

    #[test]
    fn result_reads_the_reserved_artifacts() {
        let mut artifacts = Artifacts::default();
        artifacts.insert_value(
            "URL",
            json!({ "requestedUrl": "http://a.test/", "finalUrl": "https://a.test/" }),
        );
        artifacts.insert_value("UserAgent", json!("Chrome/70"));
        artifacts.insert_value("RunWarnings", json!(["careful"]));
        let result = build_result(&artifacts, Vec::new(), TrafficSnapshot::default(), Instant::now());
        assert_eq!(result.requested_url, "http://a.test/");
        assert_eq!(result.final_url, "https://a.test/");
        assert_eq!(result.user_agent.as_deref(), Some("Chrome/70"));
        assert_eq!(result.run_warnings, vec!["careful"]);
        assert!(result.fetch_time.is_none());
    }
}
