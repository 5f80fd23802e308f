//! Saving and loading a run's artifacts so gathering and auditing can happen
//! separately.
//!
//! Layout of an artifacts directory:
//! - `artifacts.json`: every gathered artifact, errors included
//! - `<pass>.trace.json`: the trace recorded in `<pass>`
//! - `<pass>.devtoolslog.json`: the pass's protocol notifications

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use pagegauge_core_types::{ArtifactValue, Artifacts, Notification, Trace};
use serde_json::Value;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

pub const ARTIFACTS_FILE: &str = "artifacts.json";
const TRACE_SUFFIX: &str = ".trace.json";
const DEVTOOLS_LOG_SUFFIX: &str = ".devtoolslog.json";

#[derive(Debug, Error)]
pub enum ArtifactsIoError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("failed to serialize {name}: {source}")]
    Serialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ArtifactsIoError + '_ {
    move |source| ArtifactsIoError::Io {
        path: path.to_path_buf(),
        source,
    }
}

async fn write_json<T: serde::Serialize>(
    dir: &Path,
    file: &str,
    value: &T,
) -> Result<(), ArtifactsIoError> {
    let path = dir.join(file);
    let body = serde_json::to_string_pretty(value).map_err(|source| {
        ArtifactsIoError::Serialize {
            name: file.to_string(),
            source,
        }
    })?;
    fs::write(&path, body).await.map_err(io_error(&path))?;
    debug!(target: "runner", path = %path.display(), "artifact file written");
    Ok(())
}

async fn read_json(path: &Path) -> Result<Value, ArtifactsIoError> {
    let body = fs::read_to_string(path).await.map_err(io_error(path))?;
    serde_json::from_str(&body).map_err(|err| ArtifactsIoError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

/// Writes `artifacts` into `dir`, creating it if needed.
pub async fn save_artifacts(dir: &Path, artifacts: &Artifacts) -> Result<(), ArtifactsIoError> {
    fs::create_dir_all(dir).await.map_err(io_error(dir))?;

    write_json(dir, ARTIFACTS_FILE, &artifacts.gathered).await?;
    for (pass, trace) in &artifacts.traces {
        write_json(dir, &format!("{pass}{TRACE_SUFFIX}"), trace).await?;
    }
    for (pass, log) in &artifacts.devtools_logs {
        write_json(dir, &format!("{pass}{DEVTOOLS_LOG_SUFFIX}"), log).await?;
    }

    info!(
        target: "runner",
        dir = %dir.display(),
        traces = artifacts.traces.len(),
        devtools_logs = artifacts.devtools_logs.len(),
        "artifacts saved"
    );
    Ok(())
}

/// Reads artifacts previously written by [`save_artifacts`]. Traces in the
/// legacy bare-array form are accepted.
pub async fn load_artifacts(dir: &Path) -> Result<Artifacts, ArtifactsIoError> {
    let gathered_path = dir.join(ARTIFACTS_FILE);
    let gathered: BTreeMap<String, ArtifactValue> =
        serde_json::from_value(read_json(&gathered_path).await?).map_err(|err| {
            ArtifactsIoError::Parse {
                path: gathered_path.clone(),
                message: err.to_string(),
            }
        })?;

    let mut artifacts = Artifacts {
        gathered,
        ..Artifacts::default()
    };

    let mut entries = fs::read_dir(dir).await.map_err(io_error(dir))?;
    while let Some(entry) = entries.next_entry().await.map_err(io_error(dir))? {
        let path = entry.path();
        let Some(file) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if let Some(pass) = file.strip_suffix(TRACE_SUFFIX) {
            let trace = Trace::from_payload(read_json(&path).await?).ok_or_else(|| {
                ArtifactsIoError::Parse {
                    path: path.clone(),
                    message: "expected a trace event array or a traceEvents object".into(),
                }
            })?;
            artifacts.traces.insert(pass.to_string(), trace);
        } else if let Some(pass) = file.strip_suffix(DEVTOOLS_LOG_SUFFIX) {
            let log: Vec<Notification> = serde_json::from_value(read_json(&path).await?)
                .map_err(|err| ArtifactsIoError::Parse {
                    path: path.clone(),
                    message: err.to_string(),
                })?;
            artifacts.devtools_logs.insert(pass.to_string(), log);
        }
    }

    info!(
        target: "runner",
        dir = %dir.display(),
        artifacts = artifacts.gathered.len(),
        traces = artifacts.traces.len(),
        "artifacts loaded"
    );
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagegauge_core_types::{GatherError, DEFAULT_PASS};
    use serde_json::json;

    fn sample() -> Artifacts {
        let mut artifacts = Artifacts::default();
        artifacts.insert_value("ViewportDimensions", json!({ "innerWidth": 412 }));
        artifacts.insert(
            "Manifest",
            ArtifactValue::Error(GatherError::gatherer("no manifest").recoverable(true)),
        );
        artifacts.traces.insert(
            DEFAULT_PASS.to_string(),
            Trace {
                trace_events: vec![json!({ "name": "navigationStart", "ts": 1 })],
            },
        );
        artifacts.devtools_logs.insert(
            DEFAULT_PASS.to_string(),
            vec![Notification::new("Page.loadEventFired", json!({ "timestamp": 1.0 }))],
        );
        artifacts
            .devtools_logs
            .insert("serviceWorkerPass".to_string(), Vec::new());
        artifacts
    }

    #[tokio::test]
    async fn saved_artifacts_load_back_with_errors_intact() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = sample();
        save_artifacts(dir.path(), &artifacts).await.unwrap();

        assert!(dir.path().join("defaultPass.trace.json").exists());
        assert!(dir.path().join("serviceWorkerPass.devtoolslog.json").exists());
        assert!(!dir.path().join("serviceWorkerPass.trace.json").exists());

        let loaded = load_artifacts(dir.path()).await.unwrap();
        assert_eq!(loaded, artifacts);
        assert_eq!(
            loaded.get("Manifest").and_then(ArtifactValue::as_error).map(|e| e.recoverable),
            Some(true)
        );
    }

    #[tokio::test]
    async fn legacy_array_traces_are_normalized() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ARTIFACTS_FILE), "{}").unwrap();
        std::fs::write(
            dir.path().join("defaultPass.trace.json"),
            r#"[{ "name": "TracingStartedInPage", "ts": 5 }]"#,
        )
        .unwrap();

        let loaded = load_artifacts(dir.path()).await.unwrap();
        assert_eq!(loaded.traces[DEFAULT_PASS].trace_events[0]["ts"], 5);
    }

    #[tokio::test]
    async fn missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_artifacts(&dir.path().join("absent")).await.unwrap_err();
        assert!(matches!(err, ArtifactsIoError::Io { .. }));

        std::fs::write(dir.path().join(ARTIFACTS_FILE), "not json").unwrap();
        let err = load_artifacts(dir.path()).await.unwrap_err();
        assert!(matches!(err, ArtifactsIoError::Parse { .. }));
    }
}
