use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;

use crate::runner::{AuditResult, RunResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
    Yaml,
}

pub fn render<T: Serialize>(
    value: &T,
    format: OutputFormat,
    human: impl FnOnce(&T) -> String,
) -> Result<String> {
    Ok(match format {
        OutputFormat::Human => human(value),
        OutputFormat::Json => {
            serde_json::to_string_pretty(value).context("failed to serialize output as JSON")?
        }
        OutputFormat::Yaml => {
            serde_yaml::to_string(value).context("failed to serialize output as YAML")?
        }
    })
}

/// Writes `body` to `path`, or stdout when there is none.
pub async fn emit(body: &str, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => tokio::fs::write(path, body)
            .await
            .with_context(|| format!("failed to write {}", path.display())),
        None => {
            println!("{}", body.trim_end());
            Ok(())
        }
    }
}

fn audit_line(audit: &AuditResult) -> String {
    let status = match (audit.score, &audit.error_message) {
        (_, Some(_)) | (None, _) => "ERROR",
        (Some(score), None) if score >= 1.0 => "PASS",
        (Some(score), None) if score > 0.0 => "WARN",
        _ => "FAIL",
    };
    let mut line = format!("  [{status:<5}] {}: {}", audit.name, audit.description);
    if let Some(display) = &audit.display_value {
        let _ = write!(line, " ({display})");
    }
    if let Some(message) = &audit.error_message {
        let _ = write!(line, "\n           {message}");
    }
    line
}

pub fn human_report(result: &RunResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Report for {}", result.final_url);
    if result.requested_url != result.final_url {
        let _ = writeln!(out, "  requested: {}", result.requested_url);
    }
    if let Some(fetch_time) = &result.fetch_time {
        let _ = writeln!(out, "  fetched:   {fetch_time}");
    }
    if let Some(user_agent) = &result.user_agent {
        let _ = writeln!(out, "  agent:     {user_agent}");
    }
    for warning in &result.run_warnings {
        let _ = writeln!(out, "  warning:   {warning}");
    }
    let _ = writeln!(out);
    for audit in &result.audits {
        let _ = writeln!(out, "{}", audit_line(audit));
    }
    let _ = writeln!(
        out,
        "\n{} audits, {} protocol commands, {} ms",
        result.audits.len(),
        result.metrics.commands,
        result.timing.total_ms
    );
    out
}
