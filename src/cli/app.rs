use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cdp_adapter::{CdpTransport, WebSocketTransport};
use clap::Parser;
use pagegauge_config::{resolve, AuditFactory, Registry};
use pagegauge_core_types::{GatherError, GatherErrorKind};
use pagegauge_driver::trace::trace_categories;
use pagegauge_gather::gatherers;
use pagegauge_gather::GathererFactory;
use serde_json::json;
use tracing::{error, info};

use super::constants::{
    EXIT_CONNECT_TIMEOUT, EXIT_FAILURE, EXIT_MULTIPLE_TABS, EXIT_OK, EXIT_PAGE_LOAD,
};
use super::env::CliArgs;
use super::output::{emit, human_report, render};
use super::runtime::{init_logging, load_config, LoadedConfig};
use crate::audits;
use crate::metrics::write_metrics;
use crate::runner::{RunError, RunOptions, Runner};

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();

    init_logging(&cli.log_level, cli.debug, cli.log_json)?;

    info!(target: "runner", "Starting pagegauge v{}", env!("CARGO_PKG_VERSION"));

    match execute(&cli).await {
        Ok(()) => {
            info!(target: "runner", "Run completed successfully");
            Ok(())
        }
        Err(err) => {
            error!(target: "runner", "Run failed: {:#}", err);
            Err(err)
        }
    }
}

async fn execute(cli: &CliArgs) -> Result<()> {
    if cli.list_trace_categories {
        let categories = trace_categories(cli.additional_trace_categories.as_deref());
        let body = render(&json!({ "traceCategories": categories }), cli.output, |_| {
            categories.join("\n")
        })?;
        return emit(&body, cli.output_path.as_deref()).await;
    }

    let gatherer_registry: Registry<GathererFactory> =
        Registry::with_builtins(gatherers::builtin()).context("invalid built-in gatherer")?;
    let audit_registry: Registry<AuditFactory> =
        Registry::with_builtins(audits::builtin()).context("invalid built-in audit")?;

    if cli.list_all_audits {
        let ids = audit_registry.ids();
        let body = render(&json!({ "audits": ids }), cli.output, |_| ids.join("\n"))?;
        return emit(&body, cli.output_path.as_deref()).await;
    }

    let LoadedConfig { mut config, .. } = load_config(cli.config.as_ref())?;
    config.settings = config.settings.merge(cli.settings_overrides());
    let resolved = resolve(&config, &gatherer_registry, &audit_registry)
        .context("Failed to resolve the configuration")?;

    if cli.needs_browser() && cli.url.is_none() {
        bail!("Please provide a url to audit");
    }

    let transport: Arc<dyn CdpTransport> = Arc::new(WebSocketTransport::new(cli.cdp_config()));
    let options = RunOptions {
        gather_mode: cli.gather_mode.clone(),
        audit_mode: cli.audit_mode.clone(),
    };
    let result = Runner::run(transport, cli.url.as_deref(), &resolved, &options).await?;

    if let Some(path) = &cli.metrics_out {
        write_metrics(path).await?;
    }

    let body = render(&result, cli.output, human_report)?;
    emit(&body, cli.output_path.as_deref()).await
}

/// Process exit status for a failed run.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    let kind = err
        .downcast_ref::<RunError>()
        .and_then(RunError::gather_kind)
        .or_else(|| err.downcast_ref::<GatherError>().map(|err| err.kind));
    match kind {
        Some(GatherErrorKind::ConnectTimeout) => EXIT_CONNECT_TIMEOUT,
        Some(GatherErrorKind::PageLoad) => EXIT_PAGE_LOAD,
        Some(GatherErrorKind::MultipleTabs) => EXIT_MULTIPLE_TABS,
        _ => EXIT_FAILURE,
    }
}

pub fn status(result: &Result<()>) -> i32 {
    match result {
        Ok(()) => EXIT_OK,
        Err(err) => exit_code(err),
    }
}
