use std::path::Path;

use anyhow::{Context, Result};
use cdp_adapter::metrics as cdp_metrics;
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::info;

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        cdp_metrics::register_metrics(global_registry());
    });
}

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

/// Every registered metric in the Prometheus text exposition format.
pub fn render() -> Result<String> {
    register_metrics();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&global_registry().gather(), &mut buffer)
        .context("failed to encode prometheus metrics")?;
    String::from_utf8(buffer).context("prometheus metrics are not utf8")
}

pub async fn write_metrics(path: &Path) -> Result<()> {
    let body = render()?;
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("failed to write metrics to {}", path.display()))?;
    info!(target: "runner", path = %path.display(), "metrics written");
    Ok(())
}
