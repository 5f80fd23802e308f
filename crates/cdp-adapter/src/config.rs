use serde::{Deserialize, Serialize};
use std::env;
use url::Url;

use crate::error::{AdapterError, AdapterErrorKind};

/// Where to find the debuggable browser and how long to wait for it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CdpConfig {
    pub host: String,
    pub port: u16,
    /// Connect straight to this socket instead of opening a new target.
    pub websocket_url: Option<String>,
    pub connect_timeout_ms: u64,
    /// Capacity of the notification broadcast channel.
    pub event_buffer: usize,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            host: resolve_host(),
            port: resolve_port(),
            websocket_url: None,
            connect_timeout_ms: 10_000,
            event_buffer: 4_096,
        }
    }
}

impl CdpConfig {
    pub fn with_endpoint(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// `http://host:port/json/<command>` on the DevTools HTTP endpoint.
    pub fn json_endpoint(&self, command: &str) -> Result<Url, AdapterError> {
        let base = Url::parse(&format!("http://{}:{}/json/", self.host, self.port)).map_err(
            |err| {
                AdapterError::new(AdapterErrorKind::Internal)
                    .with_hint(format!("invalid debugging endpoint: {err}"))
            },
        )?;
        base.join(command).map_err(|err| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("invalid endpoint command {command}: {err}"))
        })
    }
}

fn resolve_host() -> String {
    match env::var("PAGEGAUGE_HOST") {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => "localhost".to_string(),
    }
}

fn resolve_port() -> u16 {
    env::var("PAGEGAUGE_PORT")
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(9222)
}
