use pagegauge_core_types::{GatherError, GatherErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// High-level error categories surfaced by the connection.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterErrorKind {
    #[error("protocol timeout")]
    ConnectTimeout,
    #[error("cdp i/o failure")]
    CdpIo,
    #[error("protocol error")]
    Protocol,
    #[error("target closed")]
    TargetClosed,
    #[error("connection disposed")]
    Disposed,
    #[error("internal error")]
    Internal,
}

/// Enriched error metadata passed back to higher layers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub hint: Option<String>,
    pub retriable: bool,
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for AdapterError {}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind) -> Self {
        Self {
            kind,
            hint: None,
            retriable: false,
            data: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Remote or local message without the kind prefix.
    pub fn message(&self) -> String {
        self.hint.clone().unwrap_or_else(|| self.kind.to_string())
    }

    /// True for a remote error envelope whose message contains `needle`.
    pub fn is_protocol_message(&self, needle: &str) -> bool {
        self.kind == AdapterErrorKind::Protocol
            && self.hint.as_deref().is_some_and(|hint| hint.contains(needle))
    }
}

impl From<AdapterError> for GatherError {
    fn from(err: AdapterError) -> Self {
        let kind = match err.kind {
            AdapterErrorKind::ConnectTimeout => GatherErrorKind::ConnectTimeout,
            AdapterErrorKind::TargetClosed => GatherErrorKind::TargetClosed,
            AdapterErrorKind::Protocol | AdapterErrorKind::CdpIo => GatherErrorKind::Protocol,
            AdapterErrorKind::Disposed | AdapterErrorKind::Internal => GatherErrorKind::Internal,
        };
        let mut mapped = GatherError::new(kind, err.message());
        if let Some(data) = err.data {
            mapped = mapped.with_data(data);
        }
        mapped
    }
}
