use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// High-level error categories surfaced by the gather pipeline.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatherErrorKind {
    #[error("unable to load the page")]
    PageLoad,
    #[error("multiple tabs open to the same origin")]
    MultipleTabs,
    #[error("tracing would be corrupted by an enabled domain")]
    TraceInterference,
    #[error("page evaluation timed out")]
    EvaluateTimeout,
    #[error("page evaluation failed")]
    PageEvaluation,
    #[error("page is hung")]
    PageHung,
    #[error("protocol error")]
    Protocol,
    #[error("protocol connection timed out")]
    ConnectTimeout,
    #[error("browser target already closed")]
    TargetClosed,
    #[error("gatherer did not provide an artifact")]
    MissingArtifact,
    #[error("gatherer failed")]
    Gatherer,
    #[error("invalid input")]
    InvalidInput,
    #[error("internal error")]
    Internal,
}

/// Error carried through the gather stage.
///
/// `recoverable` marks errors that stand in for a gatherer's artifact instead
/// of aborting the run. Everything else is fatal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GatherError {
    pub kind: GatherErrorKind,
    pub message: String,
    #[serde(default)]
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

pub type GatherResult<T> = Result<T, GatherError>;

impl fmt::Display for GatherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for GatherError {}

impl GatherError {
    pub fn new(kind: GatherErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            recoverable: false,
            data: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(GatherErrorKind::Internal, message)
    }

    pub fn gatherer(message: impl Into<String>) -> Self {
        Self::new(GatherErrorKind::Gatherer, message)
    }

    pub fn recoverable(mut self, flag: bool) -> Self {
        self.recoverable = flag;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn is_fatal(&self) -> bool {
        !self.recoverable
    }
}
