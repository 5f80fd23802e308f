//! pagegauge library
//!
//! Exposes the runner, built-in audits and CLI wiring for the binary and for
//! integration tests.

pub mod artifacts_io;
pub mod audits;
pub mod cli;
pub mod metrics;
pub mod runner;

pub use artifacts_io::{load_artifacts, save_artifacts, ArtifactsIoError};
pub use runner::{AuditResult, RunError, RunOptions, RunResult, Runner};
