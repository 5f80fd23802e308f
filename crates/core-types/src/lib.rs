//! Shared primitives for the pagegauge gather pipeline.
//!
//! Everything here is plain data: the error taxonomy every layer reports
//! through, run settings, per-pass configuration, the artifacts bundle handed
//! from the gather stage to audits, and the audit contract itself.

pub mod artifacts;
pub mod audit;
pub mod error;
pub mod pass;
pub mod protocol;
pub mod settings;

pub use artifacts::{ArtifactValue, Artifacts};
pub use audit::{Audit, AuditError, AuditMeta, AuditOutcome};
pub use error::{GatherError, GatherErrorKind, GatherResult};
pub use pass::{LoadTiming, PassConfig, DEFAULT_PASS};
pub use protocol::{Notification, Trace};
pub use settings::Settings;
