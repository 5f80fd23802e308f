//! Protocol driver for the gather pipeline.
//!
//! [`Driver`] layers domain reference counting, navigation with load
//! detection, tracing, devtools-log capture and emulation on top of a
//! [`cdp_adapter::CdpConnection`].

pub mod devtools_log;
pub mod driver;
pub mod emulation;
pub mod evaluate;
pub mod testing;
pub mod trace;
pub mod wait;

pub use devtools_log::DevtoolsLog;
pub use driver::{next_event, AppManifest, Driver, GotoOptions};
pub use wait::{race_with_ceiling, Raced, WaitError, WaitScope};
