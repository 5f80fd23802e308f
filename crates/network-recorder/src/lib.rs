//! Network activity recorder.
//!
//! Consumes `Network.*` protocol notifications, rebuilds one
//! [`NetworkRequest`] per logical exchange, tracks in-flight counts and
//! publishes busy/idle threshold crossings. The same recorder replays a saved
//! devtools log offline via [`NetworkRecorder::records_from_logs`].

pub mod chains;
pub mod events;
pub mod record;
pub mod recorder;

pub use chains::{
    critical_request_chains, is_critical, longest_chain_length, ChainNode, ChainRequest,
    CriticalChains,
};
pub use events::{Initiator, NetworkEvent, Priority, ResourceType};
pub use record::{urls_equal_excluding_fragment, NetworkRecords, NetworkRequest, RecordId, RecordLookup};
pub use recorder::{NavigationContext, NetworkRecorder, RecorderEvent};
