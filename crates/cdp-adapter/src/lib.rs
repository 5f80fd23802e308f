//! Chromium DevTools Protocol connection.
//!
//! A [`CdpTransport`] moves raw JSON documents; [`CdpConnection`] sits on top
//! of it, allocating command ids, correlating responses and fanning
//! notifications out on a broadcast channel.

pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod transport;

pub use config::CdpConfig;
pub use connection::{CdpConnection, CommandOptions};
pub use error::{AdapterError, AdapterErrorKind};
pub use metrics::{Settlement, TrafficSnapshot};
pub use pagegauge_core_types::Notification;
pub use transport::{CdpTransport, ChannelTransport, RemoteEnd, RemoteSender, WebSocketTransport};
