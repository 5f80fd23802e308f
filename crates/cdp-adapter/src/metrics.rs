//! Protocol traffic accounting.
//!
//! Every [`CdpConnection`](crate::CdpConnection) owns a [`Traffic`] ledger
//! whose [`TrafficSnapshot`] describes that connection alone. The same
//! events also feed process-wide prometheus families, labelled by protocol
//! domain, for exposition through [`register_metrics`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounterVec, Registry};
use serde::Serialize;
use tracing::error;

/// How a command left the in-flight map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Settlement {
    Answered,
    /// The browser replied with an error envelope.
    RemoteError,
    /// Rejected because the transport closed underneath it.
    Closed,
    Disposed,
    /// The caller stopped waiting before any response arrived.
    Abandoned,
    SendFailed,
}

impl Settlement {
    pub fn label(self) -> &'static str {
        match self {
            Settlement::Answered => "answered",
            Settlement::RemoteError => "remote_error",
            Settlement::Closed => "closed",
            Settlement::Disposed => "disposed",
            Settlement::Abandoned => "abandoned",
            Settlement::SendFailed => "send_failed",
        }
    }
}

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficSnapshot {
    pub commands: u64,
    pub answered: u64,
    pub remote_errors: u64,
    /// Rejected locally by close, dispose or a failed send.
    pub rejected: u64,
    pub abandoned: u64,
    pub notifications: u64,
    pub answered_latency_us: u64,
}

#[derive(Default)]
pub struct Traffic {
    commands: AtomicU64,
    answered: AtomicU64,
    remote_errors: AtomicU64,
    rejected: AtomicU64,
    abandoned: AtomicU64,
    notifications: AtomicU64,
    answered_latency_us: AtomicU64,
}

impl Traffic {
    pub fn command_sent(&self, method: &str) {
        self.commands.fetch_add(1, Ordering::Relaxed);
        COMMANDS_BY_DOMAIN.with_label_values(&[domain(method)]).inc();
    }

    pub fn command_settled(&self, method: &str, settlement: Settlement, elapsed: Duration) {
        let counter = match settlement {
            Settlement::Answered => {
                let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
                self.answered_latency_us.fetch_add(micros, Ordering::Relaxed);
                ROUND_TRIP_SECONDS
                    .with_label_values(&[domain(method)])
                    .observe(elapsed.as_secs_f64());
                &self.answered
            }
            Settlement::RemoteError => &self.remote_errors,
            Settlement::Abandoned => &self.abandoned,
            Settlement::Closed | Settlement::Disposed | Settlement::SendFailed => &self.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        SETTLEMENTS.with_label_values(&[settlement.label()]).inc();
    }

    pub fn notification(&self, method: &str) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
        NOTIFICATIONS_BY_DOMAIN.with_label_values(&[domain(method)]).inc();
    }

    pub fn snapshot(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            commands: self.commands.load(Ordering::Relaxed),
            answered: self.answered.load(Ordering::Relaxed),
            remote_errors: self.remote_errors.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
            answered_latency_us: self.answered_latency_us.load(Ordering::Relaxed),
        }
    }
}

/// `Network.requestWillBeSent` -> `Network`.
pub fn domain(method: &str) -> &str {
    method.split_once('.').map_or(method, |(domain, _)| domain)
}

lazy_static! {
    static ref COMMANDS_BY_DOMAIN: IntCounterVec = IntCounterVec::new(
        opts!("pagegauge_cdp_commands_total", "Protocol commands sent, by domain"),
        &["domain"]
    )
    .unwrap();
    static ref SETTLEMENTS: IntCounterVec = IntCounterVec::new(
        opts!(
            "pagegauge_cdp_command_settlements_total",
            "How protocol commands left the in-flight map"
        ),
        &["settlement"]
    )
    .unwrap();
    static ref ROUND_TRIP_SECONDS: HistogramVec = HistogramVec::new(
        histogram_opts!(
            "pagegauge_cdp_round_trip_seconds",
            "Latency of answered protocol commands, by domain",
            vec![0.002, 0.01, 0.05, 0.25, 1.0, 5.0, 30.0]
        ),
        &["domain"]
    )
    .unwrap();
    static ref NOTIFICATIONS_BY_DOMAIN: IntCounterVec = IntCounterVec::new(
        opts!("pagegauge_cdp_notifications_total", "Protocol notifications received, by domain"),
        &["domain"]
    )
    .unwrap();
}

pub fn register_metrics(registry: &Registry) {
    let families: [Box<dyn prometheus::core::Collector>; 4] = [
        Box::new(COMMANDS_BY_DOMAIN.clone()),
        Box::new(SETTLEMENTS.clone()),
        Box::new(ROUND_TRIP_SECONDS.clone()),
        Box::new(NOTIFICATIONS_BY_DOMAIN.clone()),
    ];
    for family in families {
        match registry.register(family) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(err) => error!(target: "cdp-connection", ?err, "failed to register protocol metric"),
        }
    }
}
