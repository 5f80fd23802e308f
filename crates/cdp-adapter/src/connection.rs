use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use pagegauge_core_types::Notification;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AdapterError, AdapterErrorKind};
use crate::metrics::{Settlement, Traffic, TrafficSnapshot};
use crate::transport::CdpTransport;

/// Per-command options.
#[derive(Clone, Copy, Debug, Default)]
pub struct CommandOptions {
    /// Log remote errors at debug instead of warn. The call still fails.
    pub silent: bool,
}

impl CommandOptions {
    pub fn silent() -> Self {
        Self { silent: true }
    }
}

struct PendingCommand {
    method: String,
    silent: bool,
    started: Instant,
    responder: oneshot::Sender<Result<Value, AdapterError>>,
}

#[derive(Deserialize)]
struct Envelope {
    id: Option<u64>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
    result: Option<Value>,
    error: Option<RemoteError>,
}

#[derive(Deserialize)]
struct RemoteError {
    #[serde(default)]
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

struct Shared {
    inflight: DashMap<u64, PendingCommand>,
    bus: parking_lot::Mutex<Option<broadcast::Sender<Notification>>>,
    closed: AtomicBool,
    traffic: Traffic,
}

impl Shared {
    fn settle(&self, pending: &PendingCommand, settlement: Settlement) {
        self.traffic
            .command_settled(&pending.method, settlement, pending.started.elapsed());
    }
}

/// Removes the in-flight entry when `send_command` stops waiting early.
struct InflightGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        if let Some((_, pending)) = self.shared.inflight.remove(&self.id) {
            debug!(target: "cdp-connection", id = self.id, method = %pending.method, "command abandoned");
            self.shared.settle(&pending, Settlement::Abandoned);
        }
    }
}

/// Id-correlating multiplexer over a [`CdpTransport`].
///
/// Commands get monotonically increasing ids starting at 1; each response
/// resolves its continuation at most once. Messages without an id are
/// broadcast to every subscriber as a [`Notification`].
pub struct CdpConnection {
    transport: Arc<dyn CdpTransport>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
    connected: AtomicBool,
    disposed: AtomicBool,
}

impl CdpConnection {
    pub fn new(transport: Arc<dyn CdpTransport>) -> Self {
        Self::with_capacity(transport, 4_096)
    }

    pub fn with_capacity(transport: Arc<dyn CdpTransport>, event_buffer: usize) -> Self {
        let (bus, _) = broadcast::channel(event_buffer.max(16));
        Self {
            transport,
            shared: Arc::new(Shared {
                inflight: DashMap::new(),
                bus: parking_lot::Mutex::new(Some(bus)),
                closed: AtomicBool::new(false),
                traffic: Traffic::default(),
            }),
            next_id: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            reader: parking_lot::Mutex::new(None),
            connected: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    pub async fn connect(&self) -> Result<(), AdapterError> {
        self.ensure_not_disposed()?;
        if self.connected.swap(true, Ordering::SeqCst) {
            debug!(target: "cdp-connection", "connect called on an open connection");
            return Ok(());
        }

        if let Err(err) = self.transport.open().await {
            self.connected.store(false, Ordering::SeqCst);
            return Err(err);
        }

        let transport = self.transport.clone();
        let shared = self.shared.clone();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            Self::read_loop(transport, shared, shutdown).await;
        });
        *self.reader.lock() = Some(handle);
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), AdapterError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.cancel();
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        Self::reject_all(
            &self.shared,
            AdapterError::new(AdapterErrorKind::CdpIo).with_hint("connection closed"),
            Settlement::Closed,
        );
        self.transport.close().await
    }

    /// Drops every subscriber and makes later calls fail with `Disposed`.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.bus.lock().take();
        self.shutdown.cancel();
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        Self::reject_all(
            &self.shared,
            AdapterError::new(AdapterErrorKind::Disposed).with_hint("connection disposed"),
            Settlement::Disposed,
        );
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Single multiplexed notification channel. Callers filter on `method`.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<Notification>, AdapterError> {
        self.ensure_not_disposed()?;
        self.shared
            .bus
            .lock()
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| AdapterError::new(AdapterErrorKind::Disposed))
    }

    pub fn pending_commands(&self) -> usize {
        self.shared.inflight.len()
    }

    /// Counters for everything this connection has sent and received.
    pub fn traffic(&self) -> TrafficSnapshot {
        self.shared.traffic.snapshot()
    }

    pub async fn send_command(
        &self,
        method: &str,
        params: Value,
        opts: CommandOptions,
    ) -> Result<Value, AdapterError> {
        self.ensure_not_disposed()?;
        if !self.connected.load(Ordering::SeqCst) || self.shared.closed.load(Ordering::SeqCst) {
            return Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("({method}) connection is not open")));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (responder, response) = oneshot::channel();
        self.shared.inflight.insert(
            id,
            PendingCommand {
                method: method.to_string(),
                silent: opts.silent,
                started: Instant::now(),
                responder,
            },
        );
        let _guard = InflightGuard {
            shared: &self.shared,
            id,
        };
        self.shared.traffic.command_sent(method);
        // The reader may have drained the map between the check above and the insert.
        if self.shared.closed.load(Ordering::SeqCst) {
            if let Some((_, pending)) = self.shared.inflight.remove(&id) {
                self.shared.settle(&pending, Settlement::Closed);
            }
            return Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("({method}) connection closed")));
        }

        let params = if params.is_null() { json!({}) } else { params };
        let envelope = json!({ "id": id, "method": method, "params": params });
        debug!(target: "cdp-connection", id, method, "method => browser");

        if let Err(err) = self.transport.send_text(envelope.to_string()).await {
            if let Some((_, pending)) = self.shared.inflight.remove(&id) {
                self.shared.settle(&pending, Settlement::SendFailed);
            }
            return Err(err);
        }

        match response.await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("({method}) response channel dropped"))),
        }
    }

    fn ensure_not_disposed(&self) -> Result<(), AdapterError> {
        if self.is_disposed() {
            return Err(AdapterError::new(AdapterErrorKind::Disposed)
                .with_hint("connection used after dispose"));
        }
        Ok(())
    }

    async fn read_loop(
        transport: Arc<dyn CdpTransport>,
        shared: Arc<Shared>,
        shutdown: CancellationToken,
    ) {
        loop {
            let raw = tokio::select! {
                _ = shutdown.cancelled() => break,
                raw = transport.next_message() => raw,
            };
            match raw {
                Some(raw) => Self::handle_message(&shared, &raw),
                None => {
                    info!(target: "cdp-connection", "transport closed");
                    shared.closed.store(true, Ordering::SeqCst);
                    Self::reject_all(
                        &shared,
                        AdapterError::new(AdapterErrorKind::CdpIo)
                            .with_hint("connection closed by remote"),
                        Settlement::Closed,
                    );
                    break;
                }
            }
        }
    }

    fn handle_message(shared: &Shared, raw: &str) {
        let envelope: Envelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(target: "cdp-connection", ?err, "unparseable protocol message");
                return;
            }
        };

        if let Some(id) = envelope.id {
            let Some((_, pending)) = shared.inflight.remove(&id) else {
                debug!(target: "cdp-connection", id, "response for unknown id dropped");
                return;
            };
            let result = Self::extract_payload(&pending, envelope);
            match &result {
                Ok(_) => shared.settle(&pending, Settlement::Answered),
                Err(err) => {
                    shared.settle(&pending, Settlement::RemoteError);
                    if pending.silent {
                        debug!(target: "cdp-connection", method = %pending.method, %err, "command failed");
                    } else {
                        warn!(target: "cdp-connection", method = %pending.method, %err, "command failed");
                    }
                }
            }
            let _ = pending.responder.send(result);
            return;
        }

        let Some(method) = envelope.method else {
            debug!(target: "cdp-connection", "message without id or method dropped");
            return;
        };
        shared.traffic.notification(&method);
        if let Some(bus) = shared.bus.lock().as_ref() {
            let _ = bus.send(Notification::new(method, envelope.params));
        }
    }

    fn extract_payload(pending: &PendingCommand, envelope: Envelope) -> Result<Value, AdapterError> {
        if let Some(error) = envelope.error {
            let mut err = AdapterError::new(AdapterErrorKind::Protocol)
                .with_hint(format!("({}) {}", pending.method, error.message))
                .retriable(error.code >= 500);
            if let Some(data) = error.data {
                err = err.with_data(data);
            }
            return Err(err);
        }
        Ok(envelope.result.unwrap_or_else(|| json!({})))
    }

    fn reject_all(shared: &Shared, err: AdapterError, settlement: Settlement) {
        let ids: Vec<u64> = shared.inflight.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, pending)) = shared.inflight.remove(&id) {
                shared.settle(&pending, settlement);
                let _ = pending.responder.send(Err(err.clone()));
            }
        }
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;

    #[tokio::test]
    async fn ids_are_monotonic_from_one() {
        let (transport, mut remote) = ChannelTransport::pair();
        let conn = Arc::new(CdpConnection::new(Arc::new(transport)));
        conn.connect().await.unwrap();

        let remote_task = tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..3 {
                let (id, _, _) = remote.recv_command().await.unwrap();
                seen.push(id);
                remote.respond(id, json!({}));
            }
            seen
        });

        for _ in 0..3 {
            conn.send_command("Page.enable", Value::Null, CommandOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(remote_task.await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn remote_close_rejects_inflight() {
        let (transport, mut remote) = ChannelTransport::pair();
        let conn = Arc::new(CdpConnection::new(Arc::new(transport)));
        conn.connect().await.unwrap();

        let pending = {
            let conn = conn.clone();
            tokio::spawn(async move {
                conn.send_command("Page.navigate", json!({ "url": "about:blank" }), CommandOptions::default())
                    .await
            })
        };
        remote.recv_command().await.unwrap();
        drop(remote);

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::CdpIo);
        assert_eq!(conn.pending_commands(), 0);
        assert_eq!(conn.traffic().rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn giving_up_on_a_command_forgets_its_id() {
        let (transport, mut remote) = ChannelTransport::pair();
        let conn = CdpConnection::new(Arc::new(transport));
        conn.connect().await.unwrap();

        for _ in 0..3 {
            let waited = tokio::time::timeout(
                std::time::Duration::from_secs(1),
                conn.send_command("Runtime.evaluate", json!({ "expression": "1" }), CommandOptions::default()),
            )
            .await;
            assert!(waited.is_err());
        }
        assert_eq!(conn.pending_commands(), 0);

        // A late answer for an abandoned id is dropped, not delivered.
        let (id, _, _) = remote.recv_command().await.unwrap();
        remote.respond(id, json!({ "result": { "value": 1 } }));
        tokio::task::yield_now().await;

        let traffic = conn.traffic();
        assert_eq!(traffic.commands, 3);
        assert_eq!(traffic.abandoned, 3);
        assert_eq!(traffic.answered, 0);
    }
}
