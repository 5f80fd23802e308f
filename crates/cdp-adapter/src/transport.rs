use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};

/// Raw, bidirectional text channel to a debuggable target.
///
/// Framing ends here: the transport moves whole JSON documents and knows
/// nothing about ids or methods.
#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn open(&self) -> Result<(), AdapterError>;
    async fn send_text(&self, text: String) -> Result<(), AdapterError>;
    /// Next inbound document, `None` once the channel is closed.
    async fn next_message(&self) -> Option<String>;
    async fn close(&self) -> Result<(), AdapterError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfo {
    id: String,
    web_socket_debugger_url: String,
}

/// WebSocket transport to a page target, opened through the DevTools HTTP
/// endpoint (`/json/new`) unless a socket url is configured.
pub struct WebSocketTransport {
    cfg: CdpConfig,
    http: reqwest::Client,
    sink: Mutex<Option<SplitSink<WsStream, Message>>>,
    stream: Mutex<Option<SplitStream<WsStream>>>,
    target_id: parking_lot::Mutex<Option<String>>,
}

impl WebSocketTransport {
    pub fn new(cfg: CdpConfig) -> Self {
        Self {
            cfg,
            http: reqwest::Client::new(),
            sink: Mutex::new(None),
            stream: Mutex::new(None),
            target_id: parking_lot::Mutex::new(None),
        }
    }

    async fn open_target(&self) -> Result<String, AdapterError> {
        if let Some(url) = &self.cfg.websocket_url {
            return Ok(url.clone());
        }

        let endpoint = self.cfg.json_endpoint("new")?;
        let response = self.http.put(endpoint.clone()).send().await.map_err(|err| {
            AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("{endpoint}: {err}"))
                .retriable(true)
        })?;
        if !response.status().is_success() {
            return Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("{endpoint} answered {}", response.status())));
        }
        let target: TargetInfo = response.json().await.map_err(|err| {
            AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("unexpected /json/new payload: {err}"))
        })?;

        debug!(target: "cdp-transport", id = %target.id, "opened page target");
        *self.target_id.lock() = Some(target.id);
        Ok(target.web_socket_debugger_url)
    }

    async fn close_target(&self, id: &str) -> Result<(), AdapterError> {
        let endpoint = self.cfg.json_endpoint(&format!("close/{id}"))?;
        let response = self
            .http
            .get(endpoint)
            .send()
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::INTERNAL_SERVER_ERROR {
            return Err(AdapterError::new(AdapterErrorKind::TargetClosed)
                .with_hint("browser already closed"));
        }
        if !status.is_success() {
            return Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("/json/close answered {status}")));
        }
        Ok(())
    }
}

#[async_trait]
impl CdpTransport for WebSocketTransport {
    async fn open(&self) -> Result<(), AdapterError> {
        let deadline = Duration::from_millis(self.cfg.connect_timeout_ms);
        let connect = async {
            let ws_url = self.open_target().await?;
            let (socket, _) = connect_async(ws_url.as_str()).await.map_err(|err| {
                AdapterError::new(AdapterErrorKind::CdpIo)
                    .with_hint(format!("{ws_url}: {err}"))
                    .retriable(true)
            })?;
            Ok::<_, AdapterError>((socket, ws_url))
        };

        let (socket, ws_url) = match tokio::time::timeout(deadline, connect).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AdapterError::new(AdapterErrorKind::ConnectTimeout)
                    .with_hint(format!(
                        "no debuggable target at {}:{} within {}ms",
                        self.cfg.host, self.cfg.port, self.cfg.connect_timeout_ms
                    ))
                    .retriable(true))
            }
        };

        let (sink, stream) = socket.split();
        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);
        info!(target: "cdp-transport", url = %ws_url, "protocol connection established");
        Ok(())
    }

    async fn send_text(&self, text: String) -> Result<(), AdapterError> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::CdpIo).with_hint("socket not open")
        })?;
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))
    }

    async fn next_message(&self) -> Option<String> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut()?;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(text.as_str().to_owned()),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(text),
                    Err(err) => {
                        warn!(target: "cdp-transport", ?err, "dropping non-utf8 frame");
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(target: "cdp-transport", ?frame, "socket closed by remote");
                    return None;
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    warn!(target: "cdp-transport", ?err, "socket read failed");
                    return None;
                }
                None => return None,
            }
        }
    }

    async fn close(&self) -> Result<(), AdapterError> {
        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(err) = sink.close().await {
                debug!(target: "cdp-transport", ?err, "socket close handshake failed");
            }
        }
        self.stream.lock().await.take();

        let target = self.target_id.lock().take();
        match target {
            Some(id) => self.close_target(&id).await,
            None => Ok(()),
        }
    }
}

/// In-memory transport. The other side is a [`RemoteEnd`] that plays the
/// browser: it reads what the client sent and pushes responses/notifications.
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: Mutex<mpsc::UnboundedReceiver<String>>,
    opened: AtomicBool,
    closed: CancellationToken,
}

pub struct RemoteEnd {
    from_client: mpsc::UnboundedReceiver<String>,
    sender: RemoteSender,
}

/// Cloneable write half of a [`RemoteEnd`].
#[derive(Clone)]
pub struct RemoteSender {
    to_client: mpsc::UnboundedSender<String>,
}

impl ChannelTransport {
    pub fn pair() -> (Self, RemoteEnd) {
        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        (
            Self {
                outbound,
                inbound: Mutex::new(inbound),
                opened: AtomicBool::new(false),
                closed: CancellationToken::new(),
            },
            RemoteEnd {
                from_client,
                sender: RemoteSender { to_client },
            },
        )
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst) && !self.closed.is_cancelled()
    }
}

#[async_trait]
impl CdpTransport for ChannelTransport {
    async fn open(&self) -> Result<(), AdapterError> {
        if self.closed.is_cancelled() {
            return Err(AdapterError::new(AdapterErrorKind::CdpIo).with_hint("channel closed"));
        }
        self.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send_text(&self, text: String) -> Result<(), AdapterError> {
        if !self.is_open() {
            return Err(AdapterError::new(AdapterErrorKind::CdpIo).with_hint("channel not open"));
        }
        self.outbound
            .send(text)
            .map_err(|_| AdapterError::new(AdapterErrorKind::CdpIo).with_hint("remote end dropped"))
    }

    async fn next_message(&self) -> Option<String> {
        let mut guard = self.inbound.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => None,
            message = guard.recv() => message,
        }
    }

    async fn close(&self) -> Result<(), AdapterError> {
        self.closed.cancel();
        Ok(())
    }
}

impl RemoteEnd {
    /// Next raw document the client sent.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next command the client sent, parsed as `(id, method, params)`.
    pub async fn recv_command(&mut self) -> Option<(u64, String, Value)> {
        loop {
            let raw = self.from_client.recv().await?;
            let Ok(value) = serde_json::from_str::<Value>(&raw) else {
                continue;
            };
            let id = value.get("id").and_then(Value::as_u64);
            let method = value.get("method").and_then(Value::as_str);
            if let (Some(id), Some(method)) = (id, method) {
                let params = value.get("params").cloned().unwrap_or(Value::Null);
                return Some((id, method.to_string(), params));
            }
        }
    }

    pub fn sender(&self) -> RemoteSender {
        self.sender.clone()
    }

    pub fn send_raw(&self, text: impl Into<String>) -> bool {
        self.sender.send_raw(text)
    }

    pub fn respond(&self, id: u64, result: Value) -> bool {
        self.sender.respond(id, result)
    }

    pub fn respond_error(&self, id: u64, code: i64, message: &str) -> bool {
        self.sender.respond_error(id, code, message)
    }

    pub fn notify(&self, method: &str, params: Value) -> bool {
        self.sender.notify(method, params)
    }
}

impl RemoteSender {
    pub fn send_raw(&self, text: impl Into<String>) -> bool {
        self.to_client.send(text.into()).is_ok()
    }

    pub fn respond(&self, id: u64, result: Value) -> bool {
        self.send_raw(json!({ "id": id, "result": result }).to_string())
    }

    pub fn respond_error(&self, id: u64, code: i64, message: &str) -> bool {
        self.send_raw(
            json!({ "id": id, "error": { "code": code, "message": message } }).to_string(),
        )
    }

    pub fn notify(&self, method: &str, params: Value) -> bool {
        self.send_raw(json!({ "method": method, "params": params }).to_string())
    }
}
