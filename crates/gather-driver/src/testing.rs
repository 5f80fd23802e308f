//! Scripted in-memory browser for exercising the driver and everything
//! built on it without a real browser.
//!
//! The fake answers commands over a [`ChannelTransport`], records every
//! command it receives, and plays back network and page-lifecycle events
//! for navigations. Delays use `tokio::time`, so tests running with paused
//! time advance through a navigation instantly.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use cdp_adapter::{ChannelTransport, RemoteEnd, RemoteSender};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::driver::Driver;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/70.0.3538.77 Safari/537.36";

/// How the fake serves one url.
#[derive(Clone, Debug)]
pub struct FakePage {
    /// Urls the document redirects through, in order, after the requested one.
    pub redirects: Vec<String>,
    pub status: u16,
    /// Fails the final document request with this net error.
    pub error_text: Option<String>,
    pub subresources: Vec<String>,
    /// `Log.entryAdded` entries emitted during the load.
    pub console: Vec<Value>,
    pub dom_content_after: Duration,
    pub load_after: Duration,
    /// Still served while the network is emulated offline.
    pub offline_ready: bool,
}

impl Default for FakePage {
    fn default() -> Self {
        Self {
            redirects: Vec::new(),
            status: 200,
            error_text: None,
            subresources: Vec::new(),
            console: Vec::new(),
            dom_content_after: Duration::from_millis(10),
            load_after: Duration::from_millis(20),
            offline_ready: false,
        }
    }
}

#[derive(Clone, Debug)]
enum Reply {
    Result(Value),
    Error(String),
    Never,
}

#[derive(Clone, Debug)]
struct Scheduled {
    after: Duration,
    method: String,
    params: Value,
}

/// Reply to one command plus the notifications that follow it.
#[derive(Clone, Debug)]
pub struct Response {
    reply: Reply,
    events: Vec<Scheduled>,
}

impl Response {
    pub fn ok(result: Value) -> Self {
        Self {
            reply: Reply::Result(result),
            events: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            reply: Reply::Error(message.into()),
            events: Vec::new(),
        }
    }

    /// Leaves the command unanswered.
    pub fn never() -> Self {
        Self {
            reply: Reply::Never,
            events: Vec::new(),
        }
    }

    pub fn emit(self, method: &str, params: Value) -> Self {
        self.emit_after(Duration::ZERO, method, params)
    }

    /// Emits `after` the previous event.
    pub fn emit_after(mut self, after: Duration, method: &str, params: Value) -> Self {
        self.events.push(Scheduled {
            after,
            method: method.to_string(),
            params,
        });
        self
    }
}

type Handler = Box<dyn FnMut(&Value) -> Response + Send>;

struct BrowserState {
    commands: Vec<(String, Value)>,
    handlers: HashMap<String, Handler>,
    pages: HashMap<String, FakePage>,
    evaluations: Vec<(String, Value)>,
    user_agent: String,
    registrations: Vec<Value>,
    versions: Vec<Value>,
    manifest: Value,
    trace_events: Vec<Value>,
    trace_chunks: VecDeque<Value>,
    tracing: bool,
    offline: bool,
    next_request: u64,
    clock: f64,
}

impl BrowserState {
    fn new() -> Self {
        Self {
            commands: Vec::new(),
            handlers: HashMap::new(),
            pages: HashMap::new(),
            evaluations: Vec::new(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            registrations: Vec::new(),
            versions: Vec::new(),
            manifest: json!({ "url": "", "data": "", "errors": [] }),
            trace_events: vec![
                json!({ "name": "TracingStartedInPage", "ph": "I", "ts": 1, "pid": 1, "tid": 1, "args": {} }),
                json!({ "name": "navigationStart", "ph": "R", "ts": 2, "pid": 1, "tid": 1, "args": {} }),
            ],
            trace_chunks: VecDeque::new(),
            tracing: false,
            offline: false,
            next_request: 1,
            clock: 1.0,
        }
    }

    fn tick(&mut self) -> f64 {
        self.clock += 0.01;
        self.clock
    }

    fn handle(&mut self, method: &str, params: &Value) -> Response {
        self.commands.push((method.to_string(), params.clone()));
        if let Some(handler) = self.handlers.get_mut(method) {
            return handler(params);
        }

        match method {
            "Page.navigate" => {
                let url = params.get("url").and_then(Value::as_str).unwrap_or_default();
                self.navigate(url)
            }
            "Runtime.evaluate" => {
                let expression = params
                    .get("expression")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                self.evaluate(expression)
            }
            "ServiceWorker.enable" => Response::ok(json!({}))
                .emit(
                    "ServiceWorker.workerRegistrationUpdated",
                    json!({ "registrations": self.registrations }),
                )
                .emit(
                    "ServiceWorker.workerVersionUpdated",
                    json!({ "versions": self.versions }),
                ),
            "Page.getAppManifest" => Response::ok(self.manifest.clone()),
            "Network.emulateNetworkConditions" => {
                self.offline = params.get("offline").and_then(Value::as_bool).unwrap_or(false);
                Response::ok(json!({}))
            }
            "Tracing.start" => {
                self.tracing = true;
                Response::ok(json!({}))
            }
            "Tracing.end" => {
                if !self.tracing {
                    return Response::error("Tracing is not started");
                }
                self.tracing = false;
                self.trace_chunks = split_trace(&self.trace_events);
                Response::ok(json!({}))
                    .emit("Tracing.tracingComplete", json!({ "stream": "trace-stream-1" }))
            }
            "IO.read" => Response::ok(
                self.trace_chunks
                    .pop_front()
                    .unwrap_or_else(|| json!({ "data": "", "eof": true })),
            ),
            _ => Response::ok(json!({})),
        }
    }

    fn evaluate(&self, expression: &str) -> Response {
        let value = if expression.contains("navigator.userAgent") {
            Value::String(self.user_agent.clone())
        } else {
            self.evaluations
                .iter()
                .find(|(needle, _)| expression.contains(needle.as_str()))
                .map(|(_, value)| value.clone())
                .unwrap_or(Value::Null)
        };
        Response::ok(json!({ "result": { "type": value_type(&value), "value": value } }))
    }

    fn navigate(&mut self, url: &str) -> Response {
        let loader = self.next_request;
        let response = Response::ok(json!({ "frameId": "frame-1", "loaderId": format!("loader-{loader}") }));
        if url.starts_with("about:") {
            let page = FakePage::default();
            return lifecycle(response, &page, self.tick());
        }

        let mut page = self.pages.get(url).cloned().unwrap_or_default();
        if self.offline && !page.offline_ready {
            page = FakePage {
                error_text: Some("net::ERR_INTERNET_DISCONNECTED".into()),
                ..FakePage::default()
            };
        }
        let request_id = format!("1000.{}", self.next_request);
        self.next_request += 1;

        let mut response = response;
        let hops: Vec<String> = std::iter::once(url.to_string())
            .chain(page.redirects.iter().cloned())
            .collect();
        for (idx, hop) in hops.iter().enumerate() {
            let mut params = json!({
                "requestId": request_id,
                "documentURL": hop,
                "frameId": "frame-1",
                "request": { "url": hop, "method": "GET", "initialPriority": "VeryHigh" },
                "timestamp": self.tick(),
                "type": "Document",
                "initiator": { "type": "other" }
            });
            if idx > 0 {
                params["redirectResponse"] = json!({
                    "url": hops[idx - 1],
                    "status": 302,
                    "statusText": "Found",
                    "mimeType": "text/html",
                    "encodedDataLength": 200
                });
            }
            response = response.emit("Network.requestWillBeSent", params);
        }

        let final_url = hops.last().cloned().unwrap_or_else(|| url.to_string());
        response = match &page.error_text {
            Some(error_text) => response.emit(
                "Network.loadingFailed",
                json!({
                    "requestId": request_id,
                    "timestamp": self.tick(),
                    "type": "Document",
                    "errorText": error_text,
                    "canceled": false
                }),
            ),
            None => self.finish_request(response, &request_id, &final_url, page.status, "Document", "text/html"),
        };

        for resource in &page.subresources {
            let sub_id = format!("1000.{}", self.next_request);
            self.next_request += 1;
            let (kind, mime) = resource_kind(resource);
            response = response.emit(
                "Network.requestWillBeSent",
                json!({
                    "requestId": sub_id,
                    "documentURL": final_url,
                    "frameId": "frame-1",
                    "request": { "url": resource, "method": "GET", "initialPriority": "High" },
                    "timestamp": self.tick(),
                    "type": kind,
                    "initiator": { "type": "parser", "url": final_url }
                }),
            );
            response = self.finish_request(response, &sub_id, resource, 200, kind, mime);
        }

        for entry in &page.console {
            response = response.emit("Log.entryAdded", json!({ "entry": entry }));
        }

        let stamp = self.tick();
        lifecycle(response, &page, stamp)
    }

    fn finish_request(
        &mut self,
        response: Response,
        request_id: &str,
        url: &str,
        status: u16,
        kind: &str,
        mime: &str,
    ) -> Response {
        response
            .emit(
                "Network.responseReceived",
                json!({
                    "requestId": request_id,
                    "timestamp": self.tick(),
                    "type": kind,
                    "response": {
                        "url": url,
                        "status": status,
                        "statusText": if status < 400 { "OK" } else { "Error" },
                        "mimeType": mime,
                        "protocol": "http/1.1",
                        "encodedDataLength": 250
                    }
                }),
            )
            .emit(
                "Network.dataReceived",
                json!({ "requestId": request_id, "dataLength": 2048, "encodedDataLength": 800 }),
            )
            .emit(
                "Network.loadingFinished",
                json!({ "requestId": request_id, "timestamp": self.tick(), "encodedDataLength": 1050 }),
            )
    }
}

fn lifecycle(response: Response, page: &FakePage, stamp: f64) -> Response {
    let load_gap = page.load_after.saturating_sub(page.dom_content_after);
    response
        .emit_after(
            page.dom_content_after,
            "Page.domContentEventFired",
            json!({ "timestamp": stamp }),
        )
        .emit_after(load_gap, "Page.loadEventFired", json!({ "timestamp": stamp + 0.01 }))
}

fn resource_kind(url: &str) -> (&'static str, &'static str) {
    if url.ends_with(".js") {
        ("Script", "application/javascript")
    } else if url.ends_with(".css") {
        ("Stylesheet", "text/css")
    } else if url.ends_with(".png") || url.ends_with(".jpg") {
        ("Image", "image/png")
    } else {
        ("Other", "text/plain")
    }
}

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "undefined",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) | Value::Object(_) => "object",
    }
}

/// Splits the trace into a plain chunk and a base64 chunk.
fn split_trace(events: &[Value]) -> VecDeque<Value> {
    let text = json!({ "traceEvents": events }).to_string();
    let middle = (0..=text.len() / 2)
        .rev()
        .find(|idx| text.is_char_boundary(*idx))
        .unwrap_or(0);
    let (head, tail) = text.split_at(middle);
    let tail = base64::engine::general_purpose::STANDARD.encode(tail);
    VecDeque::from(vec![
        json!({ "data": head, "eof": false }),
        json!({ "data": tail, "base64Encoded": true, "eof": true }),
    ])
}

/// Handle on a running fake browser. Dropping it stops the fake.
pub struct FakeBrowser {
    state: Arc<Mutex<BrowserState>>,
    sender: RemoteSender,
    task: JoinHandle<()>,
}

impl FakeBrowser {
    /// Starts the fake and returns a driver wired to it, not yet connected.
    pub fn launch() -> (FakeBrowser, Driver) {
        let (transport, remote) = ChannelTransport::pair();
        let browser = Self::serve(remote);
        (browser, Driver::from_transport(Arc::new(transport)))
    }

    fn serve(mut remote: RemoteEnd) -> Self {
        let state = Arc::new(Mutex::new(BrowserState::new()));
        let sender = remote.sender();
        let task = {
            let state = state.clone();
            tokio::spawn(async move {
                while let Some((id, method, params)) = remote.recv_command().await {
                    let response = state.lock().handle(&method, &params);
                    match response.reply {
                        Reply::Result(result) => {
                            remote.respond(id, result);
                        }
                        Reply::Error(message) => {
                            remote.respond_error(id, -32000, &message);
                        }
                        Reply::Never => {}
                    }
                    play(remote.sender(), response.events);
                }
            })
        };
        Self {
            state,
            sender,
            task,
        }
    }

    pub fn set_page(&self, url: &str, page: FakePage) {
        self.state.lock().pages.insert(url.to_string(), page);
    }

    pub fn set_user_agent(&self, user_agent: &str) {
        self.state.lock().user_agent = user_agent.to_string();
    }

    /// Answers any evaluation whose expression contains `needle`.
    pub fn set_evaluation(&self, needle: &str, value: Value) {
        self.state
            .lock()
            .evaluations
            .push((needle.to_string(), value));
    }

    pub fn set_service_workers(&self, registrations: Vec<Value>, versions: Vec<Value>) {
        let mut state = self.state.lock();
        state.registrations = registrations;
        state.versions = versions;
    }

    pub fn set_manifest(&self, response: Value) {
        self.state.lock().manifest = response;
    }

    pub fn set_trace_events(&self, events: Vec<Value>) {
        self.state.lock().trace_events = events;
    }

    /// Overrides the built-in behaviour for `method`.
    pub fn on<F>(&self, method: &str, handler: F)
    where
        F: FnMut(&Value) -> Response + Send + 'static,
    {
        self.state
            .lock()
            .handlers
            .insert(method.to_string(), Box::new(handler));
    }

    /// Pushes a notification right now.
    pub fn emit(&self, method: &str, params: Value) {
        self.sender.notify(method, params);
    }

    pub fn commands(&self) -> Vec<(String, Value)> {
        self.state.lock().commands.clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.state
            .lock()
            .commands
            .iter()
            .map(|(method, _)| method.clone())
            .collect()
    }

    /// Params of every `method` command received, in order.
    pub fn sent(&self, method: &str) -> Vec<Value> {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|(name, _)| name == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.sent(method).len()
    }
}

impl Drop for FakeBrowser {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn play(sender: RemoteSender, events: Vec<Scheduled>) {
    let mut events = events.into_iter().peekable();
    while let Some(event) = events.next_if(|event| event.after.is_zero()) {
        sender.notify(&event.method, event.params);
    }
    let delayed: Vec<Scheduled> = events.collect();
    if delayed.is_empty() {
        return;
    }
    tokio::spawn(async move {
        for event in delayed {
            if !event.after.is_zero() {
                tokio::time::sleep(event.after).await;
            }
            sender.notify(&event.method, event.params);
        }
    });
}
