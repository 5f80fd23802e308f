use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cdp_adapter::{CdpConnection, CdpTransport, CommandOptions};
use lazy_static::lazy_static;
use network_recorder::{NavigationContext, NetworkRecorder, RecorderEvent};
use pagegauge_core_types::{
    GatherError, GatherErrorKind, LoadTiming, Notification, PassConfig, Settings, Trace,
};
use parking_lot::Mutex;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::devtools_log::DevtoolsLog;
use crate::emulation;
use crate::evaluate;
use crate::trace::{self, TraceStream, INTERFERING_DOMAINS};
use crate::wait::{race_with_ceiling, Raced, WaitError, WaitScope};

lazy_static! {
    static ref DOMAIN_TOGGLE: Regex =
        Regex::new(r"^(\w+)\.(enable|disable)$").expect("domain toggle pattern");
    static ref DEVTOOLS_LOG_FILTER: Regex =
        Regex::new(r"^(Page|Network)\.").expect("devtools log pattern");
}

const EVALUATE_TIMEOUT: Duration = Duration::from_secs(60);
const HUNG_CHECK_TIMEOUT: Duration = Duration::from_secs(1);
const DIALOG_PROMPT_RESPONSE: &str = "pagegauge prompt response";
const STORAGE_TYPES: &str =
    "appcache,file_systems,indexeddb,local_storage,shader_cache,websql,service_workers,cache_storage";

/// Navigation options for [`Driver::goto_url`].
#[derive(Clone, Debug, Default)]
pub struct GotoOptions {
    pub wait_for_load: bool,
    pub disable_javascript: bool,
    pub timing: LoadTiming,
}

impl GotoOptions {
    pub fn for_pass(pass: &PassConfig, settings: &Settings) -> Self {
        Self {
            wait_for_load: true,
            disable_javascript: pass.disable_javascript,
            timing: pass.load_timing(settings),
        }
    }
}

/// Result of `Page.getAppManifest` when the page links a manifest.
#[derive(Clone, Debug, PartialEq)]
pub struct AppManifest {
    pub url: String,
    pub data: String,
    pub errors: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceWorkerRegistration {
    registration_id: String,
    #[serde(rename = "scopeURL")]
    scope_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceWorkerVersion {
    registration_id: String,
    #[serde(default)]
    controlled_clients: Vec<String>,
}

struct NetworkMonitor {
    recorder: NetworkRecorder,
    navigation: NavigationContext,
}

impl NetworkMonitor {
    fn new(url: &str) -> Self {
        Self {
            recorder: NetworkRecorder::new(),
            navigation: NavigationContext::new(url),
        }
    }

    fn observe(&mut self, notification: &Notification) {
        for event in self.recorder.dispatch_notification(notification) {
            if let RecorderEvent::RequestLoaded(id) = event {
                if let Some(record) = self.recorder.record(id) {
                    self.navigation.follow(record, &self.recorder);
                }
            }
        }
    }
}

struct Shared {
    devtools_log: Mutex<DevtoolsLog>,
    monitor: Mutex<Option<NetworkMonitor>>,
    bus: Mutex<Option<broadcast::Sender<Notification>>>,
}

impl Shared {
    fn ingest(&self, notification: Notification) {
        self.devtools_log.lock().record(&notification);
        if let Some(monitor) = self.monitor.lock().as_mut() {
            monitor.observe(&notification);
        }
        if let Some(bus) = self.bus.lock().as_ref() {
            // No subscribers is normal between waits.
            let _ = bus.send(notification);
        }
    }
}

/// Protocol façade used by the gather runner and gatherers.
///
/// A pump task feeds every notification into the devtools log and the
/// active network monitor before re-broadcasting it, so a listener that
/// sees `Page.domContentEventFired` observes a recorder that has already
/// processed every earlier network event.
pub struct Driver {
    connection: Arc<CdpConnection>,
    shared: Arc<Shared>,
    domains: Mutex<HashMap<String, i64>>,
    online: AtomicBool,
    connected: AtomicBool,
    dialogs_handled: AtomicBool,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Driver {
    pub fn new(connection: Arc<CdpConnection>) -> Self {
        let (bus, _) = broadcast::channel(1_024);
        Self {
            connection,
            shared: Arc::new(Shared {
                devtools_log: Mutex::new(DevtoolsLog::new(Some(DEVTOOLS_LOG_FILTER.clone()))),
                monitor: Mutex::new(None),
                bus: Mutex::new(Some(bus)),
            }),
            domains: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            dialogs_handled: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn from_transport(transport: Arc<dyn CdpTransport>) -> Self {
        Self::new(Arc::new(CdpConnection::new(transport)))
    }

    pub fn connection(&self) -> &Arc<CdpConnection> {
        &self.connection
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub async fn connect(&self) -> Result<(), GatherError> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let events = self.connection.subscribe()?;
        if let Err(err) = self.connection.connect().await {
            self.connected.store(false, Ordering::SeqCst);
            return Err(err.into());
        }

        let shared = self.shared.clone();
        let shutdown = self.shutdown.clone();
        let pump = tokio::spawn(async move { pump(events, shared, shutdown).await });
        self.tasks.lock().push(pump);
        info!(target: "gather-driver", "driver connected");
        Ok(())
    }

    /// Stops background tasks and closes the connection. Pending waits see
    /// their notification source close.
    pub async fn disconnect(&self) -> Result<(), GatherError> {
        self.shutdown.cancel();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.shared.bus.lock().take();
        self.shared.monitor.lock().take();
        self.connected.store(false, Ordering::SeqCst);
        self.connection.disconnect().await?;
        info!(target: "gather-driver", "driver disconnected");
        Ok(())
    }

    /// Driver-level notification stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        match self.shared.bus.lock().as_ref() {
            Some(bus) => bus.subscribe(),
            None => {
                let (closed, receiver) = broadcast::channel(1);
                drop(closed);
                receiver
            }
        }
    }

    /// Subscribes now and resolves with the next `method` notification.
    pub fn once(
        &self,
        method: &str,
        scope: &WaitScope,
    ) -> impl Future<Output = Result<Notification, WaitError>> + Send + 'static {
        let mut events = self.subscribe();
        let method = method.to_string();
        let scope = scope.clone();
        async move { next_event(&mut events, &method, &scope).await }
    }

    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, GatherError> {
        self.send_command_with(method, params, CommandOptions::default())
            .await
    }

    /// Sends `method`, except that `<Domain>.enable`/`<Domain>.disable` only
    /// reach the browser when they flip the domain's reference count.
    pub async fn send_command_with(
        &self,
        method: &str,
        params: Value,
        opts: CommandOptions,
    ) -> Result<Value, GatherError> {
        if let Some((domain, enable)) = domain_toggle(method) {
            if !self.should_toggle_domain(domain, enable) {
                return Ok(json!({}));
            }
        }
        Ok(self.connection.send_command(method, params, opts).await?)
    }

    pub fn is_domain_enabled(&self, domain: &str) -> bool {
        self.domains.lock().get(domain).copied().unwrap_or(0) > 0
    }

    fn should_toggle_domain(&self, domain: &str, enable: bool) -> bool {
        let mut counts = self.domains.lock();
        let current = counts.get(domain).copied().unwrap_or(0);
        let next = current + if enable { 1 } else { -1 };
        counts.insert(domain.to_string(), next.max(0));

        if (enable && next == 1) || (!enable && next == 0) {
            debug!(target: "gather-driver", domain, enable, "toggling domain");
            true
        } else {
            if next < 0 {
                error!(target: "gather-driver", domain, "disable requested for a domain that is not enabled");
            }
            false
        }
    }

    pub async fn evaluate_async(&self, expression: &str) -> Result<Value, GatherError> {
        self.evaluate_with_timeout(expression, EVALUATE_TIMEOUT).await
    }

    pub async fn evaluate_with_timeout(
        &self,
        expression: &str,
        limit: Duration,
    ) -> Result<Value, GatherError> {
        let call = self.send_command("Runtime.evaluate", evaluate::evaluate_params(expression));
        match tokio::time::timeout(limit, call).await {
            Ok(response) => evaluate::interpret_response(&response?),
            Err(_) => Err(GatherError::new(
                GatherErrorKind::EvaluateTimeout,
                format!(
                    "The asynchronous expression exceeded the allotted time of {}s",
                    limit.as_secs()
                ),
            )),
        }
    }

    /// Navigates to `url` and resolves with the url the navigation ended on
    /// after redirects.
    ///
    /// Navigating to the url already loaded fires no load event; with
    /// `wait_for_load` set such a call only returns once `max_wait_for_load`
    /// elapses.
    pub async fn goto_url(&self, url: &str, options: &GotoOptions) -> Result<String, GatherError> {
        self.begin_network_status_monitoring(url).await?;

        let scope = WaitScope::new();
        let load_event = self.once("Page.loadEventFired", &scope);
        let content_loaded = self.once("Page.domContentEventFired", &scope);

        let navigated = async {
            self.send_command("Page.enable", json!({})).await?;
            self.send_command(
                "Emulation.setScriptExecutionDisabled",
                json!({ "value": options.disable_javascript }),
            )
            .await?;
            self.send_command("Page.navigate", json!({ "url": url }))
                .await?;
            if options.wait_for_load {
                self.wait_for_fully_loaded(&scope, load_event, content_loaded, &options.timing)
                    .await?;
            }
            Ok::<_, GatherError>(())
        }
        .await;

        scope.cancel();
        let final_url = self.end_network_status_monitoring();
        navigated?;

        let final_url = final_url.unwrap_or_else(|| url.to_string());
        debug!(target: "gather-driver", requested = url, %final_url, "navigation finished");
        Ok(final_url)
    }

    async fn begin_network_status_monitoring(&self, url: &str) -> Result<(), GatherError> {
        *self.shared.monitor.lock() = Some(NetworkMonitor::new(url));
        self.send_command("Network.enable", json!({})).await?;
        Ok(())
    }

    fn end_network_status_monitoring(&self) -> Option<String> {
        self.shared
            .monitor
            .lock()
            .take()
            .map(|monitor| monitor.navigation.final_url().to_string())
    }

    async fn wait_for_fully_loaded<L, C>(
        &self,
        scope: &WaitScope,
        load_event: L,
        content_loaded: C,
        timing: &LoadTiming,
    ) -> Result<(), GatherError>
    where
        L: Future<Output = Result<Notification, WaitError>>,
        C: Future<Output = Result<Notification, WaitError>>,
    {
        let load = async {
            load_event.await?;
            scope.sleep(timing.pause_after_load).await
        };
        let idle = self.wait_for_network_idle(
            scope,
            content_loaded,
            timing.network_quiet_threshold,
            timing.pause_after_network_quiet,
        );
        let ready = async { tokio::try_join!(load, idle) };

        match race_with_ceiling(scope, ready, timing.max_wait_for_load).await {
            Raced::Ready(Ok(_)) => Ok(()),
            Raced::Ready(Err(WaitError::Closed)) => Err(GatherError::new(
                GatherErrorKind::Protocol,
                "connection closed while waiting for the page to load",
            )),
            Raced::Ready(Err(WaitError::Cancelled)) => {
                Err(GatherError::internal("page load wait was cancelled"))
            }
            Raced::TimedOut => {
                warn!(
                    target: "gather-driver",
                    max_wait_ms = timing.max_wait_for_load.as_millis() as u64,
                    "timed out waiting for page load, checking if page is hung"
                );
                self.check_page_hung().await
            }
        }
    }

    /// BUSY/IDLE machine over the two-connection thresholds, seeded at
    /// DOMContentLoaded. Entering IDLE arms a quiet timer that any BUSY
    /// crossing disarms.
    async fn wait_for_network_idle<C>(
        &self,
        scope: &WaitScope,
        content_loaded: C,
        quiet: Duration,
        pause_after_quiet: Duration,
    ) -> Result<(), WaitError>
    where
        C: Future<Output = Result<Notification, WaitError>>,
    {
        content_loaded.await?;

        let (mut events, idle) = {
            let monitor = self.shared.monitor.lock();
            let monitor = monitor.as_ref().ok_or(WaitError::Closed)?;
            (monitor.recorder.subscribe(), monitor.recorder.is_2_idle())
        };
        let mut quiet_until = idle.then(|| Instant::now() + quiet);

        loop {
            let event = match quiet_until {
                Some(deadline) => tokio::select! {
                    _ = scope.cancelled() => return Err(WaitError::Cancelled),
                    _ = tokio::time::sleep_until(deadline) => break,
                    event = events.recv() => event,
                },
                None => tokio::select! {
                    _ = scope.cancelled() => return Err(WaitError::Cancelled),
                    event = events.recv() => event,
                },
            };

            match event {
                Ok(RecorderEvent::Network2Busy) => quiet_until = None,
                Ok(RecorderEvent::Network2Idle) => {
                    quiet_until.get_or_insert_with(|| Instant::now() + quiet);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {
                    let idle_now = self
                        .shared
                        .monitor
                        .lock()
                        .as_ref()
                        .map(|monitor| monitor.recorder.is_2_idle())
                        .ok_or(WaitError::Closed)?;
                    quiet_until = match (idle_now, quiet_until) {
                        (true, Some(deadline)) => Some(deadline),
                        (true, None) => Some(Instant::now() + quiet),
                        (false, _) => None,
                    };
                }
                Err(RecvError::Closed) => return Err(WaitError::Closed),
            }
        }

        scope.sleep(pause_after_quiet).await
    }

    async fn check_page_hung(&self) -> Result<(), GatherError> {
        match self.evaluate_with_timeout("1", HUNG_CHECK_TIMEOUT).await {
            Ok(_) => {
                warn!(target: "gather-driver", "page still responsive after load timeout, continuing");
                Ok(())
            }
            Err(unanswered) => {
                warn!(target: "gather-driver", %unanswered, "page appears to be hung, killing JavaScript");
                let silent = CommandOptions::silent();
                for (method, params) in [
                    ("Emulation.setScriptExecutionDisabled", json!({ "value": true })),
                    ("Runtime.terminateExecution", json!({})),
                ] {
                    if let Err(err) = self.send_command_with(method, params, silent).await {
                        debug!(target: "gather-driver", method, %err, "hung page cleanup failed");
                    }
                }
                Err(GatherError::new(GatherErrorKind::PageHung, "Page hung, killed JavaScript")
                    .with_data(json!({ "cause": unanswered.to_string() })))
            }
        }
    }

    pub async fn begin_trace(&self, settings: &Settings) -> Result<(), GatherError> {
        let categories = trace::trace_categories(settings.additional_trace_categories.as_deref());

        for domain in INTERFERING_DOMAINS {
            if self.is_domain_enabled(domain) {
                return Err(GatherError::new(
                    GatherErrorKind::TraceInterference,
                    format!("{domain} domain enabled when starting trace"),
                ));
            }
        }

        self.send_command("Page.enable", json!({})).await?;
        self.send_command("Tracing.start", trace::tracing_start_params(&categories))
            .await?;
        Ok(())
    }

    pub async fn end_trace(&self) -> Result<Trace, GatherError> {
        let scope = WaitScope::new();
        let complete = self.once("Tracing.tracingComplete", &scope);
        self.send_command("Tracing.end", json!({})).await?;
        self.collect_trace(complete).await
    }

    /// Ends tracing, or resolves `None` when the browser reports tracing
    /// was never started.
    pub async fn end_trace_if_started(&self) -> Result<Option<Trace>, GatherError> {
        let scope = WaitScope::new();
        let complete = self.once("Tracing.tracingComplete", &scope);
        match self
            .connection
            .send_command("Tracing.end", json!({}), CommandOptions::silent())
            .await
        {
            Ok(_) => self.collect_trace(complete).await.map(Some),
            Err(err) if err.is_protocol_message("Tracing is not started") => {
                debug!(target: "gather-driver", "no trace to end");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn collect_trace<C>(&self, complete: C) -> Result<Trace, GatherError>
    where
        C: Future<Output = Result<Notification, WaitError>>,
    {
        let notification = complete.await.map_err(|_| {
            GatherError::new(
                GatherErrorKind::Protocol,
                "connection closed before tracing completed",
            )
        })?;
        let handle = notification
            .params
            .get("stream")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                GatherError::new(GatherErrorKind::Protocol, "tracingComplete carried no stream")
            })?;
        self.read_trace_stream(handle).await
    }

    async fn read_trace_stream(&self, handle: &str) -> Result<Trace, GatherError> {
        let mut stream = TraceStream::new();
        let mut chunks = 0usize;
        while !stream.is_eof() {
            let chunk = self
                .send_command("IO.read", json!({ "handle": handle }))
                .await?;
            stream.push_chunk(&chunk)?;
            chunks += 1;
        }
        if let Err(err) = self
            .send_command_with("IO.close", json!({ "handle": handle }), CommandOptions::silent())
            .await
        {
            debug!(target: "gather-driver", %err, "closing trace stream failed");
        }

        let trace = stream.finish()?;
        debug!(target: "gather-driver", chunks, events = trace.trace_events.len(), "trace read");
        Ok(trace)
    }

    pub fn begin_devtools_log(&self) {
        let mut log = self.shared.devtools_log.lock();
        log.reset();
        log.begin_recording();
    }

    pub fn end_devtools_log(&self) -> Vec<Notification> {
        let mut log = self.shared.devtools_log.lock();
        log.end_recording();
        log.take_messages()
    }

    /// Applies the pass's throttling, masked by the global disable flags.
    pub async fn set_throttling(
        &self,
        settings: &Settings,
        pass: &PassConfig,
    ) -> Result<(), GatherError> {
        let throttle_cpu = pass.use_throttling && !settings.disable_cpu_throttling;
        let throttle_network = pass.use_throttling && !settings.disable_network_throttling;
        tokio::try_join!(
            self.set_cpu_throttling(throttle_cpu),
            self.set_network_throttling(throttle_network)
        )?;
        Ok(())
    }

    async fn set_cpu_throttling(&self, enabled: bool) -> Result<(), GatherError> {
        self.send_command("Emulation.setCPUThrottlingRate", emulation::cpu_throttling(enabled))
            .await
            .map(drop)
    }

    async fn set_network_throttling(&self, enabled: bool) -> Result<(), GatherError> {
        self.send_command(
            "Network.emulateNetworkConditions",
            emulation::network_conditions(enabled),
        )
        .await
        .map(drop)
    }

    /// Mobile device metrics, user agent and touch, then default throttling.
    pub async fn begin_emulation(&self, settings: &Settings) -> Result<(), GatherError> {
        if !settings.disable_device_emulation {
            tokio::try_join!(
                self.send_command(
                    "Emulation.setDeviceMetricsOverride",
                    emulation::mobile_device_metrics()
                ),
                self.send_command("Network.enable", json!({})),
                self.send_command("Network.setUserAgentOverride", emulation::mobile_user_agent()),
                self.send_command(
                    "Emulation.setTouchEmulationEnabled",
                    emulation::touch_emulation()
                ),
            )?;
        }
        if !settings.disable_network_throttling {
            self.set_network_throttling(true).await?;
        }
        if !settings.disable_cpu_throttling {
            self.set_cpu_throttling(true).await?;
        }
        Ok(())
    }

    pub async fn go_offline(&self) -> Result<(), GatherError> {
        self.send_command("Network.enable", json!({})).await?;
        self.send_command("Network.emulateNetworkConditions", emulation::offline_conditions())
            .await?;
        self.online.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub async fn go_online(&self, settings: &Settings, pass: &PassConfig) -> Result<(), GatherError> {
        self.send_command("Network.enable", json!({})).await?;
        self.set_network_throttling(pass.use_throttling && !settings.disable_network_throttling)
            .await?;
        self.online.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Wipes the disk cache and evicts the memory cache.
    pub async fn clean_browser_caches(&self) -> Result<(), GatherError> {
        self.send_command("Network.clearBrowserCache", json!({}))
            .await?;
        self.send_command("Network.setCacheDisabled", json!({ "cacheDisabled": true }))
            .await?;
        self.send_command("Network.setCacheDisabled", json!({ "cacheDisabled": false }))
            .await?;
        Ok(())
    }

    /// Clears every storage type for the url's origin except cookies.
    pub async fn clear_data_for_origin(&self, url: &str) -> Result<(), GatherError> {
        let origin = origin_of(url)?;
        self.send_command(
            "Storage.clearDataForOrigin",
            json!({ "origin": origin, "storageTypes": STORAGE_TYPES }),
        )
        .await?;
        Ok(())
    }

    pub async fn block_url_patterns(&self, patterns: &[String]) -> Result<(), GatherError> {
        match self
            .send_command("Network.setBlockedURLs", json!({ "urls": patterns }))
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if err.message.contains("wasn't found") => {
                debug!(target: "gather-driver", "browser does not support url blocking");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Accepts every dialog the page opens from now on.
    pub async fn dismiss_javascript_dialogs(&self) -> Result<(), GatherError> {
        self.send_command("Page.enable", json!({})).await?;
        if self.dialogs_handled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut events = self.subscribe();
        let connection = self.connection.clone();
        let shutdown = self.shutdown.clone();
        let scope = WaitScope::new();
        let task = tokio::spawn(async move {
            loop {
                let dialog = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    dialog = next_event(&mut events, "Page.javascriptDialogOpening", &scope) => dialog,
                };
                let Ok(dialog) = dialog else { break };
                let kind = dialog.params.get("type").and_then(Value::as_str).unwrap_or("unknown");
                warn!(target: "gather-driver", kind, "dialog opened by the page automatically suppressed");
                let params = json!({ "accept": true, "promptText": DIALOG_PROMPT_RESPONSE });
                if let Err(err) = connection
                    .send_command("Page.handleJavaScriptDialog", params, CommandOptions::silent())
                    .await
                {
                    debug!(target: "gather-driver", %err, "dialog dismissal failed");
                }
            }
        });
        self.tasks.lock().push(task);
        Ok(())
    }

    pub async fn enable_runtime_events(&self) -> Result<(), GatherError> {
        self.send_command("Runtime.enable", json!({})).await.map(drop)
    }

    /// Snapshots `Promise` and `Error` before page scripts can replace them.
    pub async fn cache_natives(&self) -> Result<(), GatherError> {
        self.evaluate_script_on_new_document(evaluate::CACHE_NATIVES_SCRIPT)
            .await
    }

    pub async fn register_performance_observer(&self) -> Result<(), GatherError> {
        self.evaluate_script_on_new_document(evaluate::PERFORMANCE_OBSERVER_SCRIPT)
            .await
    }

    async fn evaluate_script_on_new_document(&self, source: &str) -> Result<(), GatherError> {
        self.send_command(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({ "source": source }),
        )
        .await
        .map(drop)
    }

    pub async fn get_user_agent(&self) -> Result<String, GatherError> {
        let value = self.evaluate_async(evaluate::USER_AGENT_EXPRESSION).await?;
        value.as_str().map(str::to_string).ok_or_else(|| {
            GatherError::new(GatherErrorKind::Protocol, "navigator.userAgent is not a string")
        })
    }

    /// `None` when the page links no manifest.
    pub async fn get_app_manifest(&self) -> Result<Option<AppManifest>, GatherError> {
        let response = self.send_command("Page.getAppManifest", json!({})).await?;
        let field = |key: &str| {
            response
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let url = field("url");
        let data = field("data");
        if data.is_empty() {
            if url.is_empty() {
                return Ok(None);
            }
            return Err(GatherError::new(
                GatherErrorKind::Protocol,
                format!("Unable to retrieve manifest at {url}."),
            ));
        }
        let errors = response
            .get("errors")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(Some(AppManifest { url, data, errors }))
    }

    pub async fn get_service_worker_versions(&self) -> Result<Value, GatherError> {
        self.one_shot("ServiceWorker", "ServiceWorker.workerVersionUpdated")
            .await
    }

    pub async fn get_service_worker_registrations(&self) -> Result<Value, GatherError> {
        self.one_shot("ServiceWorker", "ServiceWorker.workerRegistrationUpdated")
            .await
    }

    /// Enables `domain`, takes the first `event`, disables it again.
    async fn one_shot(&self, domain: &str, event: &str) -> Result<Value, GatherError> {
        let scope = WaitScope::new();
        let received = self.once(event, &scope);
        self.send_command(&format!("{domain}.enable"), json!({}))
            .await?;
        let notification = received.await.map_err(|_| {
            GatherError::new(
                GatherErrorKind::Protocol,
                format!("connection closed before {event}"),
            )
        })?;
        self.send_command(&format!("{domain}.disable"), json!({}))
            .await?;
        Ok(notification.params)
    }

    /// Fails when a service worker for the page's origin controls another
    /// client, which means another tab shares its state.
    pub async fn assert_no_same_origin_service_worker_clients(
        &self,
        page_url: &str,
    ) -> Result<(), GatherError> {
        let registrations = self.get_service_worker_registrations().await?;
        let versions = self.get_service_worker_versions().await?;
        let origin = origin_of(page_url)?;

        let registrations: Vec<ServiceWorkerRegistration> =
            parse_list(&registrations, "registrations");
        let versions: Vec<ServiceWorkerVersion> = parse_list(&versions, "versions");

        for registration in registrations
            .iter()
            .filter(|reg| origin_of(&reg.scope_url).ok().as_deref() == Some(origin.as_str()))
        {
            let shared = versions.iter().any(|version| {
                version.registration_id == registration.registration_id
                    && !version.controlled_clients.is_empty()
            });
            if shared {
                return Err(GatherError::new(
                    GatherErrorKind::MultipleTabs,
                    "You probably have multiple tabs open to the same origin.",
                ));
            }
        }
        Ok(())
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn pump(
    mut events: broadcast::Receiver<Notification>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = events.recv() => received,
        };
        match received {
            Ok(notification) => shared.ingest(notification),
            Err(RecvError::Lagged(skipped)) => {
                warn!(target: "gather-driver", skipped, "driver fell behind the protocol connection");
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!(target: "gather-driver", "notification pump stopped");
}

/// Next notification named `method`, or why none will come.
pub async fn next_event(
    events: &mut broadcast::Receiver<Notification>,
    method: &str,
    scope: &WaitScope,
) -> Result<Notification, WaitError> {
    loop {
        let received = tokio::select! {
            _ = scope.cancelled() => return Err(WaitError::Cancelled),
            received = events.recv() => received,
        };
        match received {
            Ok(notification) if notification.method == method => return Ok(notification),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(target: "gather-driver", method, skipped, "listener lagged");
            }
            Err(RecvError::Closed) => return Err(WaitError::Closed),
        }
    }
}

fn domain_toggle(method: &str) -> Option<(&str, bool)> {
    let captures = DOMAIN_TOGGLE.captures(method)?;
    let domain = captures.get(1)?.as_str();
    let enable = captures.get(2)?.as_str() == "enable";
    Some((domain, enable))
}

fn origin_of(url: &str) -> Result<String, GatherError> {
    Url::parse(url)
        .map(|parsed| parsed.origin().ascii_serialization())
        .map_err(|err| GatherError::new(GatherErrorKind::InvalidInput, format!("{url}: {err}")))
}

fn parse_list<T: DeserializeOwned>(payload: &Value, key: &str) -> Vec<T> {
    let Some(items) = payload.get(key) else {
        return Vec::new();
    };
    match Vec::<T>::deserialize(items) {
        Ok(items) => items,
        Err(err) => {
            warn!(target: "gather-driver", key, %err, "unexpected service worker payload");
            Vec::new()
        }
    }
}
