use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use network_recorder::{NetworkRecorder, NetworkRecords};
use pagegauge_core_types::{
    ArtifactValue, Artifacts, GatherError, GatherErrorKind, GatherResult, Notification, PassConfig,
    Settings, Trace,
};
use pagegauge_driver::{Driver, GotoOptions};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::gatherer::{Gatherer, LoadData, PassContext, PassDefinition};

/// Headless browsers before this version cannot throttle the network.
const MIN_HEADLESS_THROTTLING_VERSION: &str = "63.0.3239.0";

/// Everything one gather run needs.
#[derive(Clone, Debug)]
pub struct GatherOptions {
    pub url: String,
    pub settings: Settings,
    pub passes: Vec<PassDefinition>,
}

/// Phase outcomes per gatherer, in phase order.
pub type PhaseResults = BTreeMap<String, Vec<GatherResult<Option<Value>>>>;

struct RunState {
    requested_url: String,
    final_url: Option<String>,
    user_agent: Option<String>,
    run_warnings: Vec<String>,
    fetch_time: DateTime<Utc>,
    traces: BTreeMap<String, Trace>,
    devtools_logs: BTreeMap<String, Vec<Notification>>,
    results: PhaseResults,
}

impl RunState {
    fn new(url: &str) -> Self {
        Self {
            requested_url: url.to_string(),
            final_url: None,
            user_agent: None,
            run_warnings: Vec::new(),
            fetch_time: Utc::now(),
            traces: BTreeMap::new(),
            devtools_logs: BTreeMap::new(),
            results: BTreeMap::new(),
        }
    }

    /// Stores a phase outcome. Recoverable errors stay in the results and
    /// let the pass continue; anything else is returned for the caller to
    /// abort with.
    fn record(&mut self, name: &str, outcome: GatherResult<Option<Value>>) -> GatherResult<()> {
        let fatal = match &outcome {
            Err(err) if err.is_fatal() => Some(err.clone()),
            Err(err) => {
                warn!(target: "gather-runner", gatherer = name, %err, "gatherer phase failed");
                None
            }
            Ok(_) => None,
        };
        self.results.entry(name.to_string()).or_default().push(outcome);
        match fatal {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Runs passes against a driver and assembles artifacts.
pub struct GatherRunner;

impl GatherRunner {
    /// Setup, then before-pass/pass/after-pass for every pass in order,
    /// then teardown and collection. Any fatal error disconnects the driver
    /// before it is returned.
    pub async fn run(driver: &Driver, options: &GatherOptions) -> GatherResult<Artifacts> {
        if options.url.trim().is_empty() {
            return Err(GatherError::new(
                GatherErrorKind::InvalidInput,
                "You must provide a url to the gather runner",
            ));
        }

        let mut state = RunState::new(&options.url);
        match Self::run_passes(driver, options, &mut state).await {
            Ok(()) => {
                Self::dispose_driver(driver).await;
                Self::collect_artifacts(state)
            }
            Err(err) => {
                error!(target: "gather-runner", %err, "gather run failed");
                Self::dispose_driver(driver).await;
                Err(err)
            }
        }
    }

    async fn run_passes(
        driver: &Driver,
        options: &GatherOptions,
        state: &mut RunState,
    ) -> GatherResult<()> {
        driver.connect().await?;
        let defaults = PassConfig::default();
        Self::load_blank(driver, &defaults.blank_page, defaults.blank_duration_ms).await?;
        Self::setup_driver(driver, options, state).await?;

        for (index, pass) in options.passes.iter().enumerate() {
            let settings = &options.settings;
            let pass_name = pass.config.pass_name().to_string();
            info!(
                target: "gather-runner",
                pass = %pass_name,
                gatherers = ?pass.gatherer_names(),
                "starting pass"
            );

            driver.set_throttling(settings, &pass.config).await?;
            Self::before_pass(driver, options, pass, state).await?;
            let url = Self::pass(driver, options, pass, state).await?;
            let load = Self::after_pass(driver, settings, pass, &url, state).await?;

            if pass.config.record_trace {
                if let Some(trace) = load.trace {
                    state.traces.insert(pass_name.clone(), trace);
                }
            }
            state.devtools_logs.insert(pass_name, load.devtools_log);
            if index == 0 {
                state.final_url = Some(url);
            }
        }
        Ok(())
    }

    async fn load_blank(driver: &Driver, blank_page: &str, duration_ms: u64) -> GatherResult<()> {
        driver
            .goto_url(blank_page, &GotoOptions::default())
            .await?;
        tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        Ok(())
    }

    async fn setup_driver(
        driver: &Driver,
        options: &GatherOptions,
        state: &mut RunState,
    ) -> GatherResult<()> {
        info!(target: "gather-runner", status = "Initializing…");
        let settings = &options.settings;

        driver
            .assert_no_same_origin_service_worker_clients(&options.url)
            .await?;
        let user_agent = driver.get_user_agent().await?;
        if let Some(warning) = headless_warning(&user_agent) {
            warn!(target: "gather-runner", %warning, "headless browser cannot throttle");
            state.run_warnings.push(warning);
        }
        state.user_agent = Some(user_agent);

        driver.begin_emulation(settings).await?;
        driver.enable_runtime_events().await?;
        driver.cache_natives().await?;
        driver.register_performance_observer().await?;
        driver.dismiss_javascript_dialogs().await?;
        if !settings.disable_storage_reset {
            driver.clear_data_for_origin(&options.url).await?;
        }
        Ok(())
    }

    async fn before_pass(
        driver: &Driver,
        options: &GatherOptions,
        pass: &PassDefinition,
        state: &mut RunState,
    ) -> GatherResult<()> {
        let config = &pass.config;
        Self::load_blank(driver, &config.blank_page, config.blank_duration_ms).await?;
        // An empty list is still sent so the previous pass's patterns are dropped.
        driver
            .block_url_patterns(&config.blocked_patterns(&options.settings))
            .await?;

        let ctx = PassContext {
            driver,
            url: &options.url,
            settings: &options.settings,
            pass: config,
        };
        for gatherer in &pass.gatherers {
            state.results.remove(gatherer.name());
            let outcome = gatherer.before_pass(&ctx).await;
            state.record(gatherer.name(), outcome)?;
        }
        Ok(())
    }

    /// Returns the url the page ended on.
    async fn pass(
        driver: &Driver,
        options: &GatherOptions,
        pass: &PassDefinition,
        state: &mut RunState,
    ) -> GatherResult<String> {
        let config = &pass.config;
        let settings = &options.settings;
        let is_perf_run =
            !settings.disable_storage_reset && config.record_trace && config.use_throttling;

        if is_perf_run {
            driver.clean_browser_caches().await?;
        }
        driver.begin_devtools_log();
        if config.record_trace {
            driver.begin_trace(settings).await?;
        }

        info!(target: "gather-runner", status = "Loading page & waiting for onload", url = %options.url);
        let url = driver
            .goto_url(&options.url, &GotoOptions::for_pass(config, settings))
            .await?;

        let ctx = PassContext {
            driver,
            url: &url,
            settings,
            pass: config,
        };
        for gatherer in &pass.gatherers {
            let outcome = gatherer.pass(&ctx).await;
            state.record(gatherer.name(), outcome)?;
        }
        Ok(url)
    }

    async fn after_pass(
        driver: &Driver,
        settings: &Settings,
        pass: &PassDefinition,
        url: &str,
        state: &mut RunState,
    ) -> GatherResult<LoadData> {
        let config = &pass.config;
        let mut load = LoadData::default();

        if config.record_trace {
            info!(target: "gather-runner", status = "Retrieving trace");
            load.trace = Some(driver.end_trace().await?);
        }

        info!(target: "gather-runner", status = "Retrieving network records");
        load.devtools_log = driver.end_devtools_log();
        load.network_records = NetworkRecorder::records_from_logs(&load.devtools_log);
        assert_page_loaded(url, driver.is_online(), &load.network_records)?;

        let unthrottled = PassConfig {
            use_throttling: false,
            ..config.clone()
        };
        driver.set_throttling(settings, &unthrottled).await?;

        let ctx = PassContext {
            driver,
            url,
            settings,
            pass: config,
        };
        for gatherer in &pass.gatherers {
            debug!(target: "gather-runner", gatherer = gatherer.name(), "retrieving");
            let outcome = gatherer.after_pass(&ctx, &load).await;
            state.record(gatherer.name(), outcome)?;
        }
        Ok(load)
    }

    /// Disconnects, logging instead of failing. A browser that is already
    /// gone is expected and only logged at debug.
    async fn dispose_driver(driver: &Driver) {
        info!(target: "gather-runner", status = "Disconnecting from browser...");
        match driver.disconnect().await {
            Ok(()) => {}
            Err(err) if err.kind == GatherErrorKind::TargetClosed => {
                debug!(target: "gather-runner", %err, "browser already closed");
            }
            Err(err) => error!(target: "gather-runner", %err, "disconnect failed"),
        }
    }

    fn collect_artifacts(state: RunState) -> GatherResult<Artifacts> {
        let mut artifacts = Artifacts::default();
        for (name, phases) in &state.results {
            artifacts.insert(name.clone(), collect_gatherer(name, phases)?);
        }

        let final_url = state
            .final_url
            .clone()
            .unwrap_or_else(|| state.requested_url.clone());
        artifacts.insert_value("UserAgent", json!(state.user_agent));
        artifacts.insert_value("FetchTime", json!(state.fetch_time.to_rfc3339()));
        artifacts.insert_value("RunWarnings", json!(state.run_warnings));
        artifacts.insert_value(
            "URL",
            json!({ "requestedUrl": state.requested_url, "finalUrl": final_url }),
        );
        artifacts.traces = state.traces;
        artifacts.devtools_logs = state.devtools_logs;
        Ok(artifacts)
    }
}

/// Picks one gatherer's artifact from its phase outcomes: the first error
/// if any phase failed, otherwise the last phase value that was provided.
pub fn collect_gatherer(
    name: &str,
    phases: &[GatherResult<Option<Value>>],
) -> GatherResult<ArtifactValue> {
    if let Some(Err(err)) = phases.iter().find(|phase| phase.is_err()) {
        return Ok(ArtifactValue::Error(err.clone()));
    }
    phases
        .iter()
        .rev()
        .find_map(|phase| phase.as_ref().ok().and_then(Option::as_ref))
        .map(|value| ArtifactValue::Value(value.clone()))
        .ok_or_else(|| {
            GatherError::new(
                GatherErrorKind::MissingArtifact,
                format!("{name} failed to provide an artifact."),
            )
        })
}

/// Fails when, online, no request for `url` loaded successfully.
pub fn assert_page_loaded(url: &str, online: bool, records: &NetworkRecords) -> GatherResult<()> {
    if !online {
        return Ok(());
    }
    let main = records.find_by_url_excluding_fragment(url);
    let failure = match main {
        None => Some("timeout reached".to_string()),
        Some(record) if record.failed => Some(
            record
                .localized_fail_description
                .clone()
                .unwrap_or_else(|| "unknown error".to_string()),
        ),
        Some(_) => None,
    };
    match failure {
        Some(message) => {
            error!(target: "gather-runner", url, %message, "page failed to load");
            Err(GatherError::new(
                GatherErrorKind::PageLoad,
                format!("Unable to load the page: {message}"),
            ))
        }
        None => Ok(()),
    }
}

/// Run warning for headless browsers too old to throttle.
pub fn headless_warning(user_agent: &str) -> Option<String> {
    let version = user_agent
        .split("HeadlessChrome/")
        .nth(1)?
        .split_whitespace()
        .next()?;
    if compare_versions(version, MIN_HEADLESS_THROTTLING_VERSION) != std::cmp::Ordering::Less {
        return None;
    }
    Some(format!(
        "Your site's mobile performance may be worse than the numbers presented in this report. \
         The page could not be tested on a mobile connection because Headless Chrome does not \
         support network throttling prior to version {MIN_HEADLESS_THROTTLING_VERSION}. \
         The version used was {version}"
    ))
}

fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let parse = |version: &str| -> Vec<u64> {
        version
            .split('.')
            .map(|part| part.parse().unwrap_or(0))
            .collect()
    };
    parse(a).cmp(&parse(b))
}
