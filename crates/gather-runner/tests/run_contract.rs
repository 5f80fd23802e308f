//! Full gather runs against the scripted fake browser.

use std::sync::Arc;

use async_trait::async_trait;
use pagegauge_core_types::{
    ArtifactValue, GatherError, GatherErrorKind, GatherResult, PassConfig, Settings,
};
use pagegauge_driver::testing::{FakeBrowser, FakePage, DEFAULT_USER_AGENT};
use pagegauge_gather::gatherers::{
    ConsoleMessages, Manifest, NetworkSummary, Offline, ServiceWorker, ViewportDimensions,
};
use pagegauge_gather::{
    GatherOptions, GatherRunner, Gatherer, LoadData, PassContext, PassDefinition,
};
use parking_lot::Mutex;
use serde_json::{json, Value};

const URL: &str = "https://example.com/";

#[derive(Clone)]
enum Step {
    Give(Value),
    Nothing,
    Recoverable(&'static str),
    Fatal(&'static str),
}

impl Step {
    fn outcome(&self) -> GatherResult<Option<Value>> {
        match self {
            Step::Give(value) => Ok(Some(value.clone())),
            Step::Nothing => Ok(None),
            Step::Recoverable(message) => Err(GatherError::gatherer(*message).recoverable(true)),
            Step::Fatal(message) => Err(GatherError::gatherer(*message)),
        }
    }
}

/// Returns a fixed outcome per phase and remembers which phases ran.
struct Scripted {
    name: &'static str,
    steps: [Step; 3],
    calls: Mutex<Vec<&'static str>>,
}

impl Scripted {
    fn new(name: &'static str, steps: [Step; 3]) -> Arc<Self> {
        Arc::new(Self {
            name,
            steps,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Gatherer for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    async fn before_pass(&self, _ctx: &PassContext<'_>) -> GatherResult<Option<Value>> {
        self.calls.lock().push("before_pass");
        self.steps[0].outcome()
    }

    async fn pass(&self, _ctx: &PassContext<'_>) -> GatherResult<Option<Value>> {
        self.calls.lock().push("pass");
        self.steps[1].outcome()
    }

    async fn after_pass(
        &self,
        _ctx: &PassContext<'_>,
        _load: &LoadData,
    ) -> GatherResult<Option<Value>> {
        self.calls.lock().push("after_pass");
        self.steps[2].outcome()
    }
}

fn quick_pass(name: &str) -> PassConfig {
    PassConfig {
        network_quiet_threshold_ms: 100,
        ..PassConfig::named(name)
    }
}

fn define(config: PassConfig, gatherers: &[&Arc<Scripted>]) -> PassDefinition {
    let gatherers = gatherers
        .iter()
        .map(|gatherer| Arc::clone(*gatherer) as Arc<dyn Gatherer>)
        .collect();
    PassDefinition::new(config, gatherers)
}

fn options(passes: Vec<PassDefinition>) -> GatherOptions {
    GatherOptions {
        url: URL.to_string(),
        settings: Settings::default(),
        passes,
    }
}

#[tokio::test(start_paused = true)]
async fn last_provided_phase_value_becomes_the_artifact() {
    let (_browser, driver) = FakeBrowser::launch();
    let rising = Scripted::new(
        "Rising",
        [Step::Give(json!(65)), Step::Give(json!(72)), Step::Give(json!(97))],
    );
    let early = Scripted::new(
        "Early",
        [Step::Give(json!(220)), Step::Give(json!(284)), Step::Nothing],
    );
    let pass = define(quick_pass("defaultPass"), &[&rising, &early]);

    let artifacts = GatherRunner::run(&driver, &options(vec![pass]))
        .await
        .unwrap();

    assert_eq!(artifacts.value("Rising"), Some(&json!(97)));
    assert_eq!(artifacts.value("Early"), Some(&json!(284)));
    assert_eq!(rising.calls(), vec!["before_pass", "pass", "after_pass"]);
}

#[tokio::test(start_paused = true)]
async fn reserved_artifacts_are_always_present() {
    let (_browser, driver) = FakeBrowser::launch();
    let gatherer = Scripted::new("Any", [Step::Nothing, Step::Nothing, Step::Give(json!(1))]);
    let pass = define(quick_pass("firstPass"), &[&gatherer]);

    let artifacts = GatherRunner::run(&driver, &options(vec![pass]))
        .await
        .unwrap();

    assert_eq!(artifacts.value("UserAgent"), Some(&json!(DEFAULT_USER_AGENT)));
    assert_eq!(artifacts.value("RunWarnings"), Some(&json!([])));
    let url = artifacts.value("URL").unwrap();
    assert_eq!(url["requestedUrl"], URL);
    assert_eq!(url["finalUrl"], URL);
    let fetch_time = artifacts.value("FetchTime").unwrap().as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(fetch_time).is_ok());
    assert!(artifacts.devtools_logs["firstPass"]
        .iter()
        .any(|message| message.method == "Network.requestWillBeSent"));
    assert!(artifacts.traces.is_empty());
}

#[tokio::test(start_paused = true)]
async fn recoverable_errors_become_the_artifact() {
    let (_browser, driver) = FakeBrowser::launch();
    let failing = Scripted::new(
        "Flaky",
        [
            Step::Recoverable("first"),
            Step::Recoverable("second"),
            Step::Recoverable("third"),
        ],
    );
    let healthy = Scripted::new("Healthy", [Step::Nothing, Step::Nothing, Step::Give(json!("ok"))]);
    let pass = define(quick_pass("defaultPass"), &[&failing, &healthy]);

    let artifacts = GatherRunner::run(&driver, &options(vec![pass]))
        .await
        .unwrap();

    match artifacts.get("Flaky") {
        Some(ArtifactValue::Error(err)) => {
            assert_eq!(err.message, "first");
            assert!(err.is_recoverable());
        }
        other => panic!("expected an error artifact, got {other:?}"),
    }
    assert_eq!(artifacts.value("Healthy"), Some(&json!("ok")));
    assert_eq!(failing.calls().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn fatal_error_aborts_and_disconnects() {
    let (_browser, driver) = FakeBrowser::launch();
    let fatal = Scripted::new("Broken", [Step::Nothing, Step::Fatal("boom"), Step::Nothing]);
    let after = Scripted::new("After", [Step::Nothing, Step::Nothing, Step::Give(json!(1))]);
    let pass = define(quick_pass("defaultPass"), &[&fatal, &after]);

    let err = GatherRunner::run(&driver, &options(vec![pass]))
        .await
        .unwrap_err();

    assert_eq!(err.kind, GatherErrorKind::Gatherer);
    assert_eq!(err.message, "boom");
    assert_eq!(fatal.calls(), vec!["before_pass", "pass"]);
    assert_eq!(after.calls(), vec!["before_pass"]);
    let after_disconnect = driver.send_command("Page.reload", json!({})).await;
    assert!(after_disconnect.is_err());
}

#[tokio::test(start_paused = true)]
async fn gatherer_without_any_value_fails_the_run() {
    let (_browser, driver) = FakeBrowser::launch();
    let silent = Scripted::new("Silent", [Step::Nothing, Step::Nothing, Step::Nothing]);
    let pass = define(quick_pass("defaultPass"), &[&silent]);

    let err = GatherRunner::run(&driver, &options(vec![pass]))
        .await
        .unwrap_err();
    assert_eq!(err.kind, GatherErrorKind::MissingArtifact);
    assert_eq!(err.message, "Silent failed to provide an artifact.");
}

#[tokio::test(start_paused = true)]
async fn failed_document_request_is_a_page_load_error() {
    let (browser, driver) = FakeBrowser::launch();
    browser.set_page(
        URL,
        FakePage {
            error_text: Some("net::ERR_NAME_NOT_RESOLVED".into()),
            ..FakePage::default()
        },
    );
    let gatherer = Scripted::new("Any", [Step::Nothing, Step::Nothing, Step::Give(json!(1))]);
    let pass = define(quick_pass("defaultPass"), &[&gatherer]);

    let err = GatherRunner::run(&driver, &options(vec![pass]))
        .await
        .unwrap_err();
    assert_eq!(err.kind, GatherErrorKind::PageLoad);
    assert_eq!(
        err.message,
        "Unable to load the page: net::ERR_NAME_NOT_RESOLVED"
    );
    assert_eq!(gatherer.calls(), vec!["before_pass", "pass"]);
}

fn with_offline_pass(first: &Arc<Scripted>) -> Vec<PassDefinition> {
    vec![
        define(quick_pass("defaultPass"), &[first]),
        PassDefinition::new(quick_pass("offlinePass"), vec![Arc::new(Offline) as Arc<dyn Gatherer>]),
    ]
}

#[tokio::test(start_paused = true)]
async fn offline_pass_tolerates_a_page_that_cannot_load() {
    let (browser, driver) = FakeBrowser::launch();
    let gatherer = Scripted::new("Any", [Step::Nothing, Step::Nothing, Step::Give(json!(1))]);

    let artifacts = GatherRunner::run(&driver, &options(with_offline_pass(&gatherer)))
        .await
        .unwrap();
    assert_eq!(artifacts.value("Offline"), Some(&json!(-1)));
    assert_eq!(artifacts.value("URL").unwrap()["finalUrl"], URL);

    let conditions = browser.sent("Network.emulateNetworkConditions");
    let offline_at = conditions
        .iter()
        .position(|params| params["offline"] == true)
        .unwrap();
    assert!(conditions[offline_at + 1..]
        .iter()
        .any(|params| params["offline"] == false));
    assert!(driver.is_online());
}

#[tokio::test(start_paused = true)]
async fn page_served_offline_reports_its_status() {
    let (browser, driver) = FakeBrowser::launch();
    browser.set_page(
        URL,
        FakePage {
            offline_ready: true,
            ..FakePage::default()
        },
    );
    let gatherer = Scripted::new("Any", [Step::Nothing, Step::Nothing, Step::Give(json!(1))]);

    let artifacts = GatherRunner::run(&driver, &options(with_offline_pass(&gatherer)))
        .await
        .unwrap();
    assert_eq!(artifacts.value("Offline"), Some(&json!(200)));
}

#[tokio::test(start_paused = true)]
async fn redirected_navigation_reports_the_final_url() {
    let (browser, driver) = FakeBrowser::launch();
    browser.set_page(
        URL,
        FakePage {
            redirects: vec!["https://www.example.com/home".into()],
            ..FakePage::default()
        },
    );
    let gatherer = Scripted::new("Any", [Step::Nothing, Step::Nothing, Step::Give(json!(1))]);
    let pass = define(quick_pass("defaultPass"), &[&gatherer]);

    let artifacts = GatherRunner::run(&driver, &options(vec![pass]))
        .await
        .unwrap();
    let url = artifacts.value("URL").unwrap();
    assert_eq!(url["requestedUrl"], URL);
    assert_eq!(url["finalUrl"], "https://www.example.com/home");
}

#[tokio::test(start_paused = true)]
async fn old_headless_browser_adds_a_run_warning() {
    let (browser, driver) = FakeBrowser::launch();
    browser.set_user_agent(
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
         HeadlessChrome/62.0.3202.0 Safari/537.36",
    );
    let gatherer = Scripted::new("Any", [Step::Nothing, Step::Nothing, Step::Give(json!(1))]);
    let pass = define(quick_pass("defaultPass"), &[&gatherer]);

    let artifacts = GatherRunner::run(&driver, &options(vec![pass]))
        .await
        .unwrap();
    let warnings = artifacts.value("RunWarnings").unwrap().as_array().unwrap();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].as_str().unwrap().contains("62.0.3202.0"));
}

#[tokio::test(start_paused = true)]
async fn passes_run_in_order_with_their_own_trace_and_blocking() {
    let (browser, driver) = FakeBrowser::launch();
    let first = PassConfig {
        record_trace: true,
        use_throttling: true,
        blocked_url_patterns: vec!["*.woff2".into()],
        ..quick_pass("firstPass")
    };
    let second = quick_pass("secondPass");
    let one = Scripted::new("One", [Step::Nothing, Step::Nothing, Step::Give(json!(1))]);
    let two = Scripted::new("Two", [Step::Nothing, Step::Nothing, Step::Give(json!(2))]);

    let artifacts = GatherRunner::run(
        &driver,
        &options(vec![
            define(first, &[&one]),
            define(second, &[&two]),
        ]),
    )
    .await
    .unwrap();

    assert_eq!(artifacts.traces.len(), 1);
    assert_eq!(artifacts.traces["firstPass"].trace_events.len(), 2);
    assert!(artifacts.devtools_logs.contains_key("firstPass"));
    assert!(artifacts.devtools_logs.contains_key("secondPass"));

    let blocked = browser.sent("Network.setBlockedURLs");
    assert_eq!(blocked.len(), 2);
    assert_eq!(blocked[0]["urls"], json!(["*.woff2"]));
    assert_eq!(blocked[1]["urls"], json!([]));

    // Only the traced, throttled pass counts as a performance run.
    assert_eq!(browser.count("Network.clearBrowserCache"), 1);
    assert_eq!(browser.count("Storage.clearDataForOrigin"), 1);
}

#[tokio::test(start_paused = true)]
async fn storage_reset_disabled_skips_cache_and_storage_clearing() {
    let (browser, driver) = FakeBrowser::launch();
    let pass = PassConfig {
        record_trace: true,
        use_throttling: true,
        ..quick_pass("defaultPass")
    };
    let gatherer = Scripted::new("Any", [Step::Nothing, Step::Nothing, Step::Give(json!(1))]);
    let mut opts = options(vec![define(pass, &[&gatherer])]);
    opts.settings.disable_storage_reset = true;

    GatherRunner::run(&driver, &opts).await.unwrap();
    assert_eq!(browser.count("Network.clearBrowserCache"), 0);
    assert_eq!(browser.count("Storage.clearDataForOrigin"), 0);
}

#[tokio::test(start_paused = true)]
async fn empty_url_is_rejected_before_connecting() {
    let (browser, driver) = FakeBrowser::launch();
    let mut opts = options(Vec::new());
    opts.url = "  ".into();

    let err = GatherRunner::run(&driver, &opts).await.unwrap_err();
    assert_eq!(err.kind, GatherErrorKind::InvalidInput);
    assert_eq!(err.message, "You must provide a url to the gather runner");
    assert!(browser.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn builtin_gatherers_produce_their_artifacts() {
    let (browser, driver) = FakeBrowser::launch();
    browser.set_page(
        URL,
        FakePage {
            subresources: vec!["https://example.com/app.js".into()],
            console: vec![json!({ "source": "javascript", "level": "error", "text": "Uncaught oops" })],
            ..FakePage::default()
        },
    );
    browser.set_evaluation(
        "innerWidth",
        json!({
            "innerWidth": 412, "innerHeight": 732, "outerWidth": 412,
            "outerHeight": 732, "devicePixelRatio": 2.625
        }),
    );
    let gatherers: Vec<Arc<dyn Gatherer>> = vec![
        Arc::new(ViewportDimensions),
        Arc::new(ConsoleMessages::default()),
        Arc::new(Manifest),
        Arc::new(ServiceWorker),
        Arc::new(NetworkSummary),
    ];
    let pass = PassDefinition::new(quick_pass("defaultPass"), gatherers);

    let artifacts = GatherRunner::run(&driver, &options(vec![pass]))
        .await
        .unwrap();

    assert_eq!(artifacts.value("ViewportDimensions").unwrap()["innerWidth"], 412);
    let console = artifacts.value("ConsoleMessages").unwrap().as_array().unwrap();
    assert_eq!(console.len(), 1);
    assert_eq!(console[0]["text"], "Uncaught oops");
    assert_eq!(artifacts.value("Manifest"), Some(&Value::Null));
    assert_eq!(
        artifacts.value("ServiceWorker"),
        Some(&json!({ "versions": [], "registrations": [] }))
    );
    assert_eq!(artifacts.value("NetworkSummary").unwrap()["requestCount"], 2);
    assert_eq!(browser.count("Log.enable"), 1);
    assert_eq!(browser.count("Log.disable"), 1);
}

#[tokio::test(start_paused = true)]
async fn broken_manifest_is_a_recoverable_error() {
    let (browser, driver) = FakeBrowser::launch();
    browser.set_manifest(json!({ "url": "https://example.com/manifest.json", "data": "", "errors": [] }));
    let pass = PassDefinition::new(
        quick_pass("defaultPass"),
        vec![Arc::new(Manifest) as Arc<dyn Gatherer>],
    );

    let artifacts = GatherRunner::run(&driver, &options(vec![pass]))
        .await
        .unwrap();
    let err = artifacts.get("Manifest").and_then(ArtifactValue::as_error).unwrap();
    assert!(err.is_recoverable());
    assert_eq!(
        err.message,
        "Unable to retrieve manifest at https://example.com/manifest.json."
    );
}
