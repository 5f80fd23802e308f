//! Whole runs (gather, save, load, audit) against the scripted fake browser.

use pagegauge_cli::audits;
use pagegauge_cli::{RunError, RunOptions, RunResult, Runner};
use pagegauge_config::{default_config, resolve, AuditFactory, Registry, ResolvedConfig};
use pagegauge_core_types::GatherErrorKind;
use pagegauge_driver::testing::{FakeBrowser, FakePage, DEFAULT_USER_AGENT};
use pagegauge_gather::{gatherers, GathererFactory};
use serde_json::{json, Value};

const REQUESTED: &str = "http://example.com/";
const FINAL: &str = "https://example.com/";

fn resolved(only: Option<&[&str]>) -> ResolvedConfig {
    let mut config = default_config().unwrap();
    config.settings.only_audits = only.map(|ids| ids.iter().map(|id| id.to_string()).collect());
    let gatherer_registry: Registry<GathererFactory> =
        Registry::with_builtins(gatherers::builtin()).unwrap();
    let audit_registry: Registry<AuditFactory> =
        Registry::with_builtins(audits::builtin()).unwrap();
    resolve(&config, &gatherer_registry, &audit_registry).unwrap()
}

fn script_healthy_site(browser: &FakeBrowser) {
    browser.set_page(
        REQUESTED,
        FakePage {
            redirects: vec![FINAL.to_string()],
            subresources: vec![
                "https://example.com/app.css".into(),
                "https://example.com/app.js".into(),
            ],
            console: vec![json!({
                "source": "javascript",
                "level": "error",
                "text": "Uncaught ReferenceError: x is not defined",
                "url": "https://example.com/app.js"
            })],
            offline_ready: true,
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
    browser.set_manifest(json!({
        "url": "https://example.com/manifest.json",
        "data": r#"{ "short_name": "Example", "start_url": "/", "display": "standalone", "icons": [{ "src": "/icon.png" }] }"#,
        "errors": []
    }));
    browser.set_service_workers(
        vec![json!({ "registrationId": "1", "scopeURL": FINAL, "isDeleted": false })],
        vec![json!({
            "versionId": "1",
            "registrationId": "1",
            "scriptURL": "https://example.com/sw.js",
            "status": "activated",
            "runningStatus": "running",
            "controlledClients": []
        })],
    );
    browser.set_trace_events(vec![
        json!({ "name": "TracingStartedInPage", "ph": "I", "ts": 1, "pid": 1, "tid": 1, "args": {} }),
        json!({ "name": "navigationStart", "ph": "R", "ts": 1_000, "cat": "blink.user_timing", "pid": 1, "tid": 1 }),
        json!({ "name": "app-ready", "ph": "R", "ts": 51_000, "cat": "blink.user_timing", "pid": 1, "tid": 1 }),
    ]);
}

fn score(result: &RunResult, name: &str) -> Option<f64> {
    result
        .audit(name)
        .unwrap_or_else(|| panic!("{name} missing from the result"))
        .score
}

#[tokio::test(start_paused = true)]
async fn default_config_runs_every_builtin_audit() {
    let (browser, driver) = FakeBrowser::launch();
    script_healthy_site(&browser);
    let config = resolved(None);

    let result = Runner::run_with_driver(&driver, Some(REQUESTED), &config, &RunOptions::default())
        .await
        .unwrap();

    assert_eq!(result.requested_url, REQUESTED);
    assert_eq!(result.final_url, FINAL);
    assert_eq!(result.user_agent.as_deref(), Some(DEFAULT_USER_AGENT));
    assert!(result.fetch_time.is_some());
    assert!(result.run_warnings.is_empty());

    let names: Vec<&str> = result.audits.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "critical-request-chains",
            "redirects",
            "viewport",
            "errors-in-console",
            "service-worker",
            "webapp-manifest",
            "network-requests",
            "works-offline",
            "user-timings",
        ]
    );
    for audit in &result.audits {
        assert!(audit.error_message.is_none(), "{}: {:?}", audit.name, audit.error_message);
    }

    assert_eq!(score(&result, "critical-request-chains"), Some(0.0));
    assert_eq!(score(&result, "redirects"), Some(0.0));
    assert_eq!(
        result.audit("redirects").unwrap().details["items"][0]["url"],
        REQUESTED
    );
    assert_eq!(score(&result, "viewport"), Some(1.0));
    assert_eq!(score(&result, "errors-in-console"), Some(0.0));
    assert_eq!(score(&result, "service-worker"), Some(1.0));
    assert_eq!(score(&result, "webapp-manifest"), Some(1.0));
    assert_eq!(score(&result, "network-requests"), Some(1.0));
    assert_eq!(score(&result, "works-offline"), Some(1.0));
    assert!(browser
        .sent("Network.emulateNetworkConditions")
        .iter()
        .any(|params| params["offline"] == true));

    let timings = result.audit("user-timings").unwrap();
    assert_eq!(timings.score, Some(0.0));
    assert_eq!(timings.details["items"][0]["name"], "app-ready");
    assert_eq!(timings.details["items"][0]["startTime"], 50.0);

    assert_eq!(browser.count("Tracing.start"), 1);
    assert!(result.metrics.commands > 0);
}

#[tokio::test(start_paused = true)]
async fn gather_then_audit_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config = resolved(Some(&["viewport", "redirects", "user-timings"]));

    let (browser, driver) = FakeBrowser::launch();
    script_healthy_site(&browser);
    let gathered = Runner::run_with_driver(
        &driver,
        Some(REQUESTED),
        &config,
        &RunOptions {
            gather_mode: Some(dir.path().to_path_buf()),
            audit_mode: None,
        },
    )
    .await
    .unwrap();
    assert!(gathered.audits.is_empty());
    assert!(dir.path().join("artifacts.json").exists());
    assert!(dir.path().join("defaultPass.trace.json").exists());
    assert!(dir.path().join("defaultPass.devtoolslog.json").exists());

    let (offline, driver) = FakeBrowser::launch();
    let audited = Runner::run_with_driver(
        &driver,
        None,
        &config,
        &RunOptions {
            gather_mode: None,
            audit_mode: Some(dir.path().to_path_buf()),
        },
    )
    .await
    .unwrap();
    assert!(offline.commands().is_empty());
    assert_eq!(audited.final_url, FINAL);
    assert_eq!(audited.audits.len(), 3);
    assert_eq!(score(&audited, "viewport"), Some(1.0));
    assert_eq!(score(&audited, "redirects"), Some(0.0));
    assert_eq!(score(&audited, "user-timings"), Some(0.0));
}

#[tokio::test(start_paused = true)]
async fn bad_urls_fail_before_touching_the_browser() {
    let (browser, driver) = FakeBrowser::launch();
    let config = resolved(None);
    for url in [None, Some("example.com"), Some("chrome://settings")] {
        let err = Runner::run_with_driver(&driver, url, &config, &RunOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.gather_kind(), Some(GatherErrorKind::InvalidInput), "{url:?}");
    }
    assert!(browser.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unreachable_page_is_a_page_load_failure() {
    let (browser, driver) = FakeBrowser::launch();
    browser.set_page(
        "https://nope.invalid/",
        FakePage {
            error_text: Some("net::ERR_NAME_NOT_RESOLVED".into()),
            ..FakePage::default()
        },
    );
    let err = Runner::run_with_driver(
        &driver,
        Some("https://nope.invalid/"),
        &resolved(Some(&["viewport"])),
        &RunOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, RunError::Gather(_)));
    assert_eq!(err.gather_kind(), Some(GatherErrorKind::PageLoad));
    assert!(err.to_string().contains("net::ERR_NAME_NOT_RESOLVED"));
}

#[tokio::test(start_paused = true)]
async fn gatherer_errors_surface_on_the_audit_only() {
    let (browser, driver) = FakeBrowser::launch();
    browser.set_evaluation("innerWidth", json!({ "innerWidth": "wide", "outerWidth": 412 }));
    let result = Runner::run_with_driver(
        &driver,
        Some(FINAL),
        &resolved(Some(&["viewport", "errors-in-console"])),
        &RunOptions::default(),
    )
    .await
    .unwrap();

    let viewport = result.audit("viewport").unwrap();
    assert_eq!(viewport.score, None);
    assert!(viewport
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("Required ViewportDimensions gatherer encountered an error"));
    assert_eq!(score(&result, "errors-in-console"), Some(1.0));
    assert_eq!(result.audit("errors-in-console").unwrap().details["items"], Value::Array(vec![]));
}
