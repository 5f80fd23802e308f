//! Driver behaviour against the scripted fake browser.

use std::time::Duration;

use pagegauge_core_types::{GatherErrorKind, LoadTiming, PassConfig, Settings};
use pagegauge_driver::testing::{FakeBrowser, FakePage, Response};
use pagegauge_driver::{Driver, GotoOptions};
use serde_json::json;
use tokio::time::Instant;

async fn connected() -> (FakeBrowser, Driver) {
    let (browser, driver) = FakeBrowser::launch();
    driver.connect().await.unwrap();
    (browser, driver)
}

fn timing(quiet_ms: u64, max_wait_ms: u64) -> GotoOptions {
    GotoOptions {
        wait_for_load: true,
        disable_javascript: false,
        timing: LoadTiming {
            pause_after_load: Duration::ZERO,
            network_quiet_threshold: Duration::from_millis(quiet_ms),
            pause_after_network_quiet: Duration::ZERO,
            max_wait_for_load: Duration::from_millis(max_wait_ms),
        },
    }
}

#[tokio::test]
async fn domain_toggles_reach_the_browser_only_on_transitions() {
    let (browser, driver) = connected().await;

    driver.send_command("Network.enable", json!({})).await.unwrap();
    driver.send_command("Network.enable", json!({})).await.unwrap();
    driver.send_command("Network.disable", json!({})).await.unwrap();
    assert_eq!(browser.count("Network.enable"), 1);
    assert_eq!(browser.count("Network.disable"), 0);
    assert!(driver.is_domain_enabled("Network"));

    driver.send_command("Network.disable", json!({})).await.unwrap();
    assert_eq!(browser.count("Network.disable"), 1);
    assert!(!driver.is_domain_enabled("Network"));

    // Extra disables clamp at zero and stay local.
    driver.send_command("Network.disable", json!({})).await.unwrap();
    assert_eq!(browser.count("Network.disable"), 1);
    driver.send_command("Network.enable", json!({})).await.unwrap();
    assert_eq!(browser.count("Network.enable"), 2);
}

#[tokio::test]
async fn trace_round_trip_and_idempotent_end() {
    let (browser, driver) = connected().await;

    assert_eq!(driver.end_trace_if_started().await.unwrap(), None);

    driver.begin_trace(&Settings::default()).await.unwrap();
    let start = &browser.sent("Tracing.start")[0];
    assert_eq!(start["transferMode"], "ReturnAsStream");
    assert!(start["categories"].as_str().unwrap().starts_with("-*,toplevel"));

    let trace = driver.end_trace().await.unwrap();
    assert_eq!(trace.trace_events.len(), 2);
    assert_eq!(trace.trace_events[0]["name"], "TracingStartedInPage");
    assert_eq!(browser.count("IO.read"), 2);
    assert_eq!(browser.count("IO.close"), 1);

    assert_eq!(driver.end_trace_if_started().await.unwrap(), None);
}

#[tokio::test]
async fn only_the_not_started_reply_is_swallowed_when_ending_a_trace() {
    let (browser, driver) = connected().await;
    browser.on("Tracing.end", |_| Response::error("Target crashed"));

    let err = driver.end_trace_if_started().await.unwrap_err();
    assert_eq!(err.kind, GatherErrorKind::Protocol);
    assert!(err.message.contains("Target crashed"));
}

#[tokio::test]
async fn tracing_refuses_to_start_with_dom_enabled() {
    let (browser, driver) = connected().await;
    driver.send_command("DOM.enable", json!({})).await.unwrap();

    let err = driver.begin_trace(&Settings::default()).await.unwrap_err();
    assert_eq!(err.kind, GatherErrorKind::TraceInterference);
    assert_eq!(err.message, "DOM domain enabled when starting trace");
    assert_eq!(browser.count("Tracing.start"), 0);
}

#[tokio::test(start_paused = true)]
async fn fully_loaded_waits_for_the_later_of_load_and_network_quiet() {
    let (browser, driver) = connected().await;
    browser.set_page(
        "https://example.com/",
        FakePage {
            dom_content_after: Duration::from_millis(10),
            load_after: Duration::from_millis(100),
            ..FakePage::default()
        },
    );

    let started = Instant::now();
    let url = driver
        .goto_url("https://example.com/", &timing(50, 10_000))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(url, "https://example.com/");
    assert!(elapsed >= Duration::from_millis(100), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(150), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn network_quiet_can_be_the_slower_signal() {
    let (browser, driver) = connected().await;
    browser.set_page(
        "https://example.com/",
        FakePage {
            dom_content_after: Duration::from_millis(10),
            load_after: Duration::from_millis(20),
            ..FakePage::default()
        },
    );

    let started = Instant::now();
    driver
        .goto_url("https://example.com/", &timing(500, 10_000))
        .await
        .unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(510), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(600), "{elapsed:?}");
}

fn request_sent(id: &str) -> serde_json::Value {
    json!({
        "requestId": id,
        "request": { "url": format!("https://example.com/{id}.js"), "method": "GET" },
        "timestamp": 1.0,
        "type": "Script"
    })
}

fn request_finished(id: &str) -> serde_json::Value {
    json!({ "requestId": id, "timestamp": 2.0, "encodedDataLength": 100 })
}

#[tokio::test(start_paused = true)]
async fn third_connection_before_quiet_restarts_the_quiet_window() {
    let (browser, driver) = connected().await;
    let ms = Duration::from_millis;
    browser.on("Page.navigate", move |_| {
        Response::ok(json!({ "frameId": "frame-1" }))
            .emit("Network.requestWillBeSent", request_sent("a"))
            .emit("Network.requestWillBeSent", request_sent("b"))
            .emit("Network.requestWillBeSent", request_sent("c"))
            .emit_after(ms(10), "Page.domContentEventFired", json!({ "timestamp": 1.0 }))
            .emit_after(ms(10), "Page.loadEventFired", json!({ "timestamp": 1.1 }))
            // 3 -> 2 in flight at 100ms arms the quiet timer.
            .emit_after(ms(80), "Network.loadingFinished", request_finished("a"))
            // 2 -> 3 at 300ms disarms it before it fires at 600ms.
            .emit_after(ms(200), "Network.requestWillBeSent", request_sent("d"))
            // 3 -> 2 at 400ms arms it again.
            .emit_after(ms(100), "Network.loadingFinished", request_finished("d"))
    });

    let started = Instant::now();
    driver
        .goto_url("https://example.com/", &timing(500, 10_000))
        .await
        .unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= ms(900), "{elapsed:?}");
    assert!(elapsed < ms(950), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn timed_out_evaluations_leave_no_pending_commands() {
    let (browser, driver) = connected().await;
    browser.on("Runtime.evaluate", |_| Response::never());

    for _ in 0..3 {
        let err = driver
            .evaluate_with_timeout("1", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, GatherErrorKind::EvaluateTimeout);
    }
    assert_eq!(driver.connection().pending_commands(), 0);
    assert_eq!(driver.connection().traffic().abandoned, 3);
}

#[tokio::test(start_paused = true)]
async fn navigation_resolves_to_the_redirect_target() {
    let (browser, driver) = connected().await;
    browser.set_page(
        "http://example.com/",
        FakePage {
            redirects: vec!["https://example.com/".into(), "https://www.example.com/".into()],
            ..FakePage::default()
        },
    );

    let url = driver
        .goto_url("http://example.com/", &timing(50, 10_000))
        .await
        .unwrap();
    assert_eq!(url, "https://www.example.com/");

    let order = browser.methods();
    let enable = order.iter().position(|m| m == "Page.enable").unwrap();
    let script = order
        .iter()
        .position(|m| m == "Emulation.setScriptExecutionDisabled")
        .unwrap();
    let navigate = order.iter().position(|m| m == "Page.navigate").unwrap();
    assert!(enable < script && script < navigate);
}

#[tokio::test(start_paused = true)]
async fn ceiling_with_a_responsive_page_continues() {
    let (browser, driver) = connected().await;
    browser.on("Page.navigate", |_| Response::ok(json!({ "frameId": "frame-1" })));

    let started = Instant::now();
    let url = driver
        .goto_url("https://slow.example/", &timing(50, 1_000))
        .await
        .unwrap();
    assert_eq!(url, "https://slow.example/");
    assert!(started.elapsed() >= Duration::from_millis(1_000));
    assert_eq!(browser.count("Runtime.evaluate"), 1);
}

#[tokio::test(start_paused = true)]
async fn ceiling_with_an_unresponsive_page_is_hung() {
    let (browser, driver) = connected().await;
    browser.on("Page.navigate", |_| Response::ok(json!({ "frameId": "frame-1" })));
    browser.on("Runtime.evaluate", |_| Response::never());

    let err = driver
        .goto_url("https://hung.example/", &timing(50, 1_000))
        .await
        .unwrap_err();
    assert_eq!(err.kind, GatherErrorKind::PageHung);
    assert_eq!(browser.count("Runtime.terminateExecution"), 1);
}

#[tokio::test]
async fn page_exceptions_surface_as_evaluation_errors() {
    let (browser, driver) = connected().await;
    browser.set_evaluation(
        "document.broken",
        json!({ "__failedInBrowser": true, "name": "TypeError", "message": "boom", "stack": "s" }),
    );
    browser.set_evaluation("document.title", json!("Hello"));

    assert_eq!(driver.evaluate_async("document.title").await.unwrap(), json!("Hello"));
    let err = driver.evaluate_async("document.broken").await.unwrap_err();
    assert_eq!(err.kind, GatherErrorKind::PageEvaluation);
    assert_eq!(err.data.unwrap()["name"], "TypeError");

    let params = &browser.sent("Runtime.evaluate")[0];
    assert_eq!(params["awaitPromise"], true);
    assert!(params["expression"].as_str().unwrap().contains("wrapInNativePromise"));
}

#[tokio::test(start_paused = true)]
async fn evaluate_times_out_after_sixty_seconds() {
    let (browser, driver) = connected().await;
    browser.on("Runtime.evaluate", |_| Response::never());

    let started = Instant::now();
    let err = driver.evaluate_async("1").await.unwrap_err();
    assert_eq!(err.kind, GatherErrorKind::EvaluateTimeout);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(60) && elapsed < Duration::from_secs(61));
}

#[tokio::test]
async fn same_origin_controlled_worker_means_multiple_tabs() {
    let (browser, driver) = connected().await;
    browser.set_service_workers(
        vec![json!({ "registrationId": "1", "scopeURL": "https://example.com/app/" })],
        vec![json!({ "registrationId": "1", "controlledClients": ["tab-2"] })],
    );

    let err = driver
        .assert_no_same_origin_service_worker_clients("https://example.com/")
        .await
        .unwrap_err();
    assert_eq!(err.kind, GatherErrorKind::MultipleTabs);
    assert_eq!(browser.count("ServiceWorker.enable"), 2);
    assert_eq!(browser.count("ServiceWorker.disable"), 2);

    driver
        .assert_no_same_origin_service_worker_clients("https://other.example/")
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn devtools_log_keeps_page_and_network_events_of_the_capture_window() {
    let (browser, driver) = connected().await;

    driver.begin_devtools_log();
    browser.emit("Runtime.consoleAPICalled", json!({}));
    driver
        .goto_url("https://example.com/", &timing(50, 10_000))
        .await
        .unwrap();
    let log = driver.end_devtools_log();

    assert!(log.iter().all(|m| m.method.starts_with("Page.") || m.method.starts_with("Network.")));
    assert!(log.iter().any(|m| m.method == "Network.loadingFinished"));
    assert!(log.iter().any(|m| m.method == "Page.loadEventFired"));
}

#[tokio::test]
async fn throttling_follows_pass_and_global_flags() {
    let (browser, driver) = connected().await;
    let settings = Settings {
        disable_cpu_throttling: true,
        ..Settings::default()
    };
    let pass = PassConfig {
        use_throttling: true,
        ..PassConfig::default()
    };

    driver.set_throttling(&settings, &pass).await.unwrap();
    assert_eq!(browser.sent("Emulation.setCPUThrottlingRate")[0]["rate"], 1.0);
    assert_eq!(browser.sent("Network.emulateNetworkConditions")[0]["latency"], 562.5);

    driver
        .set_throttling(&Settings::default(), &PassConfig::default())
        .await
        .unwrap();
    assert_eq!(browser.sent("Network.emulateNetworkConditions")[1]["latency"], 0);
}

#[tokio::test]
async fn offline_flag_tracks_emulation() {
    let (_browser, driver) = connected().await;
    assert!(driver.is_online());
    driver.go_offline().await.unwrap();
    assert!(!driver.is_online());
    driver
        .go_online(&Settings::default(), &PassConfig::default())
        .await
        .unwrap();
    assert!(driver.is_online());
}

#[tokio::test]
async fn url_blocking_tolerates_unsupported_browsers() {
    let (browser, driver) = connected().await;
    browser.on("Network.setBlockedURLs", |_| {
        Response::error("'Network.setBlockedURLs' wasn't found")
    });
    driver.block_url_patterns(&[]).await.unwrap();
    assert_eq!(browser.sent("Network.setBlockedURLs")[0]["urls"], json!([]));
}

#[tokio::test]
async fn dialogs_are_accepted_automatically() {
    let (browser, driver) = connected().await;
    driver.dismiss_javascript_dialogs().await.unwrap();

    browser.emit("Page.javascriptDialogOpening", json!({ "type": "alert", "message": "hi" }));
    for _ in 0..100 {
        if browser.count("Page.handleJavaScriptDialog") > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(browser.sent("Page.handleJavaScriptDialog")[0]["accept"], true);
}

#[tokio::test]
async fn manifest_lookup_distinguishes_absent_from_unreadable() {
    let (browser, driver) = connected().await;
    assert_eq!(driver.get_app_manifest().await.unwrap(), None);

    browser.set_manifest(json!({ "url": "https://example.com/m.json", "data": "", "errors": [] }));
    let err = driver.get_app_manifest().await.unwrap_err();
    assert_eq!(err.message, "Unable to retrieve manifest at https://example.com/m.json.");

    browser.set_manifest(json!({ "url": "https://example.com/m.json", "data": "{\"name\":\"x\"}", "errors": [] }));
    let manifest = driver.get_app_manifest().await.unwrap().unwrap();
    assert_eq!(manifest.data, "{\"name\":\"x\"}");
}

#[tokio::test]
async fn user_agent_comes_from_the_page() {
    let (browser, driver) = connected().await;
    browser.set_user_agent("Mozilla/5.0 HeadlessChrome/62.0.3202.0 Safari/537.36");
    assert_eq!(
        driver.get_user_agent().await.unwrap(),
        "Mozilla/5.0 HeadlessChrome/62.0.3202.0 Safari/537.36"
    );
}

#[tokio::test]
async fn disconnect_stops_the_driver() {
    let (_browser, driver) = connected().await;
    driver.disconnect().await.unwrap();
    let err = driver.send_command("Page.reload", json!({})).await.unwrap_err();
    assert_eq!(err.kind, GatherErrorKind::Protocol);
}
