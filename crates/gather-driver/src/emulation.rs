//! Device, CPU and network emulation payloads.

use serde_json::{json, Value};

pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 6.0.1; Nexus 5 Build/MRA58N) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/61.0.3116.0 Mobile Safari/537.36";

pub const CPU_THROTTLE_RATE: f64 = 4.0;

/// Round-trip latency of the emulated mobile connection, already scaled.
pub const TARGET_LATENCY_MS: f64 = 150.0 * 3.75;
pub const DOWNLOAD_THROUGHPUT: f64 = 1.6 * 1024.0 * 1024.0 / 8.0 * 0.9;
pub const UPLOAD_THROUGHPUT: f64 = 750.0 * 1024.0 / 8.0 * 0.9;

pub fn mobile_device_metrics() -> Value {
    json!({
        "mobile": true,
        "screenWidth": 412,
        "screenHeight": 732,
        "width": 412,
        "height": 732,
        "positionX": 0,
        "positionY": 0,
        "scale": 1,
        "deviceScaleFactor": 2.625,
        "screenOrientation": { "angle": 0, "type": "portraitPrimary" }
    })
}

pub fn mobile_user_agent() -> Value {
    json!({ "userAgent": MOBILE_USER_AGENT })
}

pub fn touch_emulation() -> Value {
    json!({ "enabled": true, "configuration": "mobile" })
}

pub fn cpu_throttling(enabled: bool) -> Value {
    json!({ "rate": if enabled { CPU_THROTTLE_RATE } else { 1.0 } })
}

pub fn network_conditions(enabled: bool) -> Value {
    if enabled {
        json!({
            "offline": false,
            "latency": TARGET_LATENCY_MS,
            "downloadThroughput": DOWNLOAD_THROUGHPUT,
            "uploadThroughput": UPLOAD_THROUGHPUT
        })
    } else {
        no_network_throttling(false)
    }
}

pub fn offline_conditions() -> Value {
    no_network_throttling(true)
}

fn no_network_throttling(offline: bool) -> Value {
    json!({
        "offline": offline,
        "latency": 0,
        "downloadThroughput": 0,
        "uploadThroughput": 0
    })
}
