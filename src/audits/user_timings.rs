use std::collections::HashMap;

use pagegauge_core_types::{Artifacts, Audit, AuditError, AuditMeta, AuditOutcome};
use serde::Serialize;
use serde_json::{json, Value};

use super::{default_pass_trace, TRACES};

pub const NAME: &str = "user-timings";

const CATEGORY: &str = "blink.user_timing";

/// Marks the browser itself emits under the user-timing category.
const NAVIGATION_TIMING_MARKS: &[&str] = &[
    "navigationStart",
    "fetchStart",
    "domainLookupStart",
    "domainLookupEnd",
    "connectStart",
    "connectEnd",
    "secureConnectionStart",
    "requestStart",
    "responseStart",
    "responseEnd",
    "domLoading",
    "domInteractive",
    "domContentLoadedEventStart",
    "domContentLoadedEventEnd",
    "domComplete",
    "loadEventStart",
    "loadEventEnd",
    "unloadEventStart",
    "unloadEventEnd",
    "redirectStart",
    "redirectEnd",
    "paintNonDefaultBackgroundColor",
];

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTiming {
    pub name: String,
    pub timing_type: &'static str,
    /// Milliseconds since navigation start.
    pub start_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// `performance.mark()` and `performance.measure()` calls found in the
/// default pass trace.
#[derive(Debug, Default)]
pub struct UserTimings;

impl Audit for UserTimings {
    fn meta(&self) -> AuditMeta {
        AuditMeta {
            name: NAME.to_string(),
            description: "User Timing marks and measures".to_string(),
            required_artifacts: vec![TRACES.to_string()],
        }
    }

    fn audit(&self, artifacts: &Artifacts) -> Result<AuditOutcome, AuditError> {
        let trace = default_pass_trace(artifacts)?;
        let timings = user_timings(&trace.trace_events);

        let outcome = AuditOutcome::binary(timings.is_empty());
        let outcome = if timings.is_empty() {
            outcome
        } else {
            outcome.with_display(format!("{} user timings", timings.len()))
        };
        Ok(outcome.with_details(json!({ "items": timings })))
    }
}

fn is_user_timing(event: &Value) -> bool {
    event
        .get("cat")
        .and_then(Value::as_str)
        .is_some_and(|cat| cat.split(',').any(|c| c == CATEGORY))
}

fn field<'a>(event: &'a Value, key: &str) -> Option<&'a str> {
    event.get(key).and_then(Value::as_str)
}

fn ts_ms(event: &Value) -> Option<f64> {
    event.get("ts").and_then(Value::as_f64).map(|ts| ts / 1_000.0)
}

/// Marks are instant events, measures are paired `b`/`e` async events.
pub fn user_timings(events: &[Value]) -> Vec<UserTiming> {
    let user_events: Vec<&Value> = events.iter().filter(|e| is_user_timing(e)).collect();
    let navigation_start = user_events
        .iter()
        .find(|event| field(event, "name") == Some("navigationStart"))
        .and_then(|event| ts_ms(event))
        .unwrap_or(0.0);

    let mut timings = Vec::new();
    let mut open_measures: HashMap<(String, String), f64> = HashMap::new();
    for event in user_events {
        let (Some(name), Some(phase), Some(ts)) = (field(event, "name"), field(event, "ph"), ts_ms(event))
        else {
            continue;
        };
        if NAVIGATION_TIMING_MARKS.contains(&name) {
            continue;
        }
        let id = field(event, "id").unwrap_or_default().to_string();
        match phase {
            "R" | "I" | "i" => timings.push(UserTiming {
                name: name.to_string(),
                timing_type: "Mark",
                start_time: ts - navigation_start,
                duration: None,
            }),
            "b" => {
                open_measures.insert((name.to_string(), id), ts);
            }
            "e" => {
                if let Some(start) = open_measures.remove(&(name.to_string(), id)) {
                    timings.push(UserTiming {
                        name: name.to_string(),
                        timing_type: "Measure",
                        start_time: start - navigation_start,
                        duration: Some(ts - start),
                    });
                }
            }
            _ => {}
        }
    }
    timings.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    timings
}
