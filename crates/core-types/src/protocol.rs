//! Wire-level shapes shared by the connection, the devtools log and artifacts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unsolicited protocol message (`{method, params}` without an id).
///
/// This is also the element type of a recorded devtools log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Captured trace in its normalized object form.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub trace_events: Vec<Value>,
}

impl Trace {
    /// Accepts both the legacy bare-array payload and the `{traceEvents}` object.
    pub fn from_payload(payload: Value) -> Option<Self> {
        match payload {
            Value::Array(events) => Some(Self {
                trace_events: events,
            }),
            Value::Object(mut map) => match map.remove("traceEvents") {
                Some(Value::Array(events)) => Some(Self {
                    trace_events: events,
                }),
                _ => None,
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_and_object_traces_normalize_identically() {
        let events = json!([{ "name": "TracingStartedInPage", "ts": 1 }]);
        let legacy = Trace::from_payload(events.clone()).unwrap();
        let modern = Trace::from_payload(json!({ "traceEvents": events })).unwrap();
        assert_eq!(legacy, modern);
        assert_eq!(legacy.trace_events.len(), 1);
    }

    #[test]
    fn rejects_payload_without_events() {
        assert!(Trace::from_payload(json!({ "metadata": {} })).is_none());
        assert!(Trace::from_payload(json!("trace")).is_none());
    }
}
