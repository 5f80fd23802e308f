//! Trace categories and stream reassembly.

use base64::Engine;
use pagegauge_core_types::{GatherError, GatherErrorKind, Trace};
use serde_json::{json, Value};

const DEFAULT_CATEGORIES: &[&str] = &[
    "-*",
    "toplevel",
    "v8.execute",
    "blink.console",
    "blink.user_timing",
    "benchmark",
    "loading",
    "latencyInfo",
    "devtools.timeline",
    "disabled-by-default-devtools.timeline",
    "disabled-by-default-devtools.timeline.frame",
    "disabled-by-default-devtools.timeline.stack",
    "disabled-by-default-devtools.screenshot",
];

/// Domains whose instrumentation skews a trace.
pub const INTERFERING_DOMAINS: &[&str] = &["Debugger", "CSS", "DOM"];

/// Default categories followed by the comma-separated extras, first
/// occurrence kept.
pub fn trace_categories(additional: Option<&str>) -> Vec<String> {
    let extras = additional
        .into_iter()
        .flat_map(|list| list.split(','))
        .map(str::trim)
        .filter(|category| !category.is_empty());

    let mut categories: Vec<String> = Vec::new();
    for category in DEFAULT_CATEGORIES.iter().copied().chain(extras) {
        if !categories.iter().any(|known| known == category) {
            categories.push(category.to_string());
        }
    }
    categories
}

pub fn tracing_start_params(categories: &[String]) -> Value {
    json!({
        "categories": categories.join(","),
        "transferMode": "ReturnAsStream",
        "options": "sampling-frequency=10000"
    })
}

/// Accumulates `IO.read` chunks until EOF.
#[derive(Debug, Default)]
pub struct TraceStream {
    buffer: Vec<u8>,
    eof: bool,
}

impl TraceStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Appends one `IO.read` response. Returns whether the stream ended.
    pub fn push_chunk(&mut self, chunk: &Value) -> Result<bool, GatherError> {
        if self.eof {
            return Ok(true);
        }
        let data = chunk.get("data").and_then(Value::as_str).unwrap_or_default();
        let encoded = chunk
            .get("base64Encoded")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if encoded {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(data)
                .map_err(|err| {
                    GatherError::new(GatherErrorKind::Protocol, format!("bad trace chunk: {err}"))
                })?;
            self.buffer.extend_from_slice(&bytes);
        } else {
            self.buffer.extend_from_slice(data.as_bytes());
        }
        self.eof = chunk.get("eof").and_then(Value::as_bool).unwrap_or(false);
        Ok(self.eof)
    }

    pub fn finish(self) -> Result<Trace, GatherError> {
        let payload: Value = serde_json::from_slice(&self.buffer).map_err(|err| {
            GatherError::new(
                GatherErrorKind::Protocol,
                format!("trace stream is not valid JSON: {err}"),
            )
        })?;
        Trace::from_payload(payload).ok_or_else(|| {
            GatherError::new(GatherErrorKind::Protocol, "trace stream has no trace events")
        })
    }
}
