use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::settings::Settings;

/// Name given to the single pass allowed to omit `passName`.
pub const DEFAULT_PASS: &str = "defaultPass";

/// Declarative description of one navigation + collection cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PassConfig {
    pub pass_name: Option<String>,
    pub record_trace: bool,
    pub use_throttling: bool,
    pub disable_javascript: bool,
    pub pause_after_load_ms: u64,
    pub network_quiet_threshold_ms: u64,
    pub pause_after_network_quiet_ms: u64,
    pub blocked_url_patterns: Vec<String>,
    pub blank_page: String,
    #[serde(rename = "blankDuration")]
    pub blank_duration_ms: u64,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            pass_name: None,
            record_trace: false,
            use_throttling: false,
            disable_javascript: false,
            pause_after_load_ms: 0,
            network_quiet_threshold_ms: 5_000,
            pause_after_network_quiet_ms: 0,
            blocked_url_patterns: Vec::new(),
            blank_page: "about:blank".to_string(),
            blank_duration_ms: 300,
        }
    }
}

impl PassConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            pass_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn pass_name(&self) -> &str {
        self.pass_name.as_deref().unwrap_or(DEFAULT_PASS)
    }

    /// Blocked patterns for this pass: the pass's own list, then the global
    /// settings list. An empty result still has to be sent so a previous
    /// pass's patterns get cleared.
    pub fn blocked_patterns(&self, settings: &Settings) -> Vec<String> {
        let mut patterns = self.blocked_url_patterns.clone();
        patterns.extend(settings.blocked_url_patterns.iter().cloned());
        patterns
    }

    pub fn load_timing(&self, settings: &Settings) -> LoadTiming {
        LoadTiming {
            pause_after_load: Duration::from_millis(self.pause_after_load_ms),
            network_quiet_threshold: Duration::from_millis(self.network_quiet_threshold_ms),
            pause_after_network_quiet: Duration::from_millis(self.pause_after_network_quiet_ms),
            max_wait_for_load: Duration::from_millis(settings.max_wait_for_load),
        }
    }
}

/// Knobs for the fully-loaded wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadTiming {
    pub pause_after_load: Duration,
    pub network_quiet_threshold: Duration,
    pub pause_after_network_quiet: Duration,
    pub max_wait_for_load: Duration,
}

impl Default for LoadTiming {
    fn default() -> Self {
        PassConfig::default().load_timing(&Settings::default())
    }
}
