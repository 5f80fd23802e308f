use serde::{Deserialize, Serialize};

/// Run-wide flags. Every pass reads these; none of them is pass specific.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Ceiling for the fully-loaded wait, in milliseconds.
    pub max_wait_for_load: u64,
    pub disable_storage_reset: bool,
    pub disable_device_emulation: bool,
    pub disable_cpu_throttling: bool,
    pub disable_network_throttling: bool,
    pub blocked_url_patterns: Vec<String>,
    /// Comma separated extra trace categories.
    pub additional_trace_categories: Option<String>,
    pub only_audits: Option<Vec<String>>,
    pub skip_audits: Option<Vec<String>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_wait_for_load: 45_000,
            disable_storage_reset: false,
            disable_device_emulation: false,
            disable_cpu_throttling: false,
            disable_network_throttling: false,
            blocked_url_patterns: Vec::new(),
            additional_trace_categories: None,
            only_audits: None,
            skip_audits: None,
        }
    }
}

impl Settings {
    /// Overlay `other` on top of `self`: booleans are OR-ed, lists are
    /// extended and optional values replaced when present.
    pub fn merge(mut self, other: Settings) -> Settings {
        let defaults = Settings::default();
        if other.max_wait_for_load != defaults.max_wait_for_load {
            self.max_wait_for_load = other.max_wait_for_load;
        }
        self.disable_storage_reset |= other.disable_storage_reset;
        self.disable_device_emulation |= other.disable_device_emulation;
        self.disable_cpu_throttling |= other.disable_cpu_throttling;
        self.disable_network_throttling |= other.disable_network_throttling;
        for pattern in other.blocked_url_patterns {
            if !self.blocked_url_patterns.contains(&pattern) {
                self.blocked_url_patterns.push(pattern);
            }
        }
        if other.additional_trace_categories.is_some() {
            self.additional_trace_categories = other.additional_trace_categories;
        }
        if other.only_audits.is_some() {
            self.only_audits = other.only_audits;
        }
        if other.skip_audits.is_some() {
            self.skip_audits = other.skip_audits;
        }
        self
    }
}
