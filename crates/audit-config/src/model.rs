use pagegauge_core_types::{PassConfig, Settings};
use serde::{Deserialize, Serialize};

/// Target accepted in `extends` to layer a config over the built-in one.
pub const EXTENDS_DEFAULT: &str = "pagegauge:default";

/// A config document as written by users, ids not yet resolved.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    pub settings: Settings,
    pub passes: Vec<PassJson>,
    pub audits: Vec<String>,
}

/// One pass: its load knobs plus the gatherer ids it runs, in order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassJson {
    #[serde(flatten)]
    pub config: PassConfig,
    #[serde(default)]
    pub gatherers: Vec<String>,
}

impl ConfigJson {
    /// Layers `self` over `base`. Settings merge, audits and gatherers are
    /// unioned, and a pass whose name matches a base pass replaces that
    /// pass's options while keeping its gatherers first.
    pub fn merged_over(self, base: ConfigJson) -> ConfigJson {
        let mut merged = base;
        merged.extends = None;
        merged.settings = merged.settings.merge(self.settings);

        for pass in self.passes {
            let existing = merged
                .passes
                .iter_mut()
                .find(|candidate| candidate.config.pass_name() == pass.config.pass_name());
            match existing {
                Some(existing) => {
                    existing.config = pass.config;
                    for gatherer in pass.gatherers {
                        if !existing.gatherers.contains(&gatherer) {
                            existing.gatherers.push(gatherer);
                        }
                    }
                }
                None => merged.passes.push(pass),
            }
        }

        for audit in self.audits {
            if !merged.audits.contains(&audit) {
                merged.audits.push(audit);
            }
        }
        merged
    }
}
