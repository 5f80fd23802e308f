use std::collections::BTreeSet;
use std::sync::Arc;

use pagegauge_core_types::{Audit, PassConfig, Settings, DEFAULT_PASS};
use pagegauge_gather::{Gatherer, GathererFactory, PassDefinition};
use tracing::{info, warn};

use crate::errors::ConfigError;
use crate::model::{ConfigJson, PassJson};
use crate::registry::{AuditFactory, Registry};

/// Artifact that only a traced pass produces.
const TRACES: &str = "traces";

/// Passes and audits ready to run.
#[derive(Clone)]
pub struct ResolvedConfig {
    pub settings: Settings,
    pub passes: Vec<PassDefinition>,
    pub audits: Vec<Arc<dyn Audit>>,
}

impl ResolvedConfig {
    pub fn audit_names(&self) -> Vec<String> {
        self.audits.iter().map(|audit| audit.meta().name).collect()
    }
}

impl std::fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("settings", &self.settings)
            .field("passes", &self.passes)
            .field("audits", &self.audit_names())
            .finish()
    }
}

/// Checks pass names and fills in the default name. Only one pass may go
/// without a `passName`.
pub fn validate_passes(passes: &[PassJson]) -> Result<Vec<PassConfig>, ConfigError> {
    let mut seen = BTreeSet::new();
    let mut configs = Vec::with_capacity(passes.len());
    for (index, pass) in passes.iter().enumerate() {
        let mut config = pass.config.clone();
        let name = match config.pass_name.as_deref() {
            Some(name) if name.trim().is_empty() => return Err(ConfigError::MissingPassName(index)),
            Some(name) => name.to_string(),
            None if seen.contains(DEFAULT_PASS) => return Err(ConfigError::MissingPassName(index)),
            None => DEFAULT_PASS.to_string(),
        };
        if !seen.insert(name.clone()) {
            return Err(ConfigError::DuplicatePassName(name));
        }
        config.pass_name = Some(name);
        configs.push(config);
    }
    Ok(configs)
}

/// Resolves ids through the registries, applies `onlyAudits`/`skipAudits`
/// and prunes what no selected audit needs.
pub fn resolve(
    config: &ConfigJson,
    gatherers: &Registry<GathererFactory>,
    audits: &Registry<AuditFactory>,
) -> Result<ResolvedConfig, ConfigError> {
    let pass_configs = validate_passes(&config.passes)?;
    let selected = select_audits(&config.audits, &config.settings);

    let audits: Vec<Arc<dyn Audit>> = selected
        .iter()
        .map(|id| {
            audits
                .resolve(id)
                .map(|factory| factory())
                .ok_or_else(|| ConfigError::UnknownAudit(id.clone()))
        })
        .collect::<Result<_, _>>()?;

    let required: BTreeSet<String> = audits
        .iter()
        .flat_map(|audit| audit.meta().required_artifacts)
        .collect();

    let mut passes = Vec::new();
    for (pass, mut pass_config) in config.passes.iter().zip(pass_configs) {
        let mut instances: Vec<Arc<dyn Gatherer>> = Vec::new();
        for id in &pass.gatherers {
            let factory = gatherers
                .resolve(id)
                .ok_or_else(|| ConfigError::UnknownGatherer(id.clone()))?;
            if required.contains(id) {
                instances.push(factory());
            } else {
                warn!(target: "config", gatherer = %id, "{id} gatherer requested, however no audit requires it.");
            }
        }

        if pass_config.record_trace && !required.contains(TRACES) {
            warn!(
                target: "config",
                pass = pass_config.pass_name(),
                "Trace not requested by an audit, dropping trace in {}",
                pass_config.pass_name()
            );
            pass_config.record_trace = false;
        }

        let keep = pass_config.record_trace
            || !instances.is_empty()
            || pass_config.pass_name() == DEFAULT_PASS;
        if keep {
            passes.push(PassDefinition::new(pass_config, instances));
        } else {
            info!(target: "config", pass = pass_config.pass_name(), "pass has nothing left to gather, skipping");
        }
    }

    Ok(ResolvedConfig {
        settings: config.settings.clone(),
        passes,
        audits,
    })
}

fn select_audits(configured: &[String], settings: &Settings) -> Vec<String> {
    let mut selected: Vec<String> = match &settings.only_audits {
        Some(only) => {
            for id in only.iter().filter(|id| !configured.contains(id)) {
                warn!(target: "config", audit = %id, "unrecognized audit in onlyAudits");
            }
            configured
                .iter()
                .filter(|id| only.contains(id))
                .cloned()
                .collect()
        }
        None => configured.to_vec(),
    };
    if let Some(skip) = &settings.skip_audits {
        for id in skip.iter().filter(|id| !configured.contains(id)) {
            warn!(target: "config", audit = %id, "unrecognized audit in skipAudits");
        }
        selected.retain(|id| !skip.contains(id));
    }
    selected
}
