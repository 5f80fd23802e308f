use std::sync::Arc;

use async_trait::async_trait;
use network_recorder::NetworkRecords;
use pagegauge_core_types::{GatherResult, Notification, PassConfig, Settings, Trace};
use pagegauge_driver::Driver;
use serde_json::Value;

/// What a gatherer sees during one phase of one pass.
pub struct PassContext<'a> {
    pub driver: &'a Driver,
    /// Url the pass is loading; after navigation, the post-redirect url.
    pub url: &'a str,
    pub settings: &'a Settings,
    pub pass: &'a PassConfig,
}

/// Data captured during the pass, handed to every `after_pass`.
#[derive(Clone, Debug, Default)]
pub struct LoadData {
    pub network_records: NetworkRecords,
    pub devtools_log: Vec<Notification>,
    pub trace: Option<Trace>,
}

/// One named artifact producer.
///
/// Each phase returns `Ok(None)` when it contributes nothing; the last
/// phase that returns `Some` provides the artifact. Errors marked
/// recoverable become the artifact; any other error aborts the run.
#[async_trait]
pub trait Gatherer: Send + Sync {
    fn name(&self) -> &str;

    async fn before_pass(&self, _ctx: &PassContext<'_>) -> GatherResult<Option<Value>> {
        Ok(None)
    }

    async fn pass(&self, _ctx: &PassContext<'_>) -> GatherResult<Option<Value>> {
        Ok(None)
    }

    async fn after_pass(
        &self,
        _ctx: &PassContext<'_>,
        _load: &LoadData,
    ) -> GatherResult<Option<Value>> {
        Ok(None)
    }
}

/// A pass with its resolved gatherer instances, in run order.
#[derive(Clone)]
pub struct PassDefinition {
    pub config: PassConfig,
    pub gatherers: Vec<Arc<dyn Gatherer>>,
}

impl PassDefinition {
    pub fn new(config: PassConfig, gatherers: Vec<Arc<dyn Gatherer>>) -> Self {
        Self { config, gatherers }
    }

    pub fn gatherer_names(&self) -> Vec<&str> {
        self.gatherers.iter().map(|gatherer| gatherer.name()).collect()
    }
}

impl std::fmt::Debug for PassDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassDefinition")
            .field("config", &self.config)
            .field("gatherers", &self.gatherer_names())
            .finish()
    }
}
