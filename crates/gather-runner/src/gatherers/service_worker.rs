use async_trait::async_trait;
use pagegauge_core_types::GatherResult;
use serde_json::{json, Value};

use crate::gatherer::{Gatherer, PassContext};

pub const NAME: &str = "ServiceWorker";

/// Service worker versions and registrations known before the page loads.
#[derive(Debug, Default)]
pub struct ServiceWorker;

#[async_trait]
impl Gatherer for ServiceWorker {
    fn name(&self) -> &str {
        NAME
    }

    async fn before_pass(&self, ctx: &PassContext<'_>) -> GatherResult<Option<Value>> {
        let versions = ctx.driver.get_service_worker_versions().await?;
        let registrations = ctx.driver.get_service_worker_registrations().await?;
        Ok(Some(json!({
            "versions": versions.get("versions").cloned().unwrap_or_else(|| json!([])),
            "registrations": registrations
                .get("registrations")
                .cloned()
                .unwrap_or_else(|| json!([])),
        })))
    }
}
