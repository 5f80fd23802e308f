use async_trait::async_trait;
use network_recorder::NetworkRecords;
use pagegauge_core_types::GatherResult;
use serde_json::{json, Value};

use crate::gatherer::{Gatherer, LoadData, PassContext};

pub const NAME: &str = "Offline";

/// Loads the page with the network emulated offline and keeps the status
/// code the main document came back with.
#[derive(Debug, Default)]
pub struct Offline;

#[async_trait]
impl Gatherer for Offline {
    fn name(&self) -> &str {
        NAME
    }

    async fn before_pass(&self, ctx: &PassContext<'_>) -> GatherResult<Option<Value>> {
        ctx.driver.go_offline().await?;
        Ok(None)
    }

    async fn after_pass(
        &self,
        ctx: &PassContext<'_>,
        load: &LoadData,
    ) -> GatherResult<Option<Value>> {
        let status = document_status(&load.network_records, ctx.url);
        ctx.driver.go_online(ctx.settings, ctx.pass).await?;
        Ok(Some(json!(status)))
    }
}

/// Status code of the document request for `url`, `-1` when it never got
/// a response.
pub fn document_status(records: &NetworkRecords, url: &str) -> i64 {
    records
        .find_by_url_excluding_fragment(url)
        .filter(|record| !record.failed)
        .and_then(|record| record.status_code)
        .map_or(-1, i64::from)
}
