use std::collections::BTreeMap;

use async_trait::async_trait;
use network_recorder::NetworkRecords;
use pagegauge_core_types::GatherResult;
use serde_json::{json, Value};

use crate::gatherer::{Gatherer, LoadData, PassContext};

pub const NAME: &str = "NetworkSummary";

/// Request counts and bytes for the pass, straight from the network records.
#[derive(Debug, Default)]
pub struct NetworkSummary;

#[async_trait]
impl Gatherer for NetworkSummary {
    fn name(&self) -> &str {
        NAME
    }

    async fn after_pass(
        &self,
        _ctx: &PassContext<'_>,
        load: &LoadData,
    ) -> GatherResult<Option<Value>> {
        Ok(Some(summarize(&load.network_records)))
    }
}

pub fn summarize(records: &NetworkRecords) -> Value {
    let mut by_type: BTreeMap<String, (usize, u64)> = BTreeMap::new();
    let mut failed = Vec::new();
    let mut transfer_size = 0;

    for record in records {
        transfer_size += record.transfer_size;
        if record.failed {
            failed.push(json!({
                "url": record.url,
                "reason": record.localized_fail_description,
            }));
        }
        let kind = record
            .resource_type
            .and_then(|kind| serde_json::to_value(kind).ok())
            .and_then(|kind| kind.as_str().map(str::to_string))
            .unwrap_or_else(|| "Other".to_string());
        let entry = by_type.entry(kind).or_default();
        entry.0 += 1;
        entry.1 += record.transfer_size;
    }

    let by_type: serde_json::Map<String, Value> = by_type
        .into_iter()
        .map(|(kind, (count, bytes))| (kind, json!({ "count": count, "transferSize": bytes })))
        .collect();
    json!({
        "requestCount": records.len(),
        "transferSize": transfer_size,
        "failedRequests": failed,
        "byResourceType": by_type,
    })
}
