//! Critical request chains: the initiator tree of render-blocking-ish requests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::events::Priority;
use crate::record::{NetworkRecords, NetworkRequest, RecordId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainRequest {
    pub request_id: String,
    pub url: String,
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub response_received_time: Option<f64>,
    pub transfer_size: u64,
}

impl From<&NetworkRequest> for ChainRequest {
    fn from(record: &NetworkRequest) -> Self {
        Self {
            request_id: record.request_id.clone(),
            url: record.url.clone(),
            start_time: record.start_time,
            end_time: record.end_time,
            response_received_time: record.response_received_time,
            transfer_size: record.transfer_size,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainNode {
    pub request: ChainRequest,
    pub children: CriticalChains,
}

pub type CriticalChains = BTreeMap<RecordId, ChainNode>;

pub fn is_critical(record: &NetworkRequest) -> bool {
    let excluded_type = record
        .resource_type
        .is_some_and(|ty| ty == crate::events::ResourceType::Image || ty.is_xhr_like());
    if excluded_type || record.mime_is_image() {
        return false;
    }
    matches!(
        record.priority,
        Priority::VeryHigh | Priority::High | Priority::Medium
    )
}

/// Nests every critical request under its chain of critical initiators. A
/// chain with a non-critical or repeated ancestor is dropped.
pub fn critical_request_chains(records: &NetworkRecords) -> CriticalChains {
    let mut tree = CriticalChains::new();

    for request in records.iter().filter(|record| is_critical(record)) {
        let mut ancestors: Vec<RecordId> = Vec::new();
        let mut cursor = request.initiator_request.and_then(|id| records.get(id));
        let mut broken = false;
        while let Some(ancestor) = cursor {
            if !is_critical(ancestor) || ancestors.contains(&ancestor.id) || ancestor.id == request.id {
                broken = true;
                break;
            }
            ancestors.push(ancestor.id);
            cursor = ancestor.initiator_request.and_then(|id| records.get(id));
        }
        if broken {
            continue;
        }

        let mut node = &mut tree;
        while let Some(ancestor_id) = ancestors.pop() {
            let Some(ancestor) = records.get(ancestor_id) else {
                break;
            };
            node = &mut node
                .entry(ancestor_id)
                .or_insert_with(|| ChainNode {
                    request: ChainRequest::from(ancestor),
                    children: CriticalChains::new(),
                })
                .children;
        }

        node.entry(request.id).or_insert_with(|| ChainNode {
            request: ChainRequest::from(request),
            children: CriticalChains::new(),
        });
    }

    tree
}

/// Number of requests in the longest root-to-leaf path.
pub fn longest_chain_length(chains: &CriticalChains) -> usize {
    chains
        .values()
        .map(|node| 1 + longest_chain_length(&node.children))
        .max()
        .unwrap_or(0)
}
