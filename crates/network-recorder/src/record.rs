use serde::{Deserialize, Serialize};
use url::Url;

use crate::events::{Initiator, Priority, ResourceType};

/// Structural handle of a record inside one recorder or one record set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub usize);

/// One logical HTTP exchange rebuilt from protocol events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRequest {
    pub id: RecordId,
    pub request_id: String,
    pub url: String,
    pub document_url: Option<String>,
    pub frame_id: Option<String>,
    pub method: String,
    /// Seconds on the protocol's monotonic clock.
    pub start_time: f64,
    pub response_received_time: Option<f64>,
    pub end_time: Option<f64>,
    pub status_code: Option<u16>,
    pub status_text: String,
    pub mime_type: String,
    pub protocol: Option<String>,
    pub failed: bool,
    pub canceled: bool,
    pub localized_fail_description: Option<String>,
    pub transfer_size: u64,
    pub resource_size: u64,
    pub from_disk_cache: bool,
    pub from_memory_cache: bool,
    pub from_service_worker: bool,
    pub resource_type: Option<ResourceType>,
    pub priority: Priority,
    pub initiator: Option<Initiator>,
    pub initiator_request: Option<RecordId>,
    pub redirect_source: Option<RecordId>,
    pub redirect_destination: Option<RecordId>,
    pub finished: bool,
}

impl NetworkRequest {
    pub(crate) fn started(id: RecordId, request_id: String, url: String, start_time: f64) -> Self {
        Self {
            id,
            request_id,
            url,
            document_url: None,
            frame_id: None,
            method: "GET".to_string(),
            start_time,
            response_received_time: None,
            end_time: None,
            status_code: None,
            status_text: String::new(),
            mime_type: String::new(),
            protocol: None,
            failed: false,
            canceled: false,
            localized_fail_description: None,
            transfer_size: 0,
            resource_size: 0,
            from_disk_cache: false,
            from_memory_cache: false,
            from_service_worker: false,
            resource_type: None,
            priority: Priority::Low,
            initiator: None,
            initiator_request: None,
            redirect_source: None,
            redirect_destination: None,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_redirect(&self) -> bool {
        self.redirect_destination.is_some()
    }

    pub fn mime_is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Resolves structural ids back to records.
pub trait RecordLookup {
    fn record(&self, id: RecordId) -> Option<&NetworkRequest>;
}

/// Finished records in the order their finish events arrived. Every record's
/// `id` is its index in this set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkRecords {
    records: Vec<NetworkRequest>,
}

impl NetworkRecords {
    pub(crate) fn from_vec(records: Vec<NetworkRequest>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NetworkRequest> {
        self.records.iter()
    }

    pub fn as_slice(&self) -> &[NetworkRequest] {
        &self.records
    }

    pub fn get(&self, id: RecordId) -> Option<&NetworkRequest> {
        self.records.get(id.0)
    }

    /// First record whose url equals `url` once fragments are ignored.
    pub fn find_by_url_excluding_fragment(&self, url: &str) -> Option<&NetworkRequest> {
        self.records
            .iter()
            .find(|record| urls_equal_excluding_fragment(&record.url, url))
    }

    /// Redirect hops leading to `id`, oldest first, ending with `id` itself.
    pub fn redirect_chain(&self, id: RecordId) -> Vec<&NetworkRequest> {
        let mut chain = Vec::new();
        let mut cursor = self.get(id);
        while let Some(record) = cursor {
            if chain.iter().any(|seen: &&NetworkRequest| seen.id == record.id) {
                break;
            }
            chain.push(record);
            cursor = record.redirect_source.and_then(|src| self.get(src));
        }
        chain.reverse();
        chain
    }
}

impl RecordLookup for NetworkRecords {
    fn record(&self, id: RecordId) -> Option<&NetworkRequest> {
        self.get(id)
    }
}

impl<'a> IntoIterator for &'a NetworkRecords {
    type Item = &'a NetworkRequest;
    type IntoIter = std::slice::Iter<'a, NetworkRequest>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Compares two urls with their fragments stripped. Unparseable input never matches.
pub fn urls_equal_excluding_fragment(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(mut a), Ok(mut b)) => {
            a.set_fragment(None);
            b.set_fragment(None);
            a == b
        }
        _ => false,
    }
}
