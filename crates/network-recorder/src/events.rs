//! Typed view of the `Network.*` notifications the recorder understands.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Fetch priority as reported by the browser.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    TextTrack,
    #[serde(rename = "XHR")]
    Xhr,
    Fetch,
    EventSource,
    WebSocket,
    Manifest,
    #[serde(other)]
    Other,
}

impl ResourceType {
    /// XHR, Fetch and EventSource share one category.
    pub fn is_xhr_like(self) -> bool {
        matches!(self, ResourceType::Xhr | ResourceType::Fetch | ResourceType::EventSource)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub function_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTrace {
    #[serde(default)]
    pub call_frames: Vec<CallFrame>,
    #[serde(default)]
    pub parent: Option<Box<StackTrace>>,
}

impl StackTrace {
    /// First frame with a url, walking into async parents.
    pub fn top_url(&self) -> Option<&str> {
        self.call_frames
            .iter()
            .map(|frame| frame.url.as_str())
            .find(|url| !url.is_empty())
            .or_else(|| self.parent.as_deref().and_then(StackTrace::top_url))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Initiator {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<StackTrace>,
}

impl Initiator {
    pub fn source_url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .filter(|url| !url.is_empty())
            .or_else(|| self.stack.as_ref().and_then(StackTrace::top_url))
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub initial_priority: Option<Priority>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub status: f64,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub from_disk_cache: bool,
    #[serde(default)]
    pub from_service_worker: bool,
    #[serde(default)]
    pub encoded_data_length: f64,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSent {
    pub request_id: String,
    #[serde(rename = "documentURL", default)]
    pub document_url: Option<String>,
    #[serde(default)]
    pub frame_id: Option<String>,
    pub request: RequestPayload,
    pub timestamp: f64,
    #[serde(default)]
    pub initiator: Option<Initiator>,
    #[serde(default)]
    pub redirect_response: Option<ResponsePayload>,
    #[serde(rename = "type", default)]
    pub resource_type: Option<ResourceType>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestServedFromCache {
    pub request_id: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceived {
    pub request_id: String,
    pub timestamp: f64,
    #[serde(rename = "type", default)]
    pub resource_type: Option<ResourceType>,
    pub response: ResponsePayload,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataReceived {
    pub request_id: String,
    #[serde(default)]
    pub data_length: f64,
    #[serde(default)]
    pub encoded_data_length: f64,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFinished {
    pub request_id: String,
    pub timestamp: f64,
    #[serde(default = "unknown_length")]
    pub encoded_data_length: f64,
}

fn unknown_length() -> f64 {
    -1.0
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailed {
    pub request_id: String,
    pub timestamp: f64,
    #[serde(default)]
    pub error_text: String,
    #[serde(default)]
    pub canceled: bool,
    #[serde(rename = "type", default)]
    pub resource_type: Option<ResourceType>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceChangedPriority {
    pub request_id: String,
    pub new_priority: Priority,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NetworkEvent {
    RequestWillBeSent(RequestWillBeSent),
    RequestServedFromCache(RequestServedFromCache),
    ResponseReceived(ResponseReceived),
    DataReceived(DataReceived),
    LoadingFinished(LoadingFinished),
    LoadingFailed(LoadingFailed),
    ResourceChangedPriority(ResourceChangedPriority),
}

impl NetworkEvent {
    /// `None` for methods outside the recorder's set, or malformed params.
    pub fn parse(method: &str, params: &Value) -> Option<NetworkEvent> {
        match method {
            "Network.requestWillBeSent" => decode(method, params).map(Self::RequestWillBeSent),
            "Network.requestServedFromCache" => {
                decode(method, params).map(Self::RequestServedFromCache)
            }
            "Network.responseReceived" => decode(method, params).map(Self::ResponseReceived),
            "Network.dataReceived" => decode(method, params).map(Self::DataReceived),
            "Network.loadingFinished" => decode(method, params).map(Self::LoadingFinished),
            "Network.loadingFailed" => decode(method, params).map(Self::LoadingFailed),
            "Network.resourceChangedPriority" => {
                decode(method, params).map(Self::ResourceChangedPriority)
            }
            _ => None,
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            NetworkEvent::RequestWillBeSent(e) => &e.request_id,
            NetworkEvent::RequestServedFromCache(e) => &e.request_id,
            NetworkEvent::ResponseReceived(e) => &e.request_id,
            NetworkEvent::DataReceived(e) => &e.request_id,
            NetworkEvent::LoadingFinished(e) => &e.request_id,
            NetworkEvent::LoadingFailed(e) => &e.request_id,
            NetworkEvent::ResourceChangedPriority(e) => &e.request_id,
        }
    }
}

fn decode<T: DeserializeOwned>(method: &str, params: &Value) -> Option<T> {
    match T::deserialize(params) {
        Ok(event) => Some(event),
        Err(err) => {
            debug!(target: "network-recorder", method, %err, "malformed network event");
            None
        }
    }
}
