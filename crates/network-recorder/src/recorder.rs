use std::collections::HashMap;

use pagegauge_core_types::Notification;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::events::{
    LoadingFailed, LoadingFinished, NetworkEvent, RequestWillBeSent, ResponsePayload,
    ResponseReceived,
};
use crate::record::{NetworkRecords, NetworkRequest, RecordId, RecordLookup};

/// Threshold crossings and per-request completion signals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderEvent {
    /// Active count went 0 -> 1.
    NetworkBusy,
    /// Active count went 1 -> 0.
    NetworkIdle,
    /// Active count went 2 -> 3.
    Network2Busy,
    /// Active count went 3 -> 2.
    Network2Idle,
    RequestLoaded(RecordId),
}

/// Rebuilds logical requests from `Network.*` notifications and tracks how
/// many are in flight.
pub struct NetworkRecorder {
    arena: Vec<NetworkRequest>,
    by_request_id: HashMap<String, RecordId>,
    finish_order: Vec<RecordId>,
    started: usize,
    finished: usize,
    bus: broadcast::Sender<RecorderEvent>,
}

impl Default for NetworkRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkRecorder {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(256);
        Self {
            arena: Vec::new(),
            by_request_id: HashMap::new(),
            finish_order: Vec::new(),
            started: 0,
            finished: 0,
            bus,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.bus.subscribe()
    }

    pub fn active_request_count(&self) -> usize {
        self.started.saturating_sub(self.finished)
    }

    pub fn is_idle(&self) -> bool {
        self.active_request_count() == 0
    }

    pub fn is_2_idle(&self) -> bool {
        self.active_request_count() <= 2
    }

    pub fn dispatch(&mut self, method: &str, params: &Value) -> Vec<RecorderEvent> {
        match NetworkEvent::parse(method, params) {
            Some(event) => self.apply(event),
            None => Vec::new(),
        }
    }

    pub fn dispatch_notification(&mut self, notification: &Notification) -> Vec<RecorderEvent> {
        self.dispatch(&notification.method, &notification.params)
    }

    pub fn apply(&mut self, event: NetworkEvent) -> Vec<RecorderEvent> {
        let mut emitted = Vec::new();
        match event {
            NetworkEvent::RequestWillBeSent(sent) => self.on_request_will_be_sent(sent, &mut emitted),
            NetworkEvent::RequestServedFromCache(cached) => {
                if let Some(record) = self.open_record_mut(&cached.request_id) {
                    record.from_memory_cache = true;
                }
            }
            NetworkEvent::ResponseReceived(received) => self.on_response_received(received),
            NetworkEvent::DataReceived(data) => {
                if let Some(record) = self.open_record_mut(&data.request_id) {
                    record.resource_size += data.data_length.max(0.0) as u64;
                    if data.encoded_data_length >= 0.0 {
                        record.transfer_size += data.encoded_data_length as u64;
                    }
                }
            }
            NetworkEvent::LoadingFinished(done) => self.on_loading_finished(done, &mut emitted),
            NetworkEvent::LoadingFailed(failed) => self.on_loading_failed(failed, &mut emitted),
            NetworkEvent::ResourceChangedPriority(change) => {
                if let Some(record) = self.open_record_mut(&change.request_id) {
                    record.priority = change.new_priority;
                }
            }
        }

        for event in &emitted {
            let _ = self.bus.send(*event);
        }
        emitted
    }

    /// Live arena record, including unfinished ones.
    pub fn record(&self, id: RecordId) -> Option<&NetworkRequest> {
        self.arena.get(id.0)
    }

    /// Finished records in finish order, with initiators linked.
    pub fn records(&self) -> NetworkRecords {
        let remap: HashMap<RecordId, RecordId> = self
            .finish_order
            .iter()
            .enumerate()
            .map(|(idx, id)| (*id, RecordId(idx)))
            .collect();

        let mut records: Vec<NetworkRequest> = self
            .finish_order
            .iter()
            .filter_map(|id| self.arena.get(id.0))
            .map(|record| {
                let mut record = record.clone();
                record.id = remap.get(&record.id).copied().unwrap_or(record.id);
                record.redirect_source = record.redirect_source.and_then(|id| remap.get(&id).copied());
                record.redirect_destination =
                    record.redirect_destination.and_then(|id| remap.get(&id).copied());
                record.initiator_request = None;
                record
            })
            .collect();

        link_initiators(&mut records);
        NetworkRecords::from_vec(records)
    }

    /// Replays a recorded log through a fresh recorder.
    pub fn records_from_logs(log: &[Notification]) -> NetworkRecords {
        let mut recorder = NetworkRecorder::new();
        for message in log {
            recorder.dispatch_notification(message);
        }
        recorder.records()
    }

    fn open_record_mut(&mut self, request_id: &str) -> Option<&mut NetworkRequest> {
        let id = *self.by_request_id.get(request_id)?;
        self.arena.get_mut(id.0).filter(|record| !record.finished)
    }

    fn on_request_will_be_sent(&mut self, sent: RequestWillBeSent, out: &mut Vec<RecorderEvent>) {
        let previous = self.by_request_id.get(&sent.request_id).copied();

        let redirect_source = match (previous, &sent.redirect_response) {
            (Some(prev), Some(response)) => {
                if let Some(record) = self.arena.get_mut(prev.0) {
                    apply_response(record, response);
                    record.transfer_size = response.encoded_data_length.max(0.0) as u64;
                    record.response_received_time.get_or_insert(sent.timestamp);
                    record.end_time = Some(sent.timestamp);
                }
                self.finish(prev, out);
                Some(prev)
            }
            (Some(prev), None) => {
                debug!(
                    target: "network-recorder",
                    request_id = %sent.request_id,
                    ?prev,
                    "duplicate request start ignored"
                );
                return;
            }
            (None, _) => None,
        };

        let id = RecordId(self.arena.len());
        let mut record =
            NetworkRequest::started(id, sent.request_id.clone(), sent.request.url, sent.timestamp);
        record.method = sent.request.method;
        record.document_url = sent.document_url;
        record.frame_id = sent.frame_id;
        record.initiator = sent.initiator;
        record.resource_type = sent.resource_type;
        if let Some(priority) = sent.request.initial_priority {
            record.priority = priority;
        }
        record.redirect_source = redirect_source;
        self.arena.push(record);

        if let Some(source) = redirect_source {
            if let Some(prev) = self.arena.get_mut(source.0) {
                prev.redirect_destination = Some(id);
            }
        }
        self.by_request_id.insert(sent.request_id, id);

        self.started += 1;
        trace!(target: "network-recorder", active = self.active_request_count(), "request started");
        match self.active_request_count() {
            1 => out.push(RecorderEvent::NetworkBusy),
            3 => out.push(RecorderEvent::Network2Busy),
            _ => {}
        }
    }

    fn on_response_received(&mut self, received: ResponseReceived) {
        if let Some(record) = self.open_record_mut(&received.request_id) {
            apply_response(record, &received.response);
            record.response_received_time = Some(received.timestamp);
            if received.resource_type.is_some() {
                record.resource_type = received.resource_type;
            }
        }
    }

    fn on_loading_finished(&mut self, done: LoadingFinished, out: &mut Vec<RecorderEvent>) {
        let Some(id) = self.by_request_id.get(&done.request_id).copied() else {
            return;
        };
        match self.arena.get_mut(id.0) {
            Some(record) if !record.finished => {
                if done.encoded_data_length >= 0.0 {
                    record.transfer_size = done.encoded_data_length as u64;
                }
                record.end_time = Some(done.timestamp);
            }
            _ => return,
        }
        self.finish(id, out);
    }

    fn on_loading_failed(&mut self, failed: LoadingFailed, out: &mut Vec<RecorderEvent>) {
        let Some(id) = self.by_request_id.get(&failed.request_id).copied() else {
            return;
        };
        match self.arena.get_mut(id.0) {
            Some(record) if !record.finished => {
                record.failed = true;
                record.canceled = failed.canceled;
                record.localized_fail_description = Some(failed.error_text);
                record.end_time = Some(failed.timestamp);
                if failed.resource_type.is_some() {
                    record.resource_type = failed.resource_type;
                }
            }
            _ => return,
        }
        self.finish(id, out);
    }

    fn finish(&mut self, id: RecordId, out: &mut Vec<RecorderEvent>) {
        let Some(record) = self.arena.get_mut(id.0) else {
            return;
        };
        if record.finished {
            return;
        }
        record.finished = true;
        self.finished += 1;
        self.finish_order.push(id);

        out.push(RecorderEvent::RequestLoaded(id));
        match self.active_request_count() {
            0 => out.push(RecorderEvent::NetworkIdle),
            2 => out.push(RecorderEvent::Network2Idle),
            _ => {}
        }
    }
}

impl RecordLookup for NetworkRecorder {
    fn record(&self, id: RecordId) -> Option<&NetworkRequest> {
        self.arena.get(id.0)
    }
}

fn apply_response(record: &mut NetworkRequest, response: &ResponsePayload) {
    if response.status > 0.0 && response.status < f64::from(u16::MAX) {
        record.status_code = Some(response.status as u16);
    }
    record.status_text = response.status_text.clone();
    record.mime_type = response.mime_type.clone();
    record.protocol = response.protocol.clone();
    record.from_disk_cache = response.from_disk_cache;
    record.from_service_worker = response.from_service_worker;
    if response.encoded_data_length >= 0.0 {
        record.transfer_size = response.encoded_data_length as u64;
    }
}

/// Initiator is the redirect source when there is one, else the unique
/// record whose url is the initiator's url (or its stack's top frame url).
fn link_initiators(records: &mut [NetworkRequest]) {
    let mut by_url: HashMap<&str, Vec<RecordId>> = HashMap::new();
    for record in records.iter() {
        by_url.entry(record.url.as_str()).or_default().push(record.id);
    }

    let links: Vec<Option<RecordId>> = records
        .iter()
        .map(|record| {
            if record.redirect_source.is_some() {
                return record.redirect_source;
            }
            let url = record.initiator.as_ref()?.source_url()?;
            match by_url.get(url).map(Vec::as_slice) {
                Some([only]) if *only != record.id => Some(*only),
                _ => None,
            }
        })
        .collect();

    for (record, link) in records.iter_mut().zip(links) {
        record.initiator_request = link;
    }
}

/// Per-navigation state: the url that was asked for and the url currently
/// being followed through redirects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NavigationContext {
    requested_url: String,
    monitored_url: String,
}

impl NavigationContext {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            requested_url: url.clone(),
            monitored_url: url,
        }
    }

    pub fn requested_url(&self) -> &str {
        &self.requested_url
    }

    pub fn final_url(&self) -> &str {
        &self.monitored_url
    }

    /// Advances the monitored url when `record` is the continuation of a
    /// redirect away from it. Returns whether it moved.
    pub fn follow<L: RecordLookup + ?Sized>(&mut self, record: &NetworkRequest, lookup: &L) -> bool {
        let Some(source) = record.redirect_source.and_then(|id| lookup.record(id)) else {
            return false;
        };
        if source.url != self.monitored_url {
            return false;
        }
        debug!(
            target: "network-recorder",
            from = %self.monitored_url,
            to = %record.url,
            "following redirect"
        );
        self.monitored_url = record.url.clone();
        true
    }
}
