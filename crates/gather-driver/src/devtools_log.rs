use pagegauge_core_types::Notification;
use regex::Regex;

/// Filtered capture of protocol notifications for one pass.
#[derive(Debug, Default)]
pub struct DevtoolsLog {
    messages: Vec<Notification>,
    recording: bool,
    filter: Option<Regex>,
}

impl DevtoolsLog {
    pub fn new(filter: Option<Regex>) -> Self {
        Self {
            messages: Vec::new(),
            recording: false,
            filter,
        }
    }

    pub fn messages(&self) -> &[Notification] {
        &self.messages
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn reset(&mut self) {
        self.messages.clear();
    }

    pub fn begin_recording(&mut self) {
        self.recording = true;
    }

    pub fn end_recording(&mut self) {
        self.recording = false;
    }

    /// Appends when recording and the method passes the filter.
    pub fn record(&mut self, message: &Notification) {
        if !self.recording {
            return;
        }
        if let Some(filter) = &self.filter {
            if !filter.is_match(&message.method) {
                return;
            }
        }
        self.messages.push(message.clone());
    }

    pub fn take_messages(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.messages)
    }
}
