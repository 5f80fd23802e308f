use async_trait::async_trait;
use pagegauge_core_types::{GatherError, GatherResult, Notification};
use pagegauge_driver::WaitScope;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::gatherer::{Gatherer, LoadData, PassContext};

pub const NAME: &str = "ConsoleMessages";

const ENTRY_ADDED: &str = "Log.entryAdded";

struct Collector {
    scope: WaitScope,
    task: JoinHandle<Vec<Value>>,
}

/// Console and browser log entries written while the page loads.
///
/// Starts listening in `before_pass` and hands back everything heard in
/// `after_pass`.
#[derive(Default)]
pub struct ConsoleMessages {
    collector: Mutex<Option<Collector>>,
}

#[async_trait]
impl Gatherer for ConsoleMessages {
    fn name(&self) -> &str {
        NAME
    }

    async fn before_pass(&self, ctx: &PassContext<'_>) -> GatherResult<Option<Value>> {
        let scope = WaitScope::new();
        let events = ctx.driver.subscribe();
        let task = tokio::spawn(collect(events, scope.clone()));
        if let Some(stale) = self.collector.lock().replace(Collector { scope, task }) {
            stale.scope.cancel();
            stale.task.abort();
        }
        ctx.driver.send_command("Log.enable", json!({})).await?;
        Ok(None)
    }

    async fn after_pass(
        &self,
        ctx: &PassContext<'_>,
        _load: &LoadData,
    ) -> GatherResult<Option<Value>> {
        let collector = self.collector.lock().take();
        let Some(collector) = collector else {
            return Err(GatherError::gatherer("ConsoleMessages was not listening"));
        };
        collector.scope.cancel();
        let entries = collector
            .task
            .await
            .map_err(|err| GatherError::internal(format!("console collector failed: {err}")))?;
        ctx.driver.send_command("Log.disable", json!({})).await?;
        Ok(Some(Value::Array(entries)))
    }
}

async fn collect(mut events: broadcast::Receiver<Notification>, scope: WaitScope) -> Vec<Value> {
    let mut entries = Vec::new();
    loop {
        let received = tokio::select! {
            biased;
            received = events.recv() => received,
            _ = scope.cancelled() => break,
        };
        match received {
            Ok(notification) => push_entry(&mut entries, notification),
            Err(RecvError::Lagged(skipped)) => {
                warn!(target: "gather-runner", skipped, "console listener lagged");
            }
            Err(RecvError::Closed) => return entries,
        }
    }
    loop {
        match events.try_recv() {
            Ok(notification) => push_entry(&mut entries, notification),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    entries
}

fn push_entry(entries: &mut Vec<Value>, notification: Notification) {
    if notification.method != ENTRY_ADDED {
        return;
    }
    if let Some(entry) = notification.params.get("entry") {
        entries.push(entry.clone());
    }
}
