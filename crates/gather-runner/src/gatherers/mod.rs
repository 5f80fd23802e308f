//! Built-in gatherers, one per lifecycle pattern.

pub mod console;
pub mod manifest;
pub mod network_summary;
pub mod offline;
pub mod service_worker;
pub mod viewport;

use std::sync::Arc;

use crate::gatherer::Gatherer;

pub use console::ConsoleMessages;
pub use manifest::Manifest;
pub use network_summary::NetworkSummary;
pub use offline::Offline;
pub use service_worker::ServiceWorker;
pub use viewport::ViewportDimensions;

pub type GathererFactory = fn() -> Arc<dyn Gatherer>;

fn create<G: Gatherer + Default + 'static>() -> Arc<dyn Gatherer> {
    Arc::new(G::default())
}

/// Ids and constructors of every built-in gatherer.
pub fn builtin() -> Vec<(&'static str, GathererFactory)> {
    vec![
        (viewport::NAME, create::<ViewportDimensions> as GathererFactory),
        (console::NAME, create::<ConsoleMessages> as GathererFactory),
        (manifest::NAME, create::<Manifest> as GathererFactory),
        (service_worker::NAME, create::<ServiceWorker> as GathererFactory),
        (network_summary::NAME, create::<NetworkSummary> as GathererFactory),
        (offline::NAME, create::<Offline> as GathererFactory),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_ids_match_gatherer_names() {
        for (id, factory) in builtin() {
            assert_eq!(factory().name(), id);
        }
    }
}
