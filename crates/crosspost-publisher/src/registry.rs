//! Registry of platform adapters.

use std::collections::HashMap;
use std::sync::Arc;

use crosspost_model::Platform;

use crate::PlatformPublisher;

/// Maps each supported platform to its adapter.
///
/// Built once at startup and shared immutably with the execution engine.
#[derive(Default)]
pub struct PublisherRegistry {
    publishers: HashMap<Platform, Arc<dyn PlatformPublisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under the platform it reports. A later
    /// registration for the same platform replaces the earlier one.
    pub fn register(&mut self, publisher: Arc<dyn PlatformPublisher>) {
        self.publishers.insert(publisher.platform(), publisher);
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn PlatformPublisher>> {
        self.publishers.get(&platform).cloned()
    }

    pub fn platforms(&self) -> impl Iterator<Item = Platform> + '_ {
        self.publishers.keys().copied()
    }
}
