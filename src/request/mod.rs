//! Request orchestration: coordinators, tasks, admission and the event loop.

use std::sync::Arc;

use crate::{
    cache::InMemoryResultCache,
    config::Config,
    cooldown::CooldownList,
    core::traits::{AlwaysAllowed, CooldownTracker, DeviceStateProvider, LookupBackend, ResultCache},
};

pub mod coordinator;
pub mod dispatcher;
pub mod event;
pub mod manager;
pub mod registry;
pub mod response;
pub mod task;
mod timer;


pub use event::{LookupListener, TaskUpdate};
pub use manager::RequestManager;
pub use registry::RegistryStats;

/// External collaborators of the engine.
#[derive(Clone)]
pub struct Services {
    pub backend: Arc<dyn LookupBackend>,
    pub cache: Arc<dyn ResultCache>,
    pub cooldown: Arc<dyn CooldownTracker>,
    pub device_state: Arc<dyn DeviceStateProvider>,
}

impl Services {
    pub fn new(
        backend: Arc<dyn LookupBackend>,
        cache: Arc<dyn ResultCache>,
        cooldown: Arc<dyn CooldownTracker>,
        device_state: Arc<dyn DeviceStateProvider>,
    ) -> Self {
        Self {
            backend,
            cache,
            cooldown,
            device_state,
        }
    }

    /// In-memory cache and cooldown list sized from `config`, and a device
    /// state that never forbids requests.
    pub fn in_memory(config: &Config, backend: Arc<dyn LookupBackend>) -> Self {
        Self::new(
            backend,
            Arc::new(InMemoryResultCache::from(&config.cache)),
            Arc::new(CooldownList::from(&config.cooldown)),
            Arc::new(AlwaysAllowed),
        )
    }
}
