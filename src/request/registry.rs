use std::collections::HashMap;

use log::{debug, warn};

use super::coordinator::Coordinator;
use crate::core::types::{CoordinatorId, TaskId};

/// Snapshot of the live request state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Coordinators not yet discarded.
    pub coordinator_count: usize,
    /// Tasks owned by those coordinators, finished ones included.
    pub task_count: usize,
    /// Tasks waiting for admission.
    pub waiting_count: usize,
    /// Tasks admitted and not yet finished.
    pub executing_count: usize,
}

/// Live coordinators, indexed by coordinator id and by task id.
///
/// Owned by the event loop. A coordinator and its task index entries are
/// removed together, after which events naming them are ignored.
#[derive(Default)]
pub struct CoordinatorRegistry {
    coordinators: HashMap<CoordinatorId, Coordinator>,
    task_index: HashMap<TaskId, CoordinatorId>,
}

impl CoordinatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, coordinator: Coordinator) {
        let id = coordinator.id();
        for task_id in coordinator.active_task_ids() {
            self.task_index.insert(task_id, id);
        }
        debug!(
            "Registered coordinator {id} with {} tasks",
            coordinator.task_count()
        );
        if let Some(previous) = self.coordinators.insert(id, coordinator) {
            warn!("Coordinator {} registered twice, replacing", previous.id());
        }
    }

    pub fn get_mut(&mut self, coordinator_id: CoordinatorId) -> Option<&mut Coordinator> {
        self.coordinators.get_mut(&coordinator_id)
    }

    /// The coordinator owning `task_id`, provided it is `coordinator_id`.
    pub fn owner_mut(&mut self, coordinator_id: CoordinatorId, task_id: TaskId) -> Option<&mut Coordinator> {
        match self.task_index.get(&task_id) {
            Some(owner) if *owner == coordinator_id => self.coordinators.get_mut(&coordinator_id),
            _ => None,
        }
    }

    pub fn coordinator_of(&self, task_id: TaskId) -> Option<CoordinatorId> {
        self.task_index.get(&task_id).copied()
    }

    pub fn remove(&mut self, coordinator_id: CoordinatorId) -> Option<Coordinator> {
        let coordinator = self.coordinators.remove(&coordinator_id)?;
        self.task_index.retain(|_, owner| *owner != coordinator_id);
        debug!("Removed coordinator {coordinator_id}");
        Some(coordinator)
    }

    /// Drop every coordinator without firing any callback.
    pub fn clear(&mut self) {
        self.coordinators.clear();
        self.task_index.clear();
    }

    pub fn len(&self) -> usize {
        self.coordinators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinators.is_empty()
    }

    pub fn task_count(&self) -> usize {
        self.task_index.len()
    }
}
