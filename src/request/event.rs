//! Events of the serialized request queue
//!
//! Every asynchronous input (backend callbacks, timers, dispatcher
//! admissions) is turned into one of these records and handed to the
//! manager's event loop. Only that loop mutates coordinator, task and
//! dispatcher state.

use std::fmt;

use log::debug;
use tokio::sync::{mpsc::UnboundedSender, oneshot};

use super::{coordinator::Coordinator, registry::RegistryStats};
use crate::core::types::{CapabilityRecord, CommandError, CoordinatorId, ErrorCode, TaskId};

/// Update of one task, applied by its coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskUpdate {
    /// The task could not start.
    Error(ErrorCode),
    /// The backend rejected the request before any network activity.
    CommandError(CommandError),
    /// The backend received a network response.
    NetworkResponse { sip_code: u16, reason: String },
    /// New capability data arrived.
    CapabilitiesUpdated(Vec<CapabilityRecord>),
    /// Some targets are no longer capable.
    ResourceTerminated(Vec<CapabilityRecord>),
    /// Records served locally were added to the task response.
    CachedCapabilitiesUpdated,
    /// The backend ended the lookup.
    Terminated { reason: String, retry_after_ms: u64 },
    /// Every target was answered locally.
    NoNetworkNeeded,
    /// No terminal response arrived before the deadline.
    TimedOut,
}

impl TaskUpdate {
    pub fn name(&self) -> &'static str {
        match self {
            TaskUpdate::Error(_) => "ERROR",
            TaskUpdate::CommandError(_) => "COMMAND_ERROR",
            TaskUpdate::NetworkResponse { .. } => "NETWORK_RESPONSE",
            TaskUpdate::CapabilitiesUpdated(_) => "CAPABILITY_UPDATE",
            TaskUpdate::ResourceTerminated(_) => "RESOURCE_TERMINATED",
            TaskUpdate::CachedCapabilitiesUpdated => "CACHED_CAPABILITY_UPDATE",
            TaskUpdate::Terminated { .. } => "TERMINATED",
            TaskUpdate::NoNetworkNeeded => "NO_NEED_REQUEST_FROM_NETWORK",
            TaskUpdate::TimedOut => "TIMEOUT",
        }
    }
}

pub(crate) enum ManagerEvent {
    /// Register a freshly built coordinator and submit its tasks.
    Submit(Box<Coordinator>),
    /// The dispatcher released this task; begin the backend call.
    Execute {
        coordinator_id: CoordinatorId,
        task_id: TaskId,
    },
    Updated {
        coordinator_id: CoordinatorId,
        task_id: TaskId,
        update: TaskUpdate,
    },
    Timeout {
        coordinator_id: CoordinatorId,
        task_id: TaskId,
    },
    TaskFinished {
        coordinator_id: CoordinatorId,
        task_id: TaskId,
    },
    CoordinatorFinished {
        coordinator_id: CoordinatorId,
    },
    Stats {
        reply: oneshot::Sender<RegistryStats>,
    },
    Destroy {
        done: oneshot::Sender<()>,
    },
}

impl fmt::Debug for ManagerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerEvent::Submit(coordinator) => {
                write!(f, "SUBMIT(coordinator={})", coordinator.id())
            }
            ManagerEvent::Execute {
                coordinator_id,
                task_id,
            } => write!(f, "EXECUTE_REQUEST(coordinator={coordinator_id}, task={task_id})"),
            ManagerEvent::Updated {
                coordinator_id,
                task_id,
                update,
            } => write!(
                f,
                "REQUEST_UPDATE(coordinator={coordinator_id}, task={task_id}, {})",
                update.name()
            ),
            ManagerEvent::Timeout {
                coordinator_id,
                task_id,
            } => write!(f, "REQUEST_TIMEOUT(coordinator={coordinator_id}, task={task_id})"),
            ManagerEvent::TaskFinished {
                coordinator_id,
                task_id,
            } => write!(f, "REQUEST_FINISHED(coordinator={coordinator_id}, task={task_id})"),
            ManagerEvent::CoordinatorFinished { coordinator_id } => {
                write!(f, "REMOVE_COORDINATOR(coordinator={coordinator_id})")
            }
            ManagerEvent::Stats { .. } => write!(f, "STATS"),
            ManagerEvent::Destroy { .. } => write!(f, "DESTROY"),
        }
    }
}

/// Cloneable handle onto the manager's event queue.
#[derive(Clone)]
pub(crate) struct EventSender {
    tx: UnboundedSender<ManagerEvent>,
}

impl EventSender {
    pub(crate) fn new(tx: UnboundedSender<ManagerEvent>) -> Self {
        Self { tx }
    }

    /// Post an event. Events posted after the loop stopped are dropped.
    pub(crate) fn post(&self, event: ManagerEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!("Event loop stopped, dropping {:?}", e.0);
        }
    }

    pub(crate) fn post_update(&self, coordinator_id: CoordinatorId, task_id: TaskId, update: TaskUpdate) {
        self.post(ManagerEvent::Updated {
            coordinator_id,
            task_id,
            update,
        });
    }
}

/// Receives the backend's callbacks for one task.
///
/// It may be cloned and moved to any thread. Each call becomes an event on
/// the manager's queue. Callbacks arriving after the task finished, or after
/// the manager was destroyed, are ignored.
#[derive(Clone)]
pub struct LookupListener {
    coordinator_id: CoordinatorId,
    task_id: TaskId,
    events: EventSender,
}

impl LookupListener {
    pub(crate) fn new(coordinator_id: CoordinatorId, task_id: TaskId, events: EventSender) -> Self {
        Self {
            coordinator_id,
            task_id,
            events,
        }
    }

    pub fn coordinator_id(&self) -> CoordinatorId {
        self.coordinator_id
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn on_command_error(&self, error: CommandError) {
        self.post(TaskUpdate::CommandError(error));
    }

    pub fn on_network_response(&self, sip_code: u16, reason: impl Into<String>) {
        self.post(TaskUpdate::NetworkResponse {
            sip_code,
            reason: reason.into(),
        });
    }

    pub fn on_capabilities_updated(&self, records: Vec<CapabilityRecord>) {
        self.post(TaskUpdate::CapabilitiesUpdated(records));
    }

    pub fn on_resource_terminated(&self, records: Vec<CapabilityRecord>) {
        self.post(TaskUpdate::ResourceTerminated(records));
    }

    pub fn on_terminated(&self, reason: impl Into<String>, retry_after_ms: u64) {
        self.post(TaskUpdate::Terminated {
            reason: reason.into(),
            retry_after_ms,
        });
    }

    fn post(&self, update: TaskUpdate) {
        self.events
            .post_update(self.coordinator_id, self.task_id, update);
    }
}

impl fmt::Debug for LookupListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupListener")
            .field("coordinator_id", &self.coordinator_id)
            .field("task_id", &self.task_id)
            .finish()
    }
}
