use log::{debug, warn};

use super::{
    event::{EventSender, LookupListener, TaskUpdate},
    response::TaskResponse,
    Services,
};
use crate::core::types::{
    CapabilityRecord, CoordinatorId, ErrorCode, LookupMechanism, RequestKind, Target, TaskId,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting for the dispatcher to admit it.
    Pending,
    Executing,
    Finished,
}

/// How an admitted task started.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TaskStart {
    /// A backend lookup is in flight; a timeout must be armed.
    Remote,
    /// Every target was answered locally.
    Local,
    /// The backend refused the lookup.
    Failed,
}

/// One lookup unit: a set of targets sent to the backend in a single call.
#[derive(Debug)]
pub struct RequestTask {
    task_id: TaskId,
    coordinator_id: CoordinatorId,
    kind: RequestKind,
    mechanism: LookupMechanism,
    targets: Vec<Target>,
    skip_cache: bool,
    state: TaskState,
    response: TaskResponse,
}

impl RequestTask {
    pub fn new(
        task_id: TaskId,
        coordinator_id: CoordinatorId,
        kind: RequestKind,
        mechanism: LookupMechanism,
        targets: Vec<Target>,
        skip_cache: bool,
    ) -> Self {
        Self {
            task_id,
            coordinator_id,
            kind,
            mechanism,
            targets,
            skip_cache,
            state: TaskState::Pending,
            response: TaskResponse::default(),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn coordinator_id(&self) -> CoordinatorId {
        self.coordinator_id
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn response(&self) -> &TaskResponse {
        &self.response
    }

    pub(crate) fn response_mut(&mut self) -> &mut TaskResponse {
        &mut self.response
    }

    /// Targets the task has no record for yet.
    pub fn unanswered(&self) -> Vec<Target> {
        self.response.unanswered(&self.targets)
    }

    pub(crate) fn finish(&mut self) {
        self.state = TaskState::Finished;
    }

    /// Start the task once the dispatcher admitted it.
    ///
    /// Targets with a fresh cache entry, and targets in cooldown, are answered
    /// locally first. Whatever remains goes to the backend. Every outcome is
    /// reported back through `events`; nothing is applied to the coordinator
    /// directly.
    pub(crate) fn execute(&mut self, services: &Services, events: &EventSender) -> TaskStart {
        self.state = TaskState::Executing;

        let mut served_locally = false;
        if !self.skip_cache {
            let fresh = self.fresh_records(services);
            if !fresh.is_empty() {
                debug!(
                    "task {} served {} targets from cache",
                    self.task_id,
                    fresh.len()
                );
                self.response.add_cached(fresh);
                served_locally = true;
            }
        }

        let cooling = services.cooldown.in_cooldown(&self.unanswered());
        if !cooling.is_empty() {
            let mut records = services.cache.get_including_expired(&cooling);
            for target in &cooling {
                if !records.iter().any(|record| &record.target == target) {
                    records.push(CapabilityRecord::unknown(target.clone()));
                }
            }
            debug!(
                "task {} answered {} targets in cooldown locally",
                self.task_id,
                cooling.len()
            );
            self.response.add_cached(records);
            served_locally = true;
        }

        if served_locally {
            events.post_update(
                self.coordinator_id,
                self.task_id,
                TaskUpdate::CachedCapabilitiesUpdated,
            );
        }

        let remaining = self.unanswered();
        if remaining.is_empty() {
            events.post_update(self.coordinator_id, self.task_id, TaskUpdate::NoNetworkNeeded);
            return TaskStart::Local;
        }

        let listener = LookupListener::new(self.coordinator_id, self.task_id, events.clone());
        match services
            .backend
            .begin_lookup(self.mechanism, remaining, listener)
        {
            Ok(()) => TaskStart::Remote,
            Err(e) => {
                warn!(
                    "coordinator {} task {}: lookup not started: {e}",
                    self.coordinator_id, self.task_id
                );
                events.post_update(
                    self.coordinator_id,
                    self.task_id,
                    TaskUpdate::Error(ErrorCode::NotAvailable),
                );
                TaskStart::Failed
            }
        }
    }

    fn fresh_records(&self, services: &Services) -> Vec<CapabilityRecord> {
        match self.kind {
            RequestKind::Capability => services.cache.get_fresh(&self.targets),
            RequestKind::Availability => self
                .targets
                .first()
                .and_then(|target| services.cache.get_availability_fresh(target))
                .into_iter()
                .collect(),
        }
    }
}
