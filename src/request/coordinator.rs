//! Request coordinator
//!
//! A coordinator owns the tasks created from one caller call. It applies
//! task updates, streams partial records to the caller, derives a
//! [`RequestResult`] per finished task and, once no task is active, reduces
//! them into the single terminal callback of the batch.

use std::{collections::HashMap, sync::Arc};

use log::{debug, info};

use super::{
    event::{EventSender, ManagerEvent, TaskUpdate},
    task::{RequestTask, TaskStart, TaskState},
    Services,
};
use crate::core::{
    traits::CapabilityCallback,
    types::{
        CapabilityRecord, CoordinatorId, ErrorCode, LookupMechanism, Outcome, RequestResult, TaskId,
    },
};

/// SIP code recorded for targets whose task timed out locally.
const LOCAL_TIMEOUT_SIP_CODE: u16 = 408;

/// Environment a coordinator works in while handling one event.
pub(crate) struct CoordinatorContext<'a> {
    pub services: &'a Services,
    pub events: &'a EventSender,
    pub inconclusive_sip_codes: &'a [u16],
}

pub struct Coordinator {
    id: CoordinatorId,
    mechanism: LookupMechanism,
    active: HashMap<TaskId, RequestTask>,
    finished: HashMap<TaskId, RequestResult>,
    callback: Option<Arc<dyn CapabilityCallback>>,
}

impl Coordinator {
    pub fn new(
        id: CoordinatorId,
        mechanism: LookupMechanism,
        tasks: Vec<RequestTask>,
        callback: Arc<dyn CapabilityCallback>,
    ) -> Self {
        Self {
            id,
            mechanism,
            active: tasks
                .into_iter()
                .map(|task| (task.task_id(), task))
                .collect(),
            finished: HashMap::new(),
            callback: Some(callback),
        }
    }

    pub fn id(&self) -> CoordinatorId {
        self.id
    }

    pub fn mechanism(&self) -> LookupMechanism {
        self.mechanism
    }

    /// Ids of the tasks still running, ascending.
    pub fn active_task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.active.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn active_task(&self, task_id: TaskId) -> Option<&RequestTask> {
        self.active.get(&task_id)
    }

    pub fn finished_result(&self, task_id: TaskId) -> Option<&RequestResult> {
        self.finished.get(&task_id)
    }

    pub fn task_count(&self) -> usize {
        self.active.len() + self.finished.len()
    }

    /// True once the terminal callback has fired.
    pub fn is_completed(&self) -> bool {
        self.callback.is_none()
    }

    pub(crate) fn execute_task(&mut self, task_id: TaskId, ctx: &CoordinatorContext<'_>) -> Option<TaskStart> {
        let task = self.active.get_mut(&task_id)?;
        if task.state() != TaskState::Pending {
            debug!(
                "coordinator {} task {task_id} already started, ignoring execute",
                self.id
            );
            return None;
        }
        debug!("coordinator {} executing task {task_id}", self.id);
        Some(task.execute(ctx.services, ctx.events))
    }

    /// Apply one update to a task. Updates for unknown or finished tasks are
    /// ignored.
    pub(crate) fn on_task_updated(&mut self, task_id: TaskId, update: TaskUpdate, ctx: &CoordinatorContext<'_>) {
        let mechanism = self.mechanism;
        let Some(task) = self.active.get_mut(&task_id) else {
            debug!(
                "coordinator {} ignoring {} for inactive task {task_id}",
                self.id,
                update.name()
            );
            return;
        };
        debug!("coordinator {} task {task_id}: {}", self.id, update.name());

        let result = apply_update(mechanism, task, update, ctx);

        let records = task.response_mut().take_undelivered();
        if !records.is_empty() {
            if let Some(callback) = &self.callback {
                callback.on_partial(records);
            }
        }

        if let Some(result) = result {
            self.finish_task(result, ctx.events);
        }
    }

    fn finish_task(&mut self, result: RequestResult, events: &EventSender) {
        let task_id = result.task_id;
        if let Some(mut task) = self.active.remove(&task_id) {
            task.finish();
        }
        debug!(
            "coordinator {} task {task_id} finished: {:?}",
            self.id, result.outcome
        );
        self.finished.insert(task_id, result);
        events.post(ManagerEvent::TaskFinished {
            coordinator_id: self.id,
            task_id,
        });
        self.check_completion(events);
    }

    fn check_completion(&mut self, events: &EventSender) {
        if !self.active.is_empty() {
            return;
        }
        let Some(callback) = self.callback.take() else {
            return;
        };

        match aggregate(self.finished.values()) {
            Outcome::Success => {
                info!("coordinator {} completed", self.id);
                callback.on_complete();
            }
            Outcome::Failure {
                code,
                retry_after_ms,
            } => {
                info!(
                    "coordinator {} failed: {code}, retry after {retry_after_ms}ms",
                    self.id
                );
                callback.on_error(code, retry_after_ms);
            }
        }
        events.post(ManagerEvent::CoordinatorFinished {
            coordinator_id: self.id,
        });
    }
}

/// Reduce finished task results to the batch outcome: success when every
/// task succeeded, otherwise the failure with the longest retry-after.
pub fn aggregate<'a, I>(results: I) -> Outcome
where
    I: IntoIterator<Item = &'a RequestResult>,
{
    results
        .into_iter()
        .filter_map(|result| match result.outcome {
            Outcome::Success => None,
            failure @ Outcome::Failure { retry_after_ms, .. } => Some((retry_after_ms, failure)),
        })
        .max_by_key(|(retry_after_ms, _)| *retry_after_ms)
        .map_or(Outcome::Success, |(_, failure)| failure)
}

fn apply_update(
    mechanism: LookupMechanism,
    task: &mut RequestTask,
    update: TaskUpdate,
    ctx: &CoordinatorContext<'_>,
) -> Option<RequestResult> {
    let task_id = task.task_id();
    match update {
        TaskUpdate::Error(code) => {
            task.response_mut().set_internal_error(code);
            Some(RequestResult::failure(task_id, code, 0))
        }
        TaskUpdate::CommandError(error) => {
            task.response_mut().set_command_error(error);
            Some(RequestResult::failure(task_id, error.into(), 0))
        }
        TaskUpdate::NetworkResponse { sip_code, reason } => {
            ctx.services.device_state.refresh(sip_code, &reason);
            task.response_mut().set_network_response(sip_code, reason);
            if ctx.inconclusive_sip_codes.contains(&sip_code) {
                ctx.services
                    .cooldown
                    .add_cooldown(&task.unanswered(), sip_code);
            }
            network_response_result(mechanism, task, sip_code, ctx)
        }
        TaskUpdate::CapabilitiesUpdated(records) => {
            ctx.services.cache.save(&records);
            task.response_mut().add_updated(records);
            None
        }
        TaskUpdate::ResourceTerminated(records) => {
            ctx.services.cache.save(&records);
            task.response_mut().add_removed(records);
            None
        }
        // records were added by the task itself, only delivery is pending
        TaskUpdate::CachedCapabilitiesUpdated => None,
        TaskUpdate::Terminated {
            reason,
            retry_after_ms,
        } => {
            let all_answered = task.response().all_answered(task.targets());
            let outcome = terminated_outcome(&reason, retry_after_ms, all_answered);
            task.response_mut().set_terminated(reason, retry_after_ms);
            Some(RequestResult { task_id, outcome })
        }
        TaskUpdate::NoNetworkNeeded => Some(RequestResult::success(task_id)),
        TaskUpdate::TimedOut => {
            let unanswered = task.unanswered();
            let stale = ctx.services.cache.get_including_expired(&unanswered);
            task.response_mut().add_cached(stale);
            ctx.services
                .cooldown
                .add_cooldown(&unanswered, LOCAL_TIMEOUT_SIP_CODE);
            Some(RequestResult::failure(task_id, ErrorCode::RequestTimeout, 0))
        }
    }
}

fn network_response_result(
    mechanism: LookupMechanism,
    task: &mut RequestTask,
    sip_code: u16,
    ctx: &CoordinatorContext<'_>,
) -> Option<RequestResult> {
    let task_id = task.task_id();
    match sip_code {
        200..=299 => match mechanism {
            // the subscription keeps delivering until it is terminated
            LookupMechanism::Presence => None,
            _ => Some(RequestResult::success(task_id)),
        },
        404 => {
            let records: Vec<CapabilityRecord> = task
                .unanswered()
                .into_iter()
                .map(CapabilityRecord::not_found)
                .collect();
            ctx.services.cache.save(&records);
            task.response_mut().add_updated(records);
            Some(RequestResult::success(task_id))
        }
        _ => {
            let state = ctx.services.device_state.current();
            let result = if state.forbidden {
                RequestResult::failure(
                    task_id,
                    state.error_code.unwrap_or(ErrorCode::Forbidden),
                    state.retry_after_ms,
                )
            } else {
                RequestResult::failure(
                    task_id,
                    ErrorCode::from_sip_code(sip_code),
                    task.response().retry_after_ms(),
                )
            };
            Some(result)
        }
    }
}

/// Outcome of a task the backend terminated.
///
/// A reason starting with a SIP status code ("486 Busy Here") maps through
/// [`ErrorCode::from_sip_code`]. Known subscription termination reasons are
/// mapped by name. An expired subscription is still a success when every
/// target was answered.
pub fn terminated_outcome(reason: &str, retry_after_ms: u64, all_answered: bool) -> Outcome {
    let failure = |code| Outcome::Failure {
        code,
        retry_after_ms,
    };

    let reason = reason.trim();
    if let Some(sip_code) = leading_sip_code(reason) {
        return failure(ErrorCode::from_sip_code(sip_code));
    }

    match reason.to_ascii_lowercase().as_str() {
        "" if retry_after_ms > 0 => failure(ErrorCode::GenericFailure),
        "" | "timeout" | "noresource" if all_answered => Outcome::Success,
        "" => Outcome::Failure {
            code: ErrorCode::RequestTimeout,
            retry_after_ms: 0,
        },
        "timeout" => failure(ErrorCode::RequestTimeout),
        "rejected" => failure(ErrorCode::NotAuthorized),
        "noresource" => failure(ErrorCode::NotFound),
        _ => failure(ErrorCode::GenericFailure),
    }
}

fn leading_sip_code(reason: &str) -> Option<u16> {
    reason
        .split_whitespace()
        .next()
        .and_then(|token| token.parse::<u16>().ok())
        .filter(|code| (100..=699).contains(code))
}
