use std::{collections::HashMap, time::Duration};

use log::debug;
use tokio::task::AbortHandle;

use super::{
    dispatcher::Admission,
    event::{EventSender, ManagerEvent},
};
use crate::core::types::{CoordinatorId, TaskId};

/// Timers of the event loop: delayed executions and per-task timeouts.
///
/// Each timer is a spawned sleep that posts one event. A timeout counts only
/// while its entry is still here, so a timeout event that raced with
/// [`EventTimers::cancel_timeout`] is recognised as stale.
#[derive(Default)]
pub(crate) struct EventTimers {
    executes: HashMap<TaskId, AbortHandle>,
    timeouts: HashMap<TaskId, AbortHandle>,
}

impl EventTimers {
    pub(crate) fn schedule_execute(&mut self, admission: Admission, events: &EventSender) {
        let event = ManagerEvent::Execute {
            coordinator_id: admission.coordinator_id,
            task_id: admission.task_id,
        };
        if admission.delay.is_zero() {
            events.post(event);
            return;
        }
        let handle = spawn_delayed(admission.delay, event, events.clone());
        self.executes.insert(admission.task_id, handle);
    }

    /// The execute event of `task_id` was delivered.
    pub(crate) fn execute_fired(&mut self, task_id: TaskId) {
        self.executes.remove(&task_id);
    }

    pub(crate) fn schedule_timeout(
        &mut self,
        coordinator_id: CoordinatorId,
        task_id: TaskId,
        timeout: Duration,
        events: &EventSender,
    ) {
        debug!("Arming {timeout:?} timeout for task {task_id}");
        let event = ManagerEvent::Timeout {
            coordinator_id,
            task_id,
        };
        let handle = spawn_delayed(timeout, event, events.clone());
        if let Some(previous) = self.timeouts.insert(task_id, handle) {
            previous.abort();
        }
    }

    /// Consume the timeout of `task_id`. False when it was already canceled.
    pub(crate) fn take_timeout(&mut self, task_id: TaskId) -> bool {
        self.timeouts.remove(&task_id).is_some()
    }

    pub(crate) fn cancel_timeout(&mut self, task_id: TaskId) {
        if let Some(handle) = self.timeouts.remove(&task_id) {
            handle.abort();
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.executes.len() + self.timeouts.len()
    }

    /// Abort every timer.
    pub(crate) fn clear(&mut self) {
        for (_, handle) in self.executes.drain().chain(self.timeouts.drain()) {
            handle.abort();
        }
    }
}

fn spawn_delayed(delay: Duration, event: ManagerEvent, events: EventSender) -> AbortHandle {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        events.post(event);
    })
    .abort_handle()
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::unbounded_channel;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_execute_and_timeout_timers() {
        let (tx, mut rx) = unbounded_channel();
        let events = EventSender::new(tx);
        let mut timers = EventTimers::default();

        timers.schedule_execute(
            Admission {
                coordinator_id: 1,
                task_id: 7,
                delay: Duration::ZERO,
            },
            &events,
        );
        assert!(matches!(
            rx.try_recv(),
            Ok(ManagerEvent::Execute { task_id: 7, .. })
        ));

        timers.schedule_execute(
            Admission {
                coordinator_id: 1,
                task_id: 8,
                delay: Duration::from_millis(100),
            },
            &events,
        );
        timers.schedule_timeout(1, 7, Duration::from_secs(1), &events);
        assert_eq!(timers.pending(), 2);

        let start = tokio::time::Instant::now();
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ManagerEvent::Execute { task_id: 8, .. }));
        assert!(start.elapsed() >= Duration::from_millis(100));
        timers.execute_fired(8);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ManagerEvent::Timeout { task_id: 7, .. }));
        assert!(timers.take_timeout(7));
        assert!(!timers.take_timeout(7));
        assert_eq!(timers.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_canceled_timeout_never_fires() {
        let (tx, mut rx) = unbounded_channel();
        let events = EventSender::new(tx);
        let mut timers = EventTimers::default();

        timers.schedule_timeout(1, 3, Duration::from_millis(50), &events);
        timers.cancel_timeout(3);
        timers.schedule_timeout(1, 4, Duration::from_millis(80), &events);
        timers.clear();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }
}
