//! Admission dispatcher
//!
//! Decides when a submitted task may start. At most `max_concurrent` tasks
//! execute at once and two consecutive admissions are at least
//! `pacing_interval` apart. The dispatcher only computes admissions; the
//! event loop turns them into delayed execute events.

use std::{collections::VecDeque, time::Duration};

use log::debug;
use tokio::time::Instant;

use crate::core::types::{CoordinatorId, TaskId};

/// A task released for execution after `delay`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Admission {
    pub coordinator_id: CoordinatorId,
    pub task_id: TaskId,
    pub delay: Duration,
}

#[derive(Debug)]
struct DispatcherEntry {
    coordinator_id: CoordinatorId,
    task_id: TaskId,
    scheduled_at: Option<Instant>,
}

#[derive(Debug)]
pub struct Dispatcher {
    max_concurrent: usize,
    pacing_interval: Duration,
    waiting: VecDeque<DispatcherEntry>,
    executing: Vec<DispatcherEntry>,
    // latest slot handed out, kept after the task that used it finished
    last_scheduled: Option<Instant>,
    shut_down: bool,
}

impl Dispatcher {
    pub fn new(max_concurrent: usize, pacing_interval: Duration) -> Self {
        Self {
            max_concurrent,
            pacing_interval,
            waiting: VecDeque::new(),
            executing: Vec::new(),
            last_scheduled: None,
            shut_down: false,
        }
    }

    /// Queue the tasks of one coordinator behind everything already waiting.
    pub fn submit<I>(&mut self, coordinator_id: CoordinatorId, task_ids: I, now: Instant) -> Vec<Admission>
    where
        I: IntoIterator<Item = TaskId>,
    {
        if self.shut_down {
            debug!("Dispatcher shut down, dropping tasks of coordinator {coordinator_id}");
            return Vec::new();
        }
        self.waiting
            .extend(task_ids.into_iter().map(|task_id| DispatcherEntry {
                coordinator_id,
                task_id,
                scheduled_at: None,
            }));
        self.admit(now)
    }

    pub fn on_task_finished(&mut self, task_id: TaskId, now: Instant) -> Vec<Admission> {
        self.executing.retain(|entry| entry.task_id != task_id);
        self.admit(now)
    }

    /// Drop every queued and executing entry. No admission happens afterwards.
    pub fn shutdown(&mut self) {
        self.shut_down = true;
        self.waiting.clear();
        self.executing.clear();
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn executing_len(&self) -> usize {
        self.executing.len()
    }

    fn admit(&mut self, now: Instant) -> Vec<Admission> {
        if self.shut_down {
            return Vec::new();
        }

        let capacity = self.max_concurrent.saturating_sub(self.executing.len());
        if capacity == 0 || self.waiting.is_empty() {
            return Vec::new();
        }

        let mut last = self
            .executing
            .iter()
            .filter_map(|entry| entry.scheduled_at)
            .chain(self.last_scheduled)
            .max();

        let mut admissions = Vec::with_capacity(capacity.min(self.waiting.len()));
        for _ in 0..capacity {
            let Some(mut entry) = self.waiting.pop_front() else {
                break;
            };
            let at = match last {
                Some(last) => now.max(last + self.pacing_interval),
                None => now,
            };
            entry.scheduled_at = Some(at);
            last = Some(at);

            let delay = at.saturating_duration_since(now);
            debug!(
                "Admit coordinator {} task {} in {:?}",
                entry.coordinator_id, entry.task_id, delay
            );
            admissions.push(Admission {
                coordinator_id: entry.coordinator_id,
                task_id: entry.task_id,
                delay,
            });
            self.executing.push(entry);
        }
        self.last_scheduled = last;
        admissions
    }
}
