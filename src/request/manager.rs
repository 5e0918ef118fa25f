//! Request manager
//!
//! [`RequestManager`] is the entry point of the engine. Its methods run on
//! the caller's thread and only do the synchronous part of a request: input
//! checks and the cache shortcut. Everything else happens in one spawned
//! event loop that owns the registry, the dispatcher and the timers and
//! handles [`ManagerEvent`]s one at a time.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use log::{debug, info, warn};
use tokio::{
    sync::{
        mpsc::{unbounded_channel, UnboundedReceiver},
        oneshot,
    },
    time::Instant,
};

use super::{
    coordinator::{Coordinator, CoordinatorContext},
    dispatcher::{Admission, Dispatcher},
    event::{EventSender, ManagerEvent, TaskUpdate},
    registry::{CoordinatorRegistry, RegistryStats},
    task::{RequestTask, TaskStart},
    timer::EventTimers,
    Services,
};
use crate::{
    config::Config,
    core::{
        error::{EngineError, EngineResult},
        traits::CapabilityCallback,
        types::{CoordinatorId, ErrorCode, LookupMechanism, RequestKind, Target, TaskId},
    },
};

struct ManagerInner {
    config: Config,
    services: Services,
    events: EventSender,
    destroyed: AtomicBool,
    task_timeout_ms: Arc<AtomicU64>,
    next_coordinator_id: AtomicU64,
    next_task_id: AtomicU64,
}

/// Handle of a running request engine. Cheap to clone.
#[derive(Clone)]
pub struct RequestManager {
    inner: Arc<ManagerInner>,
}

impl RequestManager {
    /// Spawn the event loop and return its handle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: Config, services: Services) -> Self {
        let (tx, rx) = unbounded_channel();
        let events = EventSender::new(tx);
        let task_timeout_ms = Arc::new(AtomicU64::new(config.engine.task_timeout_ms));

        let event_loop = EventLoop {
            rx,
            events: events.clone(),
            services: services.clone(),
            registry: CoordinatorRegistry::new(),
            dispatcher: Dispatcher::new(
                config.engine.max_concurrent,
                Duration::from_millis(config.engine.pacing_interval_ms),
            ),
            timers: EventTimers::default(),
            inconclusive_sip_codes: config.cooldown.inconclusive_sip_codes.clone(),
            task_timeout_ms: task_timeout_ms.clone(),
        };
        tokio::spawn(event_loop.run());

        info!(
            "Request manager started: mechanism {:?}, max concurrent {}, pacing {}ms",
            config.lookup.mechanism, config.engine.max_concurrent, config.engine.pacing_interval_ms
        );

        Self {
            inner: Arc::new(ManagerInner {
                config,
                services,
                events,
                destroyed: AtomicBool::new(false),
                task_timeout_ms,
                next_coordinator_id: AtomicU64::new(1),
                next_task_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Request the capabilities of `targets`.
    ///
    /// Targets with a fresh cache entry are answered through `on_partial`
    /// before this returns. If nothing is left to look up, `on_complete` fires
    /// before this returns as well and `None` is returned. Otherwise the id of
    /// the coordinator handling the rest is returned.
    pub fn send_request(
        &self,
        targets: Vec<Target>,
        skip_cache: bool,
        callback: Arc<dyn CapabilityCallback>,
    ) -> Option<CoordinatorId> {
        let targets = dedup(targets);
        if let Some((code, retry_after_ms)) = self.precheck(&targets) {
            debug!("Capability request rejected: {code}");
            callback.on_error(code, retry_after_ms);
            return None;
        }

        let mut remaining = targets;
        if self.inner.config.engine.cache_shortcut && !skip_cache {
            let fresh = self.inner.services.cache.get_fresh(&remaining);
            if !fresh.is_empty() {
                let cached: HashSet<&Target> = fresh.iter().map(|record| &record.target).collect();
                remaining.retain(|target| !cached.contains(target));
                debug!(
                    "Served {} targets from cache, {} left",
                    fresh.len(),
                    remaining.len()
                );
                callback.on_partial(fresh);
            }
            if remaining.is_empty() {
                callback.on_complete();
                return None;
            }
        }

        Some(self.submit(RequestKind::Capability, remaining, skip_cache, callback))
    }

    /// Request the availability of one target.
    ///
    /// Same flow as [`send_request`](Self::send_request) with a single target,
    /// the availability freshness window and the cache always consulted.
    pub fn send_availability_request(
        &self,
        target: Target,
        callback: Arc<dyn CapabilityCallback>,
    ) -> Option<CoordinatorId> {
        let targets = vec![target];
        if let Some((code, retry_after_ms)) = self.precheck(&targets) {
            debug!("Availability request rejected: {code}");
            callback.on_error(code, retry_after_ms);
            return None;
        }

        if self.inner.config.engine.cache_shortcut {
            if let Some(record) = self.inner.services.cache.get_availability_fresh(&targets[0]) {
                debug!("Availability of {} served from cache", record.target);
                callback.on_partial(vec![record]);
                callback.on_complete();
                return None;
            }
        }

        Some(self.submit(RequestKind::Availability, targets, false, callback))
    }

    /// Stop the engine.
    ///
    /// Timers are canceled, the dispatcher is shut down and every live
    /// coordinator is dropped without a terminal callback. Backend callbacks
    /// arriving afterwards are ignored and new requests fail.
    pub async fn on_destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let (done, wait) = oneshot::channel();
        self.inner.events.post(ManagerEvent::Destroy { done });
        if wait.await.is_err() {
            debug!("Event loop already stopped");
        }
        self.inner.services.cooldown.reset();
        info!("Request manager destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    pub fn reset_cooldowns(&self) {
        info!("Resetting cooldown list");
        self.inner.services.cooldown.reset();
    }

    /// Timeout applied to tasks admitted from now on.
    pub fn set_task_timeout(&self, timeout: Duration) {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1);
        debug!("Task timeout set to {millis}ms");
        self.inner.task_timeout_ms.store(millis, Ordering::SeqCst);
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.task_timeout_ms.load(Ordering::SeqCst))
    }

    /// Snapshot of the registry, taken by the event loop after every event
    /// posted before this call.
    pub async fn stats(&self) -> EngineResult<RegistryStats> {
        let (reply, wait) = oneshot::channel();
        self.inner.events.post(ManagerEvent::Stats { reply });
        wait.await.map_err(|_| EngineError::Destroyed)
    }

    fn precheck(&self, targets: &[Target]) -> Option<(ErrorCode, u64)> {
        if targets.is_empty() || self.is_destroyed() {
            return Some((ErrorCode::GenericFailure, 0));
        }
        let state = self.inner.services.device_state.current();
        if state.forbidden {
            return Some((
                state.error_code.unwrap_or(ErrorCode::Forbidden),
                state.retry_after_ms,
            ));
        }
        if self.inner.config.lookup.mechanism == LookupMechanism::None {
            return Some((ErrorCode::NotEnabled, 0));
        }
        None
    }

    fn submit(
        &self,
        kind: RequestKind,
        targets: Vec<Target>,
        skip_cache: bool,
        callback: Arc<dyn CapabilityCallback>,
    ) -> CoordinatorId {
        let coordinator = self.build_coordinator(kind, targets, skip_cache, callback);
        let coordinator_id = coordinator.id();
        self.inner
            .events
            .post(ManagerEvent::Submit(Box::new(coordinator)));
        coordinator_id
    }

    fn build_coordinator(
        &self,
        kind: RequestKind,
        targets: Vec<Target>,
        skip_cache: bool,
        callback: Arc<dyn CapabilityCallback>,
    ) -> Coordinator {
        let config = &self.inner.config;
        let mechanism = config.lookup.mechanism;
        let coordinator_id = self.inner.next_coordinator_id.fetch_add(1, Ordering::Relaxed);

        let chunk_size = match mechanism {
            LookupMechanism::Presence if config.lookup.group_lookup => {
                config.engine.max_targets_per_lookup.max(1)
            }
            _ => 1,
        };

        let tasks: Vec<RequestTask> = targets
            .chunks(chunk_size)
            .map(|chunk| {
                let task_id = self.inner.next_task_id.fetch_add(1, Ordering::Relaxed);
                RequestTask::new(
                    task_id,
                    coordinator_id,
                    kind,
                    mechanism,
                    chunk.to_vec(),
                    skip_cache,
                )
            })
            .collect();

        debug!(
            "Built coordinator {coordinator_id} ({kind:?}, {mechanism:?}) with {} tasks for {} targets",
            tasks.len(),
            targets.len()
        );
        Coordinator::new(coordinator_id, mechanism, tasks, callback)
    }
}

fn dedup(targets: Vec<Target>) -> Vec<Target> {
    let mut seen = HashSet::with_capacity(targets.len());
    targets
        .into_iter()
        .filter(|target| seen.insert(target.clone()))
        .collect()
}

struct EventLoop {
    rx: UnboundedReceiver<ManagerEvent>,
    events: EventSender,
    services: Services,
    registry: CoordinatorRegistry,
    dispatcher: Dispatcher,
    timers: EventTimers,
    inconclusive_sip_codes: Vec<u16>,
    task_timeout_ms: Arc<AtomicU64>,
}

impl EventLoop {
    async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            debug!("Handling {event:?}");
            if let ManagerEvent::Destroy { done } = event {
                self.destroy();
                let _ = done.send(());
                break;
            }
            self.handle(event);
        }

        // drop whatever was queued behind the destroy
        self.rx.close();
        while let Ok(event) = self.rx.try_recv() {
            debug!("Dropping {event:?} after destroy");
        }
        info!("Request event loop stopped");
    }

    fn handle(&mut self, event: ManagerEvent) {
        match event {
            ManagerEvent::Submit(coordinator) => {
                let coordinator_id = coordinator.id();
                let task_ids = coordinator.active_task_ids();
                self.registry.insert(*coordinator);
                let admissions = self
                    .dispatcher
                    .submit(coordinator_id, task_ids, Instant::now());
                self.schedule(admissions);
            }
            ManagerEvent::Execute {
                coordinator_id,
                task_id,
            } => {
                self.timers.execute_fired(task_id);
                let ctx = CoordinatorContext {
                    services: &self.services,
                    events: &self.events,
                    inconclusive_sip_codes: &self.inconclusive_sip_codes,
                };
                let Some(coordinator) = self.registry.owner_mut(coordinator_id, task_id) else {
                    warn!("Execute for unknown task {task_id} of coordinator {coordinator_id}");
                    return;
                };
                if let Some(TaskStart::Remote) = coordinator.execute_task(task_id, &ctx) {
                    let timeout = Duration::from_millis(self.task_timeout_ms.load(Ordering::SeqCst));
                    self.timers
                        .schedule_timeout(coordinator_id, task_id, timeout, &self.events);
                }
            }
            ManagerEvent::Updated {
                coordinator_id,
                task_id,
                update,
            } => self.apply(coordinator_id, task_id, update),
            ManagerEvent::Timeout {
                coordinator_id,
                task_id,
            } => {
                if !self.timers.take_timeout(task_id) {
                    debug!("Stale timeout for task {task_id}, ignoring");
                    return;
                }
                info!("Task {task_id} of coordinator {coordinator_id} timed out");
                self.apply(coordinator_id, task_id, TaskUpdate::TimedOut);
            }
            ManagerEvent::TaskFinished {
                coordinator_id: _,
                task_id,
            } => {
                self.timers.cancel_timeout(task_id);
                let admissions = self.dispatcher.on_task_finished(task_id, Instant::now());
                self.schedule(admissions);
            }
            ManagerEvent::CoordinatorFinished { coordinator_id } => {
                self.registry.remove(coordinator_id);
            }
            ManagerEvent::Stats { reply } => {
                let _ = reply.send(RegistryStats {
                    coordinator_count: self.registry.len(),
                    task_count: self.registry.task_count(),
                    waiting_count: self.dispatcher.waiting_len(),
                    executing_count: self.dispatcher.executing_len(),
                });
            }
            ManagerEvent::Destroy { done } => {
                // handled by run()
                let _ = done.send(());
            }
        }
    }

    fn apply(&mut self, coordinator_id: CoordinatorId, task_id: TaskId, update: TaskUpdate) {
        let ctx = CoordinatorContext {
            services: &self.services,
            events: &self.events,
            inconclusive_sip_codes: &self.inconclusive_sip_codes,
        };
        match self.registry.owner_mut(coordinator_id, task_id) {
            Some(coordinator) => coordinator.on_task_updated(task_id, update, &ctx),
            None => debug!(
                "Dropping {} for unknown task {task_id} of coordinator {coordinator_id}",
                update.name()
            ),
        }
    }

    fn schedule(&mut self, admissions: Vec<Admission>) {
        for admission in admissions {
            self.timers.schedule_execute(admission, &self.events);
        }
    }

    fn destroy(&mut self) {
        info!(
            "Destroying request manager: {} coordinators, {} timers pending",
            self.registry.len(),
            self.timers.pending()
        );
        self.timers.clear();
        self.dispatcher.shutdown();
        self.registry.clear();
    }
}
