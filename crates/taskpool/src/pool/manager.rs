//! Pool manager: owns the units, routes tasks and correlates results.
//!
//! [`WorkerPool`] keeps a fixed table of computation units and a FIFO queue.
//! A submitted task goes to the lowest-numbered idle unit, or waits in the
//! queue when every unit is busy. When a unit finishes, the head of the
//! queue is handed to that same unit before it is ever reported idle.
//!
//! All bookkeeping (unit table, queue, outstanding result senders and
//! counters) sits behind one lock that is never held across an `.await`.
//! After every transition a [`PoolStats`] snapshot is published to an atomic
//! cell, so [`WorkerPool::stats`] never waits on pool activity.

use crate::{
    config::PoolConfig,
    pool::{
        handle::TaskHandle,
        stats::{PoolStats, UnitInfo, UnitState},
        worker::{ProtocolExecutor, TaskExecutor, UnitEvent, unit_loop},
    },
    telemetry,
};
use core::time::Duration;
use crossbeam_utils::atomic::AtomicCell;
use parking_lot::Mutex;
use portable_atomic::{AtomicU64, Ordering};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use taskpool_core::{Error, Result, Task, TaskId, TaskKind, TaskPayload, TaskResult};
use tokio::{
    sync::{
        Notify,
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

/// Upper bound on how long shutdown waits for each unit task to exit.
const UNIT_JOIN_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone, Copy)]
struct UnitSlot {
    state: UnitState,
    current_task: Option<TaskId>,
}

impl UnitSlot {
    const IDLE: Self = Self {
        state: UnitState::Idle,
        current_task: None,
    };

    const TERMINATED: Self = Self {
        state: UnitState::Terminated,
        current_task: None,
    };
}

/// The caller side of an accepted task.
struct Waiter {
    kind: TaskKind,
    tx: oneshot::Sender<TaskResult>,
}

#[derive(Default)]
struct PoolState {
    units: Vec<UnitSlot>,
    pending: VecDeque<Task>,
    outstanding: HashMap<TaskId, Waiter>,
    closed: bool,
    completed: u64,
    failed: u64,
    cancelled: u64,
}

impl PoolState {
    fn snapshot(&self) -> PoolStats {
        let mut stats = PoolStats {
            total_units: self.units.len(),
            queue_length: self.pending.len(),
            completed_count: self.completed,
            failed_count: self.failed,
            cancelled_count: self.cancelled,
            ..PoolStats::default()
        };
        for slot in &self.units {
            match slot.state {
                UnitState::Idle => stats.idle_units += 1,
                UnitState::Busy => stats.busy_units += 1,
                UnitState::Terminated => stats.terminated_units += 1,
            }
        }
        stats
    }
}

/// State shared between the pool, its completion loop and task handles.
pub(crate) struct Shared {
    state: Mutex<PoolState>,
    stats: AtomicCell<PoolStats>,
    senders: Vec<mpsc::Sender<Task>>,
    next_id: AtomicU64,
    drained: Notify,
    shutdown_token: CancellationToken,
}

impl Shared {
    fn publish(&self, state: &PoolState) {
        self.stats.store(state.snapshot());
    }

    /// Next counter value not currently used by a caller-assigned id.
    fn next_free_id(&self, state: &PoolState) -> TaskId {
        loop {
            let id = TaskId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
            if !state.outstanding.contains_key(&id) {
                return id;
            }
        }
    }

    fn submit(self: &Arc<Self>, id: Option<TaskId>, payload: TaskPayload) -> Result<TaskHandle> {
        payload.validate()?;
        let kind = payload.kind();
        let (tx, rx) = oneshot::channel();

        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::PoolClosed);
        }
        let id = match id {
            Some(id) if state.outstanding.contains_key(&id) => {
                return Err(Error::DuplicateTaskId { id });
            }
            Some(id) => id,
            None => self.next_free_id(&state),
        };

        state.outstanding.insert(id, Waiter { kind, tx });
        let queued = match self.dispatch(&mut state, Task::new(id, payload)) {
            Some(task) => {
                state.pending.push_back(task);
                true
            }
            None => false,
        };
        self.publish(&state);
        drop(state);

        telemetry::increment_tasks_submitted(kind);
        if queued {
            telemetry::adjust_queue_depth(1);
            #[cfg(feature = "tracing")]
            tracing::trace!("Task {id} ({kind}) queued, every unit is busy");
        }

        Ok(TaskHandle::new(id, rx, Arc::downgrade(self)))
    }

    /// Hands `task` to the lowest-numbered idle unit. The task comes back
    /// when no unit can take it.
    fn dispatch(&self, state: &mut PoolState, mut task: Task) -> Option<Task> {
        let task_id = task.id;
        for unit_id in 0..state.units.len() {
            if state.units[unit_id].state != UnitState::Idle {
                continue;
            }
            match self.senders[unit_id].try_send(task) {
                Ok(()) => {
                    state.units[unit_id] = UnitSlot {
                        state: UnitState::Busy,
                        current_task: Some(task_id),
                    };
                    return None;
                }
                Err(TrySendError::Full(returned)) => task = returned,
                Err(TrySendError::Closed(returned)) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Unit {unit_id} channel closed, marking it terminated");
                    state.units[unit_id] = UnitSlot::TERMINATED;
                    task = returned;
                }
            }
        }
        Some(task)
    }

    fn finish(&self, unit_id: usize, kind: TaskKind, elapsed: Duration, result: TaskResult) {
        let mut state = self.state.lock();
        let Some(waiter) = state.outstanding.remove(&result.task_id) else {
            // Already failed by shutdown; the unit is terminated too.
            return;
        };
        if result.is_success() {
            state.completed += 1;
        } else {
            state.failed += 1;
        }

        let mut dequeued = false;
        let live = state
            .units
            .get(unit_id)
            .is_some_and(|slot| slot.state != UnitState::Terminated);
        if live {
            state.units[unit_id] = UnitSlot::IDLE;
            // A non-empty queue implies no other unit is idle, so the head
            // lands on the unit that just finished.
            if let Some(next) = state.pending.pop_front() {
                match self.dispatch(&mut state, next) {
                    Some(next) => state.pending.push_front(next),
                    None => dequeued = true,
                }
            }
        }
        let drained = state.outstanding.is_empty();
        self.publish(&state);
        drop(state);

        if dequeued {
            telemetry::adjust_queue_depth(-1);
        }
        telemetry::record_task_duration(kind, elapsed.as_secs_f64() * 1_000.0);
        match &result.outcome {
            Ok(_) => telemetry::increment_tasks_completed(kind),
            Err(err) => telemetry::increment_tasks_failed(kind, err),
        }

        if waiter.tx.send(result).is_err() {
            #[cfg(feature = "tracing")]
            tracing::trace!("Result of a {kind} task discarded, its handle was dropped");
        }
        if drained {
            self.drained.notify_waiters();
        }
    }

    pub(crate) fn cancel(&self, id: TaskId) -> bool {
        let mut state = self.state.lock();
        let Some(pos) = state.pending.iter().position(|task| task.id == id) else {
            return false;
        };
        state.pending.remove(pos);
        let waiter = state.outstanding.remove(&id);
        state.cancelled += 1;
        let drained = state.outstanding.is_empty();
        self.publish(&state);
        drop(state);

        #[cfg(feature = "tracing")]
        tracing::debug!("Task {id} cancelled before dispatch");
        telemetry::adjust_queue_depth(-1);
        telemetry::increment_tasks_cancelled();
        if let Some(waiter) = waiter {
            let _ = waiter.tx.send(TaskResult::failure(id, Error::Cancelled));
        }
        if drained {
            self.drained.notify_waiters();
        }
        true
    }

    /// Resolves once no task is outstanding.
    async fn wait_drained(&self) {
        loop {
            // Register before checking so a notification in between is not
            // lost.
            let notified = self.drained.notified();
            if self.state.lock().outstanding.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Fails every queued or running task with [`Error::ShutdownTimeout`] and
    /// retires every unit. Returns how many tasks were cut off.
    fn terminate(&self) -> usize {
        let mut state = self.state.lock();
        let queued = state.pending.len();
        state.pending.clear();
        state.units.fill(UnitSlot::TERMINATED);
        let mut leftovers: Vec<(TaskId, Waiter)> = state.outstanding.drain().collect();
        state.failed += leftovers.len() as u64;
        self.publish(&state);
        drop(state);

        telemetry::adjust_queue_depth(-(queued as i64));
        leftovers.sort_unstable_by_key(|(id, _)| *id);
        let abandoned = leftovers.len();
        for (id, waiter) in leftovers {
            telemetry::increment_tasks_failed(waiter.kind, &Error::ShutdownTimeout);
            let _ = waiter.tx.send(TaskResult::failure(id, Error::ShutdownTimeout));
        }
        self.drained.notify_waiters();
        abandoned
    }
}

/// Drains unit events into the shared state until shutdown.
async fn completion_loop(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<UnitEvent>) {
    loop {
        let event = tokio::select! {
            biased;
            () = shared.shutdown_token.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        match event {
            UnitEvent::Ready { .. } => {}
            UnitEvent::Finished {
                unit_id,
                kind,
                elapsed,
                result,
            } => shared.finish(unit_id, kind, elapsed, result),
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Completion loop stopped");
}

/// A fixed-size pool of computation units.
///
/// Tasks are validated at submission, dispatched idle-first, queued FIFO
/// when every unit is busy, and resolved through the returned
/// [`TaskHandle`]. A task that panics fails alone; its unit keeps serving.
///
/// Dropping the pool without calling [`WorkerPool::shutdown`] stops every
/// unit immediately and resolves outstanding handles with
/// [`Error::ChannelError`].
pub struct WorkerPool {
    shared: Arc<Shared>,
    units: Mutex<Vec<JoinHandle<()>>>,
    completion: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
    shutdown_lock: tokio::sync::Mutex<()>,
}

impl core::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Starts a pool that runs the built-in task protocol.
    ///
    /// # Errors
    ///
    /// See [`WorkerPool::with_executor`].
    pub async fn start(config: PoolConfig) -> Result<Self> {
        Self::with_executor(config, ProtocolExecutor).await
    }

    /// Starts `config.num_units` units running `executor` and returns once
    /// every unit has announced it is ready.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if the pool would have no units.
    /// - [`Error::ChannelError`] if a unit exits before announcing readiness.
    pub async fn with_executor<E: TaskExecutor>(config: PoolConfig, executor: E) -> Result<Self> {
        config.validate()?;
        let num_units = config.num_units;
        let executor: Arc<dyn TaskExecutor> = Arc::new(executor);
        let shutdown_token = CancellationToken::new();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let mut senders = Vec::with_capacity(num_units);
        let mut units = Vec::with_capacity(num_units);
        for unit_id in 0..num_units {
            // A unit only ever holds the task it is running: the manager
            // sends to idle units only, so one slot is enough.
            let (tx, rx) = mpsc::channel(1);
            senders.push(tx);
            units.push(tokio::spawn(unit_loop(
                unit_id,
                rx,
                events_tx.clone(),
                Arc::clone(&executor),
                shutdown_token.clone(),
            )));
        }
        drop(events_tx);

        let mut ready = vec![false; num_units];
        let mut waiting = num_units;
        while waiting > 0 {
            match events_rx.recv().await {
                Some(UnitEvent::Ready { unit_id }) => {
                    if !core::mem::replace(&mut ready[unit_id], true) {
                        waiting -= 1;
                    }
                }
                Some(UnitEvent::Finished { .. }) => {}
                None => {
                    shutdown_token.cancel();
                    return Err(Error::ChannelError {
                        context: "unit exited before announcing readiness".to_owned(),
                    });
                }
            }
        }

        let state = PoolState {
            units: vec![UnitSlot::IDLE; num_units],
            ..PoolState::default()
        };
        let shared = Arc::new(Shared {
            stats: AtomicCell::new(state.snapshot()),
            state: Mutex::new(state),
            senders,
            next_id: AtomicU64::new(1),
            drained: Notify::new(),
            shutdown_token,
        });
        let completion = tokio::spawn(completion_loop(Arc::clone(&shared), events_rx));

        #[cfg(feature = "tracing")]
        tracing::info!("Worker pool started with {num_units} units");

        Ok(Self {
            shared,
            units: Mutex::new(units),
            completion: Mutex::new(Some(completion)),
            shutdown_timeout: config.shutdown_timeout,
            shutdown_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Submits a task under a pool-assigned id.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if the payload fails its shape check.
    /// - [`Error::PoolClosed`] once shutdown has started.
    pub fn submit(&self, payload: TaskPayload) -> Result<TaskHandle> {
        self.shared.submit(None, payload)
    }

    /// Submits a task under a caller-chosen correlation id.
    ///
    /// # Errors
    ///
    /// As [`WorkerPool::submit`], plus [`Error::DuplicateTaskId`] if a task
    /// with `id` is still outstanding.
    pub fn submit_with_id(&self, id: TaskId, payload: TaskPayload) -> Result<TaskHandle> {
        self.shared.submit(Some(id), payload)
    }

    /// Decodes an untyped payload for the named kind, then submits it.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for an unknown kind or a payload that does not
    /// decode, otherwise as [`WorkerPool::submit`].
    pub fn submit_json(&self, kind: &str, payload: serde_json::Value) -> Result<TaskHandle> {
        let kind: TaskKind = kind.parse()?;
        self.submit(TaskPayload::from_json(kind, payload)?)
    }

    /// Cancels a task that is still queued. Returns `false` if the task is
    /// unknown, already running or already finished.
    pub fn cancel(&self, id: TaskId) -> bool {
        self.shared.cancel(id)
    }

    /// Utilisation snapshot. Never waits on pool activity.
    pub fn stats(&self) -> PoolStats {
        self.shared.stats.load()
    }

    /// Per-unit state, in unit order.
    pub fn units(&self) -> Vec<UnitInfo> {
        let state = self.shared.state.lock();
        state
            .units
            .iter()
            .enumerate()
            .map(|(unit_id, slot)| UnitInfo {
                unit_id,
                state: slot.state,
                current_task: slot.current_task,
            })
            .collect()
    }

    pub fn num_units(&self) -> usize {
        self.shared.senders.len()
    }

    /// Whether the pool has stopped accepting submissions.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Gracefully shuts the pool down.
    ///
    /// - Refuses new submissions ([`Error::PoolClosed`]).
    /// - Lets running and queued tasks finish, for up to the configured
    ///   shutdown timeout.
    /// - Fails anything still outstanding with [`Error::ShutdownTimeout`]
    ///   and marks every unit terminated.
    /// - Stops the unit tasks and waits (up to 3 seconds per unit) for them
    ///   to exit.
    ///
    /// Every handle is resolved when this returns. Calling it again is a
    /// no-op.
    pub async fn shutdown(&self) -> Result<()> {
        let _guard = self.shutdown_lock.lock().await;
        if self.shared.shutdown_token.is_cancelled() {
            return Ok(());
        }

        // === Phase 0: Stop accepting new tasks ===
        let _outstanding = {
            let mut state = self.shared.state.lock();
            state.closed = true;
            self.shared.publish(&state);
            state.outstanding.len()
        };
        #[cfg(feature = "tracing")]
        tracing::info!("Refusing new tasks, draining {_outstanding} outstanding");

        // === Phase 1: Wait for queued and running tasks ===
        match timeout(self.shutdown_timeout, self.shared.wait_drained()).await {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("All outstanding tasks drained");
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Drain timed out after {:?} ({} units busy, {} queued)",
                    self.shutdown_timeout,
                    self.stats().busy_units,
                    self.stats().queue_length
                );
            }
        }

        // === Phase 2: Fail leftovers and retire units ===
        let _abandoned = self.shared.terminate();
        #[cfg(feature = "tracing")]
        {
            if _abandoned > 0 {
                tracing::warn!("{_abandoned} tasks failed with ShutdownTimeout");
            }
        }

        // === Phase 3: Stop unit loops and the completion loop ===
        #[cfg(feature = "tracing")]
        tracing::debug!("Cancelling units via shutdown token");
        self.shared.shutdown_token.cancel();

        // === Phase 4: Wait for the tasks to exit ===
        let units = core::mem::take(&mut *self.units.lock());
        let completion = self.completion.lock().take();

        let joins = units.into_iter().enumerate().map(|(_i, handle)| async move {
            match timeout(UNIT_JOIN_TIMEOUT, handle).await {
                Ok(Ok(())) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Unit {_i} exited");
                }
                Ok(Err(_e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Unit {_i} task failed: {_e}");
                }
                Err(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Unit {_i} did not exit in time");
                }
            }
        });
        futures::future::join_all(joins).await;

        if let Some(handle) = completion {
            let _ = timeout(UNIT_JOIN_TIMEOUT, handle).await;
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Worker pool shutdown complete");

        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.shutdown_token.cancel();
    }
}
