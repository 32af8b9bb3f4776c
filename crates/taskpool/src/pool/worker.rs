//! Computation units.
//!
//! A unit is a Tokio task that owns a bounded receiver and an executor. It
//! pulls one [`Task`] at a time, runs it on the blocking thread pool and
//! reports the outcome to the manager's completion loop. Units never touch
//! pool state directly.

use core::{any::Any, time::Duration};
use std::sync::Arc;
use taskpool_core::{
    Error, Result, Task, TaskKind, TaskOutput, TaskPayload, TaskResult, protocol,
};
use tokio::{sync::mpsc, task::JoinError, time::Instant};
use tokio_util::sync::CancellationToken;

/// The work a unit performs on a payload.
///
/// Implementations must be pure with respect to the pool: everything they
/// need comes from the payload. A panic is contained by the unit and reported
/// as [`Error::ExecutionFault`].
pub trait TaskExecutor: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns the failure to deliver for this task, typically
    /// [`Error::UnsupportedOperation`].
    fn execute(&self, payload: &TaskPayload) -> Result<TaskOutput>;
}

/// Runs the built-in task protocol algorithms.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProtocolExecutor;

impl TaskExecutor for ProtocolExecutor {
    fn execute(&self, payload: &TaskPayload) -> Result<TaskOutput> {
        protocol::execute(payload)
    }
}

/// Messages from a unit to the manager.
#[derive(Debug)]
pub(crate) enum UnitEvent {
    /// The unit is listening and can take work.
    Ready { unit_id: usize },
    /// The unit finished a task and is free again.
    Finished {
        unit_id: usize,
        kind: TaskKind,
        elapsed: Duration,
        result: TaskResult,
    },
}

/// Unit task body.
///
/// Announces readiness, then serves tasks until the receiver closes, the
/// manager goes away, or `shutdown` is cancelled. A task that is still
/// running when `shutdown` fires is abandoned: its blocking thread runs to
/// completion but nobody reads the result.
pub(crate) async fn unit_loop(
    unit_id: usize,
    mut rx: mpsc::Receiver<Task>,
    events: mpsc::UnboundedSender<UnitEvent>,
    executor: Arc<dyn TaskExecutor>,
    shutdown: CancellationToken,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Unit {unit_id} started");

    if events.send(UnitEvent::Ready { unit_id }).is_err() {
        return;
    }

    loop {
        let task = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            task = rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };

        let task_id = task.id;
        let kind = task.kind();
        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Unit {unit_id} running task {task_id} ({kind}) after {:?} in queue",
            task.age()
        );

        let started = Instant::now();
        let executor = Arc::clone(&executor);
        let job = tokio::task::spawn_blocking(move || executor.execute(&task.payload));

        let outcome = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Unit {unit_id} abandoning task {task_id} on shutdown");
                break;
            }
            joined = job => joined.unwrap_or_else(|err| {
                let message = fault_message(err);
                #[cfg(feature = "tracing")]
                tracing::error!("Unit {unit_id} faulted on task {task_id}: {message}");
                Err(Error::ExecutionFault { message })
            }),
        };

        let elapsed = started.elapsed();
        #[cfg(feature = "tracing")]
        tracing::trace!("Unit {unit_id} finished task {task_id} in {elapsed:?}");

        let event = UnitEvent::Finished {
            unit_id,
            kind,
            elapsed,
            result: TaskResult { task_id, outcome },
        };
        if events.send(event).is_err() {
            break;
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Unit {unit_id} stopped");
}

fn fault_message(err: JoinError) -> String {
    if err.is_panic() {
        panic_message(err.into_panic())
    } else {
        err.to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("unit panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("unit panicked: {s}")
    } else {
        "unit panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskpool_core::{TaskId, protocol::hash::HashPayload};

    struct Exploding;

    impl TaskExecutor for Exploding {
        fn execute(&self, _payload: &TaskPayload) -> Result<TaskOutput> {
            panic!("kaboom");
        }
    }

    fn hash_task(id: u64, text: &str) -> Task {
        Task::new(
            TaskId::new(id),
            TaskPayload::Hash(HashPayload::new(text)),
        )
    }

    async fn start_unit(
        executor: Arc<dyn TaskExecutor>,
    ) -> (
        mpsc::Sender<Task>,
        mpsc::UnboundedReceiver<UnitEvent>,
        CancellationToken,
        tokio::task::JoinHandle<()>,
    ) {
        let (tx, rx) = mpsc::channel(1);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let handle = tokio::spawn(unit_loop(7, rx, events_tx, executor, token.clone()));
        assert!(matches!(
            events_rx.recv().await,
            Some(UnitEvent::Ready { unit_id: 7 })
        ));
        (tx, events_rx, token, handle)
    }

    #[tokio::test]
    async fn runs_tasks_and_reports_results() {
        let (tx, mut events, token, handle) = start_unit(Arc::new(ProtocolExecutor)).await;

        tx.send(hash_task(1, "hello")).await.unwrap();
        let Some(UnitEvent::Finished {
            unit_id,
            kind,
            result,
            ..
        }) = events.recv().await
        else {
            panic!("expected a finished event");
        };
        assert_eq!(unit_id, 7);
        assert_eq!(kind, TaskKind::Hash);
        assert_eq!(result.task_id, TaskId::new(1));
        assert!(result.is_success());

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn panics_become_execution_faults() {
        let (tx, mut events, token, handle) = start_unit(Arc::new(Exploding)).await;

        for id in 1..=2 {
            tx.send(hash_task(id, "x")).await.unwrap();
            let Some(UnitEvent::Finished { result, .. }) = events.recv().await else {
                panic!("expected a finished event");
            };
            assert_eq!(result.task_id, TaskId::new(id));
            let Err(Error::ExecutionFault { message }) = result.outcome else {
                panic!("expected an execution fault");
            };
            assert!(message.contains("kaboom"), "{message}");
        }

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stops_when_receiver_closes() {
        let (tx, _events, _token, handle) = start_unit(Arc::new(ProtocolExecutor)).await;
        drop(tx);
        handle.await.unwrap();
    }
}
