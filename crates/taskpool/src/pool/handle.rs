//! The caller side of a submitted task.

use crate::pool::manager::Shared;
use core::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use std::sync::Weak;
use taskpool_core::{Error, TaskId, TaskResult};
use tokio::sync::oneshot;

/// Pending result of a submitted task.
///
/// Resolves exactly once with the [`TaskResult`] tagged with this task's id,
/// whether the task succeeded, failed, was cancelled or was cut off by
/// shutdown. Dropping the handle does not cancel the task.
///
/// A handle holds only a weak reference to its pool, so outstanding handles
/// never keep a pool alive. If the pool is dropped without
/// [`shutdown`](crate::WorkerPool::shutdown), the handle resolves with
/// [`Error::ChannelError`].
#[must_use = "dropping a task handle discards the task's result"]
pub struct TaskHandle {
    id: TaskId,
    rx: oneshot::Receiver<TaskResult>,
    pool: Weak<Shared>,
}

impl TaskHandle {
    pub(crate) const fn new(id: TaskId, rx: oneshot::Receiver<TaskResult>, pool: Weak<Shared>) -> Self {
        Self { id, rx, pool }
    }

    /// Correlation id the pool assigned (or accepted) for this task.
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Removes the task from the queue if it has not been dispatched yet.
    ///
    /// Returns `true` if the task was cancelled; the handle then resolves
    /// with [`Error::Cancelled`]. Running and finished tasks are unaffected.
    pub fn cancel(&self) -> bool {
        self.pool
            .upgrade()
            .is_some_and(|pool| pool.cancel(self.id))
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Future for TaskHandle {
    type Output = TaskResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                TaskResult::failure(
                    id,
                    Error::ChannelError {
                        context: format!("pool dropped before task {id} resolved"),
                    },
                )
            })
        })
    }
}
