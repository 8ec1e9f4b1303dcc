//! Supervised background tasks.
//!
//! Reader loops, per-frame dispatch, handler invocations, deferred display
//! updates and idle timers all run detached from whoever started them. A
//! [`Supervisor`] spawns them on the tokio runtime and keeps track of them:
//!
//! * a task that returns `Err` has its error logged under the task name
//! * a task that panics has the panic caught and logged
//! * [`Supervisor::quiesce`] waits until every tracked task has finished
//!
//! Nothing is ever propagated out of a supervised task; there is no one to
//! propagate it to.

use std::{any::Any, borrow::Cow, future::Future, panic::AssertUnwindSafe};

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::error::Result;

/// Tracks detached tasks of one component.
#[derive(Clone, Debug, Default)]
pub struct Supervisor {
    tracker: TaskTracker,
}

impl Supervisor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `future` as a tracked task named `name`.
    ///
    /// The returned handle may be used to abort the task. Dropping it
    /// detaches the task, which keeps running and remains tracked.
    pub fn spawn<N, F>(&self, name: N, future: F) -> JoinHandle<()>
    where
        N: Into<Cow<'static, str>>,
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        self.tracker.spawn(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(())) => trace!("{name}: finished"),
                Ok(Err(e)) => error!("{name}: {e}"),
                Err(panic) => error!("{name}: panicked: {}", panic_message(&*panic)),
            }
        })
    }

    /// Number of tracked tasks that have not finished yet.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Waits until all tracked tasks have finished, including tasks spawned
    /// while waiting.
    ///
    /// New tasks may be spawned again after this returns.
    pub async fn quiesce(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}
