//! The UI execution context.
//!
//! A single looper task drains a FIFO queue of closures on a Tokio runtime,
//! so everything posted here runs one at a time and in posting order. Delayed
//! posts are timers that enqueue their closure when they elapse; cancelling a
//! [`Callback`] stops it even if the timer already fired and the closure is
//! waiting in the queue.

use log::{debug, error};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

type Runnable = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone)]
pub struct MainHandler {
    queue: mpsc::UnboundedSender<Runnable>,
    runtime: Handle,
}

/// A pending delayed post.
#[derive(Debug, Clone)]
pub struct Callback {
    cancelled: Arc<AtomicBool>,
    timer: AbortHandle,
}

impl Callback {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.timer.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl MainHandler {
    /// Starts a looper on the runtime of the calling task.
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn spawn() -> Self {
        Self::spawn_on(&Handle::current())
    }

    pub fn spawn_on(runtime: &Handle) -> Self {
        let (queue, mut rx) = mpsc::unbounded_channel::<Runnable>();
        runtime.spawn(async move {
            while let Some(task) = rx.recv().await {
                if catch_unwind(AssertUnwindSafe(task)).is_err() {
                    error!("Task posted to main handler panicked");
                }
            }
            debug!("Main looper stopped");
        });
        Self {
            queue,
            runtime: runtime.clone(),
        }
    }

    /// Queues `task` behind everything already posted. Returns `false` once
    /// the looper is gone.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.send(Box::new(task)).is_ok()
    }

    pub fn post_delayed<F>(&self, delay: Duration, task: F) -> Callback
    where
        F: FnOnce() + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let queue = self.queue.clone();

        let timer = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let guarded: Runnable = Box::new(move || {
                if !flag.load(Ordering::Acquire) {
                    task();
                }
            });
            if queue.send(guarded).is_err() {
                debug!("Main looper gone, dropping delayed task");
            }
        });

        Callback {
            cancelled,
            timer: timer.abort_handle(),
        }
    }

    pub fn remove_callbacks(&self, callback: &Callback) {
        callback.cancel();
    }

    /// Runs blocking work on a short-lived worker thread.
    pub fn run_on_worker<F, R>(&self, work: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.runtime.spawn_blocking(work)
    }
}
