//! Debounce/coalescing utility.
//!
//! A [`Debounced`] wraps a zero-argument async side effect. Every call made
//! while a window is open joins that window and pushes its deadline back;
//! when the deadline finally passes the task runs once and every caller in
//! the window receives the same outcome.
//!
//! Calls made while the task is already running open a fresh window, so
//! state mutated during a save is picked up by the next save.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::lock;

type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Coalescing task handle. Cloning shares the same window.
#[derive(Clone)]
pub struct Debounced {
    inner: Arc<DebouncedInner>,
}

struct DebouncedInner {
    delay: Duration,
    task: TaskFn,
    window: Mutex<Option<Window>>,
}

/// An open coalescing window: pending callers plus the current deadline.
struct Window {
    deadline: Instant,
    waiters: Vec<oneshot::Sender<Result<()>>>,
}

impl Debounced {
    /// Wrap `task` so calls within `delay` of each other collapse into one run.
    pub fn new<F, Fut>(delay: Duration, task: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            inner: Arc::new(DebouncedInner {
                delay,
                task: Arc::new(move || task().boxed()),
                window: Mutex::new(None),
            }),
        }
    }

    /// Join (or open) the current window.
    ///
    /// Registration happens synchronously; the returned future only waits
    /// for the outcome, so dropping it does not cancel the execution.
    /// Must be called from within a tokio runtime.
    pub fn call(&self) -> impl Future<Output = Result<()>> + Send + use<> {
        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + self.inner.delay;

        let opened = {
            let mut window = lock(&self.inner.window);
            match window.as_mut() {
                Some(open) => {
                    open.deadline = deadline;
                    open.waiters.push(tx);
                    false
                }
                None => {
                    *window = Some(Window {
                        deadline,
                        waiters: vec![tx],
                    });
                    true
                }
            }
        };

        if opened {
            tokio::spawn(run_window(Arc::clone(&self.inner)));
        }

        async move { rx.await.unwrap_or(Err(Error::Cancelled)) }
    }

    /// Whether a window is currently open (a run is scheduled but not started).
    pub fn is_pending(&self) -> bool {
        lock(&self.inner.window).is_some()
    }
}

impl std::fmt::Debug for Debounced {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debounced")
            .field("delay", &self.inner.delay)
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// Timer loop for one window: sleep until the (possibly pushed back)
/// deadline, then close the window and run the task once.
async fn run_window(inner: Arc<DebouncedInner>) {
    loop {
        let deadline = match lock(&inner.window).as_ref() {
            Some(window) => window.deadline,
            None => return,
        };

        tokio::time::sleep_until(deadline).await;

        let waiters = {
            let mut window = lock(&inner.window);
            match window.as_ref() {
                Some(open) if open.deadline > Instant::now() => continue,
                Some(_) => window.take().map(|w| w.waiters).unwrap_or_default(),
                None => return,
            }
        };

        let outcome = (inner.task)().await;
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        return;
    }
}
