use std::collections::VecDeque;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{sleep, Instant};
use tracing::trace;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Clone)]
pub struct RequestThrottle {
    inner: Arc<ThrottleInner>,
}

struct ThrottleInner {
    min_interval: Duration,
    state: Mutex<ThrottleState>,
}

#[derive(Default)]
struct ThrottleState {
    queue: VecDeque<Job>,
    draining: bool,
    last_start: Option<Instant>,
}

impl RequestThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            inner: Arc::new(ThrottleInner {
                min_interval,
                state: Mutex::new(ThrottleState::default()),
            }),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.inner.min_interval
    }

    pub fn queue_length(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Queues `task` and resolves with its output once it has run. A task
    /// discarded by [`clear`](Self::clear) never resolves.
    pub async fn execute<F, Fut, T>(&self, task: F) -> T
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            async move {
                // a panicking task must not take the drain loop down with it
                let output = AssertUnwindSafe(async move { task().await })
                    .catch_unwind()
                    .await;
                let _ = tx.send(output);
            }
            .boxed()
        });

        let start_drain = {
            let mut state = self.inner.state.lock();
            state.queue.push_back(job);
            !std::mem::replace(&mut state.draining, true)
        };
        if start_drain {
            tokio::spawn(drain(Arc::clone(&self.inner)));
        }

        match rx.await {
            Ok(Ok(output)) => output,
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => std::future::pending().await,
        }
    }

    pub fn clear(&self) {
        let dropped = {
            let mut state = self.inner.state.lock();
            std::mem::take(&mut state.queue)
        };
        trace!(target: "throttle", dropped = dropped.len(), "cleared pending tasks");
    }
}

async fn drain(inner: Arc<ThrottleInner>) {
    loop {
        let wait = {
            let state = inner.state.lock();
            state
                .last_start
                .map(|prev| inner.min_interval.saturating_sub(prev.elapsed()))
                .unwrap_or(Duration::ZERO)
        };
        if !wait.is_zero() {
            sleep(wait).await;
        }

        let job = {
            let mut state = inner.state.lock();
            match state.queue.pop_front() {
                Some(job) => {
                    state.last_start = Some(Instant::now());
                    job
                }
                None => {
                    state.draining = false;
                    return;
                }
            }
        };
        job().await;
    }
}
