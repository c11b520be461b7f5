//! Bounded-concurrency request queue with FIFO admission.
//!
//! Every outbound request is enqueued here. At most `max_concurrent` run at
//! once; the rest wait in arrival order and are started as running ones
//! settle. Results and errors reach the caller exactly as the operation
//! produced them.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use portal_core::config::QueueConfig;
use portal_core::Rejection;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Hands a settled result to the waiting caller.
type Deliver = Box<dyn FnOnce() + Send>;

/// A started operation. Resolves once the operation settles.
type Running = BoxFuture<'static, Deliver>;

enum Admit {
    Start(Option<Duration>),
    Reject(Rejection),
}

/// A queued item. Invoked exactly once, either to start the operation or to
/// reject it.
type Admission = Box<dyn FnOnce(Admit) -> Option<Running> + Send>;

struct QueueState {
    waiting: VecDeque<Admission>,
    active: usize,
    max_concurrent: usize,
    timeout: Option<Duration>,
}

/// FIFO request queue bounding the number of in-flight operations.
///
/// Cloning yields another handle onto the same queue. Must be used from
/// within a Tokio runtime: started operations run on spawned tasks.
#[derive(Clone)]
pub struct RequestQueue {
    state: Arc<Mutex<QueueState>>,
}

impl RequestQueue {
    /// Create a queue admitting at most `max_concurrent` operations at once.
    /// A bound of zero is raised to one.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                waiting: VecDeque::new(),
                active: 0,
                max_concurrent: clamp_bound(max_concurrent),
                timeout: None,
            })),
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.max_concurrent).with_timeout(config.request_timeout())
    }

    /// Fail running operations that have not settled after `timeout`,
    /// freeing their slot. `None` lets operations run indefinitely.
    pub fn with_timeout(self, timeout: Option<Duration>) -> Self {
        self.state.lock().timeout = timeout;
        self
    }

    /// Add `operation` to the tail of the queue.
    ///
    /// The item is queued immediately, not when the returned future is first
    /// polled, so admission order is call order. `operation` is invoked when
    /// the item is admitted. The returned future resolves with the
    /// operation's own result, or with a [`Rejection`] if the item was
    /// cleared, timed out, or its task died.
    pub fn enqueue<T, E, F, Fut>(
        &self,
        operation: F,
    ) -> impl Future<Output = Result<T, E>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<Rejection> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<Result<T, E>>();

        let admission: Admission = Box::new(move |admit: Admit| -> Option<Running> {
            match admit {
                Admit::Start(timeout) => {
                    let work = operation();
                    let running = async move {
                        let outcome = match timeout {
                            Some(limit) => tokio::time::timeout(limit, work)
                                .await
                                .unwrap_or_else(|_| Err(E::from(Rejection::TimedOut(limit)))),
                            None => work.await,
                        };
                        Box::new(move || {
                            let _ = tx.send(outcome);
                        }) as Deliver
                    };
                    Some(running.boxed())
                }
                Admit::Reject(rejection) => {
                    let _ = tx.send(Err(E::from(rejection)));
                    None
                }
            }
        });

        self.state.lock().waiting.push_back(admission);
        metrics::counter!("queue.enqueued").increment(1);
        self.process_queue();

        async move { rx.await.unwrap_or_else(|_| Err(E::from(Rejection::Aborted))) }
    }

    /// Start queued items, oldest first, while slots are free. Safe to call
    /// at any time; does nothing when the queue is empty or full.
    pub fn process_queue(&self) {
        let (admitted, timeout) = {
            let mut state = self.state.lock();
            let mut admitted = Vec::new();
            while state.active < state.max_concurrent {
                let Some(admission) = state.waiting.pop_front() else {
                    break;
                };
                state.active += 1;
                admitted.push((admission, SlotGuard::new(self.clone())));
            }
            record_gauges(&state);
            (admitted, state.timeout)
        };

        // Operations are invoked outside the lock so they may inspect the
        // queue. Each already holds its slot through its guard.
        let mut unused = Vec::new();
        for (admission, slot) in admitted {
            // A panic while building one operation drops only that item's
            // sender, so its caller alone sees `Rejection::Aborted`.
            match panic::catch_unwind(AssertUnwindSafe(|| admission(Admit::Start(timeout)))) {
                Ok(Some(running)) => {
                    tokio::spawn(async move {
                        let deliver = running.await;
                        // Release first so the next item is admitted before
                        // the caller observes this result.
                        drop(slot);
                        deliver();
                    });
                }
                Ok(None) => unused.push(slot),
                Err(_) => {
                    warn!("Queued operation panicked while starting");
                    unused.push(slot);
                }
            }
        }
        // Freed after the batch so later admissions start behind it.
        drop(unused);
    }

    /// Change the concurrency bound. Raising it admits waiting items at once;
    /// lowering it lets running items finish without starting new ones until
    /// the active count falls below the new bound.
    pub fn set_max_concurrent(&self, max_concurrent: usize) {
        let bound = clamp_bound(max_concurrent);
        let previous = std::mem::replace(&mut self.state.lock().max_concurrent, bound);
        debug!(previous = previous, max_concurrent = bound, "Queue bound changed");
        self.process_queue();
    }

    /// Reject every item that has not started with [`Rejection::Cleared`].
    /// Running items are unaffected. Returns the number rejected.
    pub fn clear(&self) -> usize {
        let drained: Vec<Admission> = {
            let mut state = self.state.lock();
            let drained = state.waiting.drain(..).collect();
            record_gauges(&state);
            drained
        };

        let count = drained.len();
        for admission in drained {
            admission(Admit::Reject(Rejection::Cleared));
        }
        if count > 0 {
            metrics::counter!("queue.cleared").increment(count as u64);
            debug!(rejected = count, "Request queue cleared");
        }
        count
    }

    /// Number of items waiting to start.
    pub fn queue_size(&self) -> usize {
        self.state.lock().waiting.len()
    }

    /// Number of items currently running.
    pub fn active_requests(&self) -> usize {
        self.state.lock().active
    }

    pub fn max_concurrent(&self) -> usize {
        self.state.lock().max_concurrent
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.state.lock().timeout
    }

    fn release_slot(&self) {
        {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
        }
        self.process_queue();
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RequestQueue")
            .field("waiting", &state.waiting.len())
            .field("active", &state.active)
            .field("max_concurrent", &state.max_concurrent)
            .field("timeout", &state.timeout)
            .finish()
    }
}

/// Holds one concurrency slot. Dropping it, on settlement or on unwind,
/// frees the slot and admits the next waiting item.
struct SlotGuard {
    queue: RequestQueue,
}

impl SlotGuard {
    fn new(queue: RequestQueue) -> Self {
        Self { queue }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.queue.release_slot();
    }
}

fn clamp_bound(max_concurrent: usize) -> usize {
    if max_concurrent == 0 {
        warn!("Queue bound of 0 would never admit requests, using 1");
        1
    } else {
        max_concurrent
    }
}

fn record_gauges(state: &QueueState) {
    metrics::gauge!("queue.active").set(state.active as f64);
    metrics::gauge!("queue.waiting").set(state.waiting.len() as f64);
}
