//! Request governor: rate-limited, retrying, cancellable execution queue.
//!
//! Every outbound API call goes through a [`RequestGovernor`]:
//! - FIFO queue of pending operations
//! - Rolling-window rate gate shared by every attempt
//! - Global concurrency ceiling
//! - Transparent retry of rate-limited and transient failures
//! - Live statistics for progress reporting
//! - Cooperative `stop()` and hard `reset()`
//!
//! # Example
//!
//! ```rust,ignore
//! use listedit_core::governor::{GovernorConfig, RequestGovernor};
//!
//! let governor = RequestGovernor::new(GovernorConfig::default())?;
//! let pending = governor.enqueue(|| async { client.update_entry(42, &changes).await });
//! pending.await?;
//! println!("{:?}", governor.statistics());
//! ```

mod config;
mod pending;
mod rate_window;
mod retry;
mod stats;

pub use config::{GovernorConfig, GovernorConfigUpdate, RateCapacity};
pub use pending::{PendingResult, RequestId};
pub use retry::BackoffPolicy;
pub use stats::Statistics;

use crate::classify::{DefaultClassifier, ErrorClassifier, RequestError};
use crate::error::{ListEditError, Result};
use futures::future::BoxFuture;
use rate_window::RateWindow;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Governor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernorState {
    /// Nothing queued or in flight.
    Idle,
    /// Dispatching queued work.
    Running,
    /// Stopped; dispatched operations are finishing, nothing new starts.
    Draining,
}

impl std::fmt::Display for GovernorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GovernorState::Idle => write!(f, "idle"),
            GovernorState::Running => write!(f, "running"),
            GovernorState::Draining => write!(f, "draining"),
        }
    }
}

/// Type-erased queued operation. Dropping it without running settles the
/// caller's handle as cancelled.
type Job = Box<dyn FnOnce(Dispatch) -> BoxFuture<'static, ()> + Send>;

struct QueueEntry {
    id: RequestId,
    job: Job,
}

/// Mutable governor state. Every read-modify-write happens under one lock
/// acquisition and never spans an await.
struct Inner {
    config: GovernorConfig,
    queue: VecDeque<QueueEntry>,
    window: RateWindow,
    active: usize,
    stats: Statistics,
    state: GovernorState,
    /// Bumped by `reset()`; settlements from an older epoch are ignored.
    epoch: u64,
    next_id: u64,
    stop_token: CancellationToken,
    /// A dispatch pass is running; nested triggers only set `rerun`.
    dispatching: bool,
    rerun: bool,
}

impl Inner {
    fn sync_queue_gauge(&mut self) {
        self.stats.current_queue_size = self.queue.len();
    }

    /// Install a fresh stop token once the previous stop has fully drained.
    fn become_idle(&mut self) {
        if self.stop_token.is_cancelled() {
            self.stop_token = CancellationToken::new();
        }
        self.state = GovernorState::Idle;
    }
}

pub(crate) struct Shared {
    inner: Mutex<Inner>,
    /// Fair lock serializing rate-gate passage in arrival order.
    gate: tokio::sync::Mutex<()>,
    idle: Notify,
    classifier: Arc<dyn ErrorClassifier>,
    runtime: Handle,
}

/// Per-dispatch context handed to a running job.
pub(crate) struct Dispatch {
    shared: Arc<Shared>,
    epoch: u64,
    id: RequestId,
    policy: BackoffPolicy,
}

impl Dispatch {
    /// Apply a statistics update unless a reset happened since dispatch.
    fn record(&self, update: impl FnOnce(&mut Statistics)) {
        let mut inner = self.shared.lock();
        if inner.epoch == self.epoch {
            update(&mut inner.stats);
        }
    }
}

/// Settles the dispatch slot when the job finishes or its task is torn down.
///
/// A task dropped before its job completed (runtime shutdown) only releases
/// its slot; it does not pull more work from the queue.
struct SettleGuard {
    shared: Arc<Shared>,
    epoch: u64,
    id: RequestId,
    completed: bool,
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        // A panicking operation still frees its slot for queued work.
        let redispatch = self.completed || std::thread::panicking();
        self.shared.settle(self.epoch, self.id, redispatch);
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start as many queued entries as the concurrency ceiling allows.
    ///
    /// Synchronous and idempotent: a pass that finds nothing to do returns.
    /// Only one pass runs at a time. A trigger that arrives while a pass is
    /// running (a settle from a task dropped during `spawn`) marks it for
    /// another round instead of recursing.
    fn dispatch_pass(self: &Arc<Self>) {
        {
            let mut inner = self.lock();
            if inner.dispatching {
                inner.rerun = true;
                return;
            }
            inner.dispatching = true;
        }

        loop {
            self.dispatch_ready();

            let mut inner = self.lock();
            if inner.rerun {
                inner.rerun = false;
            } else {
                inner.dispatching = false;
                return;
            }
        }
    }

    fn dispatch_ready(self: &Arc<Self>) {
        let ready: Vec<(QueueEntry, u64, BackoffPolicy, usize)> = {
            let mut inner = self.lock();
            let mut ready = Vec::new();
            while inner.state == GovernorState::Running
                && inner.active < inner.config.max_concurrent_requests
            {
                let Some(entry) = inner.queue.pop_front() else {
                    break;
                };
                inner.active += 1;
                inner.sync_queue_gauge();
                let policy = BackoffPolicy::from_config(&inner.config);
                ready.push((entry, inner.epoch, policy, inner.active));
            }
            ready
        };

        for (entry, epoch, policy, active) in ready {
            debug!("Dispatching request {} ({} active)", entry.id, active);
            let dispatch = Dispatch {
                shared: Arc::clone(self),
                epoch,
                id: entry.id,
                policy,
            };
            let mut guard = SettleGuard {
                shared: Arc::clone(self),
                epoch,
                id: entry.id,
                completed: false,
            };
            let job = entry.job;
            self.runtime.spawn(async move {
                job(dispatch).await;
                guard.completed = true;
            });
        }
    }

    /// Release a dispatch slot and, unless the task was torn down, pull more
    /// work from the queue.
    fn settle(self: &Arc<Self>, epoch: u64, id: RequestId, redispatch: bool) {
        {
            let mut inner = self.lock();
            if inner.epoch != epoch {
                debug!("Request {} settled after reset; ignoring", id);
                return;
            }
            inner.active = inner.active.saturating_sub(1);
            if inner.active == 0 && (inner.state == GovernorState::Draining || inner.queue.is_empty()) {
                if inner.state == GovernorState::Draining {
                    info!("Request governor drained");
                }
                inner.become_idle();
                self.idle.notify_waiters();
            }
        }
        if redispatch {
            self.dispatch_pass();
        } else {
            debug!("Request {} torn down before completion", id);
        }
    }

    /// Wait for a slot in the rolling rate window, then claim it.
    async fn pass_rate_gate(&self, id: RequestId) {
        let _turn = self.gate.lock().await;
        loop {
            let wait = {
                let mut inner = self.lock();
                let (capacity, span) = inner.config.rate_window();
                match inner.window.try_admit(Instant::now(), capacity, span) {
                    Ok(()) => return,
                    Err(wait) => wait,
                }
            };
            debug!("Rate gate full; request {} waits {:?}", id, wait);
            tokio::time::sleep(wait).await;
        }
    }
}

/// Admission-control and retry engine for outbound API operations.
///
/// Cloning yields another handle to the same governor.
#[derive(Clone)]
pub struct RequestGovernor {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RequestGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("RequestGovernor")
            .field("state", &inner.state)
            .field("queued", &inner.queue.len())
            .field("active", &inner.active)
            .field("window", &inner.window.len())
            .finish_non_exhaustive()
    }
}

impl RequestGovernor {
    /// Create a governor using the default failure classifier.
    ///
    /// Must be called from within a current-thread tokio runtime; operations
    /// run on it. Dispatch order relies on that runtime polling spawned tasks
    /// in spawn order, so multi-threaded runtimes are rejected.
    pub fn new(config: GovernorConfig) -> Result<Self> {
        Self::with_classifier(config, Arc::new(DefaultClassifier::new()))
    }

    /// Create a governor with a custom failure classifier.
    pub fn with_classifier(
        config: GovernorConfig,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| ListEditError::Config {
            message: format!("Request governor requires a tokio runtime: {}", e),
        })?;
        if runtime.runtime_flavor() != RuntimeFlavor::CurrentThread {
            return Err(ListEditError::Config {
                message: "Request governor requires a current-thread tokio runtime".to_string(),
            });
        }

        debug!(
            "Creating request governor: {} req/s, {} concurrent, {} retries",
            config.max_requests_per_second, config.max_concurrent_requests, config.max_retries
        );

        Ok(Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    config,
                    queue: VecDeque::new(),
                    window: RateWindow::new(),
                    active: 0,
                    stats: Statistics::default(),
                    state: GovernorState::Idle,
                    epoch: 0,
                    next_id: 0,
                    stop_token: CancellationToken::new(),
                    dispatching: false,
                    rerun: false,
                }),
                gate: tokio::sync::Mutex::new(()),
                idle: Notify::new(),
                classifier,
                runtime,
            }),
        })
    }

    /// Queue an operation and return a handle to its eventual outcome.
    ///
    /// Never fails synchronously. The operation is invoked once per attempt,
    /// so it must be re-runnable. While the governor is draining after
    /// `stop()`, the handle resolves to [`ListEditError::Cancelled`].
    pub fn enqueue<T, F, Fut>(&self, operation: F) -> PendingResult<T>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, RequestError>> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let mut operation = operation;
        let job: Job = Box::new(move |dispatch: Dispatch| {
            Box::pin(async move {
                let outcome = retry::run_with_retry(&dispatch, &mut operation).await;
                // The caller may have dropped its handle; the work still counted.
                let _ = sender.send(outcome);
            })
        });

        let (id, rejected) = {
            let mut inner = self.shared.lock();
            let id = RequestId(inner.next_id);
            inner.next_id += 1;

            if inner.state == GovernorState::Draining {
                (id, Some(job))
            } else {
                inner.queue.push_back(QueueEntry { id, job });
                inner.sync_queue_gauge();
                if inner.state == GovernorState::Idle {
                    inner.state = GovernorState::Running;
                }
                (id, None)
            }
        };

        if let Some(job) = rejected {
            debug!("Rejecting request {} while draining", id);
            drop(job);
        } else {
            debug!("Enqueued request {}", id);
            self.shared.dispatch_pass();
        }

        PendingResult::new(id, receiver)
    }

    /// Snapshot of the current statistics.
    pub fn statistics(&self) -> Statistics {
        self.shared.lock().stats.clone()
    }

    /// Snapshot of the current configuration.
    pub fn configuration(&self) -> GovernorConfig {
        self.shared.lock().config.clone()
    }

    /// Merge a partial configuration update.
    ///
    /// Rate and concurrency changes apply to future admission decisions;
    /// running operations keep the backoff policy they were dispatched with.
    pub fn update_configuration(&self, update: GovernorConfigUpdate) -> Result<GovernorConfig> {
        let merged = {
            let mut inner = self.shared.lock();
            let merged = inner.config.merged(&update)?;
            inner.config = merged.clone();
            merged
        };
        info!(
            "Request governor reconfigured: {} req/s, {} concurrent, {} retries",
            merged.max_requests_per_second, merged.max_concurrent_requests, merged.max_retries
        );
        // A raised concurrency ceiling may free slots right away.
        self.shared.dispatch_pass();
        Ok(merged)
    }

    pub fn state(&self) -> GovernorState {
        self.shared.lock().state
    }

    /// Operations dispatched and not yet settled.
    pub fn active_requests(&self) -> usize {
        self.shared.lock().active
    }

    /// Operations waiting for dispatch.
    pub fn queued_requests(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Token tripped by the next `stop()` or `reset()`.
    pub fn stop_token(&self) -> CancellationToken {
        self.shared.lock().stop_token.clone()
    }

    /// Abandon queued work and let dispatched operations finish.
    ///
    /// Queued handles resolve to [`ListEditError::Cancelled`]. Operations that
    /// already started, including their pending retries, run to completion.
    pub fn stop(&self) {
        let (abandoned, state) = {
            let mut inner = self.shared.lock();
            let abandoned: Vec<QueueEntry> = inner.queue.drain(..).collect();
            inner.sync_queue_gauge();
            inner.stop_token.cancel();
            if inner.active > 0 {
                inner.state = GovernorState::Draining;
            } else {
                inner.become_idle();
            }
            (abandoned, inner.state)
        };

        info!(
            "Request governor stopped: {} queued requests cancelled, now {}",
            abandoned.len(),
            state
        );
        drop(abandoned);
        if state == GovernorState::Idle {
            self.shared.idle.notify_waiters();
        }
    }

    /// Hard clear: drop queued work, zero statistics and forget in-flight slots.
    ///
    /// Intended for when nothing is in flight. Operations already dispatched
    /// keep running and still settle their own handles, but no longer count
    /// against the concurrency ceiling or the statistics.
    pub fn reset(&self) {
        let (abandoned, forgotten) = {
            let mut inner = self.shared.lock();
            let abandoned: Vec<QueueEntry> = inner.queue.drain(..).collect();
            let forgotten = inner.active;
            inner.window.clear();
            inner.active = 0;
            inner.stats = Statistics::default();
            inner.epoch += 1;
            inner.stop_token.cancel();
            inner.become_idle();
            (abandoned, forgotten)
        };

        info!(
            "Request governor reset: {} queued requests cancelled, {} in-flight forgotten",
            abandoned.len(),
            forgotten
        );
        drop(abandoned);
        self.shared.idle.notify_waiters();
    }

    /// Wait until nothing is queued or in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.state() == GovernorState::Idle {
                return;
            }
            notified.await;
        }
    }
}
