//! Timer registry and reconciliation sweep.
//!
//! Each scheduled post gets its own timer task that sleeps until the due
//! instant, runs an execution pass, and keeps looping while the engine
//! schedules retries. The sweep is the safety net: it periodically scans
//! the store for due posts whose timer was lost (process restart, spawn
//! failure) and fires them. Both paths funnel into
//! [`ExecutionEngine::execute`], whose atomic claim makes a duplicate
//! trigger harmless.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::{ExecutionEngine, ExecutionOutcome, PostStore, SchedulerError};

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// One armed timer. The generation distinguishes a task's own registration
/// from a replacement armed under the same post id.
struct TimerSlot {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Owns the per-post timers and the sweep loop.
pub struct Dispatcher {
    engine: Arc<ExecutionEngine>,
    store: Arc<dyn PostStore>,
    timers: Mutex<HashMap<String, TimerSlot>>,
    next_generation: AtomicU64,
    sweep_interval: Duration,
}

impl Dispatcher {
    pub fn new(engine: Arc<ExecutionEngine>, store: Arc<dyn PostStore>) -> Self {
        Self {
            engine,
            store,
            timers: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Arm (or re-arm) the timer for a post. A due time in the past fires
    /// immediately.
    ///
    /// The spawned task runs the whole execute-and-retry loop itself, so
    /// its registration stays visible (to the sweep and `active_timers`)
    /// across retry waits. On exit it removes its own slot, but only if the
    /// generation still matches: a replacement armed in the meantime must
    /// not be evicted by the outgoing task.
    pub async fn register(self: &Arc<Self>, id: &str, due_at: DateTime<Utc>) {
        let mut timers = self.timers.lock().await;
        if let Some(slot) = timers.remove(id) {
            slot.handle.abort();
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let dispatcher = Arc::clone(self);
        let post_id = id.to_string();
        let handle = tokio::spawn(async move {
            let mut due_at = due_at;
            loop {
                let wait = (due_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;
                match dispatcher.engine.execute(&post_id).await {
                    Ok(ExecutionOutcome::RetryScheduled(delay)) => {
                        due_at = Utc::now() + delay;
                    }
                    Ok(outcome) => {
                        tracing::debug!(post_id = %post_id, ?outcome, "execution pass done");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(post_id = %post_id, error = %e, "execution pass errored");
                        break;
                    }
                }
            }
            let mut timers = dispatcher.timers.lock().await;
            if timers
                .get(&post_id)
                .is_some_and(|slot| slot.generation == generation)
            {
                timers.remove(&post_id);
            }
        });
        timers.insert(id.to_string(), TimerSlot { generation, handle });
        tracing::debug!(post_id = %id, %due_at, "timer registered");
    }

    /// Disarm a post's timer, if one is armed.
    pub async fn unregister(&self, id: &str) {
        if let Some(slot) = self.timers.lock().await.remove(id) {
            slot.handle.abort();
            tracing::debug!(post_id = %id, "timer unregistered");
        }
    }

    pub async fn active_timers(&self) -> usize {
        self.timers.lock().await.len()
    }

    /// Rebuild the timer registry from the store. Called once at startup;
    /// posts that came due while the process was down fire immediately.
    pub async fn load_pending(self: &Arc<Self>) -> Result<usize, SchedulerError> {
        let pending = self.store.pending_posts().await?;
        let count = pending.len();
        for (id, due_at) in pending {
            self.register(&id, due_at).await;
        }
        tracing::info!(count, "loaded pending posts into timer registry");
        Ok(count)
    }

    /// Run the reconciliation sweep until shutdown is signalled.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = self.sweep_interval.as_secs(),
            "dispatcher sweep started"
        );
        let mut interval = tokio::time::interval(self.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Drop the in-process timers; pending posts are re-armed from the
        // store on the next startup.
        let mut timers = self.timers.lock().await;
        for (_, slot) in timers.drain() {
            slot.handle.abort();
        }
        tracing::info!("dispatcher stopped");
    }

    /// One sweep pass: fire every due post that has no armed timer.
    ///
    /// Posts with a live timer are left to it; the claim in the store keeps
    /// any double trigger to a single execution.
    pub async fn sweep(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let due = self.store.due_post_ids(Utc::now()).await?;
        if due.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = due.len(), "sweep found due posts");
        for id in due {
            if self.timers.lock().await.contains_key(&id) {
                continue;
            }
            tracing::info!(post_id = %id, "sweep firing post with no timer");
            self.fire(&id).await;
        }
        Ok(())
    }

    /// Run an execution pass and arm a timer if a retry came out of it.
    async fn fire(self: &Arc<Self>, id: &str) {
        match self.engine.execute(id).await {
            Ok(ExecutionOutcome::RetryScheduled(delay)) => {
                self.register(id, Utc::now() + delay).await;
            }
            Ok(outcome) => {
                tracing::debug!(post_id = %id, ?outcome, "execution pass done");
            }
            Err(e) => {
                tracing::error!(post_id = %id, error = %e, "execution pass errored");
            }
        }
    }
}
