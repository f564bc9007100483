//! Reconciliation loop and scheduler
//!
//! Every pass lists the stored requests and drives each one a single step
//! through [`OpsManager::process`]. A step that asks to be requeued sets a
//! per-request deadline; passes skip requests whose deadline has not come
//! yet and short deadlines wake the loop early.

use crate::config::SchedulerConfig;
use crate::error::DaemonResult;
use dashmap::DashMap;
use dbops_engine::{EventRecorder, OpsManager, Step};
use dbops_types::{EventSeverity, ObjectKey};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant};

/// Counters for one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Requests stepped in this pass
    pub processed: usize,
    /// Requests that reported terminal or gone
    pub done: usize,
    /// Requests skipped because their requeue deadline is in the future
    pub deferred: usize,
    /// Steps that returned an error
    pub errors: usize,
}

/// Scheduler state
pub struct Scheduler {
    config: SchedulerConfig,
    manager: Arc<OpsManager>,
    reconcile_tx: mpsc::Sender<()>,
    running: Arc<RwLock<bool>>,
    permits: Arc<Semaphore>,
    deadlines: DashMap<ObjectKey, Instant>,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(
        config: SchedulerConfig,
        manager: Arc<OpsManager>,
    ) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (reconcile_tx, reconcile_rx) = mpsc::channel(10);
        let permits = Arc::new(Semaphore::new(config.max_concurrent_reconciliations.max(1)));

        let scheduler = Arc::new(Self {
            config,
            manager,
            reconcile_tx,
            running: Arc::new(RwLock::new(false)),
            permits,
            deadlines: DashMap::new(),
        });

        (scheduler, reconcile_rx)
    }

    /// Trigger an immediate reconciliation
    pub async fn trigger_reconcile(&self) {
        let _ = self.reconcile_tx.send(()).await;
    }

    /// Run the reconciliation loop until [`Scheduler::stop`] is called
    pub async fn start(self: Arc<Self>, mut reconcile_rx: mpsc::Receiver<()>) {
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        tracing::info!(
            interval_secs = self.config.reconcile_interval_secs,
            max_concurrent = self.config.max_concurrent_reconciliations,
            "Scheduler started"
        );

        let mut interval = interval(Duration::from_secs(
            self.config.reconcile_interval_secs.max(1),
        ));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.reconcile().await {
                        tracing::error!(error = %e, "Reconciliation failed");
                    }
                }
                Some(_) = reconcile_rx.recv() => {
                    if let Err(e) = self.reconcile().await {
                        tracing::error!(error = %e, "Triggered reconciliation failed");
                    }
                }
                else => break,
            }

            let running = self.running.read().await;
            if !*running {
                break;
            }
        }

        tracing::info!("Scheduler stopped");
    }

    /// Stop the scheduler after the pass in progress
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    /// Step every request that is due, at most `max_concurrent_reconciliations` at a time
    pub async fn reconcile(self: &Arc<Self>) -> DaemonResult<PassSummary> {
        let keys = self
            .manager
            .list_keys(self.config.namespace.as_deref())
            .await?;
        let now = Instant::now();

        let mut summary = PassSummary::default();
        let mut tasks = Vec::with_capacity(keys.len());
        for key in keys {
            let due = self.deadlines.get(&key).map_or(true, |deadline| *deadline <= now);
            if !due {
                summary.deferred += 1;
                continue;
            }
            let scheduler = self.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = scheduler.permits.clone().acquire_owned().await.ok();
                let result = scheduler.manager.process(&key).await;
                (key, result)
            }));
        }

        let mut next_wake: Option<Duration> = None;
        for joined in join_all(tasks).await {
            let (key, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(error = %e, "Reconciliation task panicked");
                    summary.errors += 1;
                    continue;
                }
            };
            summary.processed += 1;
            match result {
                Ok(Step::Done) => {
                    self.deadlines.remove(&key);
                    summary.done += 1;
                }
                Ok(Step::Idle) => {
                    self.deadlines.remove(&key);
                }
                Ok(Step::RequeueAfter(delay)) => {
                    self.deadlines.insert(key, Instant::now() + delay);
                    next_wake = Some(next_wake.map_or(delay, |d| d.min(delay)));
                }
                Err(e) => {
                    tracing::warn!(ops = %key, error = %e, kind = ?e.kind(), "Reconcile step failed");
                    self.deadlines.remove(&key);
                    summary.errors += 1;
                }
            }
        }

        tracing::debug!(
            processed = summary.processed,
            done = summary.done,
            deferred = summary.deferred,
            errors = summary.errors,
            "Reconciliation pass finished"
        );

        if let Some(delay) = next_wake {
            if delay < Duration::from_secs(self.config.reconcile_interval_secs) {
                self.wake_after(delay);
            }
        }
        Ok(summary)
    }

    /// Queue a pass once `delay` has elapsed
    fn wake_after(&self, delay: Duration) {
        let tx = self.reconcile_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A full channel already has a pass pending
            let _ = tx.try_send(());
        });
    }
}

/// Log every request event until the recorder is dropped
pub fn spawn_event_logger(events: &EventRecorder) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => match envelope.severity {
                    EventSeverity::Warning => tracing::warn!(
                        ops = %envelope.object.key,
                        event = ?envelope.event,
                        "OpsRequest event"
                    ),
                    EventSeverity::Normal => tracing::info!(
                        ops = %envelope.object.key,
                        event = ?envelope.event,
                        "OpsRequest event"
                    ),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event logger lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
