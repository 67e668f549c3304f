// Background re-probe of deferred operations
//
// Operations left in PROCESSING because KOS was degraded are asked about
// again on a fixed interval until KOS settles them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use phonebill_resilience::{AsyncOperation, AsyncOperationTracker};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::domain::ProcessStatus;
use crate::orchestrator::OrchestratorError;

/// Re-probes one operation type
#[async_trait]
pub trait StatusProbe: Send + Sync {
    /// Operation name the probe handles
    fn operation(&self) -> &'static str;

    /// Ask KOS about `record` and persist any transition
    async fn probe(&self, record: &AsyncOperation) -> Result<ProcessStatus, OrchestratorError>;
}

/// Totals for one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub examined: usize,
    pub completed: usize,
    pub failed: usize,
    pub still_processing: usize,
    pub errors: usize,
}

pub struct Reconciler {
    tracker: Arc<AsyncOperationTracker>,
    probes: Vec<Arc<dyn StatusProbe>>,
    interval: Duration,
    batch_size: usize,
}

impl Reconciler {
    pub fn new(tracker: Arc<AsyncOperationTracker>, interval: Duration, batch_size: usize) -> Self {
        Self {
            tracker,
            probes: Vec::new(),
            interval,
            batch_size: batch_size.max(1),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn StatusProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    /// Probe every PROCESSING operation once, oldest first
    pub async fn run_once(&self) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        for probe in &self.probes {
            let pending = match self
                .tracker
                .list_processing(probe.operation(), self.batch_size)
                .await
            {
                Ok(pending) => pending,
                Err(e) => {
                    error!(operation = probe.operation(), error = %e, "listing processing operations failed");
                    stats.errors += 1;
                    continue;
                }
            };

            for record in &pending {
                stats.examined += 1;
                match probe.probe(record).await {
                    Ok(ProcessStatus::Completed) => stats.completed += 1,
                    Ok(ProcessStatus::Failed) => stats.failed += 1,
                    Ok(ProcessStatus::Processing) => stats.still_processing += 1,
                    Err(e) => {
                        warn!(request_id = %record.request_id, error = %e, "re-probe failed");
                        stats.errors += 1;
                    }
                }
            }
        }

        if stats.examined > 0 {
            info!(
                examined = stats.examined,
                completed = stats.completed,
                failed = stats.failed,
                still_processing = stats.still_processing,
                errors = stats.errors,
                "reconciliation pass finished"
            );
        }
        stats
    }

    /// Run passes until `shutdown` flips
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_ms = self.interval.as_millis() as u64, "reconciler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                _ = shutdown.changed() => {
                    debug!("Reconciler: shutdown requested");
                    break;
                }
            }
        }

        info!("reconciler stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use phonebill_resilience::{InMemoryOperationStore, OperationStatus};

    use super::*;

    /// Completes even-numbered requests, leaves the rest pending
    struct EvenCompletes {
        tracker: Arc<AsyncOperationTracker>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StatusProbe for EvenCompletes {
        fn operation(&self) -> &'static str {
            "bill_inquiry"
        }

        async fn probe(&self, record: &AsyncOperation) -> Result<ProcessStatus, OrchestratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let n: u32 = record.request_id.trim_start_matches("REQ_").parse().unwrap();
            if n % 2 == 0 {
                self.tracker
                    .complete(&record.request_id, serde_json::json!({}))
                    .await?;
                Ok(ProcessStatus::Completed)
            } else {
                Ok(ProcessStatus::Processing)
            }
        }
    }

    async fn seeded_tracker() -> Arc<AsyncOperationTracker> {
        let tracker = Arc::new(AsyncOperationTracker::new(Arc::new(
            InMemoryOperationStore::new(),
        )));
        for n in 0..4 {
            let id = format!("REQ_{n}");
            tracker.create(&id, "bill_inquiry", "k").await.unwrap();
            tracker.mark_processing(&id).await.unwrap();
        }
        // Other operation types and states are not probed
        tracker.create("REQ_9", "product_change", "k").await.unwrap();
        tracker.mark_processing("REQ_9").await.unwrap();
        tracker.create("REQ_8", "bill_inquiry", "k").await.unwrap();
        tracker
    }

    #[tokio::test]
    async fn test_run_once() {
        let tracker = seeded_tracker().await;
        let probe = Arc::new(EvenCompletes {
            tracker: tracker.clone(),
            calls: AtomicUsize::new(0),
        });
        let reconciler =
            Reconciler::new(tracker.clone(), Duration::from_secs(30), 100).with_probe(probe.clone());

        let stats = reconciler.run_once().await;
        assert_eq!(stats.examined, 4);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.still_processing, 2);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);

        assert_eq!(
            tracker.query("REQ_2").await.unwrap().status,
            OperationStatus::Completed
        );

        // Settled operations drop out of the next pass
        let stats = reconciler.run_once().await;
        assert_eq!(stats.examined, 2);
    }

    #[tokio::test]
    async fn test_batch_size_limits_pass() {
        let tracker = seeded_tracker().await;
        let probe = Arc::new(EvenCompletes {
            tracker: tracker.clone(),
            calls: AtomicUsize::new(0),
        });
        let reconciler =
            Reconciler::new(tracker, Duration::from_secs(30), 3).with_probe(probe.clone());

        assert_eq!(reconciler.run_once().await.examined, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let tracker = seeded_tracker().await;
        let probe = Arc::new(EvenCompletes {
            tracker: tracker.clone(),
            calls: AtomicUsize::new(0),
        });
        let reconciler =
            Reconciler::new(tracker, Duration::from_secs(30), 100).with_probe(probe.clone());

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(reconciler.run(rx));

        // First tick fires immediately
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
