//! Periodic freshness evaluation.

use std::sync::Arc;
use std::time::Duration;

use automat_core::{AssetGraph, CheckSeverity, CheckStatus, FreshnessCheckSpec, Time};
use automat_storage::{Result, UpdateIndex};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::{FreshnessEvaluator, FreshnessSummary};

/// Runs every freshness check on a fixed cadence and stores the results.
pub struct FreshnessRunner {
    index: Arc<dyn UpdateIndex>,
    graph: Arc<AssetGraph>,
    checks: Arc<Vec<FreshnessCheckSpec>>,
    evaluator: FreshnessEvaluator,
    interval: Duration,
}

impl FreshnessRunner {
    /// Create a runner.
    pub fn new(index: Arc<dyn UpdateIndex>, graph: Arc<AssetGraph>, checks: Arc<Vec<FreshnessCheckSpec>>) -> Self {
        Self {
            index,
            graph,
            checks,
            evaluator: FreshnessEvaluator::new(),
            interval: Duration::from_secs(60),
        }
    }

    /// Set the evaluation cadence, at least one second.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_secs(1));
        self
    }

    /// Evaluate all checks once and persist the results.
    pub async fn run_once(&self, now: Time) -> Result<FreshnessSummary> {
        let snapshot = self.index.snapshot().await?;
        let summary = self.evaluator.evaluate_all(&self.checks, &self.graph, &snapshot, now);

        for result in &summary.results {
            self.index.save_check_result(result).await?;

            if result.status == CheckStatus::Overdue {
                match result.severity {
                    CheckSeverity::Warn => warn!(
                        "Freshness check {} overdue for {}: {}",
                        result.check, result.asset_partition, result.description
                    ),
                    CheckSeverity::Error => error!(
                        "Freshness check {} overdue for {}: {}",
                        result.check, result.asset_partition, result.description
                    ),
                }
            }
        }

        info!(
            "Evaluated {} freshness result(s): {} overdue, {} indeterminate",
            summary.results.len(),
            summary.with_status(CheckStatus::Overdue).count(),
            summary.with_status(CheckStatus::Indeterminate).count()
        );
        Ok(summary)
    }

    /// Evaluate on every interval until `shutdown` flips to true.
    ///
    /// Storage errors are logged and the next round stays scheduled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once(chrono::Utc::now()).await {
                        error!("Freshness evaluation failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Freshness runner stopping");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use automat_core::{AssetNode, AssetPartition, CheckTarget};
    use automat_storage::MemoryIndex;

    fn t(s: &str) -> Time {
        s.parse().unwrap()
    }

    fn runner(index: Arc<MemoryIndex>) -> FreshnessRunner {
        let graph = AssetGraph::builder().add_asset(AssetNode::new("orders")).build().unwrap();
        let checks = vec![FreshnessCheckSpec::last_update_within(
            "orders_fresh",
            CheckTarget::Asset("orders".into()),
            chrono::Duration::hours(1),
        )
        .with_severity(CheckSeverity::Error)
        .blocking()];
        FreshnessRunner::new(index, Arc::new(graph), Arc::new(checks))
    }

    #[tokio::test]
    async fn test_run_once_persists_results() {
        let index = Arc::new(MemoryIndex::new());
        let runner = runner(Arc::clone(&index));

        let summary = runner.run_once(t("2024-01-04T12:00:00Z")).await.unwrap();
        assert!(!summary.passed());

        let stored = index.check_results().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].blocks_downstream());

        // Refreshing the asset clears the failure on the next round
        index
            .record_materialization(
                &AssetPartition::unpartitioned("orders"),
                t("2024-01-04T12:10:00Z"),
                None,
            )
            .await
            .unwrap();
        let summary = runner.run_once(t("2024-01-04T12:15:00Z")).await.unwrap();
        assert!(summary.passed());

        let stored = index.check_results().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, CheckStatus::Fresh);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let index = Arc::new(MemoryIndex::new());
        // A zero cadence is raised to one second instead of panicking the ticker
        let runner = runner(index).with_interval(Duration::ZERO);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { runner.run(rx).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
