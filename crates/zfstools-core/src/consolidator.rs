//! Apply a retention schedule to every matching dataset.
//!
//! Listings run concurrently, retention is evaluated per dataset through
//! [`crate::fanout`], and destroys run one at a time once every dataset has
//! been planned. Nothing is destroyed if any dataset fails to plan.

use crate::config::{ConsolidateConfig, Validate};
use crate::error::Result;
use crate::fanout;
use crate::gateway::CommandGateway;
use crate::naming::{Snapshot, Timestamp};
use crate::retention::compute_deletions_at;
use crate::zfs;
use std::sync::Arc;

/// Retention outcome for one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetConsolidation {
    /// Dataset name.
    pub dataset: String,
    /// Snapshots that follow the naming convention.
    pub snapshots: usize,
    /// Snapshots destroyed (or echoed in dry-run mode), most recent first.
    pub destroyed: Vec<Snapshot>,
}

impl DatasetConsolidation {
    /// Number of snapshots left after the run.
    pub fn kept(&self) -> usize {
        self.snapshots - self.destroyed.len()
    }
}

/// Summary of a consolidation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    /// Per-dataset outcome, by dataset name.
    pub datasets: Vec<DatasetConsolidation>,
    /// Whether destroys were only echoed.
    pub dry_run: bool,
}

impl ConsolidationReport {
    /// Total snapshots destroyed.
    pub fn destroyed_count(&self) -> usize {
        self.datasets.iter().map(|d| d.destroyed.len()).sum()
    }
}

/// Drives retention for a [`ConsolidateConfig`].
pub struct Consolidator<G: ?Sized> {
    gateway: Arc<G>,
    config: ConsolidateConfig,
}

impl<G: CommandGateway + ?Sized> Consolidator<G> {
    /// Create a consolidator for `config`.
    pub fn new(gateway: Arc<G>, config: ConsolidateConfig) -> Self {
        Self { gateway, config }
    }

    /// Consolidate with the current local time standing in for a missing anchor.
    pub async fn run(&self) -> Result<ConsolidationReport> {
        self.run_at(chrono::Local::now().naive_local()).await
    }

    /// Consolidate with `now` standing in for a missing anchor.
    pub async fn run_at(&self, now: Timestamp) -> Result<ConsolidationReport> {
        self.config.validate()?;
        let schedule = Arc::new(self.config.retention_schedule()?);
        let keep = Arc::new(self.config.do_not_delete_set());
        let naming = self.config.common.naming();
        let dry_run = self.config.common.dry_run();

        let (list_datasets, list_snapshots) = (zfs::list_datasets(), zfs::list_snapshots());
        let (datasets, snapshots) = tokio::try_join!(
            self.gateway.execute(&list_datasets, dry_run),
            self.gateway.execute(&list_snapshots, dry_run),
        )?;
        let datasets = zfs::filter_names(datasets.stdout_lines(), self.config.filter());
        let snapshot_lines = snapshots.stdout_lines();
        let snapshots = naming.parse_all(snapshot_lines.iter().map(String::as_str));
        let grouped = zfs::group_by_dataset(&datasets, snapshots);
        tracing::info!(
            datasets = grouped.len(),
            anchor = %schedule.anchor_or(now),
            "consolidating"
        );

        let planned = fanout::per_dataset(
            grouped.into_iter().collect(),
            self.config.common.max_concurrency,
            |dataset, owned: Vec<Snapshot>| {
                let schedule = Arc::clone(&schedule);
                let keep = Arc::clone(&keep);
                async move {
                    let destroyed = compute_deletions_at(&schedule, &keep, &owned, now)?;
                    Ok(DatasetConsolidation {
                        dataset,
                        snapshots: owned.len(),
                        destroyed,
                    })
                }
            },
        )
        .await?;

        let mut queue: Vec<&Snapshot> = planned.values().flat_map(|d| &d.destroyed).collect();
        queue.sort_by(|a, b| a.name.cmp(&b.name));
        for snapshot in queue {
            self.gateway
                .execute(&zfs::destroy(&snapshot.name), dry_run)
                .await?;
        }

        let report = ConsolidationReport {
            datasets: planned.into_values().collect(),
            dry_run,
        };
        for dataset in &report.datasets {
            tracing::info!(
                dataset = %dataset.dataset,
                kept = dataset.kept(),
                destroyed = dataset.destroyed.len(),
                "dataset consolidated"
            );
        }
        Ok(report)
    }
}
