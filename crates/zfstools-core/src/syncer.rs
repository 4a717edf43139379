//! Replicate matching datasets to a remote host over SSH.
//!
//! Local datasets, local snapshots and remote snapshots are listed
//! concurrently; each dataset is planned and its chain verified in parallel.
//! Execution is strictly sequential: datasets in name order, and within a
//! dataset every remote orphan is destroyed before the first send.

use crate::config::{SyncConfig, Validate};
use crate::error::Result;
use crate::fanout;
use crate::gateway::CommandGateway;
use crate::naming::Snapshot;
use crate::replication::{compute_plan, ReplicationPlan};
use crate::zfs;
use std::sync::Arc;

/// Replication outcome for one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSync {
    /// Dataset name.
    pub dataset: String,
    /// The executed plan.
    pub plan: ReplicationPlan,
}

/// Summary of a sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Per-dataset plans, by dataset name.
    pub datasets: Vec<DatasetSync>,
    /// Mutating commands issued (echoed in dry-run mode).
    pub commands: usize,
    /// Whether mutating commands were only echoed.
    pub dry_run: bool,
}

impl SyncReport {
    /// Datasets that needed no work.
    pub fn in_sync(&self) -> impl Iterator<Item = &str> {
        self.datasets
            .iter()
            .filter(|d| d.plan.is_empty())
            .map(|d| d.dataset.as_str())
    }
}

struct Sides {
    local: Vec<Snapshot>,
    remote: Vec<Snapshot>,
}

/// Drives replication for a [`SyncConfig`].
pub struct Syncer<G: ?Sized> {
    gateway: Arc<G>,
    config: SyncConfig,
}

impl<G: CommandGateway + ?Sized> Syncer<G> {
    /// Create a syncer for `config`.
    pub fn new(gateway: Arc<G>, config: SyncConfig) -> Self {
        Self { gateway, config }
    }

    /// Plan and execute replication.
    pub async fn run(&self) -> Result<SyncReport> {
        self.config.validate()?;
        let remote = &self.config.remote;
        let naming = self.config.common.naming();
        let dry_run = self.config.common.dry_run();

        let (list_datasets, list_snapshots) = (zfs::list_datasets(), zfs::list_snapshots());
        let list_remote = remote.wrap(&list_snapshots);
        let (datasets, local, remote_listing) = tokio::try_join!(
            self.gateway.execute(&list_datasets, dry_run),
            self.gateway.execute(&list_snapshots, dry_run),
            self.gateway.execute(&list_remote, dry_run),
        )?;
        let datasets = zfs::filter_names(datasets.stdout_lines(), self.config.filter());
        let local_lines = local.stdout_lines();
        let remote_lines = remote_listing.stdout_lines();
        let mut local = zfs::group_by_dataset(
            &datasets,
            naming.parse_all(local_lines.iter().map(String::as_str)),
        );
        let mut remote_snaps = zfs::group_by_dataset(
            &datasets,
            naming.parse_all(remote_lines.iter().map(String::as_str)),
        );
        let inputs: Vec<(String, Sides)> = datasets
            .iter()
            .map(|d| {
                let sides = Sides {
                    local: local.remove(d).unwrap_or_default(),
                    remote: remote_snaps.remove(d).unwrap_or_default(),
                };
                (d.clone(), sides)
            })
            .collect();
        tracing::info!(datasets = inputs.len(), host = %remote.host, "planning sync");

        let plans = fanout::per_dataset(
            inputs,
            self.config.common.max_concurrency,
            |dataset, sides: Sides| async move {
                let plan = compute_plan(&sides.local, &sides.remote);
                plan.verify_chain(&sides.remote)?;
                tracing::debug!(
                    dataset = %dataset,
                    destroy = plan.destroy_remote.len(),
                    send = plan.send_queue.len(),
                    baseline = ?plan.common_baseline.as_ref().map(|s| s.name.as_str()),
                    "dataset planned"
                );
                Ok(plan)
            },
        )
        .await?;

        let mut report = SyncReport {
            dry_run,
            ..SyncReport::default()
        };
        for (dataset, plan) in plans {
            for orphan in &plan.destroy_remote {
                self.gateway
                    .execute(&remote.wrap(&zfs::destroy(&orphan.name)), dry_run)
                    .await?;
                report.commands += 1;
            }
            for step in &plan.send_queue {
                self.gateway
                    .execute(&zfs::send(step, remote), dry_run)
                    .await?;
                report.commands += 1;
            }
            tracing::info!(
                dataset = %dataset,
                destroyed = plan.destroy_remote.len(),
                sent = plan.send_queue.len(),
                "dataset synced"
            );
            report.datasets.push(DatasetSync { dataset, plan });
        }
        Ok(report)
    }
}
