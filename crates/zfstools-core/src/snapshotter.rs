//! Take a timestamped snapshot of one dataset.

use crate::config::{SnapshotConfig, Validate};
use crate::error::Result;
use crate::gateway::CommandGateway;
use crate::naming::Timestamp;
use crate::zfs;
use std::sync::Arc;

/// Creates `<dataset><separator><stamp>` snapshots.
pub struct Snapshotter<G: ?Sized> {
    gateway: Arc<G>,
    config: SnapshotConfig,
}

impl<G: CommandGateway + ?Sized> Snapshotter<G> {
    /// Create a snapshotter for `config`.
    pub fn new(gateway: Arc<G>, config: SnapshotConfig) -> Self {
        Self { gateway, config }
    }

    /// Snapshot using the current local time. Returns the snapshot name.
    pub async fn run(&self) -> Result<String> {
        self.run_at(chrono::Local::now().naive_local()).await
    }

    /// Snapshot stamped with `now`.
    pub async fn run_at(&self, now: Timestamp) -> Result<String> {
        self.config.validate()?;
        let name = self
            .config
            .common
            .naming()
            .format_name(&self.config.dataset, &now);
        let command = zfs::snapshot(&name, self.config.recursive);
        self.gateway
            .execute(&command, self.config.common.dry_run())
            .await?;
        tracing::info!(
            snapshot = %name,
            recursive = self.config.recursive,
            execute = self.config.common.execute,
            "snapshot taken"
        );
        Ok(name)
    }
}
