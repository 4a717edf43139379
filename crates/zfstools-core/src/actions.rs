//! Run a list of snapshot, consolidate and sync actions from a file.
//!
//! Actions run in file order. Each one loads its own config; the first
//! failure stops the run and later actions are not attempted.

use crate::config::{self, Action, CommonConfig, ConsolidateConfig, SnapshotConfig, SyncConfig};
use crate::consolidator::{ConsolidationReport, Consolidator};
use crate::error::Result;
use crate::gateway::CommandGateway;
use crate::naming::Timestamp;
use crate::snapshotter::Snapshotter;
use crate::syncer::{SyncReport, Syncer};
use std::path::Path;
use std::sync::Arc;

/// What one action did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Name of the snapshot taken.
    Snapshot(String),
    /// Consolidation summary.
    Consolidate(ConsolidationReport),
    /// Sync summary.
    Sync(SyncReport),
}

type GatewayFactory = Box<dyn Fn(&CommonConfig) -> Arc<dyn CommandGateway> + Send + Sync>;

/// Executes actions, building a gateway for each from its config.
pub struct ActionRunner {
    gateway_for: GatewayFactory,
}

impl Default for ActionRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionRunner {
    /// Runner that builds a [`crate::gateway::ShellGateway`] from each action's config.
    pub fn new() -> Self {
        Self {
            gateway_for: Box::new(|common: &CommonConfig| -> Arc<dyn CommandGateway> {
                Arc::new(common.gateway())
            }),
        }
    }

    /// Runner that sends every command to `gateway`.
    pub fn with_gateway(gateway: Arc<dyn CommandGateway>) -> Self {
        Self {
            gateway_for: Box::new(move |_: &CommonConfig| Arc::clone(&gateway)),
        }
    }

    /// Load an actions file and run it.
    pub async fn run_file(&self, path: &Path) -> Result<Vec<ActionOutcome>> {
        let actions: Vec<Action> = config::load(path)?;
        self.run(&actions).await
    }

    /// Run `actions` using the current local time.
    pub async fn run(&self, actions: &[Action]) -> Result<Vec<ActionOutcome>> {
        self.run_at(actions, chrono::Local::now().naive_local()).await
    }

    /// Run `actions` with `now` as the snapshot time and default anchor.
    pub async fn run_at(&self, actions: &[Action], now: Timestamp) -> Result<Vec<ActionOutcome>> {
        let mut outcomes = Vec::with_capacity(actions.len());
        for (index, action) in actions.iter().enumerate() {
            tracing::info!(index, config = %action.config_path().display(), "running action");
            let outcome = match action {
                Action::Snapshot { config_path } => {
                    let config: SnapshotConfig = config::load(config_path)?;
                    let gateway = (self.gateway_for)(&config.common);
                    ActionOutcome::Snapshot(Snapshotter::new(gateway, config).run_at(now).await?)
                }
                Action::Consolidate { config_path } => {
                    let config: ConsolidateConfig = config::load(config_path)?;
                    let gateway = (self.gateway_for)(&config.common);
                    ActionOutcome::Consolidate(
                        Consolidator::new(gateway, config).run_at(now).await?,
                    )
                }
                Action::Sync { config_path } => {
                    let config: SyncConfig = config::load(config_path)?;
                    let gateway = (self.gateway_for)(&config.common);
                    ActionOutcome::Sync(Syncer::new(gateway, config).run().await?)
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}
