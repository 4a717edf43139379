//! Replication planning: diff local and remote snapshot lists of one dataset
//! into remote destroys followed by a dependency-ordered send queue.
//!
//! - Remote snapshots missing locally are orphans and are destroyed first, so
//!   no send can reference them.
//! - The newest snapshot present on both sides is the baseline; only local
//!   snapshots newer than it are sent, oldest first, each one incremental from
//!   the one sent before it.
//! - With no shared snapshot the first send is a full send.

use crate::error::{Result, ToolsError};
use crate::naming::Snapshot;
use std::collections::HashSet;

/// One `zfs send | zfs recv` step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendStep {
    /// Snapshot to transmit.
    pub target: Snapshot,
    /// Incremental source; `None` means a full send.
    pub baseline: Option<Snapshot>,
}

impl SendStep {
    /// Whether this step is a full (non-incremental) send.
    pub fn is_full(&self) -> bool {
        self.baseline.is_none()
    }
}

/// Ordered work for a single dataset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReplicationPlan {
    /// Remote orphans, most recent first. All are destroyed before any send.
    pub destroy_remote: Vec<Snapshot>,
    /// Sends in execution order (oldest target first).
    pub send_queue: Vec<SendStep>,
    /// Newest snapshot both sides agreed on, if any.
    pub common_baseline: Option<Snapshot>,
}

impl ReplicationPlan {
    /// True when local and remote are already in sync.
    pub fn is_empty(&self) -> bool {
        self.destroy_remote.is_empty() && self.send_queue.is_empty()
    }

    /// Replay the plan against `remote` and check that every incremental
    /// baseline exists on the remote at the moment it is needed, and that a
    /// full send only lands on a dataset with no remaining snapshots.
    ///
    /// Returns the remote snapshot names after the plan has run.
    pub fn verify_chain(&self, remote: &[Snapshot]) -> Result<HashSet<String>> {
        let mut present: HashSet<String> = remote.iter().map(|s| s.name.clone()).collect();
        for orphan in &self.destroy_remote {
            present.remove(&orphan.name);
        }
        for step in &self.send_queue {
            match &step.baseline {
                Some(baseline) if !present.contains(&baseline.name) => {
                    return Err(ToolsError::BrokenChain {
                        target: step.target.name.clone(),
                        baseline: baseline.name.clone(),
                    });
                }
                None if !present.is_empty() => {
                    return Err(ToolsError::BrokenChain {
                        target: step.target.name.clone(),
                        baseline: "<none>".to_string(),
                    });
                }
                _ => {}
            }
            present.insert(step.target.name.clone());
        }
        Ok(present)
    }
}

/// Build the plan for one dataset. Inputs may be in any order.
pub fn compute_plan(local: &[Snapshot], remote: &[Snapshot]) -> ReplicationPlan {
    let mut local: Vec<&Snapshot> = local.iter().collect();
    local.sort_by(|a, b| Snapshot::cmp_newest_first(a, b));
    local.dedup_by(|a, b| a.name == b.name);
    let mut remote: Vec<&Snapshot> = remote.iter().collect();
    remote.sort_by(|a, b| Snapshot::cmp_newest_first(a, b));
    remote.dedup_by(|a, b| a.name == b.name);

    let local_names: HashSet<&str> = local.iter().map(|s| s.name.as_str()).collect();
    let remote_names: HashSet<&str> = remote.iter().map(|s| s.name.as_str()).collect();

    let destroy_remote: Vec<Snapshot> = remote
        .iter()
        .filter(|s| !local_names.contains(s.name.as_str()))
        .map(|s| (*s).clone())
        .collect();

    // local is newest first, so the first shared name is the baseline
    let common_baseline: Option<Snapshot> = local
        .iter()
        .find(|s| remote_names.contains(s.name.as_str()))
        .map(|s| (*s).clone());

    let mut to_send: Vec<&Snapshot> = local
        .iter()
        .copied()
        .filter(|s| match &common_baseline {
            Some(base) => s.timestamp > base.timestamp,
            None => true,
        })
        .collect();
    to_send.sort_by(|a, b| Snapshot::cmp_oldest_first(a, b));

    let mut send_queue = Vec::with_capacity(to_send.len());
    let mut previous = common_baseline.clone();
    for target in to_send {
        send_queue.push(SendStep {
            target: target.clone(),
            baseline: previous.take(),
        });
        previous = Some(target.clone());
    }

    ReplicationPlan {
        destroy_remote,
        send_queue,
        common_baseline,
    }
}
