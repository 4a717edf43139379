#![warn(missing_docs)]

//! zfs-tools core: snapshot naming, tiered retention, incremental replication
//! planning, and the orchestrators that drive `zfs` through a command gateway.

pub mod actions;
pub mod config;
pub mod consolidator;
pub mod error;
pub mod fanout;
pub mod gateway;
pub mod naming;
pub mod replication;
pub mod retention;
pub mod snapshotter;
pub mod syncer;
pub mod zfs;

pub use actions::{ActionOutcome, ActionRunner};
pub use config::{
    Action, CommonConfig, ConsolidateConfig, ScheduleConfig, SnapshotConfig, SyncConfig,
};
pub use consolidator::{ConsolidationReport, Consolidator, DatasetConsolidation};
pub use error::{Result, ToolsError};
pub use gateway::{CommandGateway, CommandOutput, RemoteLogin, ShellCommand, ShellGateway};
pub use naming::{Snapshot, SnapshotNaming, Timestamp};
pub use replication::{compute_plan, ReplicationPlan, SendStep};
pub use retention::{
    compute_deletions, compute_deletions_at, PeriodUnit, RetentionPeriod, RetentionSchedule,
};
pub use snapshotter::Snapshotter;
pub use syncer::{DatasetSync, SyncReport, Syncer};
