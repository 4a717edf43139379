use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zfstools_core::config::{self, Action, DEFAULT_MAX_CONCURRENCY};
use zfstools_core::gateway::DEFAULT_SHELL_PATH;
use zfstools_core::naming::{DEFAULT_DATE_FORMAT, DEFAULT_SEPARATOR};
use zfstools_core::{
    ActionOutcome, ActionRunner, CommonConfig, ConsolidateConfig, ConsolidationReport,
    Consolidator, RemoteLogin, ScheduleConfig, SnapshotConfig, Snapshotter, SyncConfig,
    SyncReport, Syncer,
};

/// Command line of the `zfs-tools` binary.
#[derive(Parser, Debug)]
#[command(name = "zfs-tools")]
#[command(about = "Snapshot, consolidate and sync ZFS datasets", long_about = None, version)]
pub struct Cli {
    /// Log at debug level (overrides RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Action to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands. Each action has a `-configure` variant that writes the config
/// its flags describe and a `-configured` variant that runs a written config.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Take a snapshot of one dataset.
    Snapshot(SnapshotArgs),
    /// Write a snapshot config.
    SnapshotConfigure {
        #[command(flatten)]
        args: SnapshotArgs,
        /// Where to write the config (.json appended when there is no extension).
        #[arg(long)]
        config_path: PathBuf,
    },
    /// Run a snapshot config.
    SnapshotConfigured {
        /// Config file (.json or .toml).
        #[arg(long)]
        config_path: PathBuf,
    },
    /// Destroy snapshots not kept by the retention schedule.
    Consolidate(ConsolidateArgs),
    /// Write a consolidate config.
    ConsolidateConfigure {
        #[command(flatten)]
        args: ConsolidateArgs,
        /// Where to write the config (.json appended when there is no extension).
        #[arg(long)]
        config_path: PathBuf,
    },
    /// Run a consolidate config.
    ConsolidateConfigured {
        /// Config file (.json or .toml).
        #[arg(long)]
        config_path: PathBuf,
    },
    /// Replicate snapshots to a remote host.
    Sync(SyncArgs),
    /// Write a sync config.
    SyncConfigure {
        #[command(flatten)]
        args: SyncArgs,
        /// Where to write the config (.json appended when there is no extension).
        #[arg(long)]
        config_path: PathBuf,
    },
    /// Run a sync config.
    SyncConfigured {
        /// Config file (.json or .toml).
        #[arg(long)]
        config_path: PathBuf,
    },
    /// Run every action listed in a file, in order.
    ExecuteActions {
        /// Actions file (.json).
        #[arg(long)]
        config_path: PathBuf,
    },
    /// Write an example actions file.
    ExecuteActionsConfigure {
        /// Where to write the file (.json appended when there is no extension).
        #[arg(long)]
        config_path: PathBuf,
    },
}

/// Flags shared by every action.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// chrono strftime pattern of the snapshot timestamp.
    #[arg(long, default_value = DEFAULT_DATE_FORMAT)]
    pub date_format: String,
    /// Separator between dataset and timestamp.
    #[arg(long, default_value = DEFAULT_SEPARATOR)]
    pub date_separator: String,
    /// Run mutating commands instead of echoing them.
    #[arg(long)]
    pub execute: bool,
    /// Shell used to run commands.
    #[arg(long, env = "ZFS_TOOLS_SHELL", default_value = DEFAULT_SHELL_PATH)]
    pub shell_path: PathBuf,
    /// Per-command timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,
    /// Datasets planned concurrently.
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENCY)]
    pub max_concurrency: usize,
}

impl From<&CommonArgs> for CommonConfig {
    fn from(args: &CommonArgs) -> Self {
        CommonConfig {
            date_separator: args.date_separator.clone(),
            date_format: args.date_format.clone(),
            execute: args.execute,
            shell_path: args.shell_path.clone(),
            command_timeout_secs: args.timeout_secs,
            max_concurrency: args.max_concurrency,
        }
    }
}

/// Flags of `snapshot`.
#[derive(Args, Debug, Clone)]
pub struct SnapshotArgs {
    #[command(flatten)]
    #[allow(missing_docs)]
    pub common: CommonArgs,
    /// Dataset to snapshot.
    #[arg(long)]
    pub dataset: String,
    /// Snapshot descendant datasets too.
    #[arg(long)]
    pub recursive: bool,
}

impl SnapshotArgs {
    /// The config these flags describe.
    pub fn to_config(&self) -> SnapshotConfig {
        SnapshotConfig {
            common: CommonConfig::from(&self.common),
            dataset: self.dataset.clone(),
            recursive: self.recursive,
        }
    }
}

/// Flags of `consolidate`.
#[derive(Args, Debug, Clone)]
pub struct ConsolidateArgs {
    #[command(flatten)]
    #[allow(missing_docs)]
    pub common: CommonArgs,
    /// Only datasets whose name contains this string.
    #[arg(long)]
    pub dataset_filter: Option<String>,
    /// Retention schedule file (.json or .toml); the standard schedule when omitted.
    #[arg(long)]
    pub schedule_path: Option<PathBuf>,
    /// Fixed anchor in the date format; the current time when omitted.
    #[arg(long)]
    pub anchor: Option<String>,
    /// JSON array of snapshot names that are never destroyed.
    #[arg(long)]
    pub do_not_delete_path: Option<PathBuf>,
}

impl ConsolidateArgs {
    /// The config these flags describe, reading the referenced files.
    pub fn to_config(&self) -> Result<ConsolidateConfig> {
        let mut schedule = match &self.schedule_path {
            Some(path) => config::load::<ScheduleConfig>(path)
                .with_context(|| format!("loading schedule {}", path.display()))?,
            None => ScheduleConfig::default(),
        };
        if let Some(anchor) = &self.anchor {
            schedule.anchor = Some(anchor.clone());
        }
        let do_not_delete = match &self.do_not_delete_path {
            Some(path) => config::load_names(path)
                .with_context(|| format!("loading do-not-delete list {}", path.display()))?,
            None => Vec::new(),
        };
        Ok(ConsolidateConfig {
            common: CommonConfig::from(&self.common),
            dataset_filter: self.dataset_filter.clone(),
            schedule,
            do_not_delete,
        })
    }
}

/// Flags of `sync`.
#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    #[command(flatten)]
    #[allow(missing_docs)]
    pub common: CommonArgs,
    /// Only datasets whose name contains this string.
    #[arg(long)]
    pub dataset_filter: Option<String>,
    /// Remote host name or address.
    #[arg(long)]
    pub ssh_host: String,
    /// Remote SSH port.
    #[arg(long, default_value_t = 22)]
    pub ssh_port: u16,
    /// Private key used to log in.
    #[arg(long)]
    pub ssh_key_path: PathBuf,
    /// Remote user.
    #[arg(long)]
    pub ssh_user: String,
}

impl SyncArgs {
    /// The config these flags describe.
    pub fn to_config(&self) -> SyncConfig {
        SyncConfig {
            common: CommonConfig::from(&self.common),
            dataset_filter: self.dataset_filter.clone(),
            remote: RemoteLogin {
                host: self.ssh_host.clone(),
                port: self.ssh_port,
                key_path: self.ssh_key_path.clone(),
                user: self.ssh_user.clone(),
            },
        }
    }
}

impl Cli {
    /// Execute the parsed command.
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Snapshot(args) => snapshot(args.to_config()).await,
            Command::SnapshotConfigure { args, config_path } => {
                configure(&args.to_config(), &config_path)
            }
            Command::SnapshotConfigured { config_path } => {
                snapshot(load(&config_path)?).await
            }
            Command::Consolidate(args) => consolidate(args.to_config()?).await,
            Command::ConsolidateConfigure { args, config_path } => {
                configure(&args.to_config()?, &config_path)
            }
            Command::ConsolidateConfigured { config_path } => {
                consolidate(load(&config_path)?).await
            }
            Command::Sync(args) => sync(args.to_config()).await,
            Command::SyncConfigure { args, config_path } => {
                configure(&args.to_config(), &config_path)
            }
            Command::SyncConfigured { config_path } => sync(load(&config_path)?).await,
            Command::ExecuteActions { config_path } => execute_actions(&config_path).await,
            Command::ExecuteActionsConfigure { config_path } => {
                configure(&Action::examples(), &config_path)
            }
        }
    }
}

fn load<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned + config::Validate,
{
    config::load(path).with_context(|| format!("loading config {}", path.display()))
}

fn configure<T: serde::Serialize>(value: &T, path: &Path) -> Result<()> {
    let written = config::save(value, path)
        .with_context(|| format!("writing config {}", path.display()))?;
    println!("Wrote {}", written.display());
    Ok(())
}

async fn snapshot(config: SnapshotConfig) -> Result<()> {
    let gateway = Arc::new(config.common.gateway());
    let name = Snapshotter::new(gateway, config).run().await?;
    println!("Snapshot: {name}");
    Ok(())
}

async fn consolidate(config: ConsolidateConfig) -> Result<()> {
    let gateway = Arc::new(config.common.gateway());
    let report = Consolidator::new(gateway, config).run().await?;
    print_consolidation(&report);
    Ok(())
}

async fn sync(config: SyncConfig) -> Result<()> {
    let gateway = Arc::new(config.common.gateway());
    let report = Syncer::new(gateway, config).run().await?;
    print_sync(&report);
    Ok(())
}

async fn execute_actions(path: &Path) -> Result<()> {
    let outcomes = ActionRunner::new()
        .run_file(path)
        .await
        .with_context(|| format!("executing actions from {}", path.display()))?;
    for outcome in &outcomes {
        match outcome {
            ActionOutcome::Snapshot(name) => println!("Snapshot: {name}"),
            ActionOutcome::Consolidate(report) => print_consolidation(report),
            ActionOutcome::Sync(report) => print_sync(report),
        }
    }
    Ok(())
}

fn mode(dry_run: bool) -> &'static str {
    if dry_run {
        " (dry run)"
    } else {
        ""
    }
}

fn print_consolidation(report: &ConsolidationReport) {
    println!("Consolidation{}:", mode(report.dry_run));
    for dataset in &report.datasets {
        println!(
            "  {}: kept {}, destroyed {}",
            dataset.dataset,
            dataset.kept(),
            dataset.destroyed.len()
        );
    }
}

fn print_sync(report: &SyncReport) {
    println!("Sync{}:", mode(report.dry_run));
    for dataset in &report.datasets {
        if dataset.plan.is_empty() {
            println!("  {}: in sync", dataset.dataset);
        } else {
            println!(
                "  {}: destroyed {} remote, sent {}",
                dataset.dataset,
                dataset.plan.destroy_remote.len(),
                dataset.plan.send_queue.len()
            );
        }
    }
}
