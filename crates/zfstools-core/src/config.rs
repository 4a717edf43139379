//! Configuration for snapshot, consolidate and sync runs.
//!
//! Every optional field gets its default when the file is decoded, and every
//! loaded config is validated before it is handed to an orchestrator, so a
//! malformed schedule or anchor fails before any command runs.

use crate::error::{Result, ToolsError};
use crate::gateway::{RemoteLogin, ShellGateway, DEFAULT_SHELL_PATH};
use crate::naming::{SnapshotNaming, DEFAULT_DATE_FORMAT, DEFAULT_SEPARATOR};
use crate::retention::{RetentionPeriod, RetentionSchedule};
use chrono::format::{Item, StrftimeItems};
use chrono::{NaiveDate, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default cap on concurrent per-dataset workers.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Checked after decoding and before use.
pub trait Validate {
    /// Return a configuration error if the value cannot be used.
    fn validate(&self) -> Result<()>;
}

/// Options shared by every action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonConfig {
    /// Separator between dataset and timestamp.
    pub date_separator: String,
    /// chrono strftime pattern for snapshot timestamps.
    pub date_format: String,
    /// Run mutating commands; when false they are only echoed.
    pub execute: bool,
    /// Shell used to interpret command lines.
    pub shell_path: PathBuf,
    /// Per-command timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_timeout_secs: Option<u64>,
    /// Worker cap for metadata gathering.
    pub max_concurrency: usize,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            date_separator: DEFAULT_SEPARATOR.to_string(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            execute: false,
            shell_path: PathBuf::from(DEFAULT_SHELL_PATH),
            command_timeout_secs: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl CommonConfig {
    /// Naming scheme built from separator and date format.
    pub fn naming(&self) -> SnapshotNaming {
        SnapshotNaming::new(self.date_separator.clone(), self.date_format.clone())
    }

    /// Inverse of `execute`.
    pub fn dry_run(&self) -> bool {
        !self.execute
    }

    /// Shell gateway honoring `shell_path` and the timeout.
    pub fn gateway(&self) -> ShellGateway {
        let gateway = ShellGateway::new(self.shell_path.clone());
        match self.command_timeout_secs {
            Some(secs) => gateway.with_timeout(Duration::from_secs(secs)),
            None => gateway,
        }
    }
}

const SAMPLE_DATASET: &str = "pool/ds";

fn sample_timestamps() -> impl Iterator<Item = NaiveDateTime> {
    [
        (2022, 8, 5, 0, 0, 0),
        (2023, 12, 31, 23, 59, 59),
        (1999, 1, 2, 3, 4, 5),
    ]
    .into_iter()
    .filter_map(|(y, mo, d, h, mi, s)| NaiveDate::from_ymd_opt(y, mo, d)?.and_hms_opt(h, mi, s))
}

impl CommonConfig {
    /// Every name this scheme produces must parse back to the same dataset
    /// and, at the pattern's resolution, the same timestamp.
    fn names_round_trip(&self) -> bool {
        let naming = self.naming();
        sample_timestamps().all(|ts| {
            naming
                .parse(&naming.format_name(SAMPLE_DATASET, &ts))
                .is_some_and(|parsed| {
                    parsed.dataset == SAMPLE_DATASET
                        && naming.format_timestamp(&parsed.timestamp)
                            == naming.format_timestamp(&ts)
                })
        })
    }
}

impl Validate for CommonConfig {
    fn validate(&self) -> Result<()> {
        if self.date_separator.is_empty() {
            return Err(ToolsError::MissingParameter {
                name: "date_separator".to_string(),
            });
        }
        if self.date_format.is_empty()
            || StrftimeItems::new(&self.date_format).any(|item| matches!(item, Item::Error))
        {
            return Err(ToolsError::ConfigFormat {
                path: "date_format".to_string(),
                reason: format!("invalid date format {:?}", self.date_format),
            });
        }
        if !self.names_round_trip() {
            return Err(ToolsError::ConfigFormat {
                path: "date_format".to_string(),
                reason: format!(
                    "snapshot names built with separator {:?} and format {:?} cannot be parsed back",
                    self.date_separator, self.date_format
                ),
            });
        }
        if self.max_concurrency == 0 {
            return Err(ToolsError::ConfigFormat {
                path: "max_concurrency".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.command_timeout_secs == Some(0) {
            return Err(ToolsError::ConfigFormat {
                path: "command_timeout_secs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Take a snapshot of one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Shared options.
    #[serde(flatten)]
    pub common: CommonConfig,
    /// Dataset to snapshot.
    pub dataset: String,
    /// Pass `-r` to `zfs snapshot`.
    #[serde(default)]
    pub recursive: bool,
}

impl Validate for SnapshotConfig {
    fn validate(&self) -> Result<()> {
        self.common.validate()?;
        if self.dataset.trim().is_empty() {
            return Err(ToolsError::MissingParameter {
                name: "dataset".to_string(),
            });
        }
        Ok(())
    }
}

fn non_empty(filter: &Option<String>) -> Option<&str> {
    filter.as_deref().filter(|f| !f.is_empty())
}

/// Serialized form of a retention schedule; the anchor is a formatted date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Periods, most recent first.
    pub periods: Vec<RetentionPeriod>,
    /// Fixed anchor in the configured date format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            periods: RetentionSchedule::standard().periods,
            anchor: None,
        }
    }
}

impl ScheduleConfig {
    /// Parse the anchor and validate the periods.
    pub fn resolve(&self, naming: &SnapshotNaming) -> Result<RetentionSchedule> {
        let anchor = self
            .anchor
            .as_deref()
            .map(|a| naming.parse_timestamp(a))
            .transpose()?;
        let schedule = RetentionSchedule {
            periods: self.periods.clone(),
            anchor,
        };
        schedule.validate()?;
        Ok(schedule)
    }
}

impl Validate for ScheduleConfig {
    fn validate(&self) -> Result<()> {
        RetentionSchedule::new(self.periods.clone()).validate()
    }
}

/// Apply a retention schedule to matching datasets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidateConfig {
    /// Shared options.
    #[serde(flatten)]
    pub common: CommonConfig,
    /// Only datasets whose name contains this substring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_filter: Option<String>,
    /// Retention schedule; the standard one when omitted.
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Snapshot names that are never destroyed.
    #[serde(default)]
    pub do_not_delete: Vec<String>,
}

impl ConsolidateConfig {
    /// The dataset filter; an empty string means none.
    pub fn filter(&self) -> Option<&str> {
        non_empty(&self.dataset_filter)
    }

    /// The schedule with its anchor parsed.
    pub fn retention_schedule(&self) -> Result<RetentionSchedule> {
        self.schedule.resolve(&self.common.naming())
    }

    /// Do-not-delete names as a set.
    pub fn do_not_delete_set(&self) -> HashSet<String> {
        self.do_not_delete.iter().cloned().collect()
    }
}

impl Validate for ConsolidateConfig {
    fn validate(&self) -> Result<()> {
        self.common.validate()?;
        self.retention_schedule().map(|_| ())
    }
}

/// Replicate matching datasets to a remote host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Shared options.
    #[serde(flatten)]
    pub common: CommonConfig,
    /// Only datasets whose name contains this substring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_filter: Option<String>,
    /// SSH login for the receiving host.
    pub remote: RemoteLogin,
}

impl SyncConfig {
    /// The dataset filter; an empty string means none.
    pub fn filter(&self) -> Option<&str> {
        non_empty(&self.dataset_filter)
    }
}

impl Validate for SyncConfig {
    fn validate(&self) -> Result<()> {
        self.common.validate()?;
        self.remote.validate()
    }
}

/// One entry of an actions file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Run a [`SnapshotConfig`].
    Snapshot {
        /// Path of the config file.
        #[serde(alias = "configPath")]
        config_path: PathBuf,
    },
    /// Run a [`ConsolidateConfig`].
    Consolidate {
        /// Path of the config file.
        #[serde(alias = "configPath")]
        config_path: PathBuf,
    },
    /// Run a [`SyncConfig`].
    Sync {
        /// Path of the config file.
        #[serde(alias = "configPath")]
        config_path: PathBuf,
    },
}

impl Action {
    /// Path of the referenced config file.
    pub fn config_path(&self) -> &Path {
        match self {
            Action::Snapshot { config_path }
            | Action::Consolidate { config_path }
            | Action::Sync { config_path } => config_path,
        }
    }

    /// One action of each kind with placeholder paths.
    pub fn examples() -> Vec<Action> {
        vec![
            Action::Snapshot {
                config_path: PathBuf::from("/path/to/snapshot/config.json"),
            },
            Action::Consolidate {
                config_path: PathBuf::from("/path/to/consolidate/config.json"),
            },
            Action::Sync {
                config_path: PathBuf::from("/path/to/sync/config.json"),
            },
        ]
    }
}

impl Validate for Vec<Action> {
    fn validate(&self) -> Result<()> {
        match self.iter().find(|a| a.config_path().as_os_str().is_empty()) {
            Some(_) => Err(ToolsError::MissingParameter {
                name: "config_path".to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl Validate for Vec<String> {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> Result<Format> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    match ext.to_lowercase().as_str() {
        "json" => Ok(Format::Json),
        "toml" => Ok(Format::Toml),
        _ => Err(ToolsError::ConfigFormat {
            path: path.display().to_string(),
            reason: format!("unsupported config file extension: {ext:?}"),
        }),
    }
}

/// Append `.json` to paths without an extension.
pub fn with_default_extension(path: &Path) -> PathBuf {
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        let mut os = path.as_os_str().to_os_string();
        os.push(".json");
        PathBuf::from(os)
    }
}

/// Decode a JSON or TOML file and validate it.
pub fn load<T: DeserializeOwned + Validate>(path: &Path) -> Result<T> {
    let path = with_default_extension(path);
    let format = format_of(&path)?;
    let contents = std::fs::read_to_string(&path).map_err(|e| ToolsError::ConfigFormat {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let value: T = match format {
        Format::Json => serde_json::from_str(&contents)?,
        Format::Toml => toml::from_str(&contents)?,
    };
    value.validate()?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(value)
}

/// Write `value` as pretty JSON, or as TOML for `.toml` paths. Paths without
/// an extension get `.json`; any other extension is rejected. Returns the
/// path written.
pub fn save<T: Serialize>(value: &T, path: &Path) -> Result<PathBuf> {
    let path = with_default_extension(path);
    let contents = match format_of(&path)? {
        Format::Json => serde_json::to_string_pretty(value)?,
        Format::Toml => toml::to_string_pretty(value)?,
    };
    std::fs::write(&path, contents)?;
    tracing::info!(path = %path.display(), "wrote config");
    Ok(path)
}

/// Read a JSON array of snapshot names, as used for do-not-delete lists.
pub fn load_names(path: &Path) -> Result<Vec<String>> {
    load(path)
}
