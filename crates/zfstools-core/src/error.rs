//! Error types for zfs-tools.

use chrono::NaiveDateTime;
use thiserror::Error;

/// Errors that can occur while planning or executing snapshot operations.
#[derive(Debug, Error)]
pub enum ToolsError {
    /// A retention schedule or period is malformed.
    #[error("invalid retention schedule: {reason}")]
    InvalidSchedule {
        /// Why the schedule was rejected.
        reason: String,
    },

    /// A date string could not be parsed with the configured format.
    #[error("date {input:?} could not be parsed with format {format:?}")]
    DateParse {
        /// The offending input.
        input: String,
        /// The chrono format pattern in use.
        format: String,
    },

    /// Calendar subtraction left the representable date range.
    #[error("calendar arithmetic underflowed subtracting {period} from {at}")]
    CalendarUnderflow {
        /// The cursor the subtraction started from.
        at: NaiveDateTime,
        /// Human readable period, e.g. `3 months`.
        period: String,
    },

    /// A required configuration value is missing or empty.
    #[error("missing required parameter: {name}")]
    MissingParameter {
        /// Name of the parameter.
        name: String,
    },

    /// Unsupported or malformed configuration file.
    #[error("config error at {path}: {reason}")]
    ConfigFormat {
        /// Path of the configuration file.
        path: String,
        /// Description of the problem.
        reason: String,
    },

    /// External command exited with a non-zero status.
    #[error("command `{command}` failed with status {status}: {stderr}")]
    CommandFailed {
        /// The command line that was run.
        command: String,
        /// Exit status (-1 when killed by a signal).
        status: i32,
        /// Captured standard error, lossily decoded.
        stderr: String,
    },

    /// External command could not be started.
    #[error("command `{command}` could not be started")]
    CommandSpawn {
        /// The command line that was run.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// External command exceeded its timeout.
    #[error("command `{command}` timed out after {timeout_secs}s")]
    CommandTimeout {
        /// The command line that was run.
        command: String,
        /// Configured timeout in seconds.
        timeout_secs: u64,
    },

    /// A send step references a baseline the remote will not have.
    #[error("broken incremental chain for {target}: baseline {baseline} not present on remote")]
    BrokenChain {
        /// Snapshot being sent.
        target: String,
        /// Baseline that is missing (or `<none>` for a full send onto a non-empty remote).
        baseline: String,
    },

    /// A per-dataset worker task panicked or was cancelled.
    #[error("dataset task failed: {msg}")]
    TaskJoin {
        /// Join error message.
        msg: String,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    /// TOML deserialization error.
    #[error("TOML decode error")]
    TomlDecode(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML encode error")]
    TomlEncode(#[from] toml::ser::Error),

    /// I/O error.
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

impl ToolsError {
    /// True for errors that are detected before any command runs
    /// (malformed schedules, unparseable dates, bad config files).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ToolsError::InvalidSchedule { .. }
                | ToolsError::DateParse { .. }
                | ToolsError::CalendarUnderflow { .. }
                | ToolsError::MissingParameter { .. }
                | ToolsError::ConfigFormat { .. }
                | ToolsError::Json(_)
                | ToolsError::TomlDecode(_)
                | ToolsError::TomlEncode(_)
        )
    }

    pub(crate) fn invalid_schedule(reason: impl Into<String>) -> Self {
        ToolsError::InvalidSchedule {
            reason: reason.into(),
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ToolsError>;
