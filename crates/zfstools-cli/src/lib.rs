#![warn(missing_docs)]

//! zfs-tools command line: argument parsing and the glue that turns flags or
//! config files into runs of the core orchestrators.

pub mod cli;

pub use cli::{Cli, Command};
