// src/cli.rs

//! CLI argument parsing using `clap`.

use std::fmt;
use std::str::FromStr;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `flowdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "flowdag",
    version,
    about = "Run multi-job flows as dependency graphs, driven by a DagAction log.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Flowdag.toml")]
    pub config: String,

    /// Launch a configured flow, given as GROUP/NAME. May be repeated.
    #[arg(long, value_name = "GROUP/NAME")]
    pub launch: Vec<FlowRef>,

    /// Exit once every launched flow has finished.
    #[arg(long)]
    pub once: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FLOWDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the flows, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// A flow named on the command line as `GROUP/NAME`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRef {
    pub group: String,
    pub name: String,
}

impl FromStr for FlowRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((group, name))
                if !group.trim().is_empty() && !name.trim().is_empty() && !name.contains('/') =>
            {
                Ok(FlowRef {
                    group: group.trim().to_string(),
                    name: name.trim().to_string(),
                })
            }
            _ => Err(format!("invalid flow '{s}' (expected GROUP/NAME)")),
        }
    }
}

impl fmt::Display for FlowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.name)
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}
