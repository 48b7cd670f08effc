//! CLI interface using clap
//!
//! Provides the command-line interface for evidencesync

mod commands;

pub use commands::*;

use crate::evidence::SourceSystem;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// evidencesync - Incremental sync and analysis of work evidence
#[derive(Parser, Debug)]
#[command(name = "evidencesync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory holding config.toml and the database
    #[arg(long, global = true, env = "EVIDENCESYNC_HOME")]
    pub home: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json)
    #[arg(short = 'o', long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Home directory in effect
    pub fn home_dir(&self) -> PathBuf {
        self.home.clone().unwrap_or_else(crate::config::default_home)
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the home directory, default config and database
    Init(InitArgs),

    /// Run a sync job against a source system
    Sync(SyncArgs),

    /// Show one job with its log
    Job(JobArgs),

    /// List recent jobs
    Jobs(JobsArgs),

    /// Poll a job until it finishes
    Watch(WatchArgs),

    /// Manage the criterion catalog
    #[command(subcommand)]
    Criteria(CriteriaCommand),

    /// Show the report for a month
    Snapshot(SnapshotArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Source system selectable on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SourceArg {
    Github,
    Jira,
}

impl From<SourceArg> for SourceSystem {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Github => SourceSystem::GitHub,
            SourceArg::Jira => SourceSystem::Jira,
        }
    }
}

/// Arguments for init command
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config with defaults
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for sync command
#[derive(Parser, Debug)]
pub struct SyncArgs {
    /// Source system to sync
    #[arg(value_enum)]
    pub source: SourceArg,

    /// First day included (YYYY-MM-DD); defaults to 1 January
    #[arg(long)]
    pub since: Option<NaiveDate>,

    /// Last day included (YYYY-MM-DD); defaults to today
    #[arg(long)]
    pub until: Option<NaiveDate>,

    /// Repository or project to restrict to (repeatable)
    #[arg(long = "scope")]
    pub scopes: Vec<String>,

    /// Re-process items that are already stored
    #[arg(long)]
    pub update_existing: bool,

    /// Process a small capped sample only
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for job command
#[derive(Parser, Debug)]
pub struct JobArgs {
    /// Job ID
    pub id: String,
}

/// Arguments for jobs command
#[derive(Parser, Debug)]
pub struct JobsArgs {
    /// Number of jobs to show
    #[arg(short, long, default_value = "10")]
    pub limit: usize,
}

/// Arguments for watch command
#[derive(Parser, Debug)]
pub struct WatchArgs {
    /// Job ID
    pub id: String,

    /// Poll interval in milliseconds
    #[arg(long, default_value = "2000")]
    pub interval_ms: u64,

    /// Give up after this many polls
    #[arg(long, default_value = "150")]
    pub max_attempts: u32,
}

/// Criterion catalog commands
#[derive(Subcommand, Debug)]
pub enum CriteriaCommand {
    /// Import criteria from a TOML file (`[[criteria]]` tables)
    Import {
        /// Path to the TOML file
        file: PathBuf,
    },

    /// List the catalog
    List,
}

/// Arguments for snapshot command
#[derive(Parser, Debug)]
pub struct SnapshotArgs {
    /// Month (YYYY-MM)
    pub month: String,

    /// Regenerate an incomplete snapshot even if it is fresh
    #[arg(long)]
    pub force: bool,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Show current configuration
    #[arg(long)]
    pub show: bool,

    /// Reset to defaults
    #[arg(long)]
    pub reset: bool,
}
