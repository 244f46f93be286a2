//! CLI command definitions for rpi-tracker
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

pub mod export;

use crate::format::OutputFormat;
use crate::types::{DecisionResponse, TaskStatus};
use clap::{Args, Parser, Subcommand, ValueEnum};
use export::ExportArgs;
use std::path::PathBuf;

/// Output format flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FormatArg {
    #[default]
    Markdown,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Markdown => OutputFormat::Markdown,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

/// Research → Plan → Implement progress tracker
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = FormatArg::Markdown, global = true)]
    pub format: FormatArg,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the project from a YAML plan (or a previous JSON export)
    Init(InitArgs),

    /// Apply new events from an event file or a git repository
    Update(UpdateArgs),

    /// Show the project status report
    Status,

    /// List the next recommended tasks
    Next {
        /// Maximum number of tasks (default: report.next_limit)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// List decisions waiting for confirmation
    Pending,

    /// Answer a pending decision
    Decide(DecideArgs),

    /// Override a task status by hand
    SetStatus {
        task_id: String,
        #[arg(value_parser = parse_status)]
        status: TaskStatus,
    },

    /// List history snapshots, or show one in detail
    History {
        /// Snapshot id (e.g. snap-0001)
        id: Option<String>,
    },

    /// List applied events that referenced unknown ids
    Unresolved,

    /// Acknowledge unresolved events so they stop being reported
    Ack(AckArgs),

    /// Export the full project as JSON
    Export(ExportArgs),
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Plan file (.yaml) or export (.json, .json.gz)
    #[arg(short, long, value_name = "FILE")]
    pub plan: PathBuf,

    /// Replace an existing project, history included
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// JSON-lines event file
    #[arg(long, value_name = "FILE", conflicts_with = "git")]
    pub events: Option<PathBuf>,

    /// Git repository to read commits from (default: current directory)
    #[arg(long, value_name = "DIR")]
    pub git: Option<PathBuf>,

    /// Commits to read on the first run, before any cursor exists
    #[arg(long, value_name = "N", conflicts_with = "events")]
    pub max_count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct AckArgs {
    /// Event id to acknowledge
    #[arg(required_unless_present = "all")]
    pub event_id: Option<String>,

    /// Acknowledge every unresolved event
    #[arg(long, conflicts_with = "event_id")]
    pub all: bool,
}

/// Answer for `decide`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Answer {
    Yes,
    No,
    Partial,
}

#[derive(Args, Debug)]
pub struct DecideArgs {
    pub decision_id: u64,

    #[arg(value_enum)]
    pub answer: Answer,

    /// Criteria satisfied, for a partial answer
    #[arg(long, value_delimiter = ',', required_if_eq("answer", "partial"))]
    pub criteria: Vec<String>,
}

impl DecideArgs {
    pub fn response(&self) -> DecisionResponse {
        match self.answer {
            Answer::Yes => DecisionResponse::Yes,
            Answer::No => DecisionResponse::No,
            Answer::Partial => DecisionResponse::Partial(self.criteria.clone()),
        }
    }
}

fn parse_status(s: &str) -> Result<TaskStatus, String> {
    TaskStatus::from_str(s).ok_or_else(|| {
        format!(
            "unknown status {:?} (expected pending, in_progress, partial, completed, blocked)",
            s
        )
    })
}
