//! Command line interface for taskmerge.
//!
//! The CLI never talks to a model itself. A caller assembles the context
//! (`taskmerge context ...`), sends it to whatever model they use, and pipes
//! the raw response back in (`taskmerge apply ...`).

mod run;

#[cfg(test)]
mod tests;

pub use run::{run, CliOutput};

use crate::reconcile::OperationKind;
use crate::tasks::Priority;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Reconcile model output into a task graph.
///
/// Typical round trip:
///
///   taskmerge context expand-task --task 3 > prompt.txt
///   <send prompt.txt to a model, save the reply as reply.txt>
///   taskmerge apply expand-task --task 3 < reply.txt
#[derive(Parser, Debug)]
#[command(name = "taskmerge")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Project directory (holds `.taskmerge/` and the task file)
    #[arg(long, global = true, default_value = ".")]
    pub project: PathBuf,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Merge a raw model response (stdin) into the task graph.
    ///
    /// Prints the per-node diff as JSON. On failure nothing is written and
    /// the failure (operation, stage, kind) is printed instead.
    Apply {
        /// Operation the response answers
        #[arg(value_parser = parse_operation)]
        operation: OperationKind,

        /// Target task (update-task, update-subtask, expand-task)
        #[arg(long)]
        task: Option<u32>,

        /// Target subtask (update-subtask)
        #[arg(long)]
        subtask: Option<u32>,

        /// Replace the subtask details instead of appending
        #[arg(long)]
        replace: bool,

        /// Priority for add-task, overriding the model's choice
        #[arg(long, value_parser = parse_priority)]
        priority: Option<Priority>,

        /// First subtask ID for expand-task
        #[arg(long)]
        next_id: Option<u32>,

        /// Exact number of subtasks expected from expand-task
        #[arg(long)]
        count: Option<usize>,
    },

    /// Print the context block for an operation.
    ///
    /// For parse-prd the requirements document is read from stdin.
    Context {
        /// Operation to assemble context for
        #[arg(value_parser = parse_operation)]
        operation: OperationKind,

        /// Target task
        #[arg(long)]
        task: Option<u32>,

        /// Target subtask
        #[arg(long)]
        subtask: Option<u32>,

        /// Number of subtasks to ask for (expand-task)
        #[arg(long)]
        count: Option<usize>,

        /// Free-form request appended to the context
        #[arg(long)]
        prompt: Option<String>,
    },

    /// Print the JSON schema the model's response must follow.
    Schema {
        /// Operation whose output schema to print
        #[arg(value_parser = parse_operation)]
        operation: OperationKind,
    },

    /// Validate a complexity analysis (stdin) and save the report.
    Analyze {
        /// Report tasks scoring at or above this (default from config)
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Audit the task graph for broken IDs and dependencies.
    Check,

    /// Render the task graph as markdown.
    Export {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List saved graph revisions (requires `keep_history`).
    History,

    /// Ensure config file exists (create with defaults if not).
    #[command(name = "ensure-config")]
    EnsureConfig,

    /// Show version information.
    Version,
}

impl Command {
    /// Returns true if this command requires stdin input.
    #[must_use]
    pub const fn needs_stdin(&self) -> bool {
        matches!(
            self,
            Self::Apply { .. }
                | Self::Analyze { .. }
                | Self::Context { operation: OperationKind::ParsePrd, .. }
        )
    }
}

fn parse_operation(s: &str) -> Result<OperationKind, String> {
    OperationKind::from_str(s).ok_or_else(|| {
        let names: Vec<&str> = OperationKind::ALL.iter().map(|k| k.as_str()).collect();
        format!("unknown operation '{s}' (expected one of: {})", names.join(", "))
    })
}

fn parse_priority(s: &str) -> Result<Priority, String> {
    Priority::from_str(s).map_err(|e| e.to_string())
}
