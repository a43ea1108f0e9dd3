//! Merge event logging.
//!
//! When `debug_logging` is enabled in the project config, every merge attempt
//! is appended as a JSONL line to `.taskmerge/merge-events.jsonl`. Committed
//! merges record their diff counts; failed ones record the stage and kind.

use crate::config::ProjectConfig;
use crate::paths;
use crate::reconcile::{MergeDiff, MergeError, OperationKind};
use crate::tasks::NodeRef;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Maximum log file size before rotation (1MB).
const MAX_LOG_SIZE: u64 = 1_048_576;

/// Node counts of a committed merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffCounts {
    /// Nodes created.
    pub added: usize,
    /// Nodes whose fields changed.
    pub changed: usize,
    /// Changes rerouted into a new node.
    pub redirected: usize,
    /// Changes dropped on protected nodes.
    pub rejected: usize,
}

impl From<&MergeDiff> for DiffCounts {
    fn from(diff: &MergeDiff) -> Self {
        Self {
            added: diff.added().len(),
            changed: diff.changed().len(),
            redirected: diff.redirected().len(),
            rejected: diff.rejected().len(),
        }
    }
}

/// How a merge attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum EventOutcome {
    /// The new graph was committed.
    Committed {
        /// Human-readable diff summary.
        summary: String,
        /// Per-kind node counts.
        counts: DiffCounts,
    },
    /// Nothing was committed.
    Failed {
        /// Pipeline stage, or `invoking` when the model call itself failed.
        stage: String,
        /// Failure kind.
        kind: String,
        /// Full error message.
        message: String,
    },
}

/// One line of the merge event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeEvent {
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// The operation attempted.
    pub operation: OperationKind,
    /// The targeted node, if the operation has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// What happened.
    #[serde(flatten)]
    pub outcome: EventOutcome,
}

impl MergeEvent {
    fn now(operation: OperationKind, target: Option<NodeRef>, outcome: EventOutcome) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            operation,
            target: target.map(|node| node.to_string()),
            outcome,
        }
    }

    /// Event for a committed merge.
    #[must_use]
    pub fn committed(operation: OperationKind, target: Option<NodeRef>, diff: &MergeDiff) -> Self {
        Self::now(
            operation,
            target,
            EventOutcome::Committed { summary: diff.summary(), counts: DiffCounts::from(diff) },
        )
    }

    /// Event for a merge the engine refused.
    #[must_use]
    pub fn rejected(target: Option<NodeRef>, err: &MergeError) -> Self {
        Self::now(
            err.operation,
            target,
            EventOutcome::Failed {
                stage: err.stage.to_string(),
                kind: err.failure.kind().to_string(),
                message: err.to_string(),
            },
        )
    }

    /// Event for a model invocation that returned an error.
    #[must_use]
    pub fn invocation_failed(
        operation: OperationKind,
        target: Option<NodeRef>,
        message: &str,
    ) -> Self {
        Self::now(
            operation,
            target,
            EventOutcome::Failed {
                stage: "invoking".to_string(),
                kind: "model_error".to_string(),
                message: message.to_string(),
            },
        )
    }
}

/// Appends merge events to a JSONL file.
#[derive(Debug, Clone)]
pub struct MergeLog {
    path: PathBuf,
}

impl MergeLog {
    /// Log to an explicit file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The project's merge log, if `debug_logging` is enabled.
    #[must_use]
    pub fn for_project(base_dir: &Path, config: &ProjectConfig) -> Option<Self> {
        config.debug_logging.then(|| Self::new(paths::merge_log_path(base_dir)))
    }

    /// The log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event.
    ///
    /// Errors are silently ignored; logging never breaks a merge.
    pub fn record(&self, event: &MergeEvent) {
        if let Some(parent) = self.path.parent() {
            if fs::create_dir_all(parent).is_err() {
                return;
            }
        }

        if let Ok(metadata) = fs::metadata(&self.path) {
            if metadata.len() > MAX_LOG_SIZE {
                let _ = fs::rename(&self.path, self.path.with_extension("jsonl.old"));
            }
        }

        let Ok(line) = serde_json::to_string(event) else {
            return;
        };
        let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&self.path) else {
            return;
        };
        let _ = writeln!(file, "{line}");
    }

    /// Read back every event as raw JSON, skipping malformed lines.
    #[must_use]
    pub fn read(&self) -> Vec<serde_json::Value> {
        let Ok(content) = fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        content.lines().filter_map(|line| serde_json::from_str(line).ok()).collect()
    }
}
