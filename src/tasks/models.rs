//! Task graph model types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeSet;

/// Task priority, as carried in the task file.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// High priority.
    High,
    /// Medium priority (default).
    #[default]
    Medium,
    /// Low priority.
    Low,
}

impl Priority {
    /// Parse a priority from a string (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid priority.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, InvalidPriority> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(InvalidPriority(s.to_string())),
        }
    }

    /// Get the string representation of the priority.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when an invalid priority string is provided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPriority(pub String);

impl std::fmt::Display for InvalidPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let allowed = Priority::ALLOWED.join(", ");
        write!(f, "invalid priority: '{}' (must be one of: {allowed})", self.0)
    }
}

impl std::error::Error for InvalidPriority {}

impl Priority {
    /// Every accepted priority spelling, for diagnostics.
    pub const ALLOWED: [&'static str; 3] = ["high", "medium", "low"];
}

/// Task or subtask status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    /// Not started.
    #[default]
    Pending,
    /// Being worked on.
    #[serde(alias = "in_progress")]
    InProgress,
    /// Finished, awaiting review.
    Review,
    /// Finished.
    Done,
    /// Finished (alternate spelling used by some task files).
    Completed,
    /// Postponed.
    Deferred,
    /// Will not be done.
    Cancelled,
    /// Waiting on something outside the graph.
    Blocked,
}

impl Status {
    /// Every accepted status spelling, for diagnostics.
    pub const ALLOWED: [&'static str; 8] = [
        "pending",
        "in-progress",
        "review",
        "done",
        "completed",
        "deferred",
        "cancelled",
        "blocked",
    ];

    /// Parse a status from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid status.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, InvalidStatus> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "in-progress" | "in_progress" => Ok(Self::InProgress),
            "review" => Ok(Self::Review),
            "done" => Ok(Self::Done),
            "completed" => Ok(Self::Completed),
            "deferred" => Ok(Self::Deferred),
            "cancelled" => Ok(Self::Cancelled),
            "blocked" => Ok(Self::Blocked),
            _ => Err(InvalidStatus(s.to_string())),
        }
    }

    /// Get the string representation of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Review => "review",
            Self::Done => "done",
            Self::Completed => "completed",
            Self::Deferred => "deferred",
            Self::Cancelled => "cancelled",
            Self::Blocked => "blocked",
        }
    }

    /// Whether content of a node in this status is protected from rewrites.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Done | Self::Completed)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error when an invalid status string is provided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidStatus(pub String);

impl std::fmt::Display for InvalidStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid status: '{}' (must be one of: {})", self.0, Status::ALLOWED.join(", "))
    }
}

impl std::error::Error for InvalidStatus {}

/// A child unit of work. IDs are unique only within the parent task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    /// Identifier within the parent's subtask list.
    pub id: u32,
    /// Short title.
    pub title: String,
    /// One-line description.
    #[serde(default)]
    pub description: String,
    /// Implementation notes. Appended to, not replaced, by subtask updates.
    #[serde(default)]
    pub details: String,
    /// How the work will be verified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_strategy: Option<String>,
    /// Current status.
    #[serde(default)]
    pub status: Status,
    /// IDs of sibling subtasks this one depends on.
    #[serde(default)]
    pub dependencies: Vec<u32>,
}

/// A top-level unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Identifier, unique across the graph.
    pub id: u32,
    /// Short title. Immutable under update-task.
    pub title: String,
    /// One-line description.
    #[serde(default)]
    pub description: String,
    /// Implementation notes.
    #[serde(default)]
    pub details: String,
    /// How the work will be verified.
    #[serde(default)]
    pub test_strategy: String,
    /// Current status.
    #[serde(default)]
    pub status: Status,
    /// Priority.
    #[serde(default)]
    pub priority: Priority,
    /// IDs of tasks this task depends on.
    #[serde(default)]
    pub dependencies: Vec<u32>,
    /// Ordered child subtasks.
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
}

impl Task {
    /// Get a subtask by ID.
    #[must_use]
    pub fn subtask(&self, id: u32) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    /// Get a mutable subtask by ID.
    pub fn subtask_mut(&mut self, id: u32) -> Option<&mut Subtask> {
        self.subtasks.iter_mut().find(|s| s.id == id)
    }

    /// The set of subtask IDs under this task.
    #[must_use]
    pub fn subtask_ids(&self) -> BTreeSet<u32> {
        self.subtasks.iter().map(|s| s.id).collect()
    }

    /// Highest subtask ID, or 0 when the task has no subtasks.
    #[must_use]
    pub fn max_subtask_id(&self) -> u32 {
        self.subtasks.iter().map(|s| s.id).max().unwrap_or(0)
    }
}

/// Descriptive metadata stored alongside the tasks.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMetadata {
    /// Project name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    /// ISO 8601 timestamp of the last committed merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// The whole task graph, as held in the task file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskGraph {
    /// Optional metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<GraphMetadata>,
    /// Top-level tasks in file order.
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl TaskGraph {
    /// Create a graph from a list of tasks.
    #[must_use]
    pub const fn new(tasks: Vec<Task>) -> Self {
        Self { metadata: None, tasks }
    }

    /// Get a task by ID.
    #[must_use]
    pub fn task(&self, id: u32) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Get a mutable task by ID.
    pub fn task_mut(&mut self, id: u32) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// The set of top-level task IDs.
    #[must_use]
    pub fn task_ids(&self) -> BTreeSet<u32> {
        self.tasks.iter().map(|t| t.id).collect()
    }

    /// Highest task ID, or 0 for an empty graph.
    #[must_use]
    pub fn max_task_id(&self) -> u32 {
        self.tasks.iter().map(|t| t.id).max().unwrap_or(0)
    }

    /// Total number of subtasks across all tasks.
    #[must_use]
    pub fn subtask_count(&self) -> usize {
        self.tasks.iter().map(|t| t.subtasks.len()).sum()
    }
}

/// Reference to a single node in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeRef {
    /// A top-level task.
    Task(u32),
    /// A subtask, scoped to its parent.
    Subtask {
        /// Parent task ID.
        task: u32,
        /// Subtask ID within the parent.
        subtask: u32,
    },
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Task(id) => write!(f, "{id}"),
            Self::Subtask { task, subtask } => write!(f, "{task}.{subtask}"),
        }
    }
}

impl Serialize for NodeRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Remove duplicate IDs while keeping first-seen order.
#[must_use]
pub fn dedup_ids(ids: &[u32]) -> Vec<u32> {
    let mut seen = BTreeSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}
