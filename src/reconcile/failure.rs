//! Typed failures produced while reconciling a model response.

use crate::tasks::NodeRef;
use serde::Serialize;

/// What is wrong with one field of a candidate payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "problem", rename_all = "snake_case")]
pub enum Problem {
    /// A required field is absent.
    Missing,
    /// The field has the wrong JSON type.
    WrongType {
        /// The JSON type the schema expects.
        expected: &'static str,
        /// The JSON type that arrived.
        found: &'static str,
    },
    /// The field has the right type but an unacceptable value.
    Invalid {
        /// Why the value was refused.
        reason: String,
    },
}

/// A single field-level diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    /// Path of the field, e.g. `subtasks[2].dependencies[0]`.
    pub path: String,
    /// What is wrong with it.
    #[serde(flatten)]
    pub problem: Problem,
}

impl std::fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path = if self.path.is_empty() { "<root>" } else { &self.path };
        match &self.problem {
            Problem::Missing => write!(f, "{path}: missing"),
            Problem::WrongType { expected, found } => {
                write!(f, "{path}: expected {expected}, found {found}")
            }
            Problem::Invalid { reason } => write!(f, "{path}: {reason}"),
        }
    }
}

/// Every shape problem found in a candidate payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ValidationError {
    /// The individual problems, in document order.
    pub issues: Vec<FieldIssue>,
}

impl ValidationError {
    /// Build an error with a single issue.
    #[must_use]
    pub fn single(path: impl Into<String>, problem: Problem) -> Self {
        Self { issues: vec![FieldIssue { path: path.into(), problem }] }
    }

    /// Whether no issues were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered: Vec<String> = self.issues.iter().map(ToString::to_string).collect();
        write!(f, "{} issue(s): {}", self.issues.len(), rendered.join("; "))
    }
}

impl std::error::Error for ValidationError {}

/// Why a merge could not be committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeFailure {
    /// No JSON structure (or usable text) could be recovered from the response.
    #[error("unparsable response: {excerpt:?}")]
    UnparsableResponse {
        /// The start of the offending response.
        excerpt: String,
    },

    /// The payload did not match the expected shape.
    #[error("validation failed: {0}")]
    Validation(ValidationError),

    /// A supplied ID seed would collide with existing IDs.
    #[error("id seed {seed} collides with existing ids {conflicting:?}")]
    IdSeedConflict {
        /// The seed requested by the caller.
        seed: u32,
        /// The existing IDs inside the requested range.
        conflicting: Vec<u32>,
    },

    /// A dependency references a node that does not exist in scope.
    #[error("{node} depends on {missing}, which does not exist")]
    DependencyNotFound {
        /// The node carrying the dependency.
        node: NodeRef,
        /// The unresolved reference.
        missing: NodeRef,
    },

    /// A node lists itself as a dependency.
    #[error("{node} depends on itself")]
    SelfDependency {
        /// The offending node.
        node: NodeRef,
    },

    /// The dependency relation would contain a cycle.
    #[error("dependency cycle: {}", format_path(.path))]
    DependencyCycle {
        /// The cycle, starting and ending at the same node.
        path: Vec<NodeRef>,
    },

    /// A completed node would have had its content changed.
    #[error("{node} is protected; refused changes to {}", .fields.join(", "))]
    ProtectedNodeRejected {
        /// The completed node.
        node: NodeRef,
        /// The content fields the change would have altered.
        fields: Vec<String>,
    },

    /// An update-task payload changed the task's immutable id or title.
    #[error(
        "payload changed immutable fields of task {expected_id} \
         (id {found_id}, title {found_title:?})"
    )]
    TitleOrIdMismatch {
        /// The ID of the task being updated.
        expected_id: u32,
        /// The ID found in the payload.
        found_id: u32,
        /// The title of the task being updated.
        expected_title: String,
        /// The title found in the payload.
        found_title: String,
    },

    /// The operation targets a task that is not in the graph.
    #[error("task {task} not found")]
    TaskNotFound {
        /// The missing task ID.
        task: u32,
    },

    /// The operation targets a subtask that is not in the graph.
    #[error("subtask {task}.{subtask} not found")]
    SubtaskNotFound {
        /// Parent task ID.
        task: u32,
        /// Subtask ID.
        subtask: u32,
    },
}

impl From<ValidationError> for MergeFailure {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

impl MergeFailure {
    /// Short machine-readable name of the failure kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnparsableResponse { .. } => "unparsable_response",
            Self::Validation(_) => "validation_error",
            Self::IdSeedConflict { .. } => "id_seed_conflict",
            Self::DependencyNotFound { .. } => "dependency_not_found",
            Self::SelfDependency { .. } => "self_dependency",
            Self::DependencyCycle { .. } => "dependency_cycle",
            Self::ProtectedNodeRejected { .. } => "protected_node_rejected",
            Self::TitleOrIdMismatch { .. } => "title_or_id_mismatch",
            Self::TaskNotFound { .. } => "task_not_found",
            Self::SubtaskNotFound { .. } => "subtask_not_found",
        }
    }
}

fn format_path(path: &[NodeRef]) -> String {
    path.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_issue_display() {
        let issue = FieldIssue {
            path: "dependencies[1]".to_string(),
            problem: Problem::WrongType { expected: "integer", found: "string" },
        };
        assert_eq!(issue.to_string(), "dependencies[1]: expected integer, found string");

        let root = FieldIssue { path: String::new(), problem: Problem::Missing };
        assert_eq!(root.to_string(), "<root>: missing");
    }

    #[test]
    fn test_validation_error_lists_every_issue() {
        let err = ValidationError {
            issues: vec![
                FieldIssue { path: "title".to_string(), problem: Problem::Missing },
                FieldIssue {
                    path: "status".to_string(),
                    problem: Problem::Invalid { reason: "unknown status 'finished'".to_string() },
                },
            ],
        };
        let text = err.to_string();
        assert!(text.starts_with("2 issue(s)"));
        assert!(text.contains("title: missing"));
        assert!(text.contains("finished"));
    }

    #[test]
    fn test_cycle_display() {
        let failure = MergeFailure::DependencyCycle {
            path: vec![NodeRef::Task(1), NodeRef::Task(2), NodeRef::Task(1)],
        };
        assert_eq!(failure.to_string(), "dependency cycle: 1 -> 2 -> 1");
        assert_eq!(failure.kind(), "dependency_cycle");
    }

    #[test]
    fn test_failure_serializes_with_kind_tag() {
        let failure =
            MergeFailure::SelfDependency { node: NodeRef::Subtask { task: 3, subtask: 7 } };
        let value = serde_json::to_value(&failure).unwrap();
        assert_eq!(value["kind"], "self_dependency");
        assert_eq!(value["node"], "3.7");
    }
}
