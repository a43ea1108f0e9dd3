//! JSON Schema descriptions of each operation's expected response.
//!
//! These are handed to the model invoker alongside the assembled context so
//! the prompt layer can state the exact output contract.

use super::complexity::ComplexityEntry;
use super::schema::{OperationKind, SubtaskDraft, TaskDraft, TaskPatch};
use schemars::JsonSchema;
use serde_json::Value;

/// Response wrapper for expand-task.
#[derive(JsonSchema)]
#[allow(dead_code)]
struct SubtaskBatch {
    subtasks: Vec<SubtaskDraft>,
}

/// Response wrapper for parse-prd.
#[derive(JsonSchema)]
#[allow(dead_code)]
struct TaskBatch {
    tasks: Vec<TaskDraft>,
}

/// The JSON Schema an operation's response must satisfy.
///
/// update-subtask expects plain text, described as a bare string schema.
#[must_use]
pub fn output_schema(kind: OperationKind) -> Value {
    let schema = match kind {
        OperationKind::AddTask => schemars::schema_for!(TaskDraft),
        OperationKind::UpdateTask => schemars::schema_for!(TaskPatch),
        OperationKind::UpdateSubtask => schemars::schema_for!(String),
        OperationKind::ExpandTask => schemars::schema_for!(SubtaskBatch),
        OperationKind::AnalyzeComplexity => schemars::schema_for!(Vec<ComplexityEntry>),
        OperationKind::ParsePrd => schemars::schema_for!(TaskBatch),
    };
    serde_json::to_value(schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_task_schema_names_required_fields() {
        let schema = output_schema(OperationKind::AddTask);
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        for field in ["title", "description", "details", "testStrategy", "dependencies"] {
            assert!(required.contains(&field), "{field} should be required");
        }
        assert!(!required.contains(&"priority"));
    }

    #[test]
    fn test_expand_schema_wraps_subtasks() {
        let schema = output_schema(OperationKind::ExpandTask);
        assert!(schema["properties"]["subtasks"].is_object());
    }

    #[test]
    fn test_every_operation_has_a_schema() {
        for kind in OperationKind::ALL {
            assert!(output_schema(kind).is_object(), "{kind} schema missing");
        }
    }

    #[test]
    fn test_update_subtask_schema_is_string() {
        assert_eq!(output_schema(OperationKind::UpdateSubtask)["type"], "string");
    }
}
