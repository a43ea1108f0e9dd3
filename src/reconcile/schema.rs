//! Shape validation for model responses.
//!
//! Each operation has a fixed response shape. Validation walks the untyped
//! JSON, records every missing, mistyped or out-of-range field with its path,
//! and only produces a typed [`Payload`] when nothing was wrong. Unknown extra
//! fields are ignored.

use super::complexity::ComplexityEntry;
use super::extract::{extract_json, extract_text};
use super::failure::{FieldIssue, MergeFailure, Problem, ValidationError};
use crate::tasks::models::{dedup_ids, Priority, Status};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// The operations whose responses the validator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    /// Create one top-level task.
    AddTask,
    /// Rewrite one task (and its subtasks) by ID.
    UpdateTask,
    /// Append text to one subtask's details.
    UpdateSubtask,
    /// Add a batch of subtasks to one task.
    ExpandTask,
    /// Score task complexity; produces a report, not a graph change.
    AnalyzeComplexity,
    /// Create a batch of top-level tasks from a requirements document.
    ParsePrd,
}

impl OperationKind {
    /// Every operation, in a stable order.
    pub const ALL: [Self; 6] = [
        Self::AddTask,
        Self::UpdateTask,
        Self::UpdateSubtask,
        Self::ExpandTask,
        Self::AnalyzeComplexity,
        Self::ParsePrd,
    ];

    /// Get the string representation of the operation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AddTask => "add-task",
            Self::UpdateTask => "update-task",
            Self::UpdateSubtask => "update-subtask",
            Self::ExpandTask => "expand-task",
            Self::AnalyzeComplexity => "analyze-complexity",
            Self::ParsePrd => "parse-prd",
        }
    }

    /// Parse an operation name.
    #[allow(clippy::should_implement_trait)]
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s.trim())
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A new top-level task as proposed by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    /// ID proposed by the model (parse-prd only); reallocated on merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    /// Short title.
    pub title: String,
    /// One-line description.
    pub description: String,
    /// Implementation notes.
    pub details: String,
    /// How the work will be verified.
    pub test_strategy: String,
    /// IDs of tasks this task depends on.
    pub dependencies: Vec<u32>,
    /// Suggested priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

/// A new subtask as proposed by an expansion response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskDraft {
    /// ID proposed by the model; mapped onto the allocated batch range.
    pub id: u32,
    /// Short title.
    pub title: String,
    /// One-line description.
    pub description: String,
    /// IDs of sibling subtasks this one depends on.
    pub dependencies: Vec<u32>,
    /// Implementation notes.
    pub details: String,
    /// How the work will be verified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_strategy: Option<String>,
    /// Initial status; `pending` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

/// One subtask inside an update-task response. Absent fields mean "unchanged".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskPatch {
    /// Subtask ID within the task.
    pub id: u32,
    /// Short title.
    pub title: String,
    /// One-line description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Implementation notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// How the work will be verified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_strategy: Option<String>,
    /// Status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// IDs of sibling subtasks this one depends on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<u32>>,
}

/// A full task object returned by update-task. Absent optional fields mean
/// "unchanged"; subtasks missing from the list are left as they are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    /// Must equal the ID of the task being updated.
    pub id: u32,
    /// Must equal the title of the task being updated.
    pub title: String,
    /// One-line description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Implementation notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// How the work will be verified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_strategy: Option<String>,
    /// Status.
    pub status: Status,
    /// Priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// IDs of tasks this task depends on.
    pub dependencies: Vec<u32>,
    /// Subtasks to update or insert.
    pub subtasks: Vec<SubtaskPatch>,
}

/// A normalized, strictly-typed model response.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// add-task.
    Task(TaskDraft),
    /// update-task.
    TaskUpdate(TaskPatch),
    /// update-subtask.
    Text(String),
    /// expand-task.
    Subtasks(Vec<SubtaskDraft>),
    /// analyze-complexity.
    Complexity(Vec<ComplexityEntry>),
    /// parse-prd.
    Tasks(Vec<TaskDraft>),
}

impl Payload {
    /// Re-serialize the payload in the wire shape it was validated from.
    ///
    /// # Errors
    ///
    /// Returns an error only if serialization itself fails.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        Ok(match self {
            Self::Task(draft) => serde_json::to_value(draft)?,
            Self::TaskUpdate(patch) => serde_json::to_value(patch)?,
            Self::Text(text) => Value::String(text.clone()),
            Self::Subtasks(subtasks) => serde_json::json!({ "subtasks": subtasks }),
            Self::Complexity(entries) => serde_json::to_value(entries)?,
            Self::Tasks(tasks) => serde_json::json!({ "tasks": tasks }),
        })
    }
}

/// Extract and validate a raw model response.
///
/// # Errors
///
/// Returns [`MergeFailure::UnparsableResponse`] when nothing usable can be
/// recovered and [`MergeFailure::Validation`] listing every shape problem.
pub fn validate(raw: &str, kind: OperationKind) -> Result<Payload, MergeFailure> {
    if kind == OperationKind::UpdateSubtask {
        return extract_text(raw).map(Payload::Text);
    }
    let value = extract_json(raw)?;
    validate_value(&value, kind)
}

/// Validate an already-parsed JSON value.
///
/// # Errors
///
/// Returns [`MergeFailure::Validation`] listing every shape problem.
pub fn validate_value(value: &Value, kind: OperationKind) -> Result<Payload, MergeFailure> {
    let mut checker = Checker::default();
    let payload = match kind {
        OperationKind::AddTask => checker.task_draft(value, "", false).map(Payload::Task),
        OperationKind::UpdateTask => checker.task_patch(value).map(Payload::TaskUpdate),
        OperationKind::UpdateSubtask => checker.text(value).map(Payload::Text),
        OperationKind::ExpandTask => checker.subtask_batch(value).map(Payload::Subtasks),
        OperationKind::AnalyzeComplexity => checker.complexity(value).map(Payload::Complexity),
        OperationKind::ParsePrd => checker.task_batch(value).map(Payload::Tasks),
    };
    match payload {
        Some(payload) if checker.issues.is_empty() => Ok(payload),
        _ => {
            if checker.issues.is_empty() {
                checker.push("", Problem::Invalid { reason: "payload rejected".to_string() });
            }
            Err(MergeFailure::Validation(ValidationError { issues: checker.issues }))
        }
    }
}

/// JSON type name for diagnostics.
pub(crate) const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Accumulates field issues while reading a payload.
///
/// Readers return `None` when the field is unusable; the issue has already
/// been recorded by then, so callers keep going to find the rest.
#[derive(Debug, Default)]
pub(crate) struct Checker {
    pub(crate) issues: Vec<FieldIssue>,
}

impl Checker {
    pub(crate) fn push(&mut self, path: impl Into<String>, problem: Problem) {
        self.issues.push(FieldIssue { path: path.into(), problem });
    }

    fn wrong_type(&mut self, path: &str, expected: &'static str, found: &Value) {
        self.push(path, Problem::WrongType { expected, found: type_name(found) });
    }

    pub(crate) fn object<'a>(
        &mut self,
        value: &'a Value,
        path: &str,
    ) -> Option<&'a Map<String, Value>> {
        if let Value::Object(map) = value {
            Some(map)
        } else {
            self.wrong_type(path, "object", value);
            None
        }
    }

    pub(crate) fn array<'a>(&mut self, value: &'a Value, path: &str) -> Option<&'a Vec<Value>> {
        if let Value::Array(items) = value {
            Some(items)
        } else {
            self.wrong_type(path, "array", value);
            None
        }
    }

    /// A required string, kept verbatim. `non_empty` also refuses blank text.
    pub(crate) fn string(
        &mut self,
        obj: &Map<String, Value>,
        key: &str,
        prefix: &str,
        non_empty: bool,
    ) -> Option<String> {
        let path = join(prefix, key);
        match obj.get(key) {
            None => {
                self.push(path, Problem::Missing);
                None
            }
            Some(Value::String(s)) if non_empty && s.trim().is_empty() => {
                self.push(path, Problem::Invalid { reason: "must not be empty".to_string() });
                None
            }
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                self.wrong_type(&path, "string", other);
                None
            }
        }
    }

    /// An optional string; absent and `null` both read as `None`.
    fn optional_string(
        &mut self,
        obj: &Map<String, Value>,
        key: &str,
        prefix: &str,
    ) -> Result<Option<String>, ()> {
        match obj.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => {
                self.wrong_type(&join(prefix, key), "string", other);
                Err(())
            }
        }
    }

    /// A positive integer ID read from `value`.
    fn id_value(&mut self, value: &Value, path: &str) -> Option<u32> {
        match value {
            Value::Number(n) => match n.as_u64().and_then(|v| u32::try_from(v).ok()) {
                Some(id) if id > 0 => Some(id),
                _ => {
                    self.push(path, Problem::Invalid {
                        reason: format!("must be a positive integer id, got {n}"),
                    });
                    None
                }
            },
            other => {
                self.wrong_type(path, "integer", other);
                None
            }
        }
    }

    pub(crate) fn id(&mut self, obj: &Map<String, Value>, key: &str, prefix: &str) -> Option<u32> {
        let path = join(prefix, key);
        match obj.get(key) {
            None => {
                self.push(path, Problem::Missing);
                None
            }
            Some(value) => self.id_value(value, &path),
        }
    }

    /// A list of dependency IDs, deduplicated. Every bad entry is reported.
    fn id_list(&mut self, value: &Value, path: &str) -> Option<Vec<u32>> {
        let items = self.array(value, path)?;
        let mut ids = Vec::with_capacity(items.len());
        let mut ok = true;
        for (i, item) in items.iter().enumerate() {
            match self.id_value(item, &format!("{path}[{i}]")) {
                Some(id) => ids.push(id),
                None => ok = false,
            }
        }
        ok.then(|| dedup_ids(&ids))
    }

    fn required_id_list(
        &mut self,
        obj: &Map<String, Value>,
        key: &str,
        prefix: &str,
    ) -> Option<Vec<u32>> {
        let path = join(prefix, key);
        match obj.get(key) {
            None => {
                self.push(path, Problem::Missing);
                None
            }
            Some(value) => self.id_list(value, &path),
        }
    }

    fn optional_id_list(
        &mut self,
        obj: &Map<String, Value>,
        key: &str,
        prefix: &str,
    ) -> Result<Option<Vec<u32>>, ()> {
        match obj.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => self.id_list(value, &join(prefix, key)).map(Some).ok_or(()),
        }
    }

    fn status_value(&mut self, value: &Value, path: &str) -> Option<Status> {
        match value {
            Value::String(s) => match Status::from_str(s) {
                Ok(status) => Some(status),
                Err(err) => {
                    self.push(path, Problem::Invalid { reason: err.to_string() });
                    None
                }
            },
            other => {
                self.wrong_type(path, "string", other);
                None
            }
        }
    }

    fn optional_status(
        &mut self,
        obj: &Map<String, Value>,
        key: &str,
        prefix: &str,
    ) -> Result<Option<Status>, ()> {
        match obj.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => self.status_value(value, &join(prefix, key)).map(Some).ok_or(()),
        }
    }

    fn optional_priority(
        &mut self,
        obj: &Map<String, Value>,
        key: &str,
        prefix: &str,
    ) -> Result<Option<Priority>, ()> {
        let path = join(prefix, key);
        match obj.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => match Priority::from_str(s) {
                Ok(priority) => Ok(Some(priority)),
                Err(err) => {
                    self.push(path, Problem::Invalid { reason: err.to_string() });
                    Err(())
                }
            },
            Some(other) => {
                self.wrong_type(&path, "string", other);
                Err(())
            }
        }
    }

    /// add-task object. `lenient` relaxes the documented required fields to
    /// the ones a requirements parse must have (title and description).
    fn task_draft(&mut self, value: &Value, prefix: &str, lenient: bool) -> Option<TaskDraft> {
        let obj = self.object(value, prefix)?;

        let id = if lenient {
            match obj.get("id") {
                None | Some(Value::Null) => Ok(None),
                Some(v) => self.id_value(v, &join(prefix, "id")).map(Some).ok_or(()),
            }
        } else {
            Ok(None)
        };
        let title = self.string(obj, "title", prefix, true);
        let description = self.string(obj, "description", prefix, false);
        let (details, test_strategy, dependencies) = if lenient {
            let details = self.optional_string(obj, "details", prefix);
            let test_strategy = self.optional_string(obj, "testStrategy", prefix);
            let dependencies = self.optional_id_list(obj, "dependencies", prefix);
            (
                details.map(Option::unwrap_or_default).ok(),
                test_strategy.map(Option::unwrap_or_default).ok(),
                dependencies.map(Option::unwrap_or_default).ok(),
            )
        } else {
            (
                self.string(obj, "details", prefix, false),
                self.string(obj, "testStrategy", prefix, false),
                self.required_id_list(obj, "dependencies", prefix),
            )
        };
        let priority = self.optional_priority(obj, "priority", prefix);

        Some(TaskDraft {
            id: id.ok()?,
            title: title?,
            description: description?,
            details: details?,
            test_strategy: test_strategy?,
            dependencies: dependencies?,
            priority: priority.ok()?,
        })
    }

    /// parse-prd: `{ "tasks": [...] }`.
    fn task_batch(&mut self, value: &Value) -> Option<Vec<TaskDraft>> {
        let obj = self.object(value, "")?;
        let Some(tasks) = obj.get("tasks") else {
            self.push("tasks", Problem::Missing);
            return None;
        };
        let items = self.array(tasks, "tasks")?;
        if items.is_empty() {
            self.push("tasks", Problem::Invalid {
                reason: "must contain at least one task".to_string(),
            });
            return None;
        }

        let drafts: Vec<Option<TaskDraft>> = items
            .iter()
            .enumerate()
            .map(|(i, item)| self.task_draft(item, &format!("tasks[{i}]"), true))
            .collect();
        self.check_unique_ids(items, "tasks");
        drafts.into_iter().collect()
    }

    fn subtask_draft(&mut self, value: &Value, prefix: &str) -> Option<SubtaskDraft> {
        let obj = self.object(value, prefix)?;
        let id = self.id(obj, "id", prefix);
        let title = self.string(obj, "title", prefix, true);
        let description = self.string(obj, "description", prefix, false);
        let dependencies = self.required_id_list(obj, "dependencies", prefix);
        let details = self.string(obj, "details", prefix, false);
        let test_strategy = self.optional_string(obj, "testStrategy", prefix);
        let status = self.optional_status(obj, "status", prefix);

        Some(SubtaskDraft {
            id: id?,
            title: title?,
            description: description?,
            dependencies: dependencies?,
            details: details?,
            test_strategy: test_strategy.ok()?,
            status: status.ok()?,
        })
    }

    /// expand-task: `{ "subtasks": [...] }`.
    fn subtask_batch(&mut self, value: &Value) -> Option<Vec<SubtaskDraft>> {
        let obj = self.object(value, "")?;
        let Some(subtasks) = obj.get("subtasks") else {
            self.push("subtasks", Problem::Missing);
            return None;
        };
        let items = self.array(subtasks, "subtasks")?;
        if items.is_empty() {
            self.push("subtasks", Problem::Invalid {
                reason: "must contain at least one subtask".to_string(),
            });
            return None;
        }

        let drafts: Vec<Option<SubtaskDraft>> = items
            .iter()
            .enumerate()
            .map(|(i, item)| self.subtask_draft(item, &format!("subtasks[{i}]")))
            .collect();
        self.check_unique_ids(items, "subtasks");
        drafts.into_iter().collect()
    }

    /// Report repeated `id` values in a list. IDs are read from the raw
    /// items, so an entry with other problems still takes part.
    fn check_unique_ids(&mut self, items: &[Value], list: &str) {
        let mut seen = BTreeSet::new();
        for (i, item) in items.iter().enumerate() {
            if let Some(id) = item.get("id").and_then(Value::as_u64) {
                if !seen.insert(id) {
                    self.push(format!("{list}[{i}].id"), Problem::Invalid {
                        reason: format!("duplicate id {id} in batch"),
                    });
                }
            }
        }
    }

    fn subtask_patch(&mut self, value: &Value, prefix: &str) -> Option<SubtaskPatch> {
        let obj = self.object(value, prefix)?;
        let id = self.id(obj, "id", prefix);
        let title = self.string(obj, "title", prefix, true);
        let description = self.optional_string(obj, "description", prefix);
        let details = self.optional_string(obj, "details", prefix);
        let test_strategy = self.optional_string(obj, "testStrategy", prefix);
        let status = self.optional_status(obj, "status", prefix);
        let dependencies = self.optional_id_list(obj, "dependencies", prefix);

        Some(SubtaskPatch {
            id: id?,
            title: title?,
            description: description.ok()?,
            details: details.ok()?,
            test_strategy: test_strategy.ok()?,
            status: status.ok()?,
            dependencies: dependencies.ok()?,
        })
    }

    /// update-task: a full task object.
    fn task_patch(&mut self, value: &Value) -> Option<TaskPatch> {
        let obj = self.object(value, "")?;
        let id = self.id(obj, "id", "");
        let title = self.string(obj, "title", "", true);
        let description = self.optional_string(obj, "description", "");
        let details = self.optional_string(obj, "details", "");
        let test_strategy = self.optional_string(obj, "testStrategy", "");
        let status = match obj.get("status") {
            None => {
                self.push("status", Problem::Missing);
                None
            }
            Some(v) => self.status_value(v, "status"),
        };
        let priority = self.optional_priority(obj, "priority", "");
        let dependencies = self.required_id_list(obj, "dependencies", "");
        let subtasks = match obj.get("subtasks") {
            None => {
                self.push("subtasks", Problem::Missing);
                None
            }
            Some(v) => self.array(v, "subtasks").and_then(|items| {
                let patches: Vec<Option<SubtaskPatch>> = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.subtask_patch(item, &format!("subtasks[{i}]")))
                    .collect();
                self.check_unique_ids(items, "subtasks");
                patches.into_iter().collect::<Option<Vec<_>>>()
            }),
        };

        Some(TaskPatch {
            id: id?,
            title: title?,
            description: description.ok()?,
            details: details.ok()?,
            test_strategy: test_strategy.ok()?,
            status: status?,
            priority: priority.ok()?,
            dependencies: dependencies?,
            subtasks: subtasks?,
        })
    }

    /// update-subtask: a JSON string (the text path normally skips this).
    fn text(&mut self, value: &Value) -> Option<String> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::String(_) => {
                self.push("", Problem::Invalid { reason: "must not be empty".to_string() });
                None
            }
            other => {
                self.wrong_type("", "string", other);
                None
            }
        }
    }

    /// A number in an inclusive range.
    pub(crate) fn number_in_range(
        &mut self,
        obj: &Map<String, Value>,
        key: &str,
        prefix: &str,
        range: std::ops::RangeInclusive<f64>,
    ) -> Option<f64> {
        let path = join(prefix, key);
        match obj.get(key) {
            None => {
                self.push(path, Problem::Missing);
                None
            }
            Some(Value::Number(n)) => match n.as_f64() {
                Some(v) if range.contains(&v) => Some(v),
                _ => {
                    self.push(path, Problem::Invalid {
                        reason: format!(
                            "must be between {} and {}, got {n}",
                            range.start(),
                            range.end()
                        ),
                    });
                    None
                }
            },
            Some(other) => {
                self.wrong_type(&path, "number", other);
                None
            }
        }
    }

    /// A required positive integer that is not an ID (counts).
    pub(crate) fn positive_integer(
        &mut self,
        obj: &Map<String, Value>,
        key: &str,
        prefix: &str,
    ) -> Option<u32> {
        self.id(obj, key, prefix)
    }
}
