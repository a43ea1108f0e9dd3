//! The merge engine: validate, check, guard, allocate, commit.
//!
//! Each operation runs against a private copy of the graph and walks the
//! stages in [`Stage`]. The first failure aborts the whole operation with a
//! [`MergeError`] naming the stage; the caller's graph is never touched. On
//! success the new graph is returned together with a per-node diff.
//!
//! Protected (completed) nodes are not failures: changes aimed at them are
//! either dropped and reported as [`NodeOutcome::Rejected`], or rerouted into
//! a new sibling and reported as [`NodeOutcome::Redirected`].

use super::complexity::ComplexityReport;
use super::failure::{MergeFailure, Problem, ValidationError};
use super::schema::{self, OperationKind, Payload, SubtaskPatch, TaskDraft};
use crate::config::ProjectConfig;
use crate::tasks::guard::{self, PROTECTED};
use crate::tasks::models::{dedup_ids, NodeRef, Priority, Status, Subtask, Task, TaskGraph};
use crate::tasks::{deps, id};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Pipeline stages.
///
/// add-task checks dependencies before allocating. expand-task and parse-prd
/// allocate first because batch references are resolved against the
/// allocated run. update-task guards before checking so that dependency edits
/// dropped from protected subtasks are never checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Extracting and shape-checking the response.
    Validating,
    /// Resolving dependency scope and checking for cycles.
    Checking,
    /// Comparing proposals against completed nodes.
    Guarding,
    /// Assigning IDs to new nodes.
    Allocating,
    /// Swapping in the new graph.
    Committing,
    /// Finished successfully.
    Done,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Validating => "validating",
            Self::Checking => "checking",
            Self::Guarding => "guarding",
            Self::Allocating => "allocating",
            Self::Committing => "committing",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// A failed merge: which operation, at which stage, and why.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{operation} failed while {stage}: {failure}")]
pub struct MergeError {
    /// The operation that failed.
    pub operation: OperationKind,
    /// The stage the operation was in.
    pub stage: Stage,
    /// The underlying failure.
    #[source]
    pub failure: MergeFailure,
}

/// How update-subtask treats the existing details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppendIntent {
    /// Keep the existing details and append the new text.
    #[default]
    Append,
    /// Replace the details; only when the request explicitly asks for it.
    Replace,
}

/// One merge to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeRequest {
    /// Create one new top-level task.
    AddTask {
        /// Raw model response.
        response: String,
        /// Priority chosen by the caller; overrides the model's suggestion.
        priority: Option<Priority>,
    },
    /// Rewrite one task by ID.
    UpdateTask {
        /// Target task.
        task_id: u32,
        /// Raw model response.
        response: String,
    },
    /// Add text to one subtask's details.
    UpdateSubtask {
        /// Parent task.
        task_id: u32,
        /// Target subtask.
        subtask_id: u32,
        /// Raw model response.
        response: String,
        /// Append or replace.
        intent: AppendIntent,
    },
    /// Add a batch of subtasks to one task.
    ExpandTask {
        /// Target task.
        task_id: u32,
        /// Raw model response.
        response: String,
        /// First ID of the batch; `max + 1` when absent.
        next_subtask_id: Option<u32>,
        /// Exact number of subtasks expected, when the caller asked for one.
        subtask_count: Option<usize>,
    },
    /// Create a batch of tasks from a requirements document.
    ParsePrd {
        /// Raw model response.
        response: String,
    },
}

impl MergeRequest {
    /// The operation this request performs.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::AddTask { .. } => OperationKind::AddTask,
            Self::UpdateTask { .. } => OperationKind::UpdateTask,
            Self::UpdateSubtask { .. } => OperationKind::UpdateSubtask,
            Self::ExpandTask { .. } => OperationKind::ExpandTask,
            Self::ParsePrd { .. } => OperationKind::ParsePrd,
        }
    }

    /// The node the request targets, if any.
    #[must_use]
    pub const fn target(&self) -> Option<NodeRef> {
        match self {
            Self::AddTask { .. } | Self::ParsePrd { .. } => None,
            Self::UpdateTask { task_id, .. } | Self::ExpandTask { task_id, .. } => {
                Some(NodeRef::Task(*task_id))
            }
            Self::UpdateSubtask { task_id, subtask_id, .. } => {
                Some(NodeRef::Subtask { task: *task_id, subtask: *subtask_id })
            }
        }
    }
}

/// What happened to a node that was created or modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Change {
    /// The node is new.
    Added,
    /// The listed fields changed.
    Updated {
        /// Changed field names.
        fields: Vec<String>,
    },
}

/// Per-node result of a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NodeOutcome {
    /// The change was applied as proposed.
    Applied {
        /// The node.
        node: NodeRef,
        /// What changed.
        change: Change,
    },
    /// The change was written to a different node.
    Redirected {
        /// The node the change was aimed at.
        node: NodeRef,
        /// The node that received it.
        to: NodeRef,
        /// Why it was rerouted.
        reason: String,
    },
    /// The change was dropped; the node keeps its content.
    Rejected {
        /// The node.
        node: NodeRef,
        /// Why the change was dropped.
        reason: String,
        /// The fields the change would have altered.
        fields: Vec<String>,
    },
}

/// Machine-readable summary of a successful merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeDiff {
    /// Outcomes in the order they were decided.
    pub outcomes: Vec<NodeOutcome>,
}

impl MergeDiff {
    /// Nodes created by the merge.
    #[must_use]
    pub fn added(&self) -> Vec<NodeRef> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                NodeOutcome::Applied { node, change: Change::Added } => Some(*node),
                _ => None,
            })
            .collect()
    }

    /// Existing nodes modified by the merge, with the fields that changed.
    #[must_use]
    pub fn changed(&self) -> Vec<(NodeRef, &[String])> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                NodeOutcome::Applied { node, change: Change::Updated { fields } } => {
                    Some((*node, fields.as_slice()))
                }
                _ => None,
            })
            .collect()
    }

    /// Changes rerouted away from protected nodes, as `(from, to)`.
    #[must_use]
    pub fn redirected(&self) -> Vec<(NodeRef, NodeRef)> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                NodeOutcome::Redirected { node, to, .. } => Some((*node, *to)),
                _ => None,
            })
            .collect()
    }

    /// Nodes whose proposed changes were dropped.
    #[must_use]
    pub fn rejected(&self) -> Vec<NodeRef> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                NodeOutcome::Rejected { node, .. } => Some(*node),
                _ => None,
            })
            .collect()
    }

    /// One-line human summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} added, {} changed, {} redirected, {} rejected",
            self.added().len(),
            self.changed().len(),
            self.redirected().len(),
            self.rejected().len()
        )
    }
}

/// The result of a successful merge.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
    /// The new graph.
    pub graph: TaskGraph,
    /// What changed.
    pub diff: MergeDiff,
    /// Stages visited, ending in [`Stage::Done`].
    pub trace: Vec<Stage>,
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOptions {
    /// Inserted between existing details and appended text.
    pub details_separator: String,
    /// Prefix appended text with a UTC timestamp line.
    pub timestamp_appends: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self { details_separator: "\n\n".to_string(), timestamp_appends: true }
    }
}

/// Stage bookkeeping for one operation.
struct Transaction {
    operation: OperationKind,
    stage: Stage,
    trace: Vec<Stage>,
}

impl Transaction {
    fn begin(operation: OperationKind) -> Self {
        Self { operation, stage: Stage::Validating, trace: vec![Stage::Validating] }
    }

    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        self.trace.push(stage);
    }

    fn fail(&self, failure: MergeFailure) -> MergeError {
        MergeError { operation: self.operation, stage: self.stage, failure }
    }

    fn check<T>(&self, result: Result<T, MergeFailure>) -> Result<T, MergeError> {
        result.map_err(|failure| self.fail(failure))
    }

    fn commit(mut self, mut graph: TaskGraph, outcomes: Vec<NodeOutcome>) -> Merged {
        self.enter(Stage::Committing);
        graph.metadata.get_or_insert_with(Default::default).updated_at =
            Some(chrono::Utc::now().to_rfc3339());
        self.enter(Stage::Done);
        Merged { graph, diff: MergeDiff { outcomes }, trace: self.trace }
    }
}

/// Applies validated model output to a task graph.
#[derive(Debug, Clone, Default)]
pub struct MergeEngine {
    options: MergeOptions,
}

impl MergeEngine {
    /// Create an engine with explicit options.
    #[must_use]
    pub const fn new(options: MergeOptions) -> Self {
        Self { options }
    }

    /// Create an engine from project configuration.
    #[must_use]
    pub fn from_config(config: &ProjectConfig) -> Self {
        Self::new(MergeOptions {
            details_separator: config.details_separator.clone(),
            timestamp_appends: config.timestamp_appends,
        })
    }

    /// The engine's options.
    #[must_use]
    pub const fn options(&self) -> &MergeOptions {
        &self.options
    }

    /// Apply one request to `graph`, returning the new graph and its diff.
    ///
    /// # Errors
    ///
    /// Returns a [`MergeError`] if the response is unusable or the result
    /// would break a graph invariant. `graph` is unchanged either way.
    pub fn apply(&self, graph: &TaskGraph, request: &MergeRequest) -> Result<Merged, MergeError> {
        match request {
            MergeRequest::AddTask { response, priority } => {
                self.add_task(graph, response, *priority)
            }
            MergeRequest::UpdateTask { task_id, response } => {
                self.update_task(graph, *task_id, response)
            }
            MergeRequest::UpdateSubtask { task_id, subtask_id, response, intent } => {
                self.update_subtask(graph, *task_id, *subtask_id, response, *intent)
            }
            MergeRequest::ExpandTask { task_id, response, next_subtask_id, subtask_count } => {
                self.expand_task(graph, *task_id, response, *next_subtask_id, *subtask_count)
            }
            MergeRequest::ParsePrd { response } => self.parse_prd(graph, response),
        }
    }

    /// Validate a complexity analysis and build its report.
    ///
    /// # Errors
    ///
    /// Returns a [`MergeError`] at the validating stage if any entry is bad.
    pub fn analyze_complexity(
        &self,
        graph: &TaskGraph,
        raw: &str,
    ) -> Result<ComplexityReport, MergeError> {
        let txn = Transaction::begin(OperationKind::AnalyzeComplexity);
        match txn.check(schema::validate(raw, OperationKind::AnalyzeComplexity))? {
            Payload::Complexity(entries) => Ok(ComplexityReport::new(graph, entries)),
            other => Err(txn.fail(unexpected(&other))),
        }
    }

    fn add_task(
        &self,
        graph: &TaskGraph,
        response: &str,
        priority: Option<Priority>,
    ) -> Result<Merged, MergeError> {
        let mut txn = Transaction::begin(OperationKind::AddTask);
        let draft = match txn.check(schema::validate(response, OperationKind::AddTask))? {
            Payload::Task(draft) => draft,
            other => return Err(txn.fail(unexpected(&other))),
        };

        txn.enter(Stage::Checking);
        let existing = graph.task_ids();
        let next_id = id::next_id(&existing);
        // Failures name the task by the ID it is about to receive. A new task
        // has no dependents, so it cannot close a cycle of its own.
        if let Ok(new_id) = next_id.as_ref() {
            txn.check(deps::check_references(
                *new_id,
                &draft.dependencies,
                &existing,
                NodeRef::Task,
            ))?;
        }
        txn.check(deps::ensure_acyclic(&deps::task_edges(graph), NodeRef::Task))?;

        txn.enter(Stage::Allocating);
        let new_id = txn.check(next_id)?;
        let mut next = graph.clone();
        next.tasks.push(task_from_draft(new_id, draft, priority));

        let outcomes =
            vec![NodeOutcome::Applied { node: NodeRef::Task(new_id), change: Change::Added }];
        Ok(txn.commit(next, outcomes))
    }

    fn parse_prd(&self, graph: &TaskGraph, response: &str) -> Result<Merged, MergeError> {
        let mut txn = Transaction::begin(OperationKind::ParsePrd);
        let drafts = match txn.check(schema::validate(response, OperationKind::ParsePrd))? {
            Payload::Tasks(drafts) => drafts,
            other => return Err(txn.fail(unexpected(&other))),
        };

        txn.enter(Stage::Allocating);
        let existing = graph.task_ids();
        let ids = txn.check(id::allocate(&existing, None, drafts.len()))?;
        let remap: BTreeMap<u32, u32> = drafts
            .iter()
            .zip(&ids)
            .filter_map(|(draft, &new_id)| draft.id.map(|proposed| (proposed, new_id)))
            .collect();

        txn.enter(Stage::Checking);
        let scope: BTreeSet<u32> = existing.iter().chain(&ids).copied().collect();
        let mut next = graph.clone();
        let mut outcomes = Vec::with_capacity(ids.len());
        for (mut draft, new_id) in drafts.into_iter().zip(ids) {
            draft.dependencies = remap_batch(&draft.dependencies, &remap);
            txn.check(deps::check_references(new_id, &draft.dependencies, &scope, NodeRef::Task))?;
            next.tasks.push(task_from_draft(new_id, draft, None));
            outcomes.push(NodeOutcome::Applied {
                node: NodeRef::Task(new_id),
                change: Change::Added,
            });
        }
        txn.check(deps::ensure_acyclic(&deps::task_edges(&next), NodeRef::Task))?;

        Ok(txn.commit(next, outcomes))
    }

    fn update_task(
        &self,
        graph: &TaskGraph,
        task_id: u32,
        response: &str,
    ) -> Result<Merged, MergeError> {
        let mut txn = Transaction::begin(OperationKind::UpdateTask);
        let original = txn.check(find_task(graph, task_id))?;
        let patch = match txn.check(schema::validate(response, OperationKind::UpdateTask))? {
            Payload::TaskUpdate(patch) => patch,
            other => return Err(txn.fail(unexpected(&other))),
        };
        if patch.id != task_id || patch.title.trim() != original.title.trim() {
            return Err(txn.fail(MergeFailure::TitleOrIdMismatch {
                expected_id: task_id,
                found_id: patch.id,
                expected_title: original.title.clone(),
                found_title: patch.title,
            }));
        }

        txn.enter(Stage::Guarding);
        let mut outcomes = Vec::new();
        let mut merged = original.clone();
        let mut task_fields = Vec::new();

        let mut proposed = original.clone();
        if let Some(description) = revised(&original.description, patch.description.as_deref()) {
            proposed.description = description;
        }
        if let Some(details) = revised(&original.details, patch.details.as_deref()) {
            proposed.details = details;
        }
        let test_strategy = revised(&original.test_strategy, patch.test_strategy.as_deref());
        if let Some(test_strategy) = test_strategy {
            proposed.test_strategy = test_strategy;
        }
        match guard::check_task(original, &proposed) {
            Ok(()) => {
                task_fields.extend(guard::task_changes(original, &proposed));
                merged.description = proposed.description;
                merged.details = proposed.details;
                merged.test_strategy = proposed.test_strategy;
            }
            Err(failure) => outcomes.push(txn.check(rejection(failure))?),
        }
        if patch.status != original.status {
            merged.status = patch.status;
            task_fields.push("status".to_string());
        }
        if let Some(priority) = patch.priority.filter(|p| *p != original.priority) {
            merged.priority = priority;
            task_fields.push("priority".to_string());
        }
        if patch.dependencies != dedup_ids(&original.dependencies) {
            merged.dependencies.clone_from(&patch.dependencies);
            task_fields.push("dependencies".to_string());
        }

        let original_ids = original.subtask_ids();
        let inserted: BTreeSet<u32> =
            patch.subtasks.iter().map(|p| p.id).filter(|id| !original_ids.contains(id)).collect();
        let mut rewired = Vec::new();

        for subtask_patch in &patch.subtasks {
            let node = NodeRef::Subtask { task: task_id, subtask: subtask_patch.id };
            let Some(existing) = original.subtask(subtask_patch.id) else {
                merged.subtasks.push(subtask_from_patch(subtask_patch));
                outcomes.push(NodeOutcome::Applied { node, change: Change::Added });
                rewired.push(subtask_patch.id);
                continue;
            };
            let proposed = patched_subtask(existing, subtask_patch);
            let Some(slot) = merged.subtask_mut(existing.id) else { continue };

            match guard::check_subtask(task_id, existing, &proposed) {
                Ok(()) => {
                    let mut fields = guard::subtask_changes(existing, &proposed);
                    if proposed.status != existing.status {
                        fields.push("status".to_string());
                    }
                    if proposed.dependencies != existing.dependencies {
                        fields.push("dependencies".to_string());
                        rewired.push(existing.id);
                    }
                    *slot = proposed;
                    if !fields.is_empty() {
                        outcomes.push(NodeOutcome::Applied {
                            node,
                            change: Change::Updated { fields },
                        });
                    }
                }
                Err(failure) => {
                    outcomes.push(txn.check(rejection(failure))?);
                    if proposed.status != existing.status {
                        slot.status = proposed.status;
                        outcomes.push(NodeOutcome::Applied {
                            node,
                            change: Change::Updated { fields: vec!["status".to_string()] },
                        });
                    }
                }
            }
        }

        txn.enter(Stage::Checking);
        let task_scope: BTreeSet<u32> =
            graph.task_ids().into_iter().filter(|id| *id != task_id).collect();
        txn.check(deps::check_references(
            task_id,
            &merged.dependencies,
            &task_scope,
            NodeRef::Task,
        ))?;
        let to_ref = |subtask| NodeRef::Subtask { task: task_id, subtask };
        for subtask in merged.subtasks.iter().filter(|s| rewired.contains(&s.id)) {
            // Inserted subtasks form one batch; existing ones only look back.
            let scope = if inserted.contains(&subtask.id) {
                deps::prior_scope(&original_ids, subtask.id, &inserted)
            } else {
                deps::prior_scope(&original_ids, subtask.id, &BTreeSet::new())
            };
            txn.check(deps::check_references(subtask.id, &subtask.dependencies, &scope, to_ref))?;
        }
        txn.check(deps::ensure_acyclic(&deps::subtask_edges(&merged), to_ref))?;

        if !task_fields.is_empty() {
            outcomes.insert(0, NodeOutcome::Applied {
                node: NodeRef::Task(task_id),
                change: Change::Updated { fields: task_fields },
            });
        }
        let mut next = graph.clone();
        if let Some(slot) = next.task_mut(task_id) {
            *slot = merged;
        }
        txn.check(deps::ensure_acyclic(&deps::task_edges(&next), NodeRef::Task))?;

        Ok(txn.commit(next, outcomes))
    }

    fn update_subtask(
        &self,
        graph: &TaskGraph,
        task_id: u32,
        subtask_id: u32,
        response: &str,
        intent: AppendIntent,
    ) -> Result<Merged, MergeError> {
        let mut txn = Transaction::begin(OperationKind::UpdateSubtask);
        let task = txn.check(find_task(graph, task_id))?;
        let existing = txn.check(
            task.subtask(subtask_id)
                .ok_or(MergeFailure::SubtaskNotFound { task: task_id, subtask: subtask_id }),
        )?;
        let text = match txn.check(schema::validate(response, OperationKind::UpdateSubtask))? {
            Payload::Text(text) => text,
            other => return Err(txn.fail(unexpected(&other))),
        };

        txn.enter(Stage::Guarding);
        let node = NodeRef::Subtask { task: task_id, subtask: subtask_id };
        let mut next = graph.clone();
        let Some(parent) = next.task_mut(task_id) else {
            return Err(txn.fail(MergeFailure::TaskNotFound { task: task_id }));
        };

        if guard::check_details_write(task_id, existing).is_err() {
            txn.enter(Stage::Allocating);
            let new_id = txn.check(id::next_id(&task.subtask_ids()))?;
            let follow_up = Subtask {
                id: new_id,
                title: format!("Follow-up to {}", existing.title),
                description: format!("Notes recorded after subtask {node} was completed"),
                details: self.stamped(&text),
                test_strategy: None,
                status: Status::Pending,
                dependencies: vec![subtask_id],
            };

            txn.enter(Stage::Checking);
            let to_ref = |subtask| NodeRef::Subtask { task: task_id, subtask };
            let scope = task.subtask_ids();
            txn.check(deps::check_references(new_id, &follow_up.dependencies, &scope, to_ref))?;
            parent.subtasks.push(follow_up);

            let outcomes = vec![NodeOutcome::Redirected {
                node,
                to: to_ref(new_id),
                reason: PROTECTED.to_string(),
            }];
            return Ok(txn.commit(next, outcomes));
        }

        let Some(slot) = parent.subtask_mut(subtask_id) else {
            return Err(txn.fail(MergeFailure::SubtaskNotFound {
                task: task_id,
                subtask: subtask_id,
            }));
        };
        let block = self.stamped(&text);
        slot.details = match intent {
            AppendIntent::Replace => block,
            AppendIntent::Append if slot.details.trim().is_empty() => block,
            AppendIntent::Append => {
                format!("{}{}{block}", slot.details, self.options.details_separator)
            }
        };

        let outcomes = vec![NodeOutcome::Applied {
            node,
            change: Change::Updated { fields: vec!["details".to_string()] },
        }];
        Ok(txn.commit(next, outcomes))
    }

    fn expand_task(
        &self,
        graph: &TaskGraph,
        task_id: u32,
        response: &str,
        next_subtask_id: Option<u32>,
        subtask_count: Option<usize>,
    ) -> Result<Merged, MergeError> {
        let mut txn = Transaction::begin(OperationKind::ExpandTask);
        let task = txn.check(find_task(graph, task_id))?;
        let drafts = match txn.check(schema::validate(response, OperationKind::ExpandTask))? {
            Payload::Subtasks(drafts) => drafts,
            other => return Err(txn.fail(unexpected(&other))),
        };
        if let Some(expected) = subtask_count.filter(|n| *n != drafts.len()) {
            return Err(txn.fail(
                ValidationError::single("subtasks", Problem::Invalid {
                    reason: format!("expected {expected} subtasks, got {}", drafts.len()),
                })
                .into(),
            ));
        }

        txn.enter(Stage::Allocating);
        let existing = task.subtask_ids();
        let ids = txn.check(id::allocate(&existing, next_subtask_id, drafts.len()))?;
        let remap: BTreeMap<u32, u32> =
            drafts.iter().zip(&ids).map(|(d, &new_id)| (d.id, new_id)).collect();

        txn.enter(Stage::Checking);
        let to_ref = |subtask| NodeRef::Subtask { task: task_id, subtask };
        let batch: BTreeSet<u32> = ids.iter().copied().collect();
        let mut expanded = task.clone();
        let mut outcomes = Vec::with_capacity(ids.len());
        for (draft, new_id) in drafts.into_iter().zip(ids) {
            let dependencies = remap_batch(&draft.dependencies, &remap);
            let scope = deps::prior_scope(&existing, new_id, &batch);
            txn.check(deps::check_references(new_id, &dependencies, &scope, to_ref))?;
            expanded.subtasks.push(Subtask {
                id: new_id,
                title: draft.title,
                description: draft.description,
                details: draft.details,
                test_strategy: draft.test_strategy.filter(|s| !s.trim().is_empty()),
                status: draft.status.unwrap_or_default(),
                dependencies,
            });
            outcomes.push(NodeOutcome::Applied { node: to_ref(new_id), change: Change::Added });
        }
        txn.check(deps::ensure_acyclic(&deps::subtask_edges(&expanded), to_ref))?;

        let mut next = graph.clone();
        if let Some(slot) = next.task_mut(task_id) {
            *slot = expanded;
        }
        Ok(txn.commit(next, outcomes))
    }

    /// Text as it will be written into details.
    fn stamped(&self, text: &str) -> String {
        if self.options.timestamp_appends {
            let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
            format!("[{now}]\n{text}")
        } else {
            text.to_string()
        }
    }
}

/// Rewrite references to proposed batch IDs onto the allocated IDs.
///
/// A proposed ID wins over a same-numbered node that already exists.
fn remap_batch(dependencies: &[u32], remap: &BTreeMap<u32, u32>) -> Vec<u32> {
    let mapped: Vec<u32> =
        dependencies.iter().map(|dep| remap.get(dep).copied().unwrap_or(*dep)).collect();
    dedup_ids(&mapped)
}

fn find_task(graph: &TaskGraph, task_id: u32) -> Result<&Task, MergeFailure> {
    graph.task(task_id).ok_or(MergeFailure::TaskNotFound { task: task_id })
}

fn task_from_draft(id: u32, draft: TaskDraft, priority: Option<Priority>) -> Task {
    Task {
        id,
        title: draft.title,
        description: draft.description,
        details: draft.details,
        test_strategy: draft.test_strategy,
        status: Status::Pending,
        priority: priority.or(draft.priority).unwrap_or_default(),
        dependencies: draft.dependencies,
        subtasks: Vec::new(),
    }
}

/// The proposed text, when it differs from the stored text by more than
/// surrounding whitespace.
fn revised(existing: &str, proposed: Option<&str>) -> Option<String> {
    proposed.filter(|text| text.trim() != existing.trim()).map(str::to_string)
}

fn patched_subtask(existing: &Subtask, patch: &SubtaskPatch) -> Subtask {
    let stored_strategy = existing.test_strategy.as_deref().unwrap_or_default();
    Subtask {
        id: existing.id,
        title: revised(&existing.title, Some(patch.title.as_str()))
            .unwrap_or_else(|| existing.title.clone()),
        description: revised(&existing.description, patch.description.as_deref())
            .unwrap_or_else(|| existing.description.clone()),
        details: revised(&existing.details, patch.details.as_deref())
            .unwrap_or_else(|| existing.details.clone()),
        test_strategy: revised(stored_strategy, patch.test_strategy.as_deref())
            .or_else(|| existing.test_strategy.clone()),
        status: patch.status.unwrap_or(existing.status),
        dependencies: patch.dependencies.clone().unwrap_or_else(|| existing.dependencies.clone()),
    }
}

fn subtask_from_patch(patch: &SubtaskPatch) -> Subtask {
    Subtask {
        id: patch.id,
        title: patch.title.clone(),
        description: patch.description.clone().unwrap_or_default(),
        details: patch.details.clone().unwrap_or_default(),
        test_strategy: patch.test_strategy.clone(),
        status: patch.status.unwrap_or_default(),
        dependencies: patch.dependencies.clone().unwrap_or_default(),
    }
}

/// Turn a guard verdict into a rejected outcome; other failures pass through.
fn rejection(failure: MergeFailure) -> Result<NodeOutcome, MergeFailure> {
    match failure {
        MergeFailure::ProtectedNodeRejected { node, fields } => {
            Ok(NodeOutcome::Rejected { node, reason: PROTECTED.to_string(), fields })
        }
        other => Err(other),
    }
}

fn unexpected(payload: &Payload) -> MergeFailure {
    ValidationError::single("", Problem::Invalid {
        reason: format!("unexpected payload shape: {payload:?}"),
    })
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{graph_of, subtask, task};
    use serde_json::json;

    fn engine() -> MergeEngine {
        MergeEngine::new(MergeOptions {
            details_separator: "\n\n".to_string(),
            timestamp_appends: false,
        })
    }

    fn add_response(deps: &[u32]) -> String {
        json!({
            "title": "Add caching",
            "description": "Cache API responses",
            "details": "Use an LRU",
            "testStrategy": "Hit/miss counters",
            "dependencies": deps
        })
        .to_string()
    }

    fn sample_graph() -> TaskGraph {
        let mut third = task(3, "Auth");
        third.subtasks = vec![subtask(1, "Schema"), subtask(2, "Endpoints")];
        third.subtasks[0].status = Status::Done;
        third.subtasks[0].details = "X".to_string();
        graph_of(vec![task(1, "Setup"), task(2, "Database"), third])
    }

    #[test]
    fn test_add_task_allocates_next_id() {
        let graph = sample_graph();
        let request = MergeRequest::AddTask { response: add_response(&[1, 3]), priority: None };
        let merged = engine().apply(&graph, &request).unwrap();

        let added = merged.graph.task(4).unwrap();
        assert_eq!(added.dependencies, vec![1, 3]);
        assert_eq!(added.status, Status::Pending);
        assert_eq!(added.priority, Priority::Medium);
        assert_eq!(merged.diff.added(), vec![NodeRef::Task(4)]);
        assert_eq!(
            merged.trace,
            vec![
                Stage::Validating,
                Stage::Checking,
                Stage::Allocating,
                Stage::Committing,
                Stage::Done,
            ]
        );
        assert!(merged.graph.metadata.unwrap().updated_at.is_some());
    }

    #[test]
    fn test_add_task_caller_priority_wins() {
        let mut value: serde_json::Value = serde_json::from_str(&add_response(&[])).unwrap();
        value["priority"] = json!("low");
        let request =
            MergeRequest::AddTask { response: value.to_string(), priority: Some(Priority::High) };
        let merged = engine().apply(&TaskGraph::default(), &request).unwrap();
        assert_eq!(merged.graph.task(1).unwrap().priority, Priority::High);
    }

    #[test]
    fn test_add_task_missing_dependency() {
        let graph = sample_graph();
        let request = MergeRequest::AddTask { response: add_response(&[99]), priority: None };
        let err = engine().apply(&graph, &request).unwrap_err();
        assert_eq!(err.stage, Stage::Checking);
        assert_eq!(
            err.failure,
            MergeFailure::DependencyNotFound { node: NodeRef::Task(4), missing: NodeRef::Task(99) }
        );
    }

    #[test]
    fn test_add_task_refused_when_ids_exhausted() {
        let graph = graph_of(vec![task(1, "Setup"), task(u32::MAX, "Last")]);
        let request = MergeRequest::AddTask { response: add_response(&[1]), priority: None };
        let err = engine().apply(&graph, &request).unwrap_err();
        assert_eq!(err.stage, Stage::Allocating);
        assert_eq!(err.failure.kind(), "id_seed_conflict");
        assert_eq!(graph.tasks.len(), 2);
    }

    #[test]
    fn test_unparsable_response_fails_validating() {
        let request =
            MergeRequest::AddTask { response: "Sorry, I can't.".to_string(), priority: None };
        let err = engine().apply(&sample_graph(), &request).unwrap_err();
        assert_eq!(err.stage, Stage::Validating);
        assert_eq!(err.failure.kind(), "unparsable_response");
    }

    fn update_response(subtasks: serde_json::Value) -> String {
        json!({
            "id": 3, "title": "Auth", "status": "pending", "dependencies": [], "subtasks": subtasks
        })
        .to_string()
    }

    fn update(graph: &TaskGraph, response: String) -> Result<Merged, MergeError> {
        engine().apply(graph, &MergeRequest::UpdateTask { task_id: 3, response })
    }

    #[test]
    fn test_update_task_protects_done_subtask() {
        let graph = sample_graph();
        let response = update_response(json!([
            {"id": 1, "title": "Schema", "details": "rewrite"},
            {"id": 2, "title": "Endpoints", "status": "in-progress"}
        ]));
        let merged = update(&graph, response).unwrap();

        let task = merged.graph.task(3).unwrap();
        assert_eq!(task.subtask(1).unwrap().details, "X");
        assert_eq!(task.subtask(2).unwrap().status, Status::InProgress);
        assert_eq!(merged.diff.rejected(), vec![NodeRef::Subtask { task: 3, subtask: 1 }]);
        assert_eq!(
            merged.diff.changed(),
            vec![(NodeRef::Subtask { task: 3, subtask: 2 }, &["status".to_string()][..])]
        );
        assert_eq!(
            merged.trace,
            vec![
                Stage::Validating,
                Stage::Guarding,
                Stage::Checking,
                Stage::Committing,
                Stage::Done,
            ]
        );
    }

    #[test]
    fn test_update_task_status_applies_to_protected_subtask() {
        let graph = sample_graph();
        let response = update_response(json!([
            {"id": 1, "title": "Schema v2", "status": "in-progress"}
        ]));
        let merged = update(&graph, response).unwrap();
        let reopened = merged.graph.task(3).unwrap().subtask(1).unwrap();
        assert_eq!(reopened.title, "Schema");
        assert_eq!(reopened.status, Status::InProgress);
    }

    #[test]
    fn test_update_task_inserts_new_and_keeps_omitted_subtasks() {
        let graph = sample_graph();
        let response = update_response(json!([
            {"id": 3, "title": "Rate limiting", "dependencies": [2]}
        ]));
        let merged = update(&graph, response).unwrap();
        let task = merged.graph.task(3).unwrap();
        assert_eq!(task.subtasks.len(), 3);
        assert_eq!(task.subtask(3).unwrap().dependencies, vec![2]);
        assert_eq!(merged.diff.added(), vec![NodeRef::Subtask { task: 3, subtask: 3 }]);
    }

    fn open_auth_graph() -> TaskGraph {
        let mut auth = task(3, "Auth");
        auth.subtasks = vec![subtask(1, "Schema"), subtask(2, "Endpoints")];
        graph_of(vec![auth])
    }

    #[test]
    fn test_update_task_subtask_cannot_depend_on_later_sibling() {
        let response = update_response(json!([{"id": 1, "title": "Schema", "dependencies": [2]}]));
        let err = update(&open_auth_graph(), response).unwrap_err();
        assert_eq!(err.stage, Stage::Checking);
        assert_eq!(
            err.failure,
            MergeFailure::DependencyNotFound {
                node: NodeRef::Subtask { task: 3, subtask: 1 },
                missing: NodeRef::Subtask { task: 3, subtask: 2 },
            }
        );
    }

    #[test]
    fn test_update_task_subtask_may_depend_on_earlier_sibling() {
        let response =
            update_response(json!([{"id": 2, "title": "Endpoints", "dependencies": [1]}]));
        let merged = update(&open_auth_graph(), response).unwrap();
        assert_eq!(merged.graph.task(3).unwrap().subtask(2).unwrap().dependencies, vec![1]);
    }

    #[test]
    fn test_update_task_echoed_whitespace_is_not_a_rewrite() {
        let mut graph = sample_graph();
        graph.task_mut(3).unwrap().subtask_mut(1).unwrap().details = "X\n".to_string();
        let response = update_response(json!([
            {"id": 1, "title": "Schema", "details": "X\n"},
            {"id": 2, "title": " Endpoints ", "details": ""}
        ]));
        let merged = update(&graph, response).unwrap();

        let task = merged.graph.task(3).unwrap();
        assert!(merged.diff.rejected().is_empty());
        assert!(merged.diff.changed().is_empty());
        assert_eq!(task.subtask(1).unwrap().details, "X\n");
        assert_eq!(task.subtask(2).unwrap().title, "Endpoints");
    }

    #[test]
    fn test_update_task_title_change_refused() {
        let response = json!({
            "id": 3, "title": "Authentication", "status": "pending",
            "dependencies": [], "subtasks": []
        })
        .to_string();
        let err = update(&sample_graph(), response).unwrap_err();
        assert_eq!(err.failure.kind(), "title_or_id_mismatch");
    }

    #[test]
    fn test_update_task_dependency_cycle() {
        let mut graph = sample_graph();
        graph.task_mut(1).unwrap().dependencies = vec![3];
        let response = json!({
            "id": 3, "title": "Auth", "status": "pending", "dependencies": [1], "subtasks": []
        })
        .to_string();
        let err = update(&graph, response).unwrap_err();
        assert!(matches!(err.failure, MergeFailure::DependencyCycle { .. }));
    }

    #[test]
    fn test_update_task_on_done_task_keeps_content() {
        let mut graph = sample_graph();
        graph.task_mut(3).unwrap().status = Status::Done;
        graph.task_mut(3).unwrap().details = "original".to_string();
        let response = json!({
            "id": 3, "title": "Auth", "details": "new plan", "status": "done",
            "priority": "high", "dependencies": [], "subtasks": []
        })
        .to_string();
        let merged = update(&graph, response).unwrap();
        let task = merged.graph.task(3).unwrap();
        assert_eq!(task.details, "original");
        assert_eq!(task.priority, Priority::High);
        assert_eq!(merged.diff.rejected(), vec![NodeRef::Task(3)]);
    }

    #[test]
    fn test_update_subtask_appends() {
        let mut graph = sample_graph();
        graph.task_mut(3).unwrap().subtask_mut(2).unwrap().details = "first".to_string();
        let request = MergeRequest::UpdateSubtask {
            task_id: 3,
            subtask_id: 2,
            response: "second".to_string(),
            intent: AppendIntent::Append,
        };
        let merged = engine().apply(&graph, &request).unwrap();
        assert_eq!(merged.graph.task(3).unwrap().subtask(2).unwrap().details, "first\n\nsecond");
    }

    #[test]
    fn test_update_subtask_replace_intent() {
        let mut graph = sample_graph();
        graph.task_mut(3).unwrap().subtask_mut(2).unwrap().details = "first".to_string();
        let request = MergeRequest::UpdateSubtask {
            task_id: 3,
            subtask_id: 2,
            response: "summary".to_string(),
            intent: AppendIntent::Replace,
        };
        let merged = engine().apply(&graph, &request).unwrap();
        assert_eq!(merged.graph.task(3).unwrap().subtask(2).unwrap().details, "summary");
    }

    #[test]
    fn test_update_subtask_on_done_redirects() {
        let graph = sample_graph();
        let request = MergeRequest::UpdateSubtask {
            task_id: 3,
            subtask_id: 1,
            response: "Y".to_string(),
            intent: AppendIntent::Replace,
        };
        let merged = engine().apply(&graph, &request).unwrap();
        let task = merged.graph.task(3).unwrap();
        assert_eq!(task.subtask(1).unwrap().details, "X");
        let follow_up = task.subtask(3).unwrap();
        assert_eq!(follow_up.details, "Y");
        assert_eq!(follow_up.dependencies, vec![1]);
        assert_eq!(follow_up.status, Status::Pending);
        assert_eq!(
            merged.diff.redirected(),
            vec![(
                NodeRef::Subtask { task: 3, subtask: 1 },
                NodeRef::Subtask { task: 3, subtask: 3 }
            )]
        );
    }

    #[test]
    fn test_update_subtask_rejects_structured_text() {
        let request = MergeRequest::UpdateSubtask {
            task_id: 3,
            subtask_id: 2,
            response: r#"{"details": "x"}"#.to_string(),
            intent: AppendIntent::Append,
        };
        let err = engine().apply(&sample_graph(), &request).unwrap_err();
        assert_eq!(err.failure.kind(), "validation_error");
    }

    #[test]
    fn test_update_subtask_missing_target() {
        let request = MergeRequest::UpdateSubtask {
            task_id: 3,
            subtask_id: 9,
            response: "text".to_string(),
            intent: AppendIntent::Append,
        };
        let err = engine().apply(&sample_graph(), &request).unwrap_err();
        assert_eq!(err.failure, MergeFailure::SubtaskNotFound { task: 3, subtask: 9 });
    }

    fn expand_response(items: &[(u32, &[u32])]) -> String {
        let subtasks: Vec<serde_json::Value> = items
            .iter()
            .map(|(id, deps)| {
                json!({"id": id, "title": format!("Step {id}"), "description": "d",
                       "dependencies": deps, "details": "x"})
            })
            .collect();
        json!({ "subtasks": subtasks }).to_string()
    }

    #[test]
    fn test_expand_remaps_proposed_ids() {
        let graph = sample_graph();
        let request = MergeRequest::ExpandTask {
            task_id: 3,
            response: expand_response(&[(1, &[]), (2, &[1]), (3, &[1, 2])]),
            next_subtask_id: Some(5),
            subtask_count: Some(3),
        };
        let merged = engine().apply(&graph, &request).unwrap();
        let task = merged.graph.task(3).unwrap();
        assert_eq!(task.subtasks.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1, 2, 5, 6, 7]);
        assert_eq!(task.subtask(7).unwrap().dependencies, vec![5, 6]);
    }

    #[test]
    fn test_expand_forward_reference_allowed() {
        let request = MergeRequest::ExpandTask {
            task_id: 1,
            response: expand_response(&[(1, &[2]), (2, &[])]),
            next_subtask_id: None,
            subtask_count: None,
        };
        let merged = engine().apply(&sample_graph(), &request).unwrap();
        assert_eq!(merged.graph.task(1).unwrap().subtask(1).unwrap().dependencies, vec![2]);
    }

    #[test]
    fn test_expand_cannot_depend_on_higher_existing_subtask() {
        let mut parent = task(1, "Parent");
        parent.subtasks = vec![subtask(1, "a"), subtask(2, "b"), subtask(10, "c")];
        let graph = graph_of(vec![parent]);
        let request = |deps: &[u32]| MergeRequest::ExpandTask {
            task_id: 1,
            response: expand_response(&[(1, deps)]),
            next_subtask_id: Some(3),
            subtask_count: None,
        };

        let err = engine().apply(&graph, &request(&[10])).unwrap_err();
        assert_eq!(
            err.failure,
            MergeFailure::DependencyNotFound {
                node: NodeRef::Subtask { task: 1, subtask: 3 },
                missing: NodeRef::Subtask { task: 1, subtask: 10 },
            }
        );

        let merged = engine().apply(&graph, &request(&[2])).unwrap();
        assert_eq!(merged.graph.task(1).unwrap().subtask(3).unwrap().dependencies, vec![2]);
    }

    #[test]
    fn test_expand_count_mismatch() {
        let request = MergeRequest::ExpandTask {
            task_id: 1,
            response: expand_response(&[(1, &[])]),
            next_subtask_id: None,
            subtask_count: Some(2),
        };
        let err = engine().apply(&sample_graph(), &request).unwrap_err();
        assert_eq!(err.stage, Stage::Validating);
    }

    #[test]
    fn test_expand_seed_conflict() {
        let request = MergeRequest::ExpandTask {
            task_id: 3,
            response: expand_response(&[(2, &[])]),
            next_subtask_id: Some(2),
            subtask_count: None,
        };
        let err = engine().apply(&sample_graph(), &request).unwrap_err();
        assert_eq!(err.failure, MergeFailure::IdSeedConflict { seed: 2, conflicting: vec![2] });
        assert_eq!(err.stage, Stage::Allocating);
    }

    #[test]
    fn test_expand_batch_cycle_rejects_all() {
        let graph = sample_graph();
        let request = MergeRequest::ExpandTask {
            task_id: 1,
            response: expand_response(&[(1, &[2]), (2, &[1])]),
            next_subtask_id: None,
            subtask_count: None,
        };
        let err = engine().apply(&graph, &request).unwrap_err();
        assert!(matches!(err.failure, MergeFailure::DependencyCycle { .. }));
        assert!(graph.task(1).unwrap().subtasks.is_empty());
    }

    #[test]
    fn test_parse_prd_appends_batch() {
        let graph = graph_of(vec![task(1, "Existing")]);
        let response = json!({"tasks": [
            {"id": 1, "title": "Setup", "description": "s"},
            {"id": 2, "title": "API", "description": "a", "dependencies": [1]}
        ]})
        .to_string();
        let merged = engine().apply(&graph, &MergeRequest::ParsePrd { response }).unwrap();
        assert_eq!(merged.graph.tasks.len(), 3);
        assert_eq!(merged.graph.task(3).unwrap().dependencies, vec![2]);
        assert_eq!(merged.diff.added(), vec![NodeRef::Task(2), NodeRef::Task(3)]);
    }

    #[test]
    fn test_analyze_complexity_does_not_touch_graph() {
        let graph = sample_graph();
        let raw = json!([{
            "taskId": 3, "taskTitle": "Auth", "complexityScore": 8, "recommendedSubtasks": 5,
            "expansionPrompt": "Split by flow", "reasoning": "Many flows"
        }])
        .to_string();
        let report = engine().analyze_complexity(&graph, &raw).unwrap();
        assert_eq!(report.recommendation(3).map(|e| e.recommended_subtasks), Some(5));
    }

    #[test]
    fn test_merge_error_display() {
        let err = MergeError {
            operation: OperationKind::AddTask,
            stage: Stage::Checking,
            failure: MergeFailure::SelfDependency { node: NodeRef::Task(4) },
        };
        assert_eq!(err.to_string(), "add-task failed while checking: 4 depends on itself");
    }
}
