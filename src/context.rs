//! Context assembly for the prompt layer.
//!
//! Every function here is a read-only view over the graph rendered through a
//! template. A reference that does not resolve (a missing parent, a first
//! subtask with no previous sibling) drops that section instead of failing.

use crate::config::ProjectConfig;
use crate::error::Result;
use crate::tasks::models::{NodeRef, Status, Task, TaskGraph};
use crate::tasks::id;
use crate::templates;
use serde::Serialize;
use tera::Context;

/// Identity and status of one node, as shown in a context block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSummary {
    /// Display ID (`3` or `3.2`).
    pub id: String,
    /// Title.
    pub title: String,
    /// Status.
    pub status: Status,
}

#[derive(Serialize)]
struct TaskLine {
    id: u32,
    title: String,
    status: Status,
    dependencies: String,
}

#[derive(Serialize)]
struct TaskView<'a> {
    id: u32,
    title: &'a str,
    description: &'a str,
    details: &'a str,
}

fn join_ids(ids: impl IntoIterator<Item = u32>) -> String {
    ids.into_iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}

/// Builds bounded context blocks from a graph.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    max_subtasks: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::from_config(&ProjectConfig::default())
    }
}

impl ContextAssembler {
    /// Create an assembler listing at most `max_subtasks` siblings or tasks.
    #[must_use]
    pub const fn new(max_subtasks: usize) -> Self {
        Self { max_subtasks }
    }

    /// Create an assembler from project configuration.
    #[must_use]
    pub const fn from_config(config: &ProjectConfig) -> Self {
        Self::new(config.max_context_subtasks)
    }

    /// Context for update-subtask: parent, previous and next sibling, and
    /// the current details verbatim.
    ///
    /// # Errors
    ///
    /// Returns an error only if the template fails to render.
    pub fn subtask_context(
        &self,
        graph: &TaskGraph,
        task_id: u32,
        subtask_id: u32,
    ) -> Result<String> {
        let parent = graph.task(task_id);
        let position = parent.and_then(|t| t.subtasks.iter().position(|s| s.id == subtask_id));

        let summary = |index: usize| {
            parent.and_then(|t| t.subtasks.get(index)).map(|s| NodeSummary {
                id: NodeRef::Subtask { task: task_id, subtask: s.id }.to_string(),
                title: s.title.clone(),
                status: s.status,
            })
        };

        let mut ctx = Context::new();
        let parent_summary = parent.map(|t| NodeSummary {
            id: t.id.to_string(),
            title: t.title.clone(),
            status: t.status,
        });
        ctx.insert("parent", &parent_summary);
        ctx.insert("previous", &position.and_then(|i| i.checked_sub(1)).and_then(summary));
        ctx.insert("next", &position.and_then(|i| summary(i + 1)));
        ctx.insert("current", &position.and_then(summary));
        let details = position.and_then(|i| parent.map(|t| t.subtasks[i].details.as_str()));
        ctx.insert("details", details.unwrap_or_default());
        templates::render(templates::SUBTASK_CONTEXT, &ctx)
    }

    /// Context for expand-task: the task, its most recent subtasks, and the
    /// requested batch range.
    ///
    /// # Errors
    ///
    /// Returns an error only if the template fails to render.
    pub fn expansion_context(
        &self,
        task: &Task,
        count: usize,
        next_id: u32,
        prompt: Option<&str>,
    ) -> Result<String> {
        let skip = task.subtasks.len().saturating_sub(self.max_subtasks);
        let existing: Vec<NodeSummary> = task.subtasks[skip..]
            .iter()
            .map(|s| NodeSummary { id: s.id.to_string(), title: s.title.clone(), status: s.status })
            .collect();
        let last_id = u32::try_from(count.saturating_sub(1))
            .map_or(u32::MAX, |n| next_id.saturating_add(n));

        let mut ctx = Context::new();
        ctx.insert(
            "task",
            &TaskView {
                id: task.id,
                title: &task.title,
                description: &task.description,
                details: &task.details,
            },
        );
        ctx.insert("existing", &existing);
        ctx.insert("omitted", &skip);
        ctx.insert("count", &count);
        ctx.insert("next_id", &next_id);
        ctx.insert("last_id", &last_id);
        ctx.insert("prompt", &prompt);
        templates::render(templates::EXPANSION_CONTEXT, &ctx)
    }

    /// Context for update-task: the current task as JSON and which of its
    /// subtasks are protected.
    ///
    /// # Errors
    ///
    /// Returns an error if the task cannot be serialized or the template fails.
    pub fn update_task_context(&self, task: &Task, prompt: &str) -> Result<String> {
        let protected =
            join_ids(task.subtasks.iter().filter(|s| s.status.is_completed()).map(|s| s.id));

        let mut ctx = Context::new();
        ctx.insert("task_id", &task.id);
        ctx.insert("protected", &protected);
        ctx.insert("task_json", &serde_json::to_string_pretty(task)?);
        ctx.insert("prompt", prompt);
        templates::render(templates::UPDATE_TASK_CONTEXT, &ctx)
    }

    /// Context for add-task and analyze-complexity: the most recent tasks
    /// and the next free ID.
    ///
    /// # Errors
    ///
    /// Returns an error only if the template fails to render.
    pub fn task_list_context(&self, graph: &TaskGraph, prompt: Option<&str>) -> Result<String> {
        let skip = graph.tasks.len().saturating_sub(self.max_subtasks);
        let tasks: Vec<TaskLine> = graph.tasks[skip..]
            .iter()
            .map(|t| TaskLine {
                id: t.id,
                title: t.title.clone(),
                status: t.status,
                dependencies: join_ids(t.dependencies.iter().copied()),
            })
            .collect();

        let mut ctx = Context::new();
        ctx.insert("tasks", &tasks);
        ctx.insert("omitted", &skip);
        ctx.insert("next_id", &id::next_id(&graph.task_ids()).ok());
        ctx.insert("prompt", &prompt);
        templates::render(templates::TASK_LIST_CONTEXT, &ctx)
    }

    /// Context for parse-prd: the document and where numbering starts.
    ///
    /// # Errors
    ///
    /// Returns an error only if the template fails to render.
    pub fn prd_context(&self, graph: &TaskGraph, document: &str) -> Result<String> {
        let mut ctx = Context::new();
        ctx.insert("document", document);
        ctx.insert("next_id", &id::next_id(&graph.task_ids()).ok());
        ctx.insert("existing_ids", &join_ids(graph.task_ids()));
        templates::render(templates::PRD_CONTEXT, &ctx)
    }
}
