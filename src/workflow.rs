//! End-to-end operations: load, assemble context, invoke, merge, save.
//!
//! [`Workflow`] wires the collaborators together. The graph is saved only
//! after a merge commits; a failed model call or a refused merge leaves the
//! store exactly as it was.

use crate::config::ProjectConfig;
use crate::context::ContextAssembler;
use crate::error::{Error, Result};
use crate::merge_log::{MergeEvent, MergeLog};
use crate::reconcile::{
    output_schema, AppendIntent, ComplexityReport, MergeDiff, MergeEngine, MergeError, MergeFailure,
    MergeRequest, Merged, OperationKind, Stage,
};
use crate::tasks::{id, NodeRef, Priority, Task, TaskGraph};
use crate::traits::{GraphStore, Invocation, ModelInvoker};
use std::collections::VecDeque;

/// Result of an [`Workflow::expand_pending`] run.
#[derive(Debug, Default)]
pub struct ExpansionRun {
    /// Tasks that received subtasks, in order.
    pub expanded: Vec<u32>,
    /// Completed tasks left alone.
    pub skipped: Vec<u32>,
    /// Tasks whose expansion failed, with the reason.
    pub failed: Vec<(u32, Error)>,
}

/// Drives model-backed operations against a stored graph.
pub struct Workflow<'a> {
    store: &'a dyn GraphStore,
    model: &'a dyn ModelInvoker,
    engine: MergeEngine,
    context: ContextAssembler,
    log: Option<MergeLog>,
    default_subtask_count: usize,
}

impl<'a> Workflow<'a> {
    /// Create a workflow with default settings.
    #[must_use]
    pub fn new(store: &'a dyn GraphStore, model: &'a dyn ModelInvoker) -> Self {
        Self::from_config(store, model, &ProjectConfig::default())
    }

    /// Create a workflow from project configuration.
    #[must_use]
    pub fn from_config(
        store: &'a dyn GraphStore,
        model: &'a dyn ModelInvoker,
        config: &ProjectConfig,
    ) -> Self {
        Self {
            store,
            model,
            engine: MergeEngine::from_config(config),
            context: ContextAssembler::from_config(config),
            log: None,
            default_subtask_count: config.default_subtask_count,
        }
    }

    /// Use a specific merge engine.
    #[must_use]
    pub fn with_engine(mut self, engine: MergeEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Record every attempt in `log`.
    #[must_use]
    pub fn with_log(mut self, log: MergeLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Add one task described by `prompt`.
    ///
    /// # Errors
    ///
    /// Returns an error if loading, invoking, merging, or saving fails.
    pub fn add_task(&self, prompt: &str, priority: Option<Priority>) -> Result<Merged> {
        let graph = self.store.load()?;
        let context = self.context.task_list_context(&graph, Some(prompt))?;
        self.run(&graph, OperationKind::AddTask, None, context, |response| MergeRequest::AddTask {
            response,
            priority,
        })
    }

    /// Rewrite task `task_id` according to `prompt`.
    ///
    /// # Errors
    ///
    /// Returns an error if the task does not exist, or if invoking, merging,
    /// or saving fails.
    pub fn update_task(&self, task_id: u32, prompt: &str) -> Result<Merged> {
        let graph = self.store.load()?;
        let kind = OperationKind::UpdateTask;
        let task = find_task(&graph, kind, task_id)?;
        let context = self.context.update_task_context(task, prompt)?;
        self.run(&graph, kind, Some(NodeRef::Task(task_id)), context, |response| {
            MergeRequest::UpdateTask { task_id, response }
        })
    }

    /// Add information to subtask `task_id.subtask_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the subtask does not exist, or if invoking,
    /// merging, or saving fails.
    pub fn update_subtask(
        &self,
        task_id: u32,
        subtask_id: u32,
        prompt: &str,
        intent: AppendIntent,
    ) -> Result<Merged> {
        let graph = self.store.load()?;
        let kind = OperationKind::UpdateSubtask;
        let task = find_task(&graph, kind, task_id)?;
        if task.subtask(subtask_id).is_none() {
            let failure = MergeFailure::SubtaskNotFound { task: task_id, subtask: subtask_id };
            return Err(not_found(kind, failure));
        }

        let mut context = self.context.subtask_context(&graph, task_id, subtask_id)?;
        context.push_str(&format!("\nRequest: {prompt}\n"));
        let target = NodeRef::Subtask { task: task_id, subtask: subtask_id };
        self.run(&graph, kind, Some(target), context, |response| MergeRequest::UpdateSubtask {
            task_id,
            subtask_id,
            response,
            intent,
        })
    }

    /// Break task `task_id` into `count` subtasks (the configured default
    /// when `None`), numbered after its current last subtask.
    ///
    /// # Errors
    ///
    /// Returns an error if the task does not exist, or if invoking, merging,
    /// or saving fails.
    pub fn expand_task(
        &self,
        task_id: u32,
        count: Option<usize>,
        prompt: Option<&str>,
    ) -> Result<Merged> {
        let graph = self.store.load()?;
        let kind = OperationKind::ExpandTask;
        let task = find_task(&graph, kind, task_id)?;
        let count = count.unwrap_or(self.default_subtask_count);
        let next_id = id::next_id(&task.subtask_ids()).map_err(|failure| {
            Error::Merge(MergeError { operation: kind, stage: Stage::Allocating, failure })
        })?;

        let context = self.context.expansion_context(task, count, next_id, prompt)?;
        self.run(&graph, kind, Some(NodeRef::Task(task_id)), context, |response| {
            MergeRequest::ExpandTask {
                task_id,
                response,
                next_subtask_id: None,
                subtask_count: Some(count),
            }
        })
    }

    /// Turn a requirements document into new top-level tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if loading, invoking, merging, or saving fails.
    pub fn parse_prd(&self, document: &str) -> Result<Merged> {
        let graph = self.store.load()?;
        let context = self.context.prd_context(&graph, document)?;
        self.run(&graph, OperationKind::ParsePrd, None, context, |response| {
            MergeRequest::ParsePrd { response }
        })
    }

    /// Ask the model to score every task. Nothing is saved.
    ///
    /// # Errors
    ///
    /// Returns an error if loading or invoking fails or the analysis is invalid.
    pub fn analyze_complexity(&self, prompt: Option<&str>) -> Result<ComplexityReport> {
        let graph = self.store.load()?;
        let kind = OperationKind::AnalyzeComplexity;
        let context = self.context.task_list_context(&graph, prompt)?;
        let response = self.invoke(kind, None, context)?;

        match self.engine.analyze_complexity(&graph, &response) {
            Ok(report) => {
                self.record(&MergeEvent::committed(kind, None, &MergeDiff::default()));
                Ok(report)
            }
            Err(err) => {
                self.record(&MergeEvent::rejected(None, &err));
                Err(err.into())
            }
        }
    }

    /// Expand every top-level task that has no subtasks yet, first to last.
    ///
    /// Completed tasks are skipped. The subtask count comes from `report`
    /// when it has a recommendation for the task, otherwise from config. A
    /// failed expansion is recorded and the queue moves on.
    ///
    /// # Errors
    ///
    /// Returns an error only if the graph cannot be loaded.
    pub fn expand_pending(&self, report: Option<&ComplexityReport>) -> Result<ExpansionRun> {
        let graph = self.store.load()?;
        let mut queue: VecDeque<(u32, bool)> = graph
            .tasks
            .iter()
            .filter(|t| t.subtasks.is_empty())
            .map(|t| (t.id, t.status.is_completed()))
            .collect();

        let mut run = ExpansionRun::default();
        while let Some((task_id, completed)) = queue.pop_front() {
            if completed {
                run.skipped.push(task_id);
                continue;
            }
            let recommendation = report.and_then(|r| r.recommendation(task_id));
            let count = recommendation
                .and_then(|entry| usize::try_from(entry.recommended_subtasks).ok())
                .filter(|n| *n > 0);
            let prompt =
                recommendation.map(|e| e.expansion_prompt.as_str()).filter(|p| !p.is_empty());
            match self.expand_task(task_id, count, prompt) {
                Ok(_) => run.expanded.push(task_id),
                Err(err) => run.failed.push((task_id, err)),
            }
        }
        Ok(run)
    }

    /// Load the stored graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn graph(&self) -> Result<TaskGraph> {
        self.store.load()
    }

    fn invoke(
        &self,
        operation: OperationKind,
        target: Option<NodeRef>,
        context: String,
    ) -> Result<String> {
        let invocation = Invocation { operation, context, schema: output_schema(operation) };
        self.model.invoke(&invocation).map_err(|err| {
            self.record(&MergeEvent::invocation_failed(operation, target, &err.to_string()));
            err
        })
    }

    fn run(
        &self,
        graph: &TaskGraph,
        operation: OperationKind,
        target: Option<NodeRef>,
        context: String,
        request: impl FnOnce(String) -> MergeRequest,
    ) -> Result<Merged> {
        let response = self.invoke(operation, target, context)?;
        let merged = match self.engine.apply(graph, &request(response)) {
            Ok(merged) => merged,
            Err(err) => {
                self.record(&MergeEvent::rejected(target, &err));
                return Err(err.into());
            }
        };
        self.store.save(&merged.graph, &merged.diff.summary())?;
        self.record(&MergeEvent::committed(operation, target, &merged.diff));
        Ok(merged)
    }

    fn record(&self, event: &MergeEvent) {
        if let Some(log) = &self.log {
            log.record(event);
        }
    }
}

/// A lookup failure reported before any model call is made.
fn find_task(graph: &TaskGraph, operation: OperationKind, task_id: u32) -> Result<&Task> {
    let failure = MergeFailure::TaskNotFound { task: task_id };
    graph.task(task_id).ok_or_else(|| not_found(operation, failure))
}

fn not_found(operation: OperationKind, failure: MergeFailure) -> Error {
    Error::Merge(MergeError { operation, stage: Stage::Validating, failure })
}
