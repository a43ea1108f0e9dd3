//! Command execution for the CLI.
//!
//! This module handles running CLI commands and producing output.

use crate::cli::Command;
use crate::config::{self, ProjectConfig};
use crate::context::ContextAssembler;
use crate::error::Error;
use crate::export;
use crate::merge_log::{MergeEvent, MergeLog};
use crate::paths;
use crate::reconcile::{
    output_schema, AppendIntent, ComplexityReport, MergeEngine, MergeRequest, OperationKind,
};
use crate::storage::{JsonGraphStore, SqliteGraphStore};
use crate::tasks::{deps, id, Priority, TaskGraph};
use crate::traits::GraphStore;
use std::path::Path;
use std::process::ExitCode;

/// Output from running the CLI, with separate stdout and stderr messages.
#[derive(Debug)]
pub struct CliOutput {
    /// Exit code for the process.
    pub exit_code: ExitCode,
    /// Messages to print to stdout.
    pub stdout: Vec<String>,
    /// Messages to print to stderr.
    pub stderr: Vec<String>,
}

impl CliOutput {
    fn ok(stdout: Vec<String>, stderr: Vec<String>) -> Self {
        Self { exit_code: ExitCode::SUCCESS, stdout, stderr }
    }

    fn error(message: impl Into<String>) -> Self {
        Self { exit_code: ExitCode::from(1), stdout: vec![], stderr: vec![message.into()] }
    }
}

/// Target and sizing flags shared by `apply` and `context`.
struct Target {
    task: Option<u32>,
    subtask: Option<u32>,
    count: Option<usize>,
}

impl Target {
    fn task(&self, operation: OperationKind) -> Result<u32, CliOutput> {
        self.task.ok_or_else(|| CliOutput::error(format!("{operation} requires --task")))
    }

    fn subtask(&self, operation: OperationKind) -> Result<(u32, u32), CliOutput> {
        let task = self.task(operation)?;
        let subtask = self
            .subtask
            .ok_or_else(|| CliOutput::error(format!("{operation} requires --subtask")))?;
        Ok((task, subtask))
    }
}

/// Run a CLI command against the project in `project`.
pub fn run(command: Command, project: &Path, stdin: &str) -> CliOutput {
    let outcome = match command {
        Command::Version => Ok(run_version()),
        Command::EnsureConfig => run_ensure_config(project),
        Command::Schema { operation } => run_schema(operation),
        Command::Apply { operation, task, subtask, replace, priority, next_id, count } => {
            let target = Target { task, subtask, count };
            run_apply(project, operation, &target, replace, priority, next_id, stdin)
        }
        Command::Context { operation, task, subtask, count, prompt } => {
            let target = Target { task, subtask, count };
            run_context(project, operation, &target, prompt.as_deref(), stdin)
        }
        Command::Analyze { threshold } => run_analyze(project, threshold, stdin),
        Command::Check => run_check(project),
        Command::Export { output } => run_export(project, output.as_deref()),
        Command::History => run_history(project),
    };
    outcome.unwrap_or_else(|output| output)
}

type CmdResult = Result<CliOutput, CliOutput>;

fn load_config(project: &Path) -> Result<ProjectConfig, CliOutput> {
    ProjectConfig::resolve(project)
        .map_err(|e| CliOutput::error(format!("Error loading config: {e}")))
}

/// Load the task graph; a missing file is an empty graph when `allow_missing`.
fn load_graph(store: &JsonGraphStore, allow_missing: bool) -> Result<TaskGraph, CliOutput> {
    match store.load() {
        Ok(graph) => Ok(graph),
        Err(Error::GraphNotFound(_)) if allow_missing => Ok(TaskGraph::default()),
        Err(e) => Err(CliOutput::error(format!("Error loading task graph: {e}"))),
    }
}

fn to_json(value: &impl serde::Serialize) -> Result<String, CliOutput> {
    serde_json::to_string_pretty(value)
        .map_err(|e| CliOutput::error(format!("Error encoding output: {e}")))
}

// === Utility Commands ===

fn run_version() -> CliOutput {
    CliOutput::ok(vec![], vec![format!("taskmerge v{}", crate::VERSION)])
}

fn run_ensure_config(project: &Path) -> CmdResult {
    let config = config::ensure_config_in(project)
        .map_err(|e| CliOutput::error(format!("Error ensuring config: {e}")))?;
    Ok(CliOutput::ok(
        vec![],
        vec![
            format!("Config ensured at {}", paths::project_config_path(project).display()),
            format!("  tasks_file: {}", config.tasks_file.display()),
            format!("  default_subtask_count: {}", config.default_subtask_count),
            format!("  debug_logging: {}", config.debug_logging),
        ],
    ))
}

fn run_schema(operation: OperationKind) -> CmdResult {
    Ok(CliOutput::ok(vec![to_json(&output_schema(operation))?], vec![]))
}

// === Merge Commands ===

fn run_apply(
    project: &Path,
    operation: OperationKind,
    target: &Target,
    replace: bool,
    priority: Option<Priority>,
    next_id: Option<u32>,
    stdin: &str,
) -> CmdResult {
    let config = load_config(project)?;
    let store = JsonGraphStore::new(config.tasks_path(project));
    let creates_graph = matches!(operation, OperationKind::AddTask | OperationKind::ParsePrd);
    let graph = load_graph(&store, creates_graph)?;

    let response = stdin.to_string();
    let request = match operation {
        OperationKind::AddTask => MergeRequest::AddTask { response, priority },
        OperationKind::UpdateTask => {
            MergeRequest::UpdateTask { task_id: target.task(operation)?, response }
        }
        OperationKind::UpdateSubtask => {
            let (task_id, subtask_id) = target.subtask(operation)?;
            let intent = if replace { AppendIntent::Replace } else { AppendIntent::Append };
            MergeRequest::UpdateSubtask { task_id, subtask_id, response, intent }
        }
        OperationKind::ExpandTask => MergeRequest::ExpandTask {
            task_id: target.task(operation)?,
            response,
            next_subtask_id: next_id,
            subtask_count: target.count,
        },
        OperationKind::ParsePrd => MergeRequest::ParsePrd { response },
        OperationKind::AnalyzeComplexity => return run_analyze(project, None, stdin),
    };

    let log = MergeLog::for_project(project, &config);
    let record = |event: MergeEvent| {
        if let Some(log) = &log {
            log.record(&event);
        }
    };

    let merged = match MergeEngine::from_config(&config).apply(&graph, &request) {
        Ok(merged) => merged,
        Err(err) => {
            record(MergeEvent::rejected(request.target(), &err));
            return Err(CliOutput {
                exit_code: ExitCode::from(1),
                stdout: vec![to_json(&err)?],
                stderr: vec![format!("Error: {err}")],
            });
        }
    };

    let summary = merged.diff.summary();
    store
        .save(&merged.graph, &summary)
        .map_err(|e| CliOutput::error(format!("Error saving task graph: {e}")))?;
    record(MergeEvent::committed(operation, request.target(), &merged.diff));

    let mut stderr = vec![format!("{operation}: {summary}")];
    if config.keep_history {
        let recorded =
            SqliteGraphStore::new(project).and_then(|h| h.save(&merged.graph, &summary));
        if let Err(e) = recorded {
            stderr.push(format!("Warning: could not record revision: {e}"));
        }
    }
    Ok(CliOutput::ok(vec![to_json(&merged.diff)?], stderr))
}

fn run_context(
    project: &Path,
    operation: OperationKind,
    target: &Target,
    prompt: Option<&str>,
    stdin: &str,
) -> CmdResult {
    let config = load_config(project)?;
    let store = JsonGraphStore::new(config.tasks_path(project));
    let may_be_empty = matches!(operation, OperationKind::AddTask | OperationKind::ParsePrd);
    let graph = load_graph(&store, may_be_empty)?;
    let assembler = ContextAssembler::from_config(&config);
    let missing = |id: u32| CliOutput::error(format!("Task {id} not found"));

    let rendered = match operation {
        OperationKind::AddTask | OperationKind::AnalyzeComplexity => {
            assembler.task_list_context(&graph, prompt)
        }
        OperationKind::ParsePrd => assembler.prd_context(&graph, stdin),
        OperationKind::UpdateSubtask => {
            let (task_id, subtask_id) = target.subtask(operation)?;
            assembler.subtask_context(&graph, task_id, subtask_id).map(|mut text| {
                if let Some(prompt) = prompt {
                    text.push_str(&format!("\nRequest: {prompt}\n"));
                }
                text
            })
        }
        OperationKind::UpdateTask => {
            let task_id = target.task(operation)?;
            let task = graph.task(task_id).ok_or_else(|| missing(task_id))?;
            assembler.update_task_context(task, prompt.unwrap_or_default())
        }
        OperationKind::ExpandTask => {
            let task_id = target.task(operation)?;
            let task = graph.task(task_id).ok_or_else(|| missing(task_id))?;
            let recommendation =
                saved_report(project).and_then(|r| r.recommendation(task_id).cloned());
            let count = target
                .count
                .or_else(|| {
                    let entry = recommendation.as_ref()?;
                    usize::try_from(entry.recommended_subtasks).ok()
                })
                .unwrap_or(config.default_subtask_count);
            let prompt = prompt.or_else(|| {
                let entry = recommendation.as_ref()?;
                Some(entry.expansion_prompt.as_str()).filter(|p| !p.is_empty())
            });
            let next_id = id::next_id(&task.subtask_ids())
                .map_err(|e| CliOutput::error(format!("Task {task_id}: {e}")))?;
            assembler.expansion_context(task, count, next_id, prompt)
        }
    };

    let text = rendered.map_err(|e| CliOutput::error(format!("Error assembling context: {e}")))?;
    Ok(CliOutput::ok(vec![text], vec![]))
}

/// The last saved complexity report, if any.
fn saved_report(project: &Path) -> Option<ComplexityReport> {
    let content = std::fs::read_to_string(paths::complexity_report_path(project)).ok()?;
    serde_json::from_str(&content).ok()
}

fn run_analyze(project: &Path, threshold: Option<f64>, stdin: &str) -> CmdResult {
    let config = load_config(project)?;
    let store = JsonGraphStore::new(config.tasks_path(project));
    let graph = load_graph(&store, false)?;

    let report = MergeEngine::from_config(&config).analyze_complexity(&graph, stdin).map_err(|err| {
        if let Some(log) = MergeLog::for_project(project, &config) {
            log.record(&MergeEvent::rejected(None, &err));
        }
        CliOutput::error(format!("Error: {err}"))
    })?;

    let json = to_json(&report)?;
    let path = paths::complexity_report_path(project);
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    std::fs::write(&path, format!("{json}\n"))
        .map_err(|e| CliOutput::error(format!("Error writing {}: {e}", path.display())))?;

    let threshold = threshold.unwrap_or(config.complexity_threshold);
    let mut stderr = vec![format!("Report written to {}", path.display())];
    for entry in report.tasks_above(threshold) {
        stderr.push(format!(
            "  Task {} ({}): score {}, expand into {} subtasks",
            entry.task_id, entry.task_title, entry.complexity_score, entry.recommended_subtasks
        ));
    }
    if !report.unknown_task_ids.is_empty() {
        let ids: Vec<String> = report.unknown_task_ids.iter().map(ToString::to_string).collect();
        stderr.push(format!("Ignored unknown task ids: {}", ids.join(", ")));
    }
    Ok(CliOutput::ok(vec![json], stderr))
}

// === Graph Commands ===

fn run_check(project: &Path) -> CmdResult {
    let config = load_config(project)?;
    let graph = load_graph(&JsonGraphStore::new(config.tasks_path(project)), false)?;

    let issues = deps::audit(&graph);
    if issues.is_empty() {
        let summary = format!("{} tasks, no integrity issues", graph.tasks.len());
        return Ok(CliOutput::ok(vec![], vec![summary]));
    }
    let mut stderr = vec![format!("{} integrity issue(s):", issues.len())];
    stderr.extend(issues.iter().map(|issue| format!("  {issue}")));
    Ok(CliOutput { exit_code: ExitCode::from(1), stdout: vec![to_json(&issues)?], stderr })
}

fn run_export(project: &Path, output: Option<&Path>) -> CmdResult {
    let config = load_config(project)?;
    let graph = load_graph(&JsonGraphStore::new(config.tasks_path(project)), false)?;

    match output {
        Some(path) => {
            export::write_markdown(&graph, path)
                .map_err(|e| CliOutput::error(format!("Error exporting: {e}")))?;
            Ok(CliOutput::ok(vec![], vec![format!("Wrote {}", path.display())]))
        }
        None => {
            let markdown = export::render_markdown(&graph)
                .map_err(|e| CliOutput::error(format!("Error exporting: {e}")))?;
            Ok(CliOutput::ok(vec![markdown], vec![]))
        }
    }
}

fn run_history(project: &Path) -> CmdResult {
    let config = load_config(project)?;
    if !config.keep_history {
        return Err(CliOutput::error("Revision history is disabled (set keep_history: true)"));
    }
    let revisions = SqliteGraphStore::new(project)
        .and_then(|store| store.revisions())
        .map_err(|e| CliOutput::error(format!("Error reading history: {e}")))?;

    let lines = revisions
        .iter()
        .map(|r| format!("{:>4}  {}  {}", r.id, r.saved_at, r.summary))
        .collect();
    Ok(CliOutput::ok(lines, vec![]))
}
