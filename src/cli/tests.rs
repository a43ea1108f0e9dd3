//! Tests for the CLI module.

use super::*;
use crate::config::ProjectConfig;
use crate::paths;
use crate::storage::JsonGraphStore;
use crate::tasks::{Status, TaskGraph};
use crate::testing::{graph_of, subtask, task};
use crate::traits::GraphStore;
use std::path::Path;
use std::process::ExitCode;
use tempfile::TempDir;

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("taskmerge").chain(args.iter().copied())).unwrap()
}

fn run_in(dir: &Path, args: &[&str], stdin: &str) -> CliOutput {
    run(parse(args).command, dir, stdin)
}

fn store(dir: &Path) -> JsonGraphStore {
    JsonGraphStore::new(ProjectConfig::default().tasks_path(dir))
}

fn project_with(graph: &TaskGraph) -> TempDir {
    let dir = TempDir::new().unwrap();
    ProjectConfig { timestamp_appends: false, ..Default::default() }.save_to(dir.path()).unwrap();
    store(dir.path()).save(graph, "seed").unwrap();
    dir
}

#[test]
fn test_command_needs_stdin() {
    assert!(parse(&["apply", "add-task"]).command.needs_stdin());
    assert!(parse(&["analyze"]).command.needs_stdin());
    assert!(parse(&["context", "parse-prd"]).command.needs_stdin());
    assert!(!parse(&["context", "add-task"]).command.needs_stdin());
    assert!(!Command::Version.needs_stdin());
    assert!(!Command::Check.needs_stdin());
}

#[test]
fn test_parse_rejects_unknown_operation() {
    let err = Cli::try_parse_from(["taskmerge", "apply", "delete-task"]).unwrap_err().to_string();
    assert!(err.contains("unknown operation"), "Error was: {err}");
}

#[test]
fn test_parse_global_project_flag() {
    let cli = parse(&["check", "--project", "/tmp/work"]);
    assert_eq!(cli.project, std::path::PathBuf::from("/tmp/work"));
}

#[test]
fn test_version() {
    let dir = TempDir::new().unwrap();
    let output = run_in(dir.path(), &["version"], "");
    assert_eq!(output.exit_code, ExitCode::SUCCESS);
    assert!(output.stderr[0].starts_with("taskmerge v"));
}

#[test]
fn test_ensure_config_creates_file() {
    let dir = TempDir::new().unwrap();
    let output = run_in(dir.path(), &["ensure-config"], "");
    assert_eq!(output.exit_code, ExitCode::SUCCESS);
    assert!(paths::project_config_path(dir.path()).exists());
}

#[test]
fn test_schema_prints_json() {
    let dir = TempDir::new().unwrap();
    let output = run_in(dir.path(), &["schema", "expand-task"], "");
    let schema: serde_json::Value = serde_json::from_str(&output.stdout[0]).unwrap();
    assert!(schema["properties"]["subtasks"].is_object());
}

#[test]
fn test_apply_add_task_to_missing_file() {
    let dir = TempDir::new().unwrap();
    let response = r#"Here you go:
```json
{"title": "Setup", "description": "Scaffold", "details": "", "testStrategy": "", "dependencies": []}
```"#;
    let output = run_in(dir.path(), &["apply", "add-task", "--priority", "high"], response);

    assert_eq!(output.exit_code, ExitCode::SUCCESS, "{:?}", output.stderr);
    let diff: serde_json::Value = serde_json::from_str(&output.stdout[0]).unwrap();
    assert_eq!(diff["outcomes"][0]["outcome"], "applied");
    let graph = store(dir.path()).load().unwrap();
    assert_eq!(graph.tasks[0].id, 1);
    assert_eq!(graph.tasks[0].priority, crate::tasks::Priority::High);
}

#[test]
fn test_apply_failure_leaves_file() {
    let dir = project_with(&graph_of(vec![task(1, "Setup")]));
    let before = std::fs::read_to_string(store(dir.path()).path()).unwrap();
    let response = r#"{"title": "API", "description": "", "details": "", "testStrategy": "",
        "dependencies": [99]}"#;

    let output = run_in(dir.path(), &["apply", "add-task"], response);

    assert_eq!(output.exit_code, ExitCode::from(1));
    let failure: serde_json::Value = serde_json::from_str(&output.stdout[0]).unwrap();
    assert_eq!(failure["stage"], "checking");
    assert_eq!(failure["failure"]["kind"], "dependency_not_found");
    assert_eq!(std::fs::read_to_string(store(dir.path()).path()).unwrap(), before);
}

#[test]
fn test_apply_requires_target() {
    let dir = project_with(&graph_of(vec![task(1, "Setup")]));
    let output = run_in(dir.path(), &["apply", "update-subtask", "--task", "1"], "note");
    assert_eq!(output.exit_code, ExitCode::from(1));
    assert!(output.stderr[0].contains("requires --subtask"));
}

#[test]
fn test_apply_update_subtask_redirects_done() {
    let mut parent = task(1, "Setup");
    parent.subtasks = vec![subtask(1, "Repo")];
    parent.subtasks[0].status = Status::Done;
    let dir = project_with(&graph_of(vec![parent]));

    let args = ["apply", "update-subtask", "--task", "1", "--subtask", "1"];
    let output = run_in(dir.path(), &args, "More notes.");

    assert_eq!(output.exit_code, ExitCode::SUCCESS, "{:?}", output.stderr);
    let graph = store(dir.path()).load().unwrap();
    let subtasks = &graph.task(1).unwrap().subtasks;
    assert_eq!(subtasks.len(), 2);
    assert_eq!(subtasks[0].details, "");
    assert_eq!(subtasks[1].details, "More notes.");
    assert_eq!(subtasks[1].dependencies, vec![1]);
}

#[test]
fn test_apply_writes_merge_log_when_enabled() {
    let dir = project_with(&graph_of(vec![task(1, "Setup")]));
    ProjectConfig { debug_logging: true, ..Default::default() }.save_to(dir.path()).unwrap();

    run_in(dir.path(), &["apply", "update-task", "--task", "7"], "{}");

    let log = crate::merge_log::MergeLog::new(paths::merge_log_path(dir.path()));
    let events = log.read();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["kind"], "task_not_found");
}

#[test]
fn test_analyze_saves_report() {
    let dir = project_with(&graph_of(vec![task(1, "Setup"), task(2, "API")]));
    let response = r#"[
        {"taskId": 2, "taskTitle": "API", "complexityScore": 8, "recommendedSubtasks": 5,
         "expansionPrompt": "Split by route", "reasoning": "many routes"},
        {"taskId": 1, "taskTitle": "Setup", "complexityScore": 2, "recommendedSubtasks": 1,
         "expansionPrompt": "", "reasoning": "trivial"}
    ]"#;

    let output = run_in(dir.path(), &["analyze"], response);

    assert_eq!(output.exit_code, ExitCode::SUCCESS, "{:?}", output.stderr);
    assert!(paths::complexity_report_path(dir.path()).exists());
    assert_eq!(output.stderr.len(), 2);
    assert!(output.stderr[1].contains("Task 2 (API): score 8"));
}

#[test]
#[serial_test::serial]
fn test_context_expand_uses_saved_report() {
    let dir = project_with(&graph_of(vec![task(1, "Setup"), task(2, "API")]));
    let response = r#"[{"taskId": 2, "taskTitle": "API", "complexityScore": 8,
        "recommendedSubtasks": 5, "expansionPrompt": "Split by route", "reasoning": ""}]"#;
    run_in(dir.path(), &["analyze"], response);

    let output = run_in(dir.path(), &["context", "expand-task", "--task", "2"], "");

    assert_eq!(output.exit_code, ExitCode::SUCCESS, "{:?}", output.stderr);
    assert!(output.stdout[0].contains("Generate exactly 5 subtasks, numbered from 1 to 5."));
    assert!(output.stdout[0].contains("Split by route"));
}

#[test]
#[serial_test::serial]
fn test_context_parse_prd_reads_stdin() {
    let dir = TempDir::new().unwrap();
    let output = run_in(dir.path(), &["context", "parse-prd"], "Build a todo app.");
    assert_eq!(output.exit_code, ExitCode::SUCCESS, "{:?}", output.stderr);
    assert!(output.stdout[0].contains("Build a todo app."));
}

#[test]
fn test_check_reports_issues() {
    let mut broken = task(2, "API");
    broken.dependencies = vec![9];
    let dir = project_with(&graph_of(vec![task(1, "Setup"), broken]));

    let output = run_in(dir.path(), &["check"], "");

    assert_eq!(output.exit_code, ExitCode::from(1));
    assert!(output.stderr[1].contains("2 depends on missing 9"));
}

#[test]
fn test_check_clean_graph() {
    let dir = project_with(&graph_of(vec![task(1, "Setup")]));
    let output = run_in(dir.path(), &["check"], "");
    assert_eq!(output.exit_code, ExitCode::SUCCESS);
}

#[test]
#[serial_test::serial]
fn test_export_to_file() {
    let dir = project_with(&graph_of(vec![task(1, "Setup")]));
    let out = dir.path().join("tasks.md");
    let output = run_in(dir.path(), &["export", "--output", out.to_str().unwrap()], "");

    assert_eq!(output.exit_code, ExitCode::SUCCESS, "{:?}", output.stderr);
    assert!(std::fs::read_to_string(out).unwrap().contains("## Task: Setup (ID: 1)"));
}

#[test]
fn test_history_disabled() {
    let dir = project_with(&TaskGraph::default());
    let output = run_in(dir.path(), &["history"], "");
    assert_eq!(output.exit_code, ExitCode::from(1));
    assert!(output.stderr[0].contains("keep_history"));
}
