//! Markdown export of the task hierarchy.

use crate::error::Result;
use crate::tasks::models::{Subtask, Task, TaskGraph};
use crate::templates;
use serde::Serialize;
use std::path::Path;
use tera::Context;

#[derive(Serialize)]
struct SubtaskView {
    id: u32,
    title: String,
    description: String,
    status: String,
    details: String,
    test_strategy: String,
    dependencies: String,
}

#[derive(Serialize)]
struct TaskView {
    id: u32,
    title: String,
    description: String,
    priority: String,
    status: String,
    details: String,
    test_strategy: String,
    dependencies: String,
    subtasks: Vec<SubtaskView>,
}

/// Backticks would close the surrounding code block.
fn escape_block(text: &str) -> String {
    text.replace('`', "\\`")
}

fn or_na(text: &str) -> String {
    if text.is_empty() {
        "N/A".to_string()
    } else {
        text.to_string()
    }
}

fn dependency_list(ids: &[u32]) -> String {
    if ids.is_empty() {
        "None".to_string()
    } else {
        ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    }
}

impl From<&Subtask> for SubtaskView {
    fn from(s: &Subtask) -> Self {
        Self {
            id: s.id,
            title: s.title.clone(),
            description: or_na(&s.description),
            status: s.status.to_string(),
            details: escape_block(&s.details),
            test_strategy: escape_block(s.test_strategy.as_deref().unwrap_or_default()),
            dependencies: dependency_list(&s.dependencies),
        }
    }
}

impl From<&Task> for TaskView {
    fn from(t: &Task) -> Self {
        Self {
            id: t.id,
            title: t.title.clone(),
            description: or_na(&t.description),
            priority: t.priority.to_string(),
            status: t.status.to_string(),
            details: escape_block(&t.details),
            test_strategy: escape_block(&t.test_strategy),
            dependencies: dependency_list(&t.dependencies),
            subtasks: t.subtasks.iter().map(SubtaskView::from).collect(),
        }
    }
}

/// Render the graph as a "Project Task Hierarchy" markdown document.
///
/// # Errors
///
/// Returns an error if the template fails to render.
pub fn render_markdown(graph: &TaskGraph) -> Result<String> {
    let tasks: Vec<TaskView> = graph.tasks.iter().map(TaskView::from).collect();
    let mut ctx = Context::new();
    ctx.insert("tasks", &tasks);
    templates::render(templates::HIERARCHY_EXPORT, &ctx)
}

/// Render the graph and write it to `path`, creating parent directories.
///
/// # Errors
///
/// Returns an error if rendering or writing fails.
pub fn write_markdown(graph: &TaskGraph, path: &Path) -> Result<()> {
    let content = render_markdown(graph)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{Priority, Status};
    use crate::testing::{graph_of, subtask, task};
    use tempfile::TempDir;

    #[test]
    #[serial_test::serial]
    fn test_empty_graph() {
        let markdown = render_markdown(&TaskGraph::default()).unwrap();
        assert_eq!(markdown, "# Project Task Hierarchy\n\nNo tasks were generated or found.\n");
    }

    #[test]
    #[serial_test::serial]
    fn test_task_without_subtasks() {
        let mut t = task(1, "Setup");
        t.description = "Scaffold the repo".to_string();
        t.priority = Priority::High;
        let markdown = render_markdown(&graph_of(vec![t])).unwrap();

        let expected = "# Project Task Hierarchy\n\n\
            ## Task: Setup (ID: 1)\n\
            - **Description:** Scaffold the repo\n\
            - **Priority:** high\n\
            - **Status:** pending\n\
            - **Details:** N/A\n\
            - **Test Strategy:** N/A\n\
            - **Dependencies:** None\n\
            \n\
            ---\n\n";
        assert_eq!(markdown, expected);
    }

    #[test]
    #[serial_test::serial]
    fn test_subtasks_and_code_blocks() {
        let mut t = task(2, "API");
        t.details = "Use `axum`".to_string();
        t.dependencies = vec![1];
        t.subtasks = vec![subtask(1, "Routes")];
        t.subtasks[0].status = Status::Done;
        t.subtasks[0].test_strategy = Some("curl each route".to_string());
        let markdown = render_markdown(&graph_of(vec![task(1, "Setup"), t])).unwrap();

        assert!(markdown.contains("- **Details:**\n  ```\nUse \\`axum\\`\n  ```\n"));
        assert!(markdown.contains("- **Dependencies:** 1\n"));
        assert!(markdown.contains("### Subtasks for 2:\n\n### Task: Routes (ID: 1)\n"));
        assert!(markdown.contains("- **Status:** done\n"));
        assert!(markdown.contains("- **Test Strategy:**\n  ```\ncurl each route\n  ```\n"));
        assert_eq!(markdown.matches("---").count(), 2);
    }

    #[test]
    #[serial_test::serial]
    fn test_write_markdown_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/tasks.md");
        write_markdown(&graph_of(vec![task(1, "A")]), &path).unwrap();
        assert!(std::fs::read_to_string(path).unwrap().starts_with("# Project Task Hierarchy"));
    }
}
