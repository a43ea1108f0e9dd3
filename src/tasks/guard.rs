//! Protection of completed work.
//!
//! A node whose status is `done` or `completed` keeps its title, description,
//! details and test strategy. Status transitions and new sibling nodes are
//! still allowed; anything else is refused with
//! [`MergeFailure::ProtectedNodeRejected`] so the merge engine can decide how
//! to route the change.

use crate::reconcile::MergeFailure;
use crate::tasks::models::{NodeRef, Status, Subtask, Task};

/// Reason string attached to protected-node outcomes.
pub const PROTECTED: &str = "protected";

/// Content fields of a node that differ between two versions.
///
/// Surrounding whitespace is not content: a model echoing `"X"` for stored
/// `"X\n"` has not changed anything.
#[must_use]
pub fn content_diff(
    existing: (&str, &str, &str, Option<&str>),
    proposed: (&str, &str, &str, Option<&str>),
) -> Vec<String> {
    let differs = |a: &str, b: &str| a.trim() != b.trim();
    let mut fields = Vec::new();
    if differs(existing.0, proposed.0) {
        fields.push("title".to_string());
    }
    if differs(existing.1, proposed.1) {
        fields.push("description".to_string());
    }
    if differs(existing.2, proposed.2) {
        fields.push("details".to_string());
    }
    if differs(existing.3.unwrap_or_default(), proposed.3.unwrap_or_default()) {
        fields.push("testStrategy".to_string());
    }
    fields
}

fn subtask_content(subtask: &Subtask) -> (&str, &str, &str, Option<&str>) {
    (&subtask.title, &subtask.description, &subtask.details, subtask.test_strategy.as_deref())
}

fn task_content(task: &Task) -> (&str, &str, &str, Option<&str>) {
    (&task.title, &task.description, &task.details, Some(task.test_strategy.as_str()))
}

/// Content fields that differ between two versions of a subtask.
#[must_use]
pub fn subtask_changes(existing: &Subtask, proposed: &Subtask) -> Vec<String> {
    content_diff(subtask_content(existing), subtask_content(proposed))
}

/// Content fields that differ between two versions of a task, ignoring subtasks.
#[must_use]
pub fn task_changes(existing: &Task, proposed: &Task) -> Vec<String> {
    content_diff(task_content(existing), task_content(proposed))
}

fn verdict(status: Status, node: NodeRef, fields: Vec<String>) -> Result<(), MergeFailure> {
    if status.is_completed() && !fields.is_empty() {
        Err(MergeFailure::ProtectedNodeRejected { node, fields })
    } else {
        Ok(())
    }
}

/// Check a proposed replacement for a subtask.
///
/// # Errors
///
/// Returns [`MergeFailure::ProtectedNodeRejected`] if the existing subtask is
/// completed and the proposal changes its content.
pub fn check_subtask(
    parent: u32,
    existing: &Subtask,
    proposed: &Subtask,
) -> Result<(), MergeFailure> {
    let fields = subtask_changes(existing, proposed);
    verdict(existing.status, NodeRef::Subtask { task: parent, subtask: existing.id }, fields)
}

/// Check a proposed replacement for a task's own content.
///
/// Subtasks are not considered here; each is checked on its own.
///
/// # Errors
///
/// Returns [`MergeFailure::ProtectedNodeRejected`] if the existing task is
/// completed and the proposal changes its content.
pub fn check_task(existing: &Task, proposed: &Task) -> Result<(), MergeFailure> {
    let fields = task_changes(existing, proposed);
    verdict(existing.status, NodeRef::Task(existing.id), fields)
}

/// Check whether new text may be written into a subtask's details.
///
/// # Errors
///
/// Returns [`MergeFailure::ProtectedNodeRejected`] if the subtask is completed.
pub fn check_details_write(parent: u32, existing: &Subtask) -> Result<(), MergeFailure> {
    verdict(
        existing.status,
        NodeRef::Subtask { task: parent, subtask: existing.id },
        vec!["details".to_string()],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{subtask, task};

    #[test]
    fn test_pending_subtask_may_change() {
        let existing = subtask(1, "Write parser");
        let mut proposed = existing.clone();
        proposed.details = "rewrite".to_string();
        assert!(check_subtask(3, &existing, &proposed).is_ok());
    }

    #[test]
    fn test_done_subtask_content_rejected() {
        let mut existing = subtask(1, "Write parser");
        existing.status = Status::Done;
        existing.details = "X".to_string();
        let mut proposed = existing.clone();
        proposed.details = "Y".to_string();
        proposed.test_strategy = Some("fuzz it".to_string());

        let err = check_subtask(3, &existing, &proposed).unwrap_err();
        assert_eq!(
            err,
            MergeFailure::ProtectedNodeRejected {
                node: NodeRef::Subtask { task: 3, subtask: 1 },
                fields: vec!["details".to_string(), "testStrategy".to_string()],
            }
        );
    }

    #[test]
    fn test_done_subtask_status_only_permitted() {
        let mut existing = subtask(1, "Write parser");
        existing.status = Status::Completed;
        let mut proposed = existing.clone();
        proposed.status = Status::InProgress;
        assert!(check_subtask(3, &existing, &proposed).is_ok());
    }

    #[test]
    fn test_missing_and_empty_test_strategy_are_equal() {
        let mut existing = subtask(2, "Docs");
        existing.status = Status::Done;
        let mut proposed = existing.clone();
        proposed.test_strategy = Some(String::new());
        assert!(check_subtask(1, &existing, &proposed).is_ok());
    }

    #[test]
    fn test_surrounding_whitespace_is_not_a_change() {
        let mut existing = subtask(1, "Write parser");
        existing.status = Status::Done;
        existing.details = "X\n".to_string();
        let mut proposed = existing.clone();
        proposed.details = "X".to_string();
        proposed.title = " Write parser".to_string();
        assert!(subtask_changes(&existing, &proposed).is_empty());
        assert!(check_subtask(1, &existing, &proposed).is_ok());
    }

    #[test]
    fn test_done_task_description_rejected() {
        let mut existing = task(4, "Ship it");
        existing.status = Status::Done;
        let mut proposed = existing.clone();
        proposed.description = "something else".to_string();
        assert!(matches!(
            check_task(&existing, &proposed),
            Err(MergeFailure::ProtectedNodeRejected { node: NodeRef::Task(4), .. })
        ));
    }

    #[test]
    fn test_details_write() {
        let mut existing = subtask(1, "Write parser");
        assert!(check_details_write(1, &existing).is_ok());
        existing.status = Status::Done;
        assert!(check_details_write(1, &existing).is_err());
    }
}
