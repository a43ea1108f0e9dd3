//! Dependency checking: scope resolution and cycle detection.
//!
//! Both task-level and subtask-level dependencies are plain `u32` edges inside
//! one scope (all tasks, or the subtasks of one parent). Callers translate the
//! scope-local IDs back to [`NodeRef`]s through a `to_ref` function so the
//! failure names the real node.

use crate::reconcile::MergeFailure;
use crate::tasks::models::{NodeRef, Task, TaskGraph};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Adjacency list: node ID to the IDs it depends on.
pub type Edges = BTreeMap<u32, Vec<u32>>;

/// Verify that every dependency of `node_id` resolves inside `scope`.
///
/// Self-references are reported before anything else.
///
/// # Errors
///
/// Returns [`MergeFailure::SelfDependency`] or
/// [`MergeFailure::DependencyNotFound`].
pub fn check_references(
    node_id: u32,
    dependencies: &[u32],
    scope: &BTreeSet<u32>,
    to_ref: impl Fn(u32) -> NodeRef,
) -> Result<(), MergeFailure> {
    if dependencies.contains(&node_id) {
        return Err(MergeFailure::SelfDependency { node: to_ref(node_id) });
    }
    if let Some(missing) = dependencies.iter().find(|dep| !scope.contains(dep)) {
        return Err(MergeFailure::DependencyNotFound {
            node: to_ref(node_id),
            missing: to_ref(*missing),
        });
    }
    Ok(())
}

/// Dependency scope for one subtask: siblings with a lower ID, plus every
/// member of the batch it arrives in.
///
/// `node_id` may itself be in `batch`; [`check_references`] reports that as
/// a self-dependency before the scope is consulted.
#[must_use]
pub fn prior_scope(existing: &BTreeSet<u32>, node_id: u32, batch: &BTreeSet<u32>) -> BTreeSet<u32> {
    existing.range(..node_id).chain(batch).copied().collect()
}

/// Fail if the dependency relation in `edges` contains a cycle.
///
/// # Errors
///
/// Returns [`MergeFailure::DependencyCycle`] naming the cycle path.
pub fn ensure_acyclic(edges: &Edges, to_ref: impl Fn(u32) -> NodeRef) -> Result<(), MergeFailure> {
    match find_cycle(edges) {
        Some(path) => Err(MergeFailure::DependencyCycle {
            path: path.into_iter().map(to_ref).collect(),
        }),
        None => Ok(()),
    }
}

/// Find a cycle with a depth-first traversal.
///
/// Edges pointing at IDs without an entry of their own are ignored; dangling
/// references are the business of [`check_references`]. The returned path
/// starts and ends at the same ID.
#[must_use]
pub fn find_cycle(edges: &Edges) -> Option<Vec<u32>> {
    let mut finished = BTreeSet::new();
    let mut on_path = BTreeSet::new();
    let mut path = Vec::new();

    for &start in edges.keys() {
        if finished.contains(&start) {
            continue;
        }
        if let Some(cycle) = visit(start, edges, &mut finished, &mut on_path, &mut path) {
            return Some(cycle);
        }
    }
    None
}

fn visit(
    node: u32,
    edges: &Edges,
    finished: &mut BTreeSet<u32>,
    on_path: &mut BTreeSet<u32>,
    path: &mut Vec<u32>,
) -> Option<Vec<u32>> {
    on_path.insert(node);
    path.push(node);

    for &next in edges.get(&node).map_or(&[][..], Vec::as_slice) {
        if !edges.contains_key(&next) || finished.contains(&next) {
            continue;
        }
        if on_path.contains(&next) {
            let start = path.iter().position(|&id| id == next).unwrap_or(0);
            let mut cycle = path[start..].to_vec();
            cycle.push(next);
            return Some(cycle);
        }
        if let Some(cycle) = visit(next, edges, finished, on_path, path) {
            return Some(cycle);
        }
    }

    path.pop();
    on_path.remove(&node);
    finished.insert(node);
    None
}

/// Task-level edges of a graph.
#[must_use]
pub fn task_edges(graph: &TaskGraph) -> Edges {
    graph.tasks.iter().map(|t| (t.id, t.dependencies.clone())).collect()
}

/// Subtask-level edges under one parent.
#[must_use]
pub fn subtask_edges(task: &Task) -> Edges {
    task.subtasks.iter().map(|s| (s.id, s.dependencies.clone())).collect()
}

/// An invariant violation found in an already-loaded graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum IntegrityIssue {
    /// Two nodes in the same scope share an ID.
    DuplicateId {
        /// The duplicated node.
        node: NodeRef,
    },
    /// A dependency points at a node that does not exist.
    DanglingDependency {
        /// The node carrying the dependency.
        node: NodeRef,
        /// The unresolved reference.
        missing: NodeRef,
    },
    /// A node depends on itself.
    SelfDependency {
        /// The offending node.
        node: NodeRef,
    },
    /// A dependency cycle.
    Cycle {
        /// The cycle path.
        path: Vec<NodeRef>,
    },
}

impl std::fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateId { node } => write!(f, "duplicate id {node}"),
            Self::DanglingDependency { node, missing } => {
                write!(f, "{node} depends on missing {missing}")
            }
            Self::SelfDependency { node } => write!(f, "{node} depends on itself"),
            Self::Cycle { path } => {
                let rendered: Vec<String> = path.iter().map(ToString::to_string).collect();
                write!(f, "cycle {}", rendered.join(" -> "))
            }
        }
    }
}

/// Check a whole graph against the ID and dependency invariants.
///
/// Unlike the merge-time checks this reports every problem instead of
/// stopping at the first, so a task file edited by hand can be diagnosed.
#[must_use]
pub fn audit(graph: &TaskGraph) -> Vec<IntegrityIssue> {
    let mut issues = Vec::new();

    let task_ids = collect_ids(graph.tasks.iter().map(|t| t.id), NodeRef::Task, &mut issues);
    audit_scope(
        graph.tasks.iter().map(|t| (t.id, t.dependencies.as_slice())),
        &task_ids,
        NodeRef::Task,
        &mut issues,
    );
    if let Some(path) = find_cycle(&task_edges(graph)) {
        issues.push(IntegrityIssue::Cycle { path: path.into_iter().map(NodeRef::Task).collect() });
    }

    for task in &graph.tasks {
        let parent = task.id;
        let to_ref = |subtask| NodeRef::Subtask { task: parent, subtask };
        let ids = collect_ids(task.subtasks.iter().map(|s| s.id), to_ref, &mut issues);
        audit_scope(
            task.subtasks.iter().map(|s| (s.id, s.dependencies.as_slice())),
            &ids,
            to_ref,
            &mut issues,
        );
        if let Some(path) = find_cycle(&subtask_edges(task)) {
            issues.push(IntegrityIssue::Cycle { path: path.into_iter().map(to_ref).collect() });
        }
    }

    issues
}

fn collect_ids(
    ids: impl Iterator<Item = u32>,
    to_ref: impl Fn(u32) -> NodeRef,
    issues: &mut Vec<IntegrityIssue>,
) -> BTreeSet<u32> {
    let mut seen = BTreeSet::new();
    for id in ids {
        if !seen.insert(id) {
            issues.push(IntegrityIssue::DuplicateId { node: to_ref(id) });
        }
    }
    seen
}

fn audit_scope<'a>(
    nodes: impl Iterator<Item = (u32, &'a [u32])>,
    scope: &BTreeSet<u32>,
    to_ref: impl Fn(u32) -> NodeRef,
    issues: &mut Vec<IntegrityIssue>,
) {
    for (id, deps) in nodes {
        for &dep in deps {
            if dep == id {
                issues.push(IntegrityIssue::SelfDependency { node: to_ref(id) });
            } else if !scope.contains(&dep) {
                issues.push(IntegrityIssue::DanglingDependency {
                    node: to_ref(id),
                    missing: to_ref(dep),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{graph_of, subtask, task};

    fn edges(pairs: &[(u32, &[u32])]) -> Edges {
        pairs.iter().map(|(id, deps)| (*id, deps.to_vec())).collect()
    }

    #[test]
    fn test_check_references_ok() {
        let scope: BTreeSet<u32> = [1, 2, 3].into_iter().collect();
        assert!(check_references(4, &[1, 3], &scope, NodeRef::Task).is_ok());
        assert!(check_references(4, &[], &scope, NodeRef::Task).is_ok());
    }

    #[test]
    fn test_check_references_missing() {
        let scope: BTreeSet<u32> = [1, 2].into_iter().collect();
        let err = check_references(3, &[1, 99], &scope, NodeRef::Task).unwrap_err();
        assert_eq!(
            err,
            MergeFailure::DependencyNotFound { node: NodeRef::Task(3), missing: NodeRef::Task(99) }
        );
    }

    #[test]
    fn test_self_reference_reported_first() {
        // 7 is both out of scope and a self-reference; self wins
        let scope: BTreeSet<u32> = [5, 6].into_iter().collect();
        let to_ref = |subtask| NodeRef::Subtask { task: 2, subtask };
        let err = check_references(7, &[99, 7], &scope, to_ref).unwrap_err();
        assert_eq!(err, MergeFailure::SelfDependency { node: to_ref(7) });
    }

    #[test]
    fn test_prior_scope_looks_back_and_across_batch() {
        let existing: BTreeSet<u32> = [1, 2, 10].into_iter().collect();
        let batch: BTreeSet<u32> = [3, 4].into_iter().collect();
        let scope = prior_scope(&existing, 3, &batch);
        assert_eq!(scope.into_iter().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(prior_scope(&existing, 2, &BTreeSet::new()), BTreeSet::from([1]));
    }

    #[test]
    fn test_find_cycle_none_in_dag() {
        let dag = edges(&[(1, &[]), (2, &[1]), (3, &[1, 2]), (4, &[3])]);
        assert!(find_cycle(&dag).is_none());
    }

    #[test]
    fn test_find_cycle_reports_path() {
        let cyclic = edges(&[(1, &[3]), (2, &[1]), (3, &[2])]);
        let path = find_cycle(&cyclic).unwrap();
        assert_eq!(path.first(), path.last());
        assert_eq!(path.len(), 4);
    }

    #[test]
    fn test_find_cycle_ignores_dangling_edges() {
        let dangling = edges(&[(1, &[42]), (2, &[1])]);
        assert!(find_cycle(&dangling).is_none());
    }

    #[test]
    fn test_find_cycle_self_loop() {
        let looped = edges(&[(1, &[1])]);
        assert_eq!(find_cycle(&looped).unwrap(), vec![1, 1]);
    }

    #[test]
    fn test_ensure_acyclic_maps_refs() {
        let cyclic = edges(&[(1, &[2]), (2, &[1])]);
        let err = ensure_acyclic(&cyclic, NodeRef::Task).unwrap_err();
        match err {
            MergeFailure::DependencyCycle { path } => {
                assert_eq!(path, vec![NodeRef::Task(1), NodeRef::Task(2), NodeRef::Task(1)]);
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[test]
    fn test_audit_clean_graph() {
        let mut first = task(1, "Setup");
        first.subtasks = vec![subtask(1, "a"), subtask(2, "b")];
        first.subtasks[1].dependencies = vec![1];
        let mut second = task(2, "Build");
        second.dependencies = vec![1];
        assert!(audit(&graph_of(vec![first, second])).is_empty());
    }

    #[test]
    fn test_audit_reports_every_problem() {
        let mut first = task(1, "Setup");
        first.dependencies = vec![1, 9];
        let mut duplicate = task(1, "Again");
        duplicate.subtasks = vec![subtask(1, "a"), subtask(2, "b")];
        duplicate.subtasks[0].dependencies = vec![2];
        duplicate.subtasks[1].dependencies = vec![1];

        let issues = audit(&graph_of(vec![first, duplicate]));
        assert!(issues.contains(&IntegrityIssue::DuplicateId { node: NodeRef::Task(1) }));
        assert!(issues.contains(&IntegrityIssue::SelfDependency { node: NodeRef::Task(1) }));
        assert!(issues.contains(&IntegrityIssue::DanglingDependency {
            node: NodeRef::Task(1),
            missing: NodeRef::Task(9),
        }));
        assert!(issues.iter().any(|issue| matches!(issue, IntegrityIssue::Cycle { path }
            if path.first() == Some(&NodeRef::Subtask { task: 1, subtask: 1 }))));
    }
}
