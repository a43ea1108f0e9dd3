//! The task graph and the checks that keep it consistent.
//!
//! This module provides:
//! - The task/subtask data model as stored in the task file
//! - Sequential ID allocation for new nodes
//! - Dependency scope and cycle checks, plus a whole-graph audit
//! - Protection of completed work against content rewrites
//!
//! # Example
//!
//! ```
//! use taskmerge::tasks::{deps, id, TaskGraph};
//!
//! let graph = TaskGraph::default();
//! assert_eq!(id::next_id(&graph.task_ids()), Ok(1));
//! assert!(deps::audit(&graph).is_empty());
//! ```

pub mod deps;
pub mod guard;
pub mod id;
pub mod models;

pub use deps::IntegrityIssue;
pub use models::{
    GraphMetadata, InvalidPriority, InvalidStatus, NodeRef, Priority, Status, Subtask, Task,
    TaskGraph,
};
