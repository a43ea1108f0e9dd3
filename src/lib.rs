//! # `taskmerge`
//!
//! Reconciles model-produced task JSON into a persistent task graph.
//!
//! A model answers one of a fixed set of operations (add a task, rewrite a
//! task, append to a subtask, expand a task into subtasks, score complexity,
//! turn a requirements document into tasks). Its raw reply is validated,
//! renumbered, checked against the dependency rules and the protection of
//! completed work, and only then swapped into the graph. A reply that would
//! break the graph is refused as a whole.
//!
//! ```
//! use taskmerge::reconcile::{MergeEngine, MergeRequest};
//! use taskmerge::tasks::{NodeRef, TaskGraph};
//!
//! let response = r#"{"title": "Setup", "description": "Scaffold the repo",
//!     "details": "", "testStrategy": "", "dependencies": []}"#;
//! let request = MergeRequest::AddTask { response: response.to_string(), priority: None };
//! let merged = MergeEngine::default().apply(&TaskGraph::default(), &request).unwrap();
//! assert_eq!(merged.diff.added(), vec![NodeRef::Task(1)]);
//! ```

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod merge_log;
pub mod paths;
pub mod reconcile;
pub mod shared;
pub mod storage;
pub mod tasks;
pub mod templates;
pub mod testing;
pub mod traits;
pub mod workflow;

pub use error::{Error, Result};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }
}
