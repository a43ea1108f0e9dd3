//! Reconciling untrusted model output with the task graph.
//!
//! This module provides:
//! - Recovery of JSON (or plain text) from raw model responses
//! - Per-operation shape validation with field-level diagnostics
//! - Output schema descriptions for the prompt layer
//! - The merge engine that commits validated payloads atomically
//!
//! # Example
//!
//! ```
//! use taskmerge::reconcile::{MergeEngine, MergeRequest};
//! use taskmerge::tasks::TaskGraph;
//!
//! let response = "Here is the task:\n```json\n{\"title\": \"Set up CI\", \
//!     \"description\": \"Run tests on push\", \"details\": \"GitHub Actions\", \
//!     \"testStrategy\": \"Open a PR\", \"dependencies\": []}\n```";
//! let merged = MergeEngine::default()
//!     .apply(
//!         &TaskGraph::default(),
//!         &MergeRequest::AddTask { response: response.to_string(), priority: None },
//!     )
//!     .unwrap();
//! assert_eq!(merged.graph.tasks[0].id, 1);
//! ```

pub mod complexity;
pub mod describe;
pub mod engine;
pub mod extract;
pub mod failure;
pub mod schema;

pub use complexity::{ComplexityEntry, ComplexityReport};
pub use describe::output_schema;
pub use engine::{
    AppendIntent, Change, MergeDiff, MergeEngine, MergeError, MergeOptions, MergeRequest, Merged,
    NodeOutcome, Stage,
};
pub use failure::{FieldIssue, MergeFailure, Problem, ValidationError};
pub use schema::{
    validate, validate_value, OperationKind, Payload, SubtaskDraft, SubtaskPatch, TaskDraft,
    TaskPatch,
};
