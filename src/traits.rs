//! Collaborator interfaces.
//!
//! The merge pipeline itself is synchronous and side-effect free. Everything
//! that talks to the outside world (the model, the task file) sits behind one
//! of these traits so the workflow can be driven by mocks in tests.

use crate::error::Result;
use crate::reconcile::OperationKind;
use crate::tasks::TaskGraph;

/// One request to the model invocation service.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// The operation whose response is being requested.
    pub operation: OperationKind,
    /// The assembled context block.
    pub context: String,
    /// JSON Schema the response must satisfy.
    pub schema: serde_json::Value,
}

/// Trait for calling the model.
///
/// Retries, model choice and timeouts belong to the implementation. An `Err`
/// here is an ordinary failure: the workflow reports it and leaves the stored
/// graph untouched.
pub trait ModelInvoker {
    /// Send one invocation and return the raw response text.
    ///
    /// # Errors
    ///
    /// Returns an error if no response could be obtained.
    fn invoke(&self, invocation: &Invocation) -> Result<String>;
}

/// Trait for loading and saving the task graph.
pub trait GraphStore {
    /// Load the current graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph cannot be read or parsed.
    fn load(&self) -> Result<TaskGraph>;

    /// Replace the stored graph.
    ///
    /// `summary` is a one-line description of the change, for stores that
    /// keep history.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph cannot be written.
    fn save(&self, graph: &TaskGraph, summary: &str) -> Result<()>;
}
