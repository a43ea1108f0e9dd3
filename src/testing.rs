//! Testing utilities and mock implementations.
//!
//! These types are provided for use in tests. They may appear unused in
//! the library itself but are consumed by unit and integration tests.

#![allow(dead_code)]
#![allow(clippy::needless_pass_by_ref_mut)] // &mut self for ergonomics with RefCell

use crate::error::{Error, Result};
use crate::tasks::{Status, Subtask, Task, TaskGraph};
use crate::traits::{GraphStore, Invocation, ModelInvoker};
use std::cell::RefCell;

/// A mock model invoker that replays queued responses in order.
#[derive(Debug, Default)]
pub struct MockModelInvoker {
    responses: RefCell<Vec<Result<String>>>,
    invocations: RefCell<Vec<Invocation>>,
    call_index: RefCell<usize>,
}

impl MockModelInvoker {
    /// Create a new mock invoker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw response.
    pub fn respond(&mut self, response: impl Into<String>) {
        self.responses.borrow_mut().push(Ok(response.into()));
    }

    /// Queue an invocation failure.
    pub fn fail(&mut self, message: &str) {
        self.responses.borrow_mut().push(Err(Error::Model(message.to_string())));
    }

    /// Every invocation received so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.borrow().clone()
    }

    /// Verify all queued responses were consumed.
    ///
    /// # Panics
    ///
    /// Panics if not all queued responses were used.
    pub fn verify(&self) {
        let index = *self.call_index.borrow();
        let expected = self.responses.borrow().len();
        assert_eq!(index, expected, "Expected {expected} model calls, but only {index} were made");
    }
}

impl ModelInvoker for MockModelInvoker {
    fn invoke(&self, invocation: &Invocation) -> Result<String> {
        self.invocations.borrow_mut().push(invocation.clone());
        let mut index = self.call_index.borrow_mut();
        let mut responses = self.responses.borrow_mut();

        assert!(
            *index < responses.len(),
            "Unexpected model call for {} (no more responses)",
            invocation.operation
        );

        let response = std::mem::replace(&mut responses[*index], Ok(String::new()));
        *index += 1;
        response
    }
}

/// An in-memory graph store that records every save.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    graph: RefCell<TaskGraph>,
    saves: RefCell<Vec<String>>,
}

impl InMemoryGraphStore {
    /// Create a store holding `graph`.
    #[must_use]
    pub fn new(graph: TaskGraph) -> Self {
        Self { graph: RefCell::new(graph), saves: RefCell::new(Vec::new()) }
    }

    /// The currently stored graph.
    #[must_use]
    pub fn graph(&self) -> TaskGraph {
        self.graph.borrow().clone()
    }

    /// Summaries passed to each save, in order.
    #[must_use]
    pub fn saves(&self) -> Vec<String> {
        self.saves.borrow().clone()
    }
}

impl GraphStore for InMemoryGraphStore {
    fn load(&self) -> Result<TaskGraph> {
        Ok(self.graph.borrow().clone())
    }

    fn save(&self, graph: &TaskGraph, summary: &str) -> Result<()> {
        *self.graph.borrow_mut() = graph.clone();
        self.saves.borrow_mut().push(summary.to_string());
        Ok(())
    }
}

/// A pending task with the given ID and title and empty content.
#[must_use]
pub fn task(id: u32, title: &str) -> Task {
    Task {
        id,
        title: title.to_string(),
        description: String::new(),
        details: String::new(),
        test_strategy: String::new(),
        status: Status::Pending,
        priority: crate::tasks::Priority::Medium,
        dependencies: Vec::new(),
        subtasks: Vec::new(),
    }
}

/// A pending subtask with the given ID and title and empty content.
#[must_use]
pub fn subtask(id: u32, title: &str) -> Subtask {
    Subtask {
        id,
        title: title.to_string(),
        description: String::new(),
        details: String::new(),
        test_strategy: None,
        status: Status::Pending,
        dependencies: Vec::new(),
    }
}

/// A graph holding `tasks` and no metadata.
#[must_use]
pub fn graph_of(tasks: Vec<Task>) -> TaskGraph {
    TaskGraph::new(tasks)
}
