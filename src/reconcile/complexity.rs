//! Complexity analysis results.
//!
//! An analyze-complexity response is a list of per-task scores. It never
//! changes the graph; it becomes a [`ComplexityReport`] that callers use to
//! decide which tasks to expand and into how many subtasks.

use super::failure::Problem;
use super::schema::Checker;
use crate::tasks::TaskGraph;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Lowest and highest accepted complexity score.
pub const SCORE_RANGE: std::ops::RangeInclusive<f64> = 1.0..=10.0;

/// One task's complexity assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityEntry {
    /// The assessed task.
    pub task_id: u32,
    /// Title of the assessed task, as the model saw it.
    pub task_title: String,
    /// Score from 1 (trivial) to 10 (very complex).
    pub complexity_score: f64,
    /// Suggested number of subtasks.
    pub recommended_subtasks: u32,
    /// Prompt to use when expanding this task.
    pub expansion_prompt: String,
    /// Why the score was given.
    pub reasoning: String,
}

impl Checker {
    /// analyze-complexity: a bare array of entries, unique by task ID.
    pub(crate) fn complexity(&mut self, value: &Value) -> Option<Vec<ComplexityEntry>> {
        let items = self.array(value, "")?;

        let entries: Vec<Option<ComplexityEntry>> = items
            .iter()
            .enumerate()
            .map(|(i, item)| self.complexity_entry(item, &format!("[{i}]")))
            .collect();

        let mut seen = BTreeSet::new();
        for (i, entry) in entries.iter().enumerate() {
            if let Some(entry) = entry {
                if !seen.insert(entry.task_id) {
                    self.push(format!("[{i}].taskId"), Problem::Invalid {
                        reason: format!("duplicate entry for task {}", entry.task_id),
                    });
                }
            }
        }

        entries.into_iter().collect()
    }

    fn complexity_entry(&mut self, value: &Value, prefix: &str) -> Option<ComplexityEntry> {
        let obj = self.object(value, prefix)?;
        let task_id = self.id(obj, "taskId", prefix);
        let task_title = self.string(obj, "taskTitle", prefix, false);
        let complexity_score = self.number_in_range(obj, "complexityScore", prefix, SCORE_RANGE);
        let recommended_subtasks = self.positive_integer(obj, "recommendedSubtasks", prefix);
        let expansion_prompt = self.string(obj, "expansionPrompt", prefix, false);
        let reasoning = self.string(obj, "reasoning", prefix, false);

        Some(ComplexityEntry {
            task_id: task_id?,
            task_title: task_title?,
            complexity_score: complexity_score?,
            recommended_subtasks: recommended_subtasks?,
            expansion_prompt: expansion_prompt?,
            reasoning: reasoning?,
        })
    }
}

/// A validated complexity analysis, keyed by task ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityReport {
    /// When the report was produced (RFC 3339).
    pub generated_at: String,
    /// Entries for tasks that exist in the graph.
    pub entries: BTreeMap<u32, ComplexityEntry>,
    /// Task IDs the model scored that are not in the graph.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown_task_ids: Vec<u32>,
}

impl ComplexityReport {
    /// Build a report, setting aside entries for tasks the graph lacks.
    #[must_use]
    pub fn new(graph: &TaskGraph, entries: Vec<ComplexityEntry>) -> Self {
        let known = graph.task_ids();
        let mut report = Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            entries: BTreeMap::new(),
            unknown_task_ids: Vec::new(),
        };
        for entry in entries {
            if known.contains(&entry.task_id) {
                report.entries.insert(entry.task_id, entry);
            } else {
                report.unknown_task_ids.push(entry.task_id);
            }
        }
        report
    }

    /// Entries scoring at or above `threshold`, most complex first.
    #[must_use]
    pub fn tasks_above(&self, threshold: f64) -> Vec<&ComplexityEntry> {
        let mut above: Vec<&ComplexityEntry> =
            self.entries.values().filter(|e| e.complexity_score >= threshold).collect();
        above.sort_by(|a, b| {
            b.complexity_score
                .total_cmp(&a.complexity_score)
                .then(a.task_id.cmp(&b.task_id))
        });
        above
    }

    /// The entry for one task, if it was scored.
    #[must_use]
    pub fn recommendation(&self, task_id: u32) -> Option<&ComplexityEntry> {
        self.entries.get(&task_id)
    }
}
