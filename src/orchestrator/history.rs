//! Undo/Redo for interactive flow edits
//!
//! Each entry stores the flow before and after the edit, so undo and redo
//! restore whole snapshots and the dual-edge trim state comes back exactly.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use uuid::Uuid;

use super::flow::Flow;
use crate::error::Result;

/// Maximum number of undo levels
pub const MAX_UNDO_LEVELS: usize = 50;

/// One recorded edit
#[derive(Debug, Clone)]
pub struct FlowEdit {
    pub edit_id: String,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    before: Flow,
    after: Flow,
}

impl FlowEdit {
    pub fn new(description: &str, before: Flow, after: Flow) -> Self {
        Self {
            edit_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            description: description.to_string(),
            before,
            after,
        }
    }
}

/// Result of an undo/redo operation
#[derive(Debug, Clone)]
pub struct HistoryResult {
    /// Message describing what was done
    pub message: String,
    /// Flow state to restore
    pub flow: Flow,
}

/// Bounded undo/redo stacks of flow snapshots
#[derive(Debug, Clone)]
pub struct FlowHistory {
    undo_stack: VecDeque<FlowEdit>,
    redo_stack: Vec<FlowEdit>,
    max_levels: usize,
}

impl FlowHistory {
    pub fn new() -> Self {
        Self::with_max_levels(MAX_UNDO_LEVELS)
    }

    pub fn with_max_levels(max_levels: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            max_levels: max_levels.max(1),
        }
    }

    /// Record an edit (clears redo stack)
    pub fn record(&mut self, edit: FlowEdit) {
        self.undo_stack.push_back(edit);
        self.redo_stack.clear();
        while self.undo_stack.len() > self.max_levels {
            self.undo_stack.pop_front();
        }
    }

    /// Run `edit` against `flow` and record it if it succeeds
    ///
    /// A failed edit leaves both the flow and the history unchanged.
    pub fn apply<F>(&mut self, flow: &mut Flow, description: &str, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Flow) -> Result<()>,
    {
        let before = flow.clone();
        if let Err(e) = edit(flow) {
            *flow = before;
            return Err(e);
        }
        self.record(FlowEdit::new(description, before, flow.clone()));
        Ok(())
    }

    pub fn undo(&mut self) -> Option<HistoryResult> {
        let edit = self.undo_stack.pop_back()?;
        let result = HistoryResult {
            message: format!("Undone: {}", edit.description),
            flow: edit.before.clone(),
        };
        self.redo_stack.push(edit);
        Some(result)
    }

    pub fn redo(&mut self) -> Option<HistoryResult> {
        let edit = self.redo_stack.pop()?;
        let result = HistoryResult {
            message: format!("Redone: {}", edit.description),
            flow: edit.after.clone(),
        };
        self.undo_stack.push_back(edit);
        Some(result)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    /// Edit descriptions, most recent first
    pub fn undo_history(&self) -> Vec<&str> {
        self.undo_stack
            .iter()
            .rev()
            .map(|e| e.description.as_str())
            .collect()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

impl Default for FlowHistory {
    fn default() -> Self {
        Self::new()
    }
}
