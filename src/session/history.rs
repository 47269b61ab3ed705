// src/session/history.rs

use super::MixSession;

/// Undo/redo of session edits. Sessions are immutable values, so the stacks
/// hold whole snapshots instead of inverse commands.
#[derive(Debug, Clone)]
pub struct History {
    undo_stack: Vec<MixSession>,
    redo_stack: Vec<MixSession>,
    max_history: usize,
}

impl History {
    pub fn new(max_history: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_history: max_history.max(1),
        }
    }

    /// Remember `before` as the state an edit started from.
    /// Clears the redo stack because a new history branch is created.
    pub fn record(&mut self, before: MixSession) {
        self.undo_stack.push(before);
        self.redo_stack.clear();
        if self.undo_stack.len() > self.max_history {
            self.undo_stack.remove(0);
        }
    }

    /// Edits of the previous snapshot applied to `current`'s playback.
    pub fn undo(&mut self, current: &MixSession) -> Option<MixSession> {
        let previous = self.undo_stack.pop()?;
        self.redo_stack.push(current.clone());
        Some(current.restore_edits(&previous))
    }

    pub fn redo(&mut self, current: &MixSession) -> Option<MixSession> {
        let next = self.redo_stack.pop()?;
        self.undo_stack.push(current.clone());
        Some(current.restore_edits(&next))
    }
}
