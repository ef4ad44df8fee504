use std::collections::VecDeque;

use super::apply::{ApplyOutcome, Direction};
use super::info::UndoInfo;
use super::strings::UndoStrings;
use crate::error::{UndoError, UndoResult};
use crate::operations::FileOperations;

pub const DEFAULT_HISTORY_DEPTH: usize = 1;

/// Which action the manager offers next.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum UndoState {
    #[default]
    None,
    Undo,
    Redo,
}

/// History of undoable operations.
///
/// A successful undo moves its record to the redo side and a successful redo
/// moves it back. A cancelled apply leaves the record in place; a failed one
/// drops it, since the filesystem no longer matches what it describes.
///
/// The record stays on its stack until the apply settles. Dropping an
/// unfinished `undo`/`redo` future cancels the job and leaves the history as
/// it was.
#[derive(Debug)]
pub struct UndoManager {
    undo_stack: VecDeque<UndoInfo>,
    redo_stack: VecDeque<UndoInfo>,
    depth: usize,
    state: UndoState,
}

impl Default for UndoManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_DEPTH)
    }
}

impl UndoManager {
    pub fn new(depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            depth: depth.max(1),
            state: UndoState::None,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn set_depth(&mut self, depth: usize) {
        self.depth = depth.max(1);
        self.trim();
    }

    pub fn state(&self) -> UndoState {
        self.state
    }

    pub fn is_operating(&self) -> bool {
        self.undo_stack.back().is_some_and(UndoInfo::is_applying)
            || self.redo_stack.back().is_some_and(UndoInfo::is_applying)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Records a finished operation. Clears anything that could be redone.
    ///
    /// Ignored while an undo or redo is running so replays never land in the
    /// history.
    pub fn set_action(&mut self, info: UndoInfo) {
        if self.is_operating() {
            tracing::debug!(op = info.op().label(), "ignoring action recorded during undo/redo");
            return;
        }
        tracing::debug!(op = info.op().label(), items = info.item_count(), "recorded undo action");
        self.undo_stack.push_back(info);
        self.redo_stack.clear();
        self.trim();
        self.state = UndoState::Undo;
    }

    /// The record the next undo or redo would apply, per [`state`](Self::state).
    pub fn current(&self) -> Option<&UndoInfo> {
        match self.state {
            UndoState::None => None,
            UndoState::Undo => self.undo_stack.back(),
            UndoState::Redo => self.redo_stack.back(),
        }
    }

    /// The record the next call in `direction` would apply.
    pub fn peek(&self, direction: Direction) -> Option<&UndoInfo> {
        match direction {
            Direction::Undo => self.undo_stack.back(),
            Direction::Redo => self.redo_stack.back(),
        }
    }

    pub fn strings(&self) -> Option<UndoStrings> {
        self.current().map(UndoInfo::get_strings)
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.state = UndoState::None;
    }

    pub async fn undo(&mut self, operations: &FileOperations) -> UndoResult<ApplyOutcome> {
        self.apply(operations, Direction::Undo).await
    }

    pub async fn redo(&mut self, operations: &FileOperations) -> UndoResult<ApplyOutcome> {
        self.apply(operations, Direction::Redo).await
    }

    async fn apply(
        &mut self,
        operations: &FileOperations,
        direction: Direction,
    ) -> UndoResult<ApplyOutcome> {
        let stack = match direction {
            Direction::Undo => &mut self.undo_stack,
            Direction::Redo => &mut self.redo_stack,
        };
        let Some(info) = stack.back_mut() else {
            return Err(match direction {
                Direction::Undo => UndoError::NothingToUndo,
                Direction::Redo => UndoError::NothingToRedo,
            });
        };

        let handle = info.apply_async(operations, direction)?;
        let abandon = handle.cancel_token().clone().drop_guard();
        let result = info.apply_finish(handle).await;
        abandon.disarm();

        match result {
            Ok(outcome) if outcome.success => {
                let flipped = match direction {
                    Direction::Undo => Direction::Redo,
                    Direction::Redo => Direction::Undo,
                };
                if let Some(info) = self.pop(direction) {
                    self.push(flipped, info);
                }
                self.trim();
                self.state = match flipped {
                    Direction::Undo => UndoState::Undo,
                    Direction::Redo => UndoState::Redo,
                };
                Ok(outcome)
            }
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                if let Some(info) = self.pop(direction) {
                    tracing::warn!(
                        op = info.op().label(),
                        direction = direction.label(),
                        "dropping undo record after failed apply"
                    );
                }
                self.refresh_state();
                Err(error)
            }
        }
    }

    fn pop(&mut self, direction: Direction) -> Option<UndoInfo> {
        match direction {
            Direction::Undo => self.undo_stack.pop_back(),
            Direction::Redo => self.redo_stack.pop_back(),
        }
    }

    fn push(&mut self, direction: Direction, info: UndoInfo) {
        match direction {
            Direction::Undo => self.undo_stack.push_back(info),
            Direction::Redo => self.redo_stack.push_back(info),
        }
    }

    fn trim(&mut self) {
        while self.undo_stack.len() > self.depth {
            let _ = self.undo_stack.pop_front();
        }
        while self.redo_stack.len() > self.depth {
            let _ = self.redo_stack.pop_front();
        }
    }

    fn refresh_state(&mut self) {
        self.state = match self.state {
            UndoState::Undo if self.can_undo() => UndoState::Undo,
            UndoState::Redo if self.can_redo() => UndoState::Redo,
            _ if self.can_undo() => UndoState::Undo,
            _ if self.can_redo() => UndoState::Redo,
            _ => UndoState::None,
        };
    }
}
