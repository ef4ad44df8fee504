//! Undo and redo of file operations.

mod apply;
mod info;
mod manager;
mod strings;

pub use apply::{ApplyHandle, ApplyOutcome, Direction};
pub use info::{
    CreateOp, CreateRecord, OwnershipField, OwnershipRecord, PermissionsRecord,
    RecPermissionsRecord, RenameRecord, TransferOp, TransferRecord, TrashRecord, UndoInfo,
    UndoOp, UndoRecord,
};
pub use manager::{DEFAULT_HISTORY_DEPTH, UndoManager, UndoState};
pub use strings::UndoStrings;
