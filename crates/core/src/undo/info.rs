use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::location::Location;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum UndoOp {
    Move,
    Copy,
    Duplicate,
    CreateLink,
    RestoreFromTrash,
    CreateEmptyFile,
    CreateFolder,
    CreateFromTemplate,
    Rename,
    MoveToTrash,
    SetPermissions,
    RecursiveSetPermissions,
    ChangeOwner,
    ChangeGroup,
}

impl UndoOp {
    pub fn label(self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::Copy => "copy",
            Self::Duplicate => "duplicate",
            Self::CreateLink => "create-link",
            Self::RestoreFromTrash => "restore-from-trash",
            Self::CreateEmptyFile => "create-empty-file",
            Self::CreateFolder => "create-folder",
            Self::CreateFromTemplate => "create-from-template",
            Self::Rename => "rename",
            Self::MoveToTrash => "move-to-trash",
            Self::SetPermissions => "set-permissions",
            Self::RecursiveSetPermissions => "recursive-set-permissions",
            Self::ChangeOwner => "change-owner",
            Self::ChangeGroup => "change-group",
        }
    }
}

/// Transfer-style operations recorded as source/destination pairs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferOp {
    Move,
    Copy,
    Duplicate,
    CreateLink,
    RestoreFromTrash,
}

impl From<TransferOp> for UndoOp {
    fn from(op: TransferOp) -> Self {
        match op {
            TransferOp::Move => Self::Move,
            TransferOp::Copy => Self::Copy,
            TransferOp::Duplicate => Self::Duplicate,
            TransferOp::CreateLink => Self::CreateLink,
            TransferOp::RestoreFromTrash => Self::RestoreFromTrash,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CreateOp {
    EmptyFile,
    Folder,
    FromTemplate,
}

impl From<CreateOp> for UndoOp {
    fn from(op: CreateOp) -> Self {
        match op {
            CreateOp::EmptyFile => Self::CreateEmptyFile,
            CreateOp::Folder => Self::CreateFolder,
            CreateOp::FromTemplate => Self::CreateFromTemplate,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OwnershipField {
    Owner,
    Group,
}

impl From<OwnershipField> for UndoOp {
    fn from(field: OwnershipField) -> Self {
        match field {
            OwnershipField::Owner => Self::ChangeOwner,
            OwnershipField::Group => Self::ChangeGroup,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransferRecord {
    pub op: TransferOp,
    pub source_dir: Location,
    pub destination_dir: Location,
    /// `sources[i]` ended up at `destinations[i]`.
    pub sources: Vec<Location>,
    pub destinations: Vec<Location>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateRecord {
    pub op: CreateOp,
    pub target: Option<Location>,
    /// Initial text of an empty file, or the template URI.
    pub template: Option<String>,
    pub length: usize,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RenameRecord {
    pub old: Option<Location>,
    pub new: Option<Location>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TrashRecord {
    /// Original location to the deletion time the trash recorded for it.
    pub trashed: HashMap<Location, i64>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecPermissionsRecord {
    pub directory: Location,
    pub original_modes: HashMap<Location, u32>,
    pub file_permissions: u32,
    pub file_mask: u32,
    pub dir_permissions: u32,
    pub dir_mask: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PermissionsRecord {
    pub target: Location,
    pub current: u32,
    pub new: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OwnershipRecord {
    pub field: OwnershipField,
    pub target: Location,
    pub original: String,
    pub new: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UndoRecord {
    Transfer(TransferRecord),
    Create(CreateRecord),
    Rename(RenameRecord),
    Trash(TrashRecord),
    RecPermissions(RecPermissionsRecord),
    Permissions(PermissionsRecord),
    Ownership(OwnershipRecord),
}

/// Everything needed to reverse and replay one file operation.
///
/// A record is filled while its operation runs (see the `*_add_*` and
/// `*_set_data` populators), then handed to the undo manager. Only one undo
/// or redo of a record may be outstanding at a time; the flag guarding that
/// is shared with the [`ApplyHandle`](super::ApplyHandle) that releases it.
pub struct UndoInfo {
    pub(super) op: UndoOp,
    pub(super) item_count: usize,
    pub(super) record: UndoRecord,
    pub(super) in_flight: Arc<AtomicBool>,
}

impl UndoInfo {
    fn with_record(op: UndoOp, item_count: usize, record: UndoRecord) -> Self {
        Self {
            op,
            item_count,
            record,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn transfer(
        op: TransferOp,
        item_count: usize,
        source_dir: Location,
        destination_dir: Location,
    ) -> Self {
        Self::with_record(
            op.into(),
            item_count,
            UndoRecord::Transfer(TransferRecord {
                op,
                source_dir,
                destination_dir,
                sources: Vec::with_capacity(item_count),
                destinations: Vec::with_capacity(item_count),
            }),
        )
    }

    pub fn create(op: CreateOp) -> Self {
        Self::with_record(
            op.into(),
            1,
            UndoRecord::Create(CreateRecord {
                op,
                target: None,
                template: None,
                length: 0,
            }),
        )
    }

    pub fn rename() -> Self {
        Self::with_record(
            UndoOp::Rename,
            1,
            UndoRecord::Rename(RenameRecord {
                old: None,
                new: None,
            }),
        )
    }

    pub fn trash(item_count: usize) -> Self {
        Self::with_record(
            UndoOp::MoveToTrash,
            item_count,
            UndoRecord::Trash(TrashRecord::default()),
        )
    }

    pub fn rec_permissions(
        directory: Location,
        file_permissions: u32,
        file_mask: u32,
        dir_permissions: u32,
        dir_mask: u32,
    ) -> Self {
        Self::with_record(
            UndoOp::RecursiveSetPermissions,
            1,
            UndoRecord::RecPermissions(RecPermissionsRecord {
                directory,
                original_modes: HashMap::new(),
                file_permissions,
                file_mask,
                dir_permissions,
                dir_mask,
            }),
        )
    }

    pub fn permissions(target: Location, current: u32, new: u32) -> Self {
        Self::with_record(
            UndoOp::SetPermissions,
            1,
            UndoRecord::Permissions(PermissionsRecord {
                target,
                current,
                new,
            }),
        )
    }

    pub fn ownership(
        field: OwnershipField,
        target: Location,
        original: impl Into<String>,
        new: impl Into<String>,
    ) -> Self {
        Self::with_record(
            field.into(),
            1,
            UndoRecord::Ownership(OwnershipRecord {
                field,
                target,
                original: original.into(),
                new: new.into(),
            }),
        )
    }

    pub fn op(&self) -> UndoOp {
        self.op
    }

    pub fn item_count(&self) -> usize {
        self.item_count
    }

    pub fn record(&self) -> &UndoRecord {
        &self.record
    }

    pub fn is_applying(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Whether nothing has been recorded yet, so applying would be a no-op.
    pub fn is_empty(&self) -> bool {
        match &self.record {
            UndoRecord::Transfer(record) => record.destinations.is_empty(),
            UndoRecord::Create(record) => record.target.is_none(),
            UndoRecord::Rename(record) => record.new.is_none(),
            UndoRecord::Trash(record) => record.trashed.is_empty(),
            UndoRecord::RecPermissions(record) => record.original_modes.is_empty(),
            UndoRecord::Permissions(_) | UndoRecord::Ownership(_) => false,
        }
    }

    /// Shrinks the item count to what an interrupted operation got through.
    pub(crate) fn settle_partial(mut self) -> Self {
        self.item_count = match &self.record {
            UndoRecord::Transfer(record) => record.destinations.len(),
            UndoRecord::Trash(record) => record.trashed.len(),
            _ => self.item_count,
        };
        self
    }

    pub fn add_origin_target_pair(&mut self, origin: Location, target: Location) {
        match &mut self.record {
            UndoRecord::Transfer(record) => {
                record.sources.push(origin);
                record.destinations.push(target);
            }
            _ => self.populator_mismatch("add_origin_target_pair"),
        }
    }

    pub fn trash_add_file(&mut self, file: Location, deleted_at: i64) {
        match &mut self.record {
            UndoRecord::Trash(record) => {
                record.trashed.insert(file, deleted_at);
            }
            _ => self.populator_mismatch("trash_add_file"),
        }
    }

    pub fn rec_permissions_add_file(&mut self, file: Location, mode: u32) {
        match &mut self.record {
            UndoRecord::RecPermissions(record) => {
                record.original_modes.insert(file, mode);
            }
            _ => self.populator_mismatch("rec_permissions_add_file"),
        }
    }

    pub fn create_set_data(&mut self, target: Location, template: Option<String>, length: usize) {
        match &mut self.record {
            UndoRecord::Create(record) => {
                record.target = Some(target);
                record.template = template;
                record.length = length;
            }
            _ => self.populator_mismatch("create_set_data"),
        }
    }

    pub fn rename_set_data(&mut self, old: Location, new: Location) {
        match &mut self.record {
            UndoRecord::Rename(record) => {
                record.old = Some(old);
                record.new = Some(new);
            }
            _ => self.populator_mismatch("rename_set_data"),
        }
    }

    fn populator_mismatch(&self, populator: &str) {
        tracing::error!(op = self.op.label(), populator, "populator does not apply to this record");
        debug_assert!(false, "{populator} called on a {} record", self.op.label());
    }
}

impl fmt::Debug for UndoInfo {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("UndoInfo")
            .field("op", &self.op)
            .field("item_count", &self.item_count)
            .field("applying", &self.is_applying())
            .field("record", &self.record)
            .finish()
    }
}
