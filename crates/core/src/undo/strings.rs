use super::info::{
    CreateOp, CreateRecord, OwnershipField, OwnershipRecord, PermissionsRecord,
    RecPermissionsRecord, RenameRecord, TransferOp, TransferRecord, TrashRecord, UndoInfo,
    UndoRecord,
};
use crate::location::Location;

/// Menu labels and tooltips for the undo and redo of one record.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UndoStrings {
    pub undo_label: String,
    pub undo_description: String,
    pub redo_label: String,
    pub redo_description: String,
}

impl UndoStrings {
    fn new(
        undo_label: impl Into<String>,
        undo_description: impl Into<String>,
        redo_label: impl Into<String>,
        redo_description: impl Into<String>,
    ) -> Self {
        Self {
            undo_label: undo_label.into(),
            undo_description: undo_description.into(),
            redo_label: redo_label.into(),
            redo_description: redo_description.into(),
        }
    }
}

impl UndoInfo {
    pub fn get_strings(&self) -> UndoStrings {
        let count = self.item_count;
        match &self.record {
            UndoRecord::Transfer(record) => transfer_strings(record, count),
            UndoRecord::Create(record) => create_strings(record),
            UndoRecord::Rename(record) => rename_strings(record),
            UndoRecord::Trash(record) => trash_strings(record, count),
            UndoRecord::RecPermissions(record) => rec_permissions_strings(record),
            UndoRecord::Permissions(record) => permissions_strings(record),
            UndoRecord::Ownership(record) => ownership_strings(record),
        }
    }
}

fn name_of(location: Option<&Location>) -> String {
    location.map(Location::base_name).unwrap_or_default()
}

fn transfer_strings(record: &TransferRecord, count: usize) -> UndoStrings {
    let source_dir = record.source_dir.base_name();
    let destination_dir = record.destination_dir.base_name();
    let destination = name_of(record.destinations.first());
    let plural = count > 1;

    match record.op {
        TransferOp::Move => {
            let (undo, redo) = if plural {
                (
                    format!("Move {count} items back to '{source_dir}'"),
                    format!("Move {count} items to '{destination_dir}'"),
                )
            } else {
                (
                    format!("Move '{destination}' back to '{source_dir}'"),
                    format!("Move '{destination}' to '{destination_dir}'"),
                )
            };
            UndoStrings::new("_Undo Move", undo, "_Redo Move", redo)
        }
        TransferOp::RestoreFromTrash => {
            let (undo, redo) = if plural {
                (
                    format!("Move {count} items back to trash"),
                    format!("Restore {count} items from trash"),
                )
            } else {
                (
                    format!("Move '{destination}' back to trash"),
                    format!("Restore '{destination}' from trash"),
                )
            };
            UndoStrings::new("_Undo Restore from Trash", undo, "_Redo Restore from Trash", redo)
        }
        TransferOp::Copy => {
            let (undo, redo) = if plural {
                (
                    format!("Delete {count} copied items"),
                    format!("Copy {count} items to '{destination_dir}'"),
                )
            } else {
                (
                    format!("Delete '{destination}'"),
                    format!("Copy '{destination}' to '{destination_dir}'"),
                )
            };
            UndoStrings::new("_Undo Copy", undo, "_Redo Copy", redo)
        }
        TransferOp::Duplicate => {
            let (undo, redo) = if plural {
                (
                    format!("Delete {count} duplicated items"),
                    format!("Duplicate {count} items in '{destination_dir}'"),
                )
            } else {
                (
                    format!("Delete '{destination}'"),
                    format!("Duplicate '{destination}' in '{destination_dir}'"),
                )
            };
            UndoStrings::new("_Undo Duplicate", undo, "_Redo Duplicate", redo)
        }
        TransferOp::CreateLink => {
            let (undo, redo) = if plural {
                (
                    format!("Delete links to {count} items"),
                    format!("Create links to {count} items"),
                )
            } else {
                let source = name_of(record.sources.first());
                (
                    format!("Delete link to '{destination}'"),
                    format!("Create link to '{source}'"),
                )
            };
            UndoStrings::new("_Undo Create Link", undo, "_Redo Create Link", redo)
        }
    }
}

fn create_strings(record: &CreateRecord) -> UndoStrings {
    let name = name_of(record.target.as_ref());
    match record.op {
        CreateOp::EmptyFile => UndoStrings::new(
            "_Undo Create Empty File",
            format!("Delete '{name}'"),
            "_Redo Create Empty File",
            format!("Create an empty file '{name}'"),
        ),
        CreateOp::Folder => UndoStrings::new(
            "_Undo Create Folder",
            format!("Delete '{name}'"),
            "_Redo Create Folder",
            format!("Create a new folder '{name}'"),
        ),
        CreateOp::FromTemplate => {
            let template = record
                .template
                .as_deref()
                .and_then(Location::from_uri)
                .map(|location| location.base_name())
                .unwrap_or_default();
            UndoStrings::new(
                "_Undo Create from Template",
                format!("Delete '{name}'"),
                "_Redo Create from Template",
                format!("Create new file '{name}' from template '{template}'"),
            )
        }
    }
}

fn rename_strings(record: &RenameRecord) -> UndoStrings {
    let old = name_of(record.old.as_ref());
    let new = name_of(record.new.as_ref());
    UndoStrings::new(
        "_Undo Rename",
        format!("Rename '{new}' as '{old}'"),
        "_Redo Rename",
        format!("Rename '{old}' as '{new}'"),
    )
}

fn trash_strings(record: &TrashRecord, count: usize) -> UndoStrings {
    let (undo, redo) = if count > 1 {
        (
            format!("Restore {count} items from trash"),
            format!("Move {count} items to trash"),
        )
    } else {
        let name = name_of(record.trashed.keys().next());
        let origin = record
            .trashed
            .keys()
            .next()
            .and_then(Location::parent)
            .map(|parent| parent.base_name())
            .unwrap_or_default();
        (
            format!("Restore '{name}' to '{origin}'"),
            format!("Move '{name}' to trash"),
        )
    };
    UndoStrings::new("_Undo Trash", undo, "_Redo Trash", redo)
}

fn rec_permissions_strings(record: &RecPermissionsRecord) -> UndoStrings {
    let name = record.directory.base_name();
    UndoStrings::new(
        "_Undo Change Permissions",
        format!("Restore original permissions of items enclosed in '{name}'"),
        "_Redo Change Permissions",
        format!("Set permissions of items enclosed in '{name}'"),
    )
}

fn permissions_strings(record: &PermissionsRecord) -> UndoStrings {
    let name = record.target.base_name();
    UndoStrings::new(
        "_Undo Change Permissions",
        format!("Restore original permissions of '{name}'"),
        "_Redo Change Permissions",
        format!("Set permissions of '{name}'"),
    )
}

fn ownership_strings(record: &OwnershipRecord) -> UndoStrings {
    let name = record.target.base_name();
    let (original, new) = (&record.original, &record.new);
    match record.field {
        OwnershipField::Owner => UndoStrings::new(
            "_Undo Change Owner",
            format!("Restore owner of '{name}' to '{original}'"),
            "_Redo Change Owner",
            format!("Set owner of '{name}' to '{new}'"),
        ),
        OwnershipField::Group => UndoStrings::new(
            "_Undo Change Group",
            format!("Restore group of '{name}' to '{original}'"),
            "_Redo Change Group",
            format!("Set group of '{name}' to '{new}'"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn copy_info(count: usize) -> UndoInfo {
        let mut info = UndoInfo::transfer(
            TransferOp::Copy,
            count,
            Location::new("/home/ana/src"),
            Location::new("/home/ana/backup"),
        );
        for index in 0..count {
            info.add_origin_target_pair(
                Location::new(format!("/home/ana/src/f{index}.txt")),
                Location::new(format!("/home/ana/backup/f{index}.txt")),
            );
        }
        info
    }

    #[test]
    fn single_copy_names_the_destination() {
        let strings = copy_info(1).get_strings();
        assert_eq!(strings.undo_label, "_Undo Copy");
        assert_eq!(strings.undo_description, "Delete 'f0.txt'");
        assert_eq!(strings.redo_description, "Copy 'f0.txt' to 'backup'");
    }

    #[test]
    fn plural_copy_uses_the_count() {
        let strings = copy_info(3).get_strings();
        assert_eq!(strings.undo_description, "Delete 3 copied items");
        assert_eq!(strings.redo_description, "Copy 3 items to 'backup'");
    }

    #[test]
    fn rename_swaps_names_between_directions() {
        let mut info = UndoInfo::rename();
        info.rename_set_data(Location::new("/d/old.txt"), Location::new("/d/new.txt"));
        let strings = info.get_strings();
        assert_eq!(strings.undo_description, "Rename 'new.txt' as 'old.txt'");
        assert_eq!(strings.redo_description, "Rename 'old.txt' as 'new.txt'");
    }

    #[test]
    fn single_trash_names_its_origin() {
        let mut info = UndoInfo::trash(1);
        info.trash_add_file(Location::new("/home/ana/notes.txt"), 1);
        let strings = info.get_strings();
        assert_eq!(strings.undo_description, "Restore 'notes.txt' to 'ana'");
        assert_eq!(strings.redo_description, "Move 'notes.txt' to trash");
    }
}
