use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

use super::info::{CreateOp, OwnershipField, TransferOp, UndoInfo, UndoRecord};
use crate::error::{OpError, OpErrorCode, UndoError, UndoResult};
use crate::location::Location;
use crate::operations::{FileOperations, OpOptions, OpReport, PendingOp};
use crate::progress::Progress;
use crate::trash::TrashedItem;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    Undo,
    Redo,
}

impl Direction {
    pub fn label(self) -> &'static str {
        match self {
            Self::Undo => "undo",
            Self::Redo => "redo",
        }
    }
}

/// How an undo or redo ended.
///
/// `success == false` with `user_cancelled == false` is a real failure; a
/// cancelled apply leaves the record where it was.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ApplyOutcome {
    pub success: bool,
    pub user_cancelled: bool,
    pub skipped: usize,
}

struct InFlightGuard(Arc<AtomicBool>);

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// An undo or redo in progress. Dropping it without finishing releases the
/// record again.
pub struct ApplyHandle {
    direction: Direction,
    pending: PendingOp,
    guard: InFlightGuard,
}

impl ApplyHandle {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn progress(&self) -> &Progress {
        self.pending.progress()
    }

    pub fn cancel(&self) {
        self.pending.cancel();
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        self.pending.cancel_token()
    }
}

impl fmt::Debug for ApplyHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ApplyHandle")
            .field("direction", &self.direction)
            .field("job_id", &self.pending.job_id())
            .finish()
    }
}

impl UndoInfo {
    pub fn apply_async(
        &self,
        operations: &FileOperations,
        direction: Direction,
    ) -> UndoResult<ApplyHandle> {
        self.apply_async_with(operations, direction, OpOptions::replay())
    }

    /// Starts reversing (or replaying) this record.
    ///
    /// Fails with [`UndoError::ApplyInFlight`] while an earlier apply of the
    /// same record has not been finished or dropped. Replays never record a
    /// new undo entry, whatever `options` says.
    pub fn apply_async_with(
        &self,
        operations: &FileOperations,
        direction: Direction,
        options: OpOptions,
    ) -> UndoResult<ApplyHandle> {
        let Some(guard) = InFlightGuard::acquire(&self.in_flight) else {
            return Err(UndoError::ApplyInFlight);
        };
        let options = OpOptions {
            record_undo: false,
            ..options
        };
        tracing::info!(
            op = self.op.label(),
            direction = direction.label(),
            items = self.item_count,
            "applying undo record"
        );
        let pending = match direction {
            Direction::Undo => self.undo_func(operations, &options),
            Direction::Redo => self.redo_func(operations, &options),
        };
        Ok(ApplyHandle {
            direction,
            pending,
            guard,
        })
    }

    /// Waits for an apply started by [`apply_async`](Self::apply_async) and
    /// folds what it learned back into the record.
    pub async fn apply_finish(&mut self, handle: ApplyHandle) -> UndoResult<ApplyOutcome> {
        if !Arc::ptr_eq(&handle.guard.0, &self.in_flight) {
            return Err(UndoError::HandleMismatch);
        }
        let ApplyHandle {
            direction,
            pending,
            guard,
        } = handle;

        let outcome = match pending.wait().await {
            Ok(report) if report.cancelled => ApplyOutcome {
                success: false,
                user_cancelled: true,
                skipped: report.skipped,
            },
            Ok(report) => {
                self.absorb(direction, &report);
                ApplyOutcome {
                    success: true,
                    user_cancelled: false,
                    skipped: report.skipped,
                }
            }
            Err(error) => {
                tracing::warn!(
                    op = self.op.label(),
                    direction = direction.label(),
                    "undo record could not be applied: {error}"
                );
                drop(guard);
                if error.code() == OpErrorCode::Aborted {
                    return Err(UndoError::Aborted);
                }
                return Err(UndoError::Operation(error));
            }
        };
        drop(guard);
        Ok(outcome)
    }

    fn undo_func(&self, operations: &FileOperations, options: &OpOptions) -> PendingOp {
        match &self.record {
            UndoRecord::Transfer(record) => match record.op {
                TransferOp::Move => operations.move_to(
                    record.destinations.clone(),
                    record.source_dir.clone(),
                    options,
                ),
                TransferOp::RestoreFromTrash => {
                    operations.trash(record.destinations.clone(), options)
                }
                TransferOp::Copy | TransferOp::Duplicate | TransferOp::CreateLink => {
                    let mut destinations = record.destinations.clone();
                    destinations.reverse();
                    operations.delete(destinations, options)
                }
            },
            UndoRecord::Create(record) => match &record.target {
                Some(target) => operations.delete(vec![target.clone()], options),
                None => PendingOp::failed(incomplete(self)),
            },
            UndoRecord::Rename(record) => match (&record.old, &record.new) {
                (Some(old), Some(new)) => operations.rename(new.clone(), &old.base_name(), options),
                _ => PendingOp::failed(incomplete(self)),
            },
            UndoRecord::Trash(record) => operations.restore_trashed(record.trashed.clone(), options),
            UndoRecord::RecPermissions(record) => {
                operations.restore_permissions(record.original_modes.clone(), options)
            }
            UndoRecord::Permissions(record) => {
                operations.set_permissions(record.target.clone(), record.current, options)
            }
            UndoRecord::Ownership(record) => {
                change_ownership(operations, record.field, &record.target, &record.original, options)
            }
        }
    }

    fn redo_func(&self, operations: &FileOperations, options: &OpOptions) -> PendingOp {
        match &self.record {
            UndoRecord::Transfer(record) => {
                let sources = record.sources.clone();
                let destination_dir = record.destination_dir.clone();
                match record.op {
                    TransferOp::Move => operations.move_to(sources, destination_dir, options),
                    TransferOp::Copy => operations.copy(sources, destination_dir, options),
                    TransferOp::Duplicate => operations.duplicate(sources, options),
                    TransferOp::CreateLink => operations.link(sources, destination_dir, options),
                    TransferOp::RestoreFromTrash => {
                        let items = sources
                            .into_iter()
                            .zip(record.destinations.iter().cloned())
                            .map(|(id, original)| TrashedItem {
                                id: id.into_path_buf(),
                                original,
                                deleted_at: 0,
                            })
                            .collect();
                        operations.restore_from_trash(items, options)
                    }
                }
            }
            UndoRecord::Create(record) => {
                let Some((parent, name)) = record
                    .target
                    .as_ref()
                    .and_then(|target| Some((target.parent()?, target.base_name())))
                else {
                    return PendingOp::failed(incomplete(self));
                };
                match record.op {
                    CreateOp::Folder => operations.new_folder(parent, &name, options),
                    CreateOp::EmptyFile => {
                        operations.new_file(parent, &name, record.template.clone(), options)
                    }
                    CreateOp::FromTemplate => match record.template.as_deref().and_then(Location::from_uri) {
                        Some(template) => {
                            operations.new_file_from_template(parent, &name, template, options)
                        }
                        None => PendingOp::failed(incomplete(self)),
                    },
                }
            }
            UndoRecord::Rename(record) => match (&record.old, &record.new) {
                (Some(old), Some(new)) => operations.rename(old.clone(), &new.base_name(), options),
                _ => PendingOp::failed(incomplete(self)),
            },
            UndoRecord::Trash(record) => {
                let mut files: Vec<Location> = record.trashed.keys().cloned().collect();
                files.sort();
                operations.trash(files, options)
            }
            UndoRecord::RecPermissions(record) => operations.set_permissions_recursive(
                record.directory.clone(),
                record.file_permissions,
                record.file_mask,
                record.dir_permissions,
                record.dir_mask,
                options,
            ),
            UndoRecord::Permissions(record) => {
                operations.set_permissions(record.target.clone(), record.new, options)
            }
            UndoRecord::Ownership(record) => {
                change_ownership(operations, record.field, &record.target, &record.new, options)
            }
        }
    }

    /// Rewrites the parts of the record that the replay changed.
    fn absorb(&mut self, direction: Direction, report: &OpReport) {
        match (&mut self.record, direction) {
            (UndoRecord::Transfer(record), Direction::Undo)
                if record.op == TransferOp::RestoreFromTrash =>
            {
                // Re-trashed items now live under new trash ids.
                if report.trashed.len() == record.destinations.len() {
                    record.sources = report
                        .trashed
                        .iter()
                        .map(|item| Location::new(&item.id))
                        .collect();
                }
            }
            (UndoRecord::Transfer(record), Direction::Redo)
                if matches!(
                    record.op,
                    TransferOp::Copy | TransferOp::Duplicate | TransferOp::CreateLink
                ) =>
            {
                if report.created.len() == record.sources.len() {
                    record.destinations = report.created.clone();
                }
            }
            (UndoRecord::Trash(record), Direction::Redo) => {
                record.trashed = report
                    .trashed
                    .iter()
                    .map(|item| (item.original.clone(), item.deleted_at))
                    .collect();
            }
            _ => {}
        }
    }
}

fn change_ownership(
    operations: &FileOperations,
    field: OwnershipField,
    target: &Location,
    value: &str,
    options: &OpOptions,
) -> PendingOp {
    match field {
        OwnershipField::Owner => operations.set_owner(target.clone(), value, options),
        OwnershipField::Group => operations.set_group(target.clone(), value, options),
    }
}

fn incomplete(info: &UndoInfo) -> OpError {
    OpError::invalid_input(format!(
        "{} record was never filled in by its operation",
        info.op.label()
    ))
}
