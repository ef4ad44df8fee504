use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::error::{OpError, OpResult};
use crate::fs_ops;
use crate::jobs::{Job, JobContext, JobId, JobKind, JobQueue};
use crate::location::Location;
use crate::progress::{JobStatus, Progress};
use crate::trash::{TrashBackend, TrashedItem};
use crate::undo::{CreateOp, OwnershipField, TransferOp, UndoInfo};

#[derive(Clone, Debug)]
pub struct OpOptions {
    pub skip_queue: bool,
    /// Build an undo record while the operation runs.
    pub record_undo: bool,
    pub cancel: CancellationToken,
}

impl Default for OpOptions {
    fn default() -> Self {
        Self {
            skip_queue: false,
            record_undo: true,
            cancel: CancellationToken::new(),
        }
    }
}

impl OpOptions {
    /// Options for replaying an existing record: nothing new gets recorded.
    pub fn replay() -> Self {
        Self {
            record_undo: false,
            ..Self::default()
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_skip_queue(mut self, skip_queue: bool) -> Self {
        self.skip_queue = skip_queue;
        self
    }
}

/// What a finished operation did.
#[derive(Debug, Default)]
pub struct OpReport {
    pub cancelled: bool,
    pub created: Vec<Location>,
    pub trashed: Vec<TrashedItem>,
    /// Items that were asked for but could not be acted on.
    pub skipped: usize,
    pub undo_info: Option<UndoInfo>,
}

impl OpReport {
    fn check_cancelled(&mut self, context: &JobContext) -> bool {
        if context.is_cancelled() {
            self.cancelled = true;
        }
        self.cancelled
    }

    fn record(&mut self, populate: impl FnOnce(&mut UndoInfo)) {
        if let Some(info) = self.undo_info.as_mut() {
            populate(info);
        }
    }
}

/// A failed operation along with whatever it finished before failing.
///
/// `partial.undo_info` is only set when at least one item was acted on, and
/// then describes just those items.
#[derive(Debug)]
pub struct OpFailure {
    pub error: OpError,
    pub partial: OpReport,
}

impl From<OpError> for OpFailure {
    fn from(error: OpError) -> Self {
        Self {
            error,
            partial: OpReport::default(),
        }
    }
}

/// Completion handle of an enqueued operation.
#[derive(Debug)]
pub struct PendingOp {
    job_id: Option<JobId>,
    progress: Progress,
    cancel: CancellationToken,
    rx: oneshot::Receiver<Result<OpReport, OpFailure>>,
}

impl PendingOp {
    pub(crate) fn failed(error: OpError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(OpFailure::from(error)));
        let progress = Progress::new();
        progress.finish(JobStatus::Failed);
        Self {
            job_id: None,
            progress,
            cancel: CancellationToken::new(),
            rx,
        }
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.job_id
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn wait(self) -> OpResult<OpReport> {
        self.wait_report().await.map_err(|failure| failure.error)
    }

    /// Like [`wait`](Self::wait), but a failure keeps the partial report.
    pub async fn wait_report(self) -> Result<OpReport, OpFailure> {
        self.rx.await.unwrap_or_else(|_| {
            Err(OpFailure::from(OpError::aborted(
                "operation ended without reporting a result",
            )))
        })
    }
}

/// Entry points of every file operation.
///
/// Each call enqueues one job and returns at once; the [`PendingOp`] resolves
/// when the job is done. When `record_undo` is set the report carries the
/// filled-in undo record.
#[derive(Clone)]
pub struct FileOperations {
    queue: JobQueue,
    trash: Arc<dyn TrashBackend>,
}

impl fmt::Debug for FileOperations {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FileOperations")
            .field("queue", &self.queue)
            .field("trash", &self.trash)
            .finish()
    }
}

type TargetFn = fn(&Path, &Path) -> io::Result<PathBuf>;
type TransferFn = fn(&Path, &Path, &CancellationToken) -> io::Result<u64>;

impl FileOperations {
    pub fn new(queue: JobQueue, trash: Arc<dyn TrashBackend>) -> Self {
        Self { queue, trash }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn trash_backend(&self) -> &Arc<dyn TrashBackend> {
        &self.trash
    }

    pub fn copy(
        &self,
        sources: Vec<Location>,
        destination_dir: Location,
        options: &OpOptions,
    ) -> PendingOp {
        self.transfer(
            TransferOp::Copy,
            sources,
            destination_dir,
            options,
            fs_ops::destination_path,
            fs_ops::copy_path,
        )
    }

    pub fn move_to(
        &self,
        sources: Vec<Location>,
        destination_dir: Location,
        options: &OpOptions,
    ) -> PendingOp {
        self.transfer(
            TransferOp::Move,
            sources,
            destination_dir,
            options,
            fs_ops::destination_path,
            |source, destination, _| fs_ops::move_path(source, destination).map(|()| 0),
        )
    }

    /// Copies each source next to itself under a free "(copy)" name.
    pub fn duplicate(&self, sources: Vec<Location>, options: &OpOptions) -> PendingOp {
        let destination_dir = parent_of(&sources);
        self.transfer(
            TransferOp::Duplicate,
            sources,
            destination_dir,
            options,
            |source, _| fs_ops::duplicate_path(source),
            fs_ops::copy_path,
        )
    }

    pub fn link(
        &self,
        sources: Vec<Location>,
        destination_dir: Location,
        options: &OpOptions,
    ) -> PendingOp {
        self.transfer(
            TransferOp::CreateLink,
            sources,
            destination_dir,
            options,
            fs_ops::link_path,
            |source, destination, _| fs_ops::make_symlink(source, destination).map(|()| 0),
        )
    }

    fn transfer(
        &self,
        op: TransferOp,
        sources: Vec<Location>,
        destination_dir: Location,
        options: &OpOptions,
        target: TargetFn,
        act: TransferFn,
    ) -> PendingOp {
        let kind = match op {
            TransferOp::Move => JobKind::Move,
            TransferOp::Copy => JobKind::Copy,
            TransferOp::Duplicate => JobKind::Duplicate,
            TransferOp::CreateLink => JobKind::Link,
            TransferOp::RestoreFromTrash => JobKind::RestoreFromTrash,
        };
        let info = options.record_undo.then(|| {
            UndoInfo::transfer(
                op,
                sources.len(),
                parent_of(&sources),
                destination_dir.clone(),
            )
        });
        let summary = format!(
            "{} {} item(s) -> {destination_dir}",
            kind.label(),
            sources.len()
        );

        self.submit(kind, summary, options, info, move |context, report| {
            context.progress().set_totals(sources.len() as u64, 0);
            for source in sources {
                if report.check_cancelled(context) {
                    return Ok(());
                }
                let destination = target(source.path(), destination_dir.path())
                    .map(Location::new)
                    .map_err(|error| {
                        OpError::from_io(format!("failed to {} {source}", kind.label()), &error)
                    })?;
                match act(source.path(), destination.path(), context.cancel_token()) {
                    Ok(bytes) => {
                        context.progress().advance(1, bytes, Some(destination.path().into()));
                    }
                    Err(error)
                        if error.kind() == io::ErrorKind::Interrupted && context.is_cancelled() =>
                    {
                        // Partial output is recorded so undoing it cleans up.
                        report.cancelled = true;
                        if destination.exists() {
                            report.created.push(destination.clone());
                            report.record(|info| info.add_origin_target_pair(source, destination));
                        }
                        return Ok(());
                    }
                    Err(error) => {
                        return Err(OpError::from_io(
                            format!("failed to {} {source} -> {destination}", kind.label()),
                            &error,
                        ));
                    }
                }
                report.created.push(destination.clone());
                report.record(|info| info.add_origin_target_pair(source, destination));
            }
            Ok(())
        })
    }

    /// Puts trash entries back where they were deleted from.
    pub fn restore_from_trash(&self, items: Vec<TrashedItem>, options: &OpOptions) -> PendingOp {
        let info = options.record_undo.then(|| {
            let ids: Vec<Location> = items.iter().map(|item| Location::new(&item.id)).collect();
            let originals: Vec<Location> = items.iter().map(|item| item.original.clone()).collect();
            UndoInfo::transfer(
                TransferOp::RestoreFromTrash,
                items.len(),
                parent_of(&ids),
                parent_of(&originals),
            )
        });
        let summary = format!("restore {} item(s) from trash", items.len());
        let trash = Arc::clone(&self.trash);

        self.submit(JobKind::RestoreFromTrash, summary, options, info, move |context, report| {
            context.progress().set_totals(items.len() as u64, 0);
            for item in items {
                if report.check_cancelled(context) {
                    return Ok(());
                }
                trash.restore(&item, item.original.path()).map_err(|error| {
                    OpError::from_trash(format!("failed to restore {}", item.original), &error)
                })?;
                context
                    .progress()
                    .advance(1, 0, Some(item.original.path().into()));
                report.created.push(item.original.clone());
                report.record(|info| {
                    info.add_origin_target_pair(Location::new(&item.id), item.original)
                });
            }
            Ok(())
        })
    }

    pub fn trash(&self, files: Vec<Location>, options: &OpOptions) -> PendingOp {
        let info = options.record_undo.then(|| UndoInfo::trash(files.len()));
        let summary = format!("trash {} item(s)", files.len());
        let trash = Arc::clone(&self.trash);

        self.submit(JobKind::Trash, summary, options, info, move |context, report| {
            context.progress().set_totals(files.len() as u64, 0);
            for file in files {
                if report.check_cancelled(context) {
                    return Ok(());
                }
                let item = trash.trash(file.path()).map_err(|error| {
                    OpError::from_trash(format!("failed to trash {file}"), &error)
                })?;
                context.progress().advance(1, 0, Some(file.path().into()));
                report.record(|info| info.trash_add_file(file, item.deleted_at));
                report.trashed.push(item);
            }
            Ok(())
        })
    }

    /// Restores every trash entry whose original location and deletion time
    /// both match `trashed`.
    ///
    /// The trash can hold several entries that came from the same path; the
    /// deletion time tells them apart. Originals with no matching entry are
    /// counted in [`OpReport::skipped`].
    pub fn restore_trashed(
        &self,
        trashed: HashMap<Location, i64>,
        options: &OpOptions,
    ) -> PendingOp {
        let summary = format!("restore {} trashed item(s)", trashed.len());
        let trash = Arc::clone(&self.trash);

        self.submit(JobKind::RestoreFromTrash, summary, options, None, move |context, report| {
            let entries = trash
                .list()
                .map_err(|error| OpError::from_trash("failed to list trash", &error))?;
            context.progress().set_totals(trashed.len() as u64, 0);

            let mut restored = HashSet::new();
            for entry in entries {
                if report.check_cancelled(context) {
                    return Ok(());
                }
                let matches = trashed.get(&entry.original) == Some(&entry.deleted_at);
                if !matches || restored.contains(&entry.original) {
                    continue;
                }
                trash
                    .restore(&entry, entry.original.path())
                    .map_err(|error| {
                        OpError::from_trash(format!("failed to restore {}", entry.original), &error)
                    })?;
                context
                    .progress()
                    .advance(1, 0, Some(entry.original.path().into()));
                report.created.push(entry.original.clone());
                restored.insert(entry.original);
            }

            for original in trashed.keys().filter(|key| !restored.contains(*key)) {
                tracing::warn!(
                    op = "restore-trashed",
                    original = %original,
                    "no trash entry matches the recorded deletion time"
                );
                report.skipped += 1;
            }
            Ok(())
        })
    }

    /// Permanently removes `files`, in the given order.
    pub fn delete(&self, files: Vec<Location>, options: &OpOptions) -> PendingOp {
        let summary = format!("delete {} item(s)", files.len());
        self.submit(JobKind::Delete, summary, options, None, move |context, report| {
            context.progress().set_totals(files.len() as u64, 0);
            for file in files {
                if report.check_cancelled(context) {
                    return Ok(());
                }
                fs_ops::remove_path(file.path()).map_err(|error| {
                    OpError::from_io(format!("failed to delete {file}"), &error)
                })?;
                context.progress().advance(1, 0, Some(file.path().into()));
            }
            Ok(())
        })
    }

    pub fn new_folder(&self, parent: Location, name: &str, options: &OpOptions) -> PendingOp {
        self.create(CreateOp::Folder, parent, name, None, options)
    }

    pub fn new_file(
        &self,
        parent: Location,
        name: &str,
        initial_contents: Option<String>,
        options: &OpOptions,
    ) -> PendingOp {
        self.create(CreateOp::EmptyFile, parent, name, initial_contents, options)
    }

    pub fn new_file_from_template(
        &self,
        parent: Location,
        name: &str,
        template: Location,
        options: &OpOptions,
    ) -> PendingOp {
        self.create(
            CreateOp::FromTemplate,
            parent,
            name,
            Some(template.uri()),
            options,
        )
    }

    fn create(
        &self,
        op: CreateOp,
        parent: Location,
        name: &str,
        template: Option<String>,
        options: &OpOptions,
    ) -> PendingOp {
        if let Err(error) = validate_name(name) {
            return PendingOp::failed(error);
        }
        let target = parent.join(name);
        let kind = match op {
            CreateOp::Folder => JobKind::CreateFolder,
            CreateOp::EmptyFile | CreateOp::FromTemplate => JobKind::CreateFile,
        };
        let info = options.record_undo.then(|| UndoInfo::create(op));
        let summary = format!("{} {target}", kind.label());

        self.submit(kind, summary, options, info, move |context, report| {
            if report.check_cancelled(context) {
                return Ok(());
            }
            let length = match (op, &template) {
                (CreateOp::Folder, _) => fs_ops::create_dir(target.path()).map(|()| 0),
                (CreateOp::EmptyFile, contents) => {
                    let bytes = contents.as_deref().unwrap_or_default().as_bytes();
                    fs_ops::create_file(target.path(), bytes).map(|()| bytes.len())
                }
                (CreateOp::FromTemplate, Some(uri)) => match Location::from_uri(uri) {
                    Some(source) => fs_ops::copy_template(source.path(), target.path()).map(|()| 0),
                    None => {
                        return Err(OpError::invalid_input(format!(
                            "template is not a local file: {uri}"
                        )));
                    }
                },
                (CreateOp::FromTemplate, None) => {
                    return Err(OpError::invalid_input("missing template"));
                }
            }
            .map_err(|error| OpError::from_io(format!("failed to create {target}"), &error))?;

            context.progress().advance(1, length as u64, Some(target.path().into()));
            report.created.push(target.clone());
            report.record(|info| info.create_set_data(target, template, length));
            Ok(())
        })
    }

    /// Renames `file` to `new_name` inside its own directory.
    pub fn rename(&self, file: Location, new_name: &str, options: &OpOptions) -> PendingOp {
        if let Err(error) = validate_name(new_name) {
            return PendingOp::failed(error);
        }
        let Some(parent) = file.parent() else {
            return PendingOp::failed(OpError::invalid_input(format!(
                "cannot rename {file}: it has no parent directory"
            )));
        };
        let target = parent.join(new_name);
        let info = options.record_undo.then(UndoInfo::rename);
        let summary = format!("rename {file} -> {new_name}");

        self.submit(JobKind::Rename, summary, options, info, move |context, report| {
            if report.check_cancelled(context) {
                return Ok(());
            }
            if target != file {
                fs_ops::ensure_absent(target.path())
                    .and_then(|()| std::fs::rename(file.path(), target.path()))
                    .map_err(|error| {
                        OpError::from_io(format!("failed to rename {file} -> {target}"), &error)
                    })?;
            }
            context.progress().advance(1, 0, Some(target.path().into()));
            report.created.push(target.clone());
            report.record(|info| info.rename_set_data(file, target));
            Ok(())
        })
    }

    pub fn set_permissions(&self, file: Location, mode: u32, options: &OpOptions) -> PendingOp {
        let record_undo = options.record_undo;
        let summary = format!("chmod {mode:o} {file}");

        self.submit(JobKind::SetPermissions, summary, options, None, move |context, report| {
            if report.check_cancelled(context) {
                return Ok(());
            }
            let current = fs_ops::unix_mode(file.path()).map_err(|error| {
                OpError::from_io(format!("failed to read permissions of {file}"), &error)
            })?;
            fs_ops::set_unix_mode(file.path(), mode).map_err(|error| {
                OpError::from_io(format!("failed to set permissions of {file}"), &error)
            })?;
            context.progress().advance(1, 0, Some(file.path().into()));
            if record_undo {
                report.undo_info = Some(UndoInfo::permissions(file, current, mode));
            }
            Ok(())
        })
    }

    /// Applies `file_permissions` under `file_mask` to every file below
    /// `directory`, and the dir pair to every directory including itself.
    ///
    /// A directory is changed only after its contents, so new modes without
    /// search permission do not cut the walk short.
    pub fn set_permissions_recursive(
        &self,
        directory: Location,
        file_permissions: u32,
        file_mask: u32,
        dir_permissions: u32,
        dir_mask: u32,
        options: &OpOptions,
    ) -> PendingOp {
        let info = options.record_undo.then(|| {
            UndoInfo::rec_permissions(
                directory.clone(),
                file_permissions,
                file_mask,
                dir_permissions,
                dir_mask,
            )
        });
        let summary = format!("chmod -R {directory}");

        self.submit(
            JobKind::SetPermissionsRecursive,
            summary,
            options,
            info,
            move |context, report| {
                let walk = WalkDir::new(directory.path())
                    .follow_links(false)
                    .contents_first(true);
                for entry in walk {
                    if report.check_cancelled(context) {
                        return Ok(());
                    }
                    let entry = entry.map_err(|error| {
                        let error = io::Error::from(error);
                        OpError::from_io(format!("failed to walk {directory}"), &error)
                    })?;
                    let file_type = entry.file_type();
                    if file_type.is_symlink() {
                        continue;
                    }
                    let path = entry.path();
                    let current = fs_ops::unix_mode(path).map_err(|error| {
                        OpError::from_io(
                            format!("failed to read permissions of {}", path.display()),
                            &error,
                        )
                    })?;
                    let new_mode = if file_type.is_dir() {
                        fs_ops::masked_mode(current, dir_permissions, dir_mask)
                    } else {
                        fs_ops::masked_mode(current, file_permissions, file_mask)
                    };
                    report.record(|info| info.rec_permissions_add_file(Location::new(path), current));
                    if new_mode != current {
                        fs_ops::set_unix_mode(path, new_mode).map_err(|error| {
                            OpError::from_io(
                                format!("failed to set permissions of {}", path.display()),
                                &error,
                            )
                        })?;
                    }
                    context.progress().advance(1, 0, Some(path.to_path_buf()));
                }
                Ok(())
            },
        )
    }

    /// Sets recorded modes back directly, one file at a time, parents before
    /// their children.
    ///
    /// Files that can no longer be changed are counted in
    /// [`OpReport::skipped`] instead of failing the whole restore.
    pub fn restore_permissions(
        &self,
        original_modes: HashMap<Location, u32>,
        options: &OpOptions,
    ) -> PendingOp {
        let summary = format!("restore permissions of {} item(s)", original_modes.len());
        self.submit(
            JobKind::SetPermissionsRecursive,
            summary,
            options,
            None,
            move |context, report| {
                context
                    .progress()
                    .set_totals(original_modes.len() as u64, 0);
                let mut ordered: Vec<(Location, u32)> = original_modes.into_iter().collect();
                ordered.sort_by(|(left, _), (right, _)| {
                    let depth = |location: &Location| location.path().components().count();
                    depth(left).cmp(&depth(right)).then_with(|| left.cmp(right))
                });
                for (file, mode) in ordered {
                    if report.check_cancelled(context) {
                        return Ok(());
                    }
                    if let Err(error) = fs_ops::set_unix_mode(file.path(), mode) {
                        tracing::warn!(file = %file, "failed to restore permissions: {error}");
                        report.skipped += 1;
                        continue;
                    }
                    context.progress().advance(1, 0, Some(file.path().into()));
                }
                Ok(())
            },
        )
    }

    pub fn set_owner(&self, file: Location, owner: &str, options: &OpOptions) -> PendingOp {
        self.change_ownership(OwnershipField::Owner, file, owner.to_string(), options)
    }

    pub fn set_group(&self, file: Location, group: &str, options: &OpOptions) -> PendingOp {
        self.change_ownership(OwnershipField::Group, file, group.to_string(), options)
    }

    fn change_ownership(
        &self,
        field: OwnershipField,
        file: Location,
        value: String,
        options: &OpOptions,
    ) -> PendingOp {
        let (kind, read, write): (JobKind, fn(&Path) -> io::Result<String>, fn(&Path, &str) -> io::Result<()>) =
            match field {
                OwnershipField::Owner => (JobKind::ChangeOwner, fs_ops::owner_name, fs_ops::set_owner),
                OwnershipField::Group => (JobKind::ChangeGroup, fs_ops::group_name, fs_ops::set_group),
            };
        let record_undo = options.record_undo;
        let summary = format!("{} {value} {file}", kind.label());

        self.submit(kind, summary, options, None, move |context, report| {
            if report.check_cancelled(context) {
                return Ok(());
            }
            let original = read(file.path()).map_err(|error| {
                OpError::from_io(format!("failed to read ownership of {file}"), &error)
            })?;
            write(file.path(), &value).map_err(|error| {
                OpError::from_io(format!("failed to change ownership of {file}"), &error)
            })?;
            context.progress().advance(1, 0, Some(file.path().into()));
            if record_undo {
                report.undo_info = Some(UndoInfo::ownership(field, file, original, value));
            }
            Ok(())
        })
    }

    fn submit<F>(
        &self,
        kind: JobKind,
        summary: String,
        options: &OpOptions,
        undo_info: Option<UndoInfo>,
        body: F,
    ) -> PendingOp
    where
        F: FnOnce(&JobContext, &mut OpReport) -> OpResult<()> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job = Job::new(kind, summary, move |context| {
            let mut report = OpReport {
                undo_info,
                ..OpReport::default()
            };
            let outcome = match body(context, &mut report) {
                Ok(()) => Ok(report),
                Err(error) => {
                    report.undo_info = report
                        .undo_info
                        .take()
                        .filter(|info| !info.is_empty())
                        .map(UndoInfo::settle_partial);
                    Err(OpFailure {
                        error,
                        partial: report,
                    })
                }
            };
            let status = match &outcome {
                Ok(report) if report.cancelled => JobStatus::Cancelled,
                Ok(_) => JobStatus::Succeeded,
                Err(_) => JobStatus::Failed,
            };
            match &outcome {
                Ok(report) => tracing::info!(
                    op = kind.label(),
                    job_id = %context.id(),
                    outcome = status.label(),
                    created = report.created.len(),
                    skipped = report.skipped,
                    "operation finished"
                ),
                Err(failure) => tracing::warn!(
                    op = kind.label(),
                    job_id = %context.id(),
                    code = failure.error.code().as_str(),
                    created = failure.partial.created.len(),
                    "operation failed: {}",
                    failure.error
                ),
            }
            let _ = tx.send(outcome);
            status
        })
        .with_cancel_token(options.cancel.clone());

        let progress = job.progress().clone();
        let job_id = match self.queue.enqueue(job, options.skip_queue) {
            Ok(job_id) => Some(job_id),
            Err(error) => {
                tracing::warn!(op = kind.label(), "operation was not queued: {error}");
                None
            }
        };
        PendingOp {
            job_id,
            progress,
            cancel: options.cancel.clone(),
            rx,
        }
    }
}

fn parent_of(items: &[Location]) -> Location {
    items
        .first()
        .and_then(Location::parent)
        .unwrap_or_else(|| Location::new("/"))
}

fn validate_name(name: &str) -> OpResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(OpError::invalid_input(format!("invalid file name: {name:?}")));
    }
    Ok(())
}
