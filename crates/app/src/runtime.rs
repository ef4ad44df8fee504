use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use fileq_core::{
    Direction, FileOperations, JobQueue, Location, OpFailure, OpOptions, OpReport, PendingOp, Settings,
    TrashBackend, TrashedItem, UndoManager, UndoState, scheduler_for, trash_for,
};
use tokio::task::JoinSet;

use crate::commands::{Command, CommandLine, HELP};

type Finished = (String, Result<OpReport, OpFailure>);

/// Shell state: the operation front end, the undo history and whatever
/// operations were sent to the background.
///
/// Must be driven from inside a tokio runtime.
pub(crate) struct Session {
    operations: FileOperations,
    history: UndoManager,
    record_undo: bool,
    cwd: PathBuf,
    background: JoinSet<Finished>,
}

impl Session {
    pub(crate) fn new(settings: &Settings) -> Result<Self> {
        let queue = JobQueue::new(scheduler_for(settings.scheduler));
        let trash = trash_for(settings)
            .ok_or_else(|| anyhow!("no trash directory available; set HOME or --trash-dir"))?;
        let cwd = std::env::current_dir().context("failed to resolve current directory")?;
        Ok(Self::with_parts(
            FileOperations::new(queue, trash),
            settings,
            cwd,
        ))
    }

    pub(crate) fn with_parts(operations: FileOperations, settings: &Settings, cwd: PathBuf) -> Self {
        Self {
            operations,
            history: UndoManager::new(settings.history_depth),
            record_undo: settings.record_undo,
            cwd,
            background: JoinSet::new(),
        }
    }

    fn resolve(&self, path: &Path) -> Location {
        Location::new(self.cwd.join(path))
    }

    fn resolve_all(&self, paths: &[PathBuf]) -> Vec<Location> {
        paths.iter().map(|path| self.resolve(path)).collect()
    }

    fn options(&self) -> OpOptions {
        OpOptions {
            record_undo: self.record_undo,
            ..OpOptions::default()
        }
    }

    /// Runs one shell line and returns what to print.
    pub(crate) async fn execute(&mut self, line: CommandLine) -> Result<String> {
        let CommandLine {
            command,
            background,
        } = line;
        let label = describe(&command);

        let pending = match command {
            Command::Undo => return self.apply_history(true).await,
            Command::Redo => return self.apply_history(false).await,
            Command::History => return Ok(self.render_history()),
            Command::Jobs => return Ok(self.render_jobs()),
            Command::Cancel => {
                let cancelled = self.operations.queue().cancel_all();
                return Ok(format!("cancelled {cancelled} job(s)"));
            }
            Command::Wait => return Ok(self.wait_background().await.join("\n")),
            Command::TrashList => return self.render_trash(),
            Command::Help => return Ok(HELP.to_string()),
            Command::Quit => return Ok(String::new()),
            command => self.start(command)?,
        };

        if background {
            let job = pending
                .job_id()
                .map(|id| id.to_string())
                .unwrap_or_else(|| String::from("-"));
            self.background
                .spawn(async move { (label, pending.wait_report().await) });
            return Ok(format!("[{job}] started in background"));
        }
        let result = pending.wait_report().await;
        Ok(self.finish(label, result))
    }

    fn start(&self, command: Command) -> Result<PendingOp> {
        let options = self.options();
        let ops = &self.operations;
        let pending = match command {
            Command::Copy {
                sources,
                destination,
            } => ops.copy(
                self.resolve_all(&sources),
                self.resolve(&destination),
                &options,
            ),
            Command::Move {
                sources,
                destination,
            } => ops.move_to(
                self.resolve_all(&sources),
                self.resolve(&destination),
                &options,
            ),
            Command::Duplicate { sources } => ops.duplicate(self.resolve_all(&sources), &options),
            Command::Link {
                sources,
                destination,
            } => ops.link(
                self.resolve_all(&sources),
                self.resolve(&destination),
                &options,
            ),
            Command::Trash { files } => ops.trash(self.resolve_all(&files), &options),
            Command::Restore { originals } => {
                let items = self.newest_trash_entries(&originals)?;
                ops.restore_from_trash(items, &options)
            }
            Command::Mkdir { path } => {
                let (parent, name) = split(&self.resolve(&path))?;
                ops.new_folder(parent, &name, &options)
            }
            Command::Touch { path, contents } => {
                let (parent, name) = split(&self.resolve(&path))?;
                ops.new_file(parent, &name, contents, &options)
            }
            Command::Template { template, path } => {
                let (parent, name) = split(&self.resolve(&path))?;
                ops.new_file_from_template(parent, &name, self.resolve(&template), &options)
            }
            Command::Rename { path, new_name } => ops.rename(self.resolve(&path), &new_name, &options),
            Command::Chmod { mode, path } => ops.set_permissions(self.resolve(&path), mode, &options),
            Command::ChmodRecursive {
                file_mode,
                file_mask,
                dir_mode,
                dir_mask,
                path,
            } => ops.set_permissions_recursive(
                self.resolve(&path),
                file_mode,
                file_mask,
                dir_mode,
                dir_mask,
                &options,
            ),
            Command::Chown { owner, path } => ops.set_owner(self.resolve(&path), &owner, &options),
            Command::Chgrp { group, path } => ops.set_group(self.resolve(&path), &group, &options),
            other => return Err(anyhow!("`{}` is not a file operation", describe(&other))),
        };
        Ok(pending)
    }

    fn newest_trash_entries(&self, originals: &[PathBuf]) -> Result<Vec<TrashedItem>> {
        let entries = self
            .operations
            .trash_backend()
            .list()
            .context("failed to list trash")?;
        originals
            .iter()
            .map(|path| {
                let original = self.resolve(path);
                entries
                    .iter()
                    .filter(|entry| entry.original == original)
                    .max_by_key(|entry| entry.deleted_at)
                    .cloned()
                    .ok_or_else(|| anyhow!("{original} is not in the trash"))
            })
            .collect()
    }

    fn finish(&mut self, label: String, result: Result<OpReport, OpFailure>) -> String {
        match result {
            Ok(report) => {
                let cancelled = report.cancelled;
                let created = report.created.len();
                let skipped = report.skipped;
                if let Some(info) = report.undo_info {
                    self.history.set_action(info);
                }
                if cancelled {
                    format!("{label}: cancelled")
                } else if skipped > 0 {
                    format!("{label}: done, {created} item(s), {skipped} skipped")
                } else {
                    format!("{label}: done, {created} item(s)")
                }
            }
            Err(OpFailure { error, partial }) => match partial.undo_info {
                Some(info) => {
                    let done = info.item_count();
                    self.history.set_action(info);
                    format!("{label}: failed after {done} item(s), which can be undone: {error}")
                }
                None => format!("{label}: failed: {error}"),
            },
        }
    }

    /// Collects background operations that have finished since the last call.
    pub(crate) fn drain_finished(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(joined) = self.background.try_join_next() {
            match joined {
                Ok((label, result)) => lines.push(self.finish(label, result)),
                Err(error) => tracing::warn!("background operation task failed: {error}"),
            }
        }
        lines
    }

    pub(crate) async fn wait_background(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(joined) = self.background.join_next().await {
            match joined {
                Ok((label, result)) => lines.push(self.finish(label, result)),
                Err(error) => tracing::warn!("background operation task failed: {error}"),
            }
        }
        lines
    }

    async fn apply_history(&mut self, undo: bool) -> Result<String> {
        if !self.background.is_empty() {
            let mut lines = self.wait_background().await;
            lines.push(self.apply_history_now(undo).await?);
            return Ok(lines.join("\n"));
        }
        self.apply_history_now(undo).await
    }

    async fn apply_history_now(&mut self, undo: bool) -> Result<String> {
        let direction = if undo {
            Direction::Undo
        } else {
            Direction::Redo
        };
        let action = self
            .history
            .peek(direction)
            .map(|info| {
                let strings = info.get_strings();
                match direction {
                    Direction::Undo => strings.undo_description,
                    Direction::Redo => strings.redo_description,
                }
            })
            .unwrap_or_default();
        let outcome = match direction {
            Direction::Undo => self.history.undo(&self.operations).await?,
            Direction::Redo => self.history.redo(&self.operations).await?,
        };
        let verb = if undo { "undo" } else { "redo" };
        Ok(if outcome.user_cancelled {
            format!("{verb} cancelled: {action}")
        } else if outcome.skipped > 0 {
            format!("{verb}: {action} ({} item(s) skipped)", outcome.skipped)
        } else {
            format!("{verb}: {action}")
        })
    }

    fn render_history(&self) -> String {
        let Some(strings) = self.history.strings() else {
            return String::from("nothing to undo");
        };
        match self.history.state() {
            UndoState::Undo => format!(
                "{}: {}",
                strip_mnemonic(&strings.undo_label),
                strings.undo_description
            ),
            UndoState::Redo => format!(
                "{}: {}",
                strip_mnemonic(&strings.redo_label),
                strings.redo_description
            ),
            UndoState::None => String::from("nothing to undo"),
        }
    }

    fn render_jobs(&self) -> String {
        let queue = self.operations.queue();
        let mut jobs = queue.list_running();
        jobs.extend(queue.list_all());
        if jobs.is_empty() {
            return String::from("no jobs");
        }
        jobs.iter()
            .map(|job| {
                let snapshot = job.progress.snapshot();
                format!(
                    "[{}] {:<10} {:>3}% {} {}",
                    job.id,
                    job.progress.status().label(),
                    snapshot.percent(),
                    job.kind.label(),
                    job.summary
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render_trash(&self) -> Result<String> {
        let mut entries = self
            .operations
            .trash_backend()
            .list()
            .context("failed to list trash")?;
        if entries.is_empty() {
            return Ok(String::from("trash is empty"));
        }
        entries.sort_by(|left, right| {
            left.original
                .cmp(&right.original)
                .then(left.deleted_at.cmp(&right.deleted_at))
        });
        Ok(entries
            .iter()
            .map(|entry| format!("{} {}", entry.deleted_at, entry.original))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

fn split(location: &Location) -> Result<(Location, String)> {
    let parent = location
        .parent()
        .ok_or_else(|| anyhow!("{location} has no parent directory"))?;
    Ok((parent, location.base_name()))
}

fn strip_mnemonic(label: &str) -> String {
    label.replacen('_', "", 1)
}

fn describe(command: &Command) -> String {
    let name = match command {
        Command::Copy { .. } => "copy",
        Command::Move { .. } => "move",
        Command::Duplicate { .. } => "duplicate",
        Command::Link { .. } => "link",
        Command::Trash { .. } => "trash",
        Command::TrashList => "trash-list",
        Command::Restore { .. } => "restore",
        Command::Mkdir { .. } => "mkdir",
        Command::Touch { .. } => "touch",
        Command::Template { .. } => "template",
        Command::Rename { .. } => "rename",
        Command::Chmod { .. } => "chmod",
        Command::ChmodRecursive { .. } => "chmod-r",
        Command::Chown { .. } => "chown",
        Command::Chgrp { .. } => "chgrp",
        Command::Undo => "undo",
        Command::Redo => "redo",
        Command::History => "history",
        Command::Jobs => "jobs",
        Command::Cancel => "cancel",
        Command::Wait => "wait",
        Command::Help => "help",
        Command::Quit => "quit",
    };
    name.to_string()
}
