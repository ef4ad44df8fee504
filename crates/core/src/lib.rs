#![forbid(unsafe_code)]

pub mod error;
pub mod fs_ops;
pub mod jobs;
pub mod location;
pub mod operations;
pub mod progress;
pub mod scheduler;
pub mod settings;
pub mod settings_io;
pub mod trash;
pub mod undo;

use std::sync::Arc;

pub use error::{OpError, OpErrorCode, OpResult, QueueError, UndoError, UndoResult};
pub use jobs::{Job, JobContext, JobId, JobKind, JobQueue, JobSnapshot};
pub use location::Location;
pub use operations::{FileOperations, OpFailure, OpOptions, OpReport, PendingOp};
pub use progress::{JobStatus, Progress, ProgressId, ProgressSnapshot};
pub use scheduler::{RuntimeScheduler, Scheduler, ThreadScheduler};
pub use settings::{SchedulerKind, Settings};
pub use trash::{LocalTrash, TrashBackend, TrashedItem};
#[cfg(target_os = "linux")]
pub use trash::SystemTrash;
pub use undo::{
    ApplyHandle, ApplyOutcome, Direction, UndoInfo, UndoManager, UndoOp, UndoRecord, UndoState,
    UndoStrings,
};

/// Builds the scheduler named by `kind`.
///
/// `Runtime` needs to be called from inside a tokio runtime; outside one it
/// falls back to threads.
pub fn scheduler_for(kind: SchedulerKind) -> Arc<dyn Scheduler> {
    match kind {
        SchedulerKind::Thread => Arc::new(ThreadScheduler::default()),
        SchedulerKind::Runtime => match RuntimeScheduler::current() {
            Some(scheduler) => Arc::new(scheduler),
            None => {
                tracing::warn!("no tokio runtime for the job scheduler; using threads");
                Arc::new(ThreadScheduler::default())
            }
        },
    }
}

/// Picks the trash backend for `settings`: an explicit directory first, then
/// the desktop trash if asked for, else the home trash.
pub fn trash_for(settings: &Settings) -> Option<Arc<dyn TrashBackend>> {
    if let Some(root) = settings.trash_dir.as_ref() {
        return Some(Arc::new(LocalTrash::new(root.clone())));
    }
    if settings.system_trash {
        #[cfg(target_os = "linux")]
        {
            return Some(Arc::new(SystemTrash));
        }
        #[cfg(not(target_os = "linux"))]
        {
            tracing::warn!("system trash is only available on Linux; using the home trash");
        }
    }
    LocalTrash::home().map(|trash| Arc::new(trash) as Arc<dyn TrashBackend>)
}
