use std::path::PathBuf;

use crate::undo::DEFAULT_HISTORY_DEPTH;

/// Where queued job bodies run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SchedulerKind {
    /// One named OS thread per job.
    #[default]
    Thread,
    /// The tokio blocking pool of the running runtime.
    Runtime,
}

impl SchedulerKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Thread => "thread",
            Self::Runtime => "runtime",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "thread" | "threads" => Some(Self::Thread),
            "runtime" | "tokio" | "blocking" => Some(Self::Runtime),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Settings {
    pub history_depth: usize,
    /// Overrides the freedesktop home trash when set.
    pub trash_dir: Option<PathBuf>,
    /// Use the desktop trash (Linux only) instead of the built-in one.
    pub system_trash: bool,
    pub scheduler: SchedulerKind,
    pub record_undo: bool,
    /// Runtime worker threads; `None` lets tokio decide.
    pub worker_threads: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            history_depth: DEFAULT_HISTORY_DEPTH,
            trash_dir: None,
            system_trash: false,
            scheduler: SchedulerKind::default(),
            record_undo: true,
            worker_threads: None,
        }
    }
}
