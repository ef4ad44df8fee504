use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static NEXT_PROGRESS_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ProgressId(pub u64);

impl fmt::Display for ProgressId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProgressSnapshot {
    pub items_done: u64,
    pub items_total: u64,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub current_path: Option<PathBuf>,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> u8 {
        let (done, total) = if self.bytes_total > 0 {
            (self.bytes_done, self.bytes_total)
        } else {
            (self.items_done, self.items_total)
        };
        if total == 0 {
            return 0;
        }
        let percent = done.saturating_mul(100) / total;
        percent.min(100) as u8
    }
}

type FinishedObserver = Box<dyn FnOnce(ProgressId, JobStatus) + Send>;

struct ProgressState {
    status: JobStatus,
    counters: ProgressSnapshot,
    observers: Vec<FinishedObserver>,
}

struct ProgressInner {
    id: ProgressId,
    state: Mutex<ProgressState>,
}

/// Shared progress record of one job.
///
/// Besides counters for display, it carries the "finished" notification the
/// job queue sequences on. Observers fire exactly once, on the first call to
/// [`Progress::finish`]; observers connected after that fire immediately.
#[derive(Clone)]
pub struct Progress {
    inner: Arc<ProgressInner>,
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress {
    pub fn new() -> Self {
        let id = ProgressId(NEXT_PROGRESS_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            inner: Arc::new(ProgressInner {
                id,
                state: Mutex::new(ProgressState {
                    status: JobStatus::Queued,
                    counters: ProgressSnapshot::default(),
                    observers: Vec::new(),
                }),
            }),
        }
    }

    pub fn id(&self) -> ProgressId {
        self.inner.id
    }

    pub fn status(&self) -> JobStatus {
        self.lock().status
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock().counters.clone()
    }

    pub(crate) fn mark_running(&self) {
        let mut state = self.lock();
        if state.status == JobStatus::Queued {
            state.status = JobStatus::Running;
        }
    }

    pub fn set_totals(&self, items_total: u64, bytes_total: u64) {
        let mut state = self.lock();
        state.counters.items_total = items_total;
        state.counters.bytes_total = bytes_total;
    }

    pub fn advance(&self, items: u64, bytes: u64, current_path: Option<PathBuf>) {
        let mut state = self.lock();
        state.counters.items_done = state.counters.items_done.saturating_add(items);
        state.counters.bytes_done = state.counters.bytes_done.saturating_add(bytes);
        if current_path.is_some() {
            state.counters.current_path = current_path;
        }
    }

    pub fn connect_finished<F>(&self, observer: F)
    where
        F: FnOnce(ProgressId, JobStatus) + Send + 'static,
    {
        let mut state = self.lock();
        if state.status.is_terminal() {
            let status = state.status;
            drop(state);
            observer(self.inner.id, status);
            return;
        }
        state.observers.push(Box::new(observer));
    }

    /// Moves the record to a terminal status and notifies observers.
    ///
    /// Returns `false` when the record had already finished; the status is
    /// left untouched in that case.
    pub fn finish(&self, status: JobStatus) -> bool {
        debug_assert!(status.is_terminal(), "finish needs a terminal status");
        let observers = {
            let mut state = self.lock();
            if state.status.is_terminal() {
                return false;
            }
            state.status = status;
            std::mem::take(&mut state.observers)
        };
        for observer in observers {
            observer(self.inner.id, status);
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl PartialEq for Progress {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Progress {}

impl fmt::Debug for Progress {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Progress")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish()
    }
}
