use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio_util::sync::CancellationToken;

use crate::error::QueueError;
use crate::progress::{JobStatus, Progress, ProgressId};
use crate::scheduler::Scheduler;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum JobKind {
    Copy,
    Move,
    Duplicate,
    Link,
    RestoreFromTrash,
    Trash,
    Delete,
    CreateFolder,
    CreateFile,
    Rename,
    SetPermissions,
    SetPermissionsRecursive,
    ChangeOwner,
    ChangeGroup,
    Custom,
}

impl JobKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Move => "move",
            Self::Duplicate => "duplicate",
            Self::Link => "link",
            Self::RestoreFromTrash => "restore",
            Self::Trash => "trash",
            Self::Delete => "delete",
            Self::CreateFolder => "mkdir",
            Self::CreateFile => "create",
            Self::Rename => "rename",
            Self::SetPermissions => "chmod",
            Self::SetPermissionsRecursive => "chmod-recursive",
            Self::ChangeOwner => "chown",
            Self::ChangeGroup => "chgrp",
            Self::Custom => "custom",
        }
    }
}

/// What a running job's work function can see.
#[derive(Clone, Debug)]
pub struct JobContext {
    id: JobId,
    progress: Progress,
    cancel: CancellationToken,
}

impl JobContext {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub type JobWork = Box<dyn FnOnce(&JobContext) -> JobStatus + Send + 'static>;

/// One unit of background filesystem work.
///
/// The job is identified by its progress record: the queue refuses a second
/// job carrying a progress that is already queued or running, and removes
/// jobs when that progress finishes.
pub struct Job {
    id: JobId,
    kind: JobKind,
    summary: String,
    progress: Progress,
    cancel: CancellationToken,
    work: JobWork,
}

impl Job {
    pub fn new<F>(kind: JobKind, summary: impl Into<String>, work: F) -> Self
    where
        F: FnOnce(&JobContext) -> JobStatus + Send + 'static,
    {
        Self {
            id: JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed)),
            kind,
            summary: summary.into(),
            progress: Progress::new(),
            cancel: CancellationToken::new(),
            work: Box::new(work),
        }
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            kind: self.kind,
            summary: self.summary.clone(),
            progress: self.progress.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Job")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("summary", &self.summary)
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub struct JobSnapshot {
    pub id: JobId,
    pub kind: JobKind,
    pub summary: String,
    pub progress: Progress,
    pub cancel: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    queued: VecDeque<Job>,
    running: Vec<JobSnapshot>,
}

impl QueueState {
    fn contains(&self, progress: ProgressId) -> bool {
        self.queued.iter().any(|job| job.progress.id() == progress)
            || self.running.iter().any(|job| job.progress.id() == progress)
    }

    fn mark_running(&mut self, job: Job) -> Job {
        self.running.push(job.snapshot());
        job
    }

    fn take_next(&mut self) -> Option<Job> {
        if !self.running.is_empty() {
            return None;
        }
        let job = self.queued.pop_front()?;
        Some(self.mark_running(job))
    }

    fn remove(&mut self, progress: ProgressId) -> bool {
        let queued_before = self.queued.len();
        let running_before = self.running.len();
        self.queued.retain(|job| job.progress.id() != progress);
        self.running.retain(|job| job.progress.id() != progress);
        queued_before != self.queued.len() || running_before != self.running.len()
    }
}

impl Drop for QueueState {
    fn drop(&mut self) {
        for job in self.queued.drain(..) {
            tracing::debug!(job_event = "released", job_id = %job.id, "dropping queued job");
            job.progress.finish(JobStatus::Cancelled);
        }
    }
}

/// Serializes background filesystem jobs.
///
/// At most one queued job runs at a time; the next one starts when the
/// running job's progress reports finished. Jobs enqueued with `skip_queue`
/// start immediately. Clones are handles on the same queue.
#[derive(Clone)]
pub struct JobQueue {
    state: Arc<Mutex<QueueState>>,
    scheduler: Arc<dyn Scheduler>,
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        formatter
            .debug_struct("JobQueue")
            .field("queued", &state.queued.len())
            .field("running", &state.running.len())
            .finish()
    }
}

impl JobQueue {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            scheduler,
        }
    }

    pub fn enqueue(&self, job: Job, skip_queue: bool) -> Result<JobId, QueueError> {
        let job_id = job.id;
        let progress = job.progress.clone();
        let to_start = {
            let mut state = self.lock();
            if state.contains(progress.id()) {
                tracing::warn!(
                    job_event = "rejected",
                    job_id = %job_id,
                    progress_id = %progress.id(),
                    "job is already queued"
                );
                return Err(QueueError::AlreadyQueued {
                    progress: progress.id(),
                });
            }
            tracing::debug!(
                job_event = "queued",
                job_id = %job_id,
                job_kind = job.kind.label(),
                skip_queue,
                queue_depth = state.queued.len(),
                "job queued"
            );
            if skip_queue {
                Some(state.mark_running(job))
            } else {
                state.queued.push_back(job);
                state.take_next()
            }
        };

        let weak = Arc::downgrade(&self.state);
        let scheduler = Arc::clone(&self.scheduler);
        progress.connect_finished(move |progress_id, status| {
            on_finished(&weak, &scheduler, progress_id, status);
        });
        launch(&self.scheduler, to_start);
        Ok(job_id)
    }

    pub fn start_next(&self) {
        let next = self.lock().take_next();
        launch(&self.scheduler, next);
    }

    /// Starts a still-queued job now, ahead of FIFO order.
    pub fn start_by_progress(&self, progress: &Progress) -> Result<(), QueueError> {
        let job = {
            let mut state = self.lock();
            let index = state
                .queued
                .iter()
                .position(|job| job.progress.id() == progress.id())
                .ok_or(QueueError::NotQueued {
                    progress: progress.id(),
                })?;
            let job = state.queued.remove(index).ok_or(QueueError::NotQueued {
                progress: progress.id(),
            })?;
            state.mark_running(job)
        };
        launch(&self.scheduler, Some(job));
        Ok(())
    }

    /// Snapshot of the jobs still waiting, in start order.
    pub fn list_all(&self) -> Vec<JobSnapshot> {
        self.lock().queued.iter().map(Job::snapshot).collect()
    }

    pub fn list_running(&self) -> Vec<JobSnapshot> {
        self.lock().running.clone()
    }

    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.queued.is_empty() && state.running.is_empty()
    }

    /// Requests cancellation of every queued and running job.
    ///
    /// Queued jobs still pass through the start path so their completion
    /// funnels report the cancellation.
    pub fn cancel_all(&self) -> usize {
        let state = self.lock();
        let mut count = 0;
        for token in state
            .queued
            .iter()
            .map(|job| &job.cancel)
            .chain(state.running.iter().map(|job| &job.cancel))
        {
            token.cancel();
            count += 1;
        }
        count
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn on_finished(
    state: &Weak<Mutex<QueueState>>,
    scheduler: &Arc<dyn Scheduler>,
    progress: ProgressId,
    status: JobStatus,
) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let next = {
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.remove(progress) {
            return;
        }
        tracing::debug!(
            job_event = "finished",
            progress_id = %progress,
            status = status.label(),
            queue_depth = state.queued.len(),
            "job left the queue"
        );
        state.take_next()
    };
    launch(scheduler, next);
}

fn launch(scheduler: &Arc<dyn Scheduler>, job: Option<Job>) {
    let Some(job) = job else {
        return;
    };
    tracing::debug!(
        job_event = "started",
        job_id = %job.id,
        job_kind = job.kind.label(),
        "job started"
    );
    job.progress.mark_running();
    scheduler.push(Box::new(move || run_job(job)));
}

fn run_job(job: Job) {
    let Job {
        id,
        progress,
        cancel,
        work,
        ..
    } = job;
    let mut guard = FinishGuard {
        progress: progress.clone(),
        status: JobStatus::Failed,
    };
    let context = JobContext {
        id,
        progress,
        cancel,
    };
    guard.status = work(&context);
}

/// Finishes the progress even when the work function unwinds.
struct FinishGuard {
    progress: Progress,
    status: JobStatus,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        let status = if self.status.is_terminal() {
            self.status
        } else {
            JobStatus::Failed
        };
        self.progress.finish(status);
    }
}
