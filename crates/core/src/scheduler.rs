use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Fire-and-forget executor for job work.
///
/// The queue only pushes work here; lifecycle tracking happens through each
/// job's progress record, so implementations never report back.
pub trait Scheduler: Send + Sync {
    fn push(&self, task: Task);
}

/// Runs every task on its own named OS thread.
#[derive(Clone, Debug)]
pub struct ThreadScheduler {
    thread_name: String,
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new("fileq-job")
    }
}

impl ThreadScheduler {
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
        }
    }
}

impl Scheduler for ThreadScheduler {
    fn push(&self, task: Task) {
        // Kept reachable so a failed spawn can still run the task here.
        let slot = Arc::new(Mutex::new(Some(task)));
        let thread_slot = Arc::clone(&slot);
        let spawned = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                if let Some(task) = take_task(&thread_slot) {
                    task();
                }
            });
        if let Err(error) = spawned {
            tracing::warn!("failed to spawn job thread, running inline: {error}");
            if let Some(task) = take_task(&slot) {
                task();
            }
        }
    }
}

fn take_task(slot: &Mutex<Option<Task>>) -> Option<Task> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Runs tasks on the blocking pool of a tokio runtime.
#[derive(Clone, Debug)]
pub struct RuntimeScheduler {
    handle: tokio::runtime::Handle,
}

impl RuntimeScheduler {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime the caller is currently inside of.
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

impl Scheduler for RuntimeScheduler {
    fn push(&self, task: Task) {
        let blocking = self.handle.spawn_blocking(move || {
            let started = Instant::now();
            task();
            tracing::debug!(
                elapsed_ms = started.elapsed().as_millis(),
                "runtime job task finished"
            );
        });
        self.handle.spawn(async move {
            if let Err(error) = blocking.await {
                tracing::warn!("job task panicked: {error}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn thread_scheduler_runs_on_named_thread() {
        let (tx, rx) = mpsc::channel();
        ThreadScheduler::new("fileq-test").push(Box::new(move || {
            let name = thread::current().name().map(str::to_string);
            let _ = tx.send(name);
        }));

        let name = rx
            .recv_timeout(Duration::from_secs(1))
            .expect("task should run");
        assert_eq!(name.as_deref(), Some("fileq-test"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn runtime_scheduler_uses_blocking_pool() {
        let scheduler = RuntimeScheduler::current().expect("test runs inside a runtime");
        let (tx, rx) = tokio::sync::oneshot::channel();
        scheduler.push(Box::new(move || {
            let _ = tx.send(40 + 2);
        }));

        assert_eq!(rx.await.expect("task should send"), 42);
    }
}
