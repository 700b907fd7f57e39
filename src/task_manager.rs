//! Tracks the agent's long-running tasks and stops them on shutdown.
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

type NamedHandle = (&'static str, JoinHandle<()>);

/// Owns the `JoinHandle`s of every spawned timer and hands out the shared
/// shutdown receiver they all listen on.
#[derive(Clone, Debug)]
pub struct TaskManager {
    handles: Arc<Mutex<Vec<NamedHandle>>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskManager {
    pub fn new(shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            handles: Arc::new(Mutex::new(Vec::new())),
            shutdown_rx,
        }
    }

    fn handles(&self) -> MutexGuard<'_, Vec<NamedHandle>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        debug!(task_name = name, "Spawning task");
        let handle = tokio::spawn(future);
        self.handles().push((name, handle));
    }

    pub fn get_shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Names of the tasks that have not finished yet.
    pub fn active_tasks(&self) -> Vec<&'static str> {
        self.handles()
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(name, _)| *name)
            .collect()
    }

    /// Waits up to `deadline` for all tasks to finish, then aborts the rest.
    ///
    /// The tasks are expected to have been told to stop through the shutdown
    /// channel already. Aborted tasks have been dropped when this returns.
    pub async fn shutdown(self, deadline: Duration) -> ShutdownSummary {
        let handles: Vec<NamedHandle> = self.handles().drain(..).collect();
        info!(tasks = handles.len(), "Waiting for tasks to stop");

        let until = Instant::now() + deadline;
        let mut summary = ShutdownSummary::default();
        for (name, mut handle) in handles {
            match timeout_at(until, &mut handle).await {
                Ok(Ok(())) => {
                    debug!(task_name = name, "Task stopped");
                    summary.stopped += 1;
                }
                Ok(Err(e)) if e.is_panic() => {
                    error!(task_name = name, "Task panicked");
                    summary.panicked += 1;
                }
                Ok(Err(_)) => debug!(task_name = name, "Task was cancelled"),
                Err(_) => {
                    warn!(task_name = name, "Task did not stop in time, aborting");
                    handle.abort();
                    // Resolves once the task's future has been dropped.
                    let _ = handle.await;
                    summary.aborted += 1;
                }
            }
        }

        if summary.panicked > 0 {
            error!(panicked = summary.panicked, "Some tasks panicked");
        } else {
            info!(stopped = summary.stopped, aborted = summary.aborted, "All tasks stopped");
        }
        summary
    }
}

/// How the tracked tasks ended during [`TaskManager::shutdown`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownSummary {
    pub stopped: usize,
    pub aborted: usize,
    pub panicked: usize,
}
