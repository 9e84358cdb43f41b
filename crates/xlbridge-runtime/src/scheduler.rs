use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError, mpsc};
use std::thread::JoinHandle;

use tokio::runtime::{Builder, Handle};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::task::{TaskHandle, TaskOutcome};

/// Spawns onto the scheduler thread from any thread. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    handle: Handle,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl SchedulerHandle {
    /// Spawn a task. `task` receives the token that [`TaskHandle::cancel`]
    /// and scheduler shutdown trigger.
    pub fn spawn<F, Fut>(&self, task: F) -> TaskHandle
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = TaskOutcome> + Send + 'static,
    {
        let token = self.shutdown.child_token();
        let fut = self.tracker.track_future(task(token.clone()));
        TaskHandle::new(token, self.handle.spawn(fut))
    }

    /// Number of spawned tasks that have not finished.
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

struct Running {
    handle: SchedulerHandle,
    thread: Option<JoinHandle<()>>,
}

enum State {
    Idle,
    Running(Running),
    ShutDown,
}

/// Owns the dedicated thread running the cooperative loop.
///
/// The thread and its current-thread runtime start on the first call to
/// [`Scheduler::handle`] and live until [`Scheduler::shutdown`] or drop.
pub struct Scheduler {
    config: SchedulerConfig,
    state: Mutex<State>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::Idle),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle to the loop, starting the thread if needed.
    pub fn handle(&self) -> Result<SchedulerHandle, SchedulerError> {
        let mut state = self.state();
        match &*state {
            State::Running(running) => return Ok(running.handle.clone()),
            State::ShutDown => return Err(SchedulerError::ShutDown),
            State::Idle => {}
        }
        let running = self.start()?;
        let handle = running.handle.clone();
        *state = State::Running(running);
        Ok(handle)
    }

    pub fn is_running(&self) -> bool {
        matches!(&*self.state(), State::Running(_))
    }

    /// Number of unfinished tasks on the loop; zero before it starts.
    pub fn active_tasks(&self) -> usize {
        match &*self.state() {
            State::Running(running) => running.handle.active_tasks(),
            _ => 0,
        }
    }

    fn start(&self) -> Result<Running, SchedulerError> {
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let grace = self.config.shutdown_grace();

        let thread = {
            let shutdown = shutdown.clone();
            let tracker = tracker.clone();
            std::thread::Builder::new()
                .name(self.config.thread_name.clone())
                .spawn(move || {
                    let runtime = match Builder::new_current_thread().enable_all().build() {
                        Ok(rt) => rt,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to build scheduler runtime");
                            return;
                        }
                    };
                    if ready_tx.send(runtime.handle().clone()).is_err() {
                        return;
                    }
                    runtime.block_on(async move {
                        shutdown.cancelled().await;
                        tracker.close();
                        if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
                            tracing::warn!(active = tracker.len(), "Scheduler shut down with tasks still running");
                        }
                    });
                    tracing::info!("Scheduler loop stopped");
                })?
        };

        let handle = ready_rx.recv().map_err(|_| SchedulerError::StartupAborted)?;
        tracing::info!(thread = %self.config.thread_name, "Scheduler loop started");

        Ok(Running {
            handle: SchedulerHandle {
                handle,
                tracker,
                shutdown,
            },
            thread: Some(thread),
        })
    }

    /// Cancel every task and stop the loop thread. Waits for the thread
    /// unless called from the loop itself. Further calls to
    /// [`Scheduler::handle`] fail.
    pub fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.state(), State::ShutDown);
        let State::Running(mut running) = previous else {
            return;
        };
        running.handle.shutdown.cancel();
        if let Some(thread) = running.thread.take()
            && thread.thread().id() != std::thread::current().id()
            && thread.join().is_err()
        {
            tracing::error!("Scheduler thread panicked");
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let State::Running(running) = &*self.state() {
            running.handle.shutdown.cancel();
        }
    }
}
