//! Named background tasks with a shared shutdown signal.
//!
//! Every embedded service runs its loops (acceptors, controllers, flushers)
//! through a [`TaskRegistry`]. Stopping a service is two steps, mirroring
//! the stop/await-stop split of the services themselves:
//!
//! 1. [`TaskRegistry::signal_shutdown`] broadcasts the shutdown signal.
//!    Synchronous, so `Drop` implementations can call it.
//! 2. [`TaskRegistry::join_all`] waits for every task, aborting the ones that
//!    do not finish within the timeout.
//!
//! # Example
//!
//! ```rust,no_run
//! use kafkaesque_testkit::tasks::TaskRegistry;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = TaskRegistry::new("example");
//!     registry.spawn_periodic("tick", Duration::from_millis(100), |tick| async move {
//!         tracing::debug!(tick, "tick");
//!     });
//!
//!     registry.signal_shutdown();
//!     registry.join_all(Duration::from_secs(5)).await;
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Status of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Task is currently running.
    Running,
    /// Task has returned (normally, by panic, or by shutdown).
    Finished,
}

/// Registry of the background tasks owned by one service.
pub struct TaskRegistry {
    /// Service name, for logs.
    owner: &'static str,
    tasks: Mutex<HashMap<&'static str, JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
    shutting_down: AtomicBool,
}

impl TaskRegistry {
    pub fn new(owner: &'static str) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            owner,
            tasks: Mutex::new(HashMap::new()),
            shutdown_tx,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Receiver for the shutdown signal, for loops that select on it themselves.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn a named task that is dropped when shutdown is signalled.
    ///
    /// A task already registered under `name` is aborted and replaced.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_shutting_down() {
            tracing::warn!(owner = self.owner, task = name, "Ignoring spawn during shutdown");
            return;
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let owner = self.owner;

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = task => {
                    tracing::debug!(owner, task = name, "Task completed");
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!(owner, task = name, "Task received shutdown signal");
                }
            }
        });

        let previous = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, handle);
        if let Some(previous) = previous {
            previous.abort();
            tracing::debug!(owner, task = name, "Aborted previous task instance");
        }

        tracing::debug!(owner, task = name, "Spawned background task");
    }

    /// Spawn a task running `task` on every tick of `interval`.
    ///
    /// The first tick fires one full interval after spawning.
    pub fn spawn_periodic<F, Fut>(&self, name: &'static str, interval: Duration, mut task: F)
    where
        F: FnMut(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        self.spawn(name, async move {
            let mut tick = 0u64;
            let mut timer =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                timer.tick().await;
                task(tick).await;
                tick = tick.wrapping_add(1);
            }
        });
    }

    /// Status of every registered task.
    pub fn health_check(&self) -> Vec<(&'static str, TaskStatus)> {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, handle)| {
                let status = if handle.is_finished() {
                    TaskStatus::Finished
                } else {
                    TaskStatus::Running
                };
                (*name, status)
            })
            .collect()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Broadcast the shutdown signal without waiting.
    pub fn signal_shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());
        tracing::debug!(owner = self.owner, "Shutdown signal sent to background tasks");
    }

    /// Abort every task immediately.
    pub fn abort_all(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        for (_, handle) in self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
        {
            handle.abort();
        }
    }

    /// Signal shutdown and wait for every task.
    ///
    /// Tasks still running when `timeout` elapses are aborted. Returns true if
    /// every task finished on its own.
    pub async fn join_all(&self, timeout: Duration) -> bool {
        self.signal_shutdown();

        let tasks: Vec<(&'static str, JoinHandle<()>)> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();

        let deadline = tokio::time::Instant::now() + timeout;
        let mut clean = true;

        for (name, mut handle) in tasks {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());

            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(Ok(())) => {
                    tracing::debug!(owner = self.owner, task = name, "Task shutdown complete");
                }
                Ok(Err(e)) if e.is_cancelled() => {
                    tracing::debug!(owner = self.owner, task = name, "Task was cancelled");
                }
                Ok(Err(e)) => {
                    clean = false;
                    tracing::warn!(owner = self.owner, task = name, error = %e, "Task panicked");
                }
                Err(_) => {
                    clean = false;
                    handle.abort();
                    tracing::warn!(
                        owner = self.owner,
                        task = name,
                        "Task did not respond to shutdown, aborting"
                    );
                }
            }
        }

        clean
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        self.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU64;

    #[tokio::test]
    async fn test_spawn_and_join() {
        let registry = TaskRegistry::new("test");
        registry.spawn("forever", async {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        assert_eq!(registry.task_count(), 1);
        assert_eq!(registry.health_check(), vec![("forever", TaskStatus::Running)]);

        assert!(registry.join_all(Duration::from_secs(1)).await);
        assert_eq!(registry.task_count(), 0);
        assert!(registry.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_periodic_ticks() {
        let registry = TaskRegistry::new("test");
        let ticks = Arc::new(AtomicU64::new(0));
        let counter = ticks.clone();

        registry.spawn_periodic("counter", Duration::from_millis(100), move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        registry.join_all(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_spawn_after_shutdown_is_ignored() {
        let registry = TaskRegistry::new("test");
        registry.signal_shutdown();
        registry.spawn("late", async {});
        assert_eq!(registry.task_count(), 0);
    }

    #[tokio::test]
    async fn test_respawn_replaces_task() {
        let registry = TaskRegistry::new("test");
        registry.spawn("same", std::future::pending());
        registry.spawn("same", std::future::pending());
        assert_eq!(registry.task_count(), 1);
        registry.join_all(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_abort_all() {
        let registry = TaskRegistry::new("test");
        registry.spawn("pending", std::future::pending());
        registry.abort_all();
        assert_eq!(registry.task_count(), 0);
    }
}
