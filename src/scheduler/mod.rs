//! Periodic background work for open partitions.
//!
//! Each registered [`BackgroundTask`] runs on its own timer loop. Runs never
//! overlap for one task: a run that takes longer than the interval delays the
//! next tick. On [`Scheduler::shutdown`] the loops stop, in-flight runs are
//! awaited, and then every task gets one [`BackgroundTask::on_shutdown`] call
//! in registration order.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{Error, Result};

/// Handed to every run of a task.
pub struct Context {
    pub task_name: &'static str,
    pub run_id: u64,
    pub shutdown: watch::Receiver<bool>,
}

impl Context {
    /// True once the scheduler started shutting down. Long runs should
    /// check this before starting more work.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

#[async_trait::async_trait]
pub trait BackgroundTask: Send + Sync {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    async fn execute(&self, ctx: Context) -> Result<()>;

    /// Last call after the timer loop stopped.
    async fn on_shutdown(&self) -> Result<()> {
        Ok(())
    }
}

struct Registered {
    task: Arc<dyn BackgroundTask>,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    tasks: Mutex<Vec<Registered>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Starts the timer loop of `task`. The first run happens right away.
    pub fn register<T: BackgroundTask + 'static>(&self, task: Arc<T>) -> &Self {
        let handle = self.spawn_timer_loop(task.clone());
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registered { task, handle });
        self
    }

    fn spawn_timer_loop<T: BackgroundTask + 'static>(&self, task: Arc<T>) -> JoinHandle<()> {
        let interval = task.interval();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut run_id = 0u64;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    _ = async { shutdown_rx.wait_for(|stop| *stop).await.map(|_| ()) } => break,

                    _ = ticker.tick() => {
                        run_id += 1;
                        let ctx = Context {
                            task_name: task.name(),
                            run_id,
                            shutdown: shutdown_rx.clone(),
                        };

                        if let Err(e) = task.execute(ctx).await {
                            tracing::warn!(
                                task = task.name(),
                                run_id,
                                error = %e,
                                "Background task failed"
                            );
                        }
                    }
                }
            }
            tracing::debug!(task = task.name(), runs = run_id, "Task loop stopped");
        })
    }

    /// Stops every loop, waits for running tasks and runs the shutdown hooks.
    /// The first hook error is returned after all hooks ran.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown_tx.send_replace(true);

        let tasks: Vec<Registered> = self.tasks.lock()?.drain(..).collect();
        let mut first_error = None;
        for Registered { task, handle } in tasks {
            handle
                .await
                .map_err(|e| Error::IllegalState(format!("{} task join error: {}", task.name(), e)))?;

            if let Err(e) = task.on_shutdown().await {
                tracing::warn!(task = task.name(), error = %e, "Shutdown hook failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
