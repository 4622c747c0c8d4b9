//! Worker pool
//!
//! A single long-lived task that ticks on the scheduler interval, asks the
//! engine to admit as many queued jobs as there are free workers, and runs
//! each admitted job on its own task. One browser session per job; the
//! pool size bounds how many run at once across all portals.

use crate::engine::AutomationEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub struct WorkerPool {
    engine: Arc<AutomationEngine>,
    workers: Arc<Semaphore>,
    size: usize,
    tick_interval: Duration,
}

impl WorkerPool {
    /// Pool sized and paced by the engine's scheduler config.
    pub fn new(engine: Arc<AutomationEngine>) -> Self {
        let scheduler = engine.config().scheduler.clone();
        let size = scheduler.worker_pool_size.max(1);
        Self {
            engine,
            workers: Arc::new(Semaphore::new(size)),
            size,
            tick_interval: scheduler.tick_interval(),
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size.max(1);
        self.workers = Arc::new(Semaphore::new(self.size));
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers not currently running a job.
    pub fn idle_workers(&self) -> usize {
        self.workers.available_permits()
    }

    /// Run until `cancel` fires, then wait for in-flight jobs to finish.
    ///
    /// Running jobs are not cancelled on shutdown; each finishes its
    /// workflow and records its outcome.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        let mut tasks = JoinSet::new();
        tracing::info!(
            workers = self.size,
            tick_interval_ms = self.tick_interval.as_millis() as u64,
            "Worker pool started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(in_flight = tasks.len(), "Worker pool shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.dispatch(&mut tasks).await;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Job task panicked");
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Job task panicked");
            }
        }
        tracing::info!("Worker pool stopped");
    }

    /// One scheduling cycle: admit up to the number of idle workers and spawn them.
    async fn dispatch(&self, tasks: &mut JoinSet<()>) {
        let idle = self.workers.available_permits();
        if idle == 0 {
            return;
        }

        let admitted = match self.engine.schedule_tick(idle).await {
            Ok(admitted) => admitted,
            Err(e) => {
                tracing::error!(error = %e, "Scheduling cycle failed");
                return;
            }
        };

        for job in admitted {
            let permit = match self.workers.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to acquire worker permit");
                    return;
                }
            };
            let engine = self.engine.clone();
            tracing::debug!(job_id = %job.id, "Job dispatched to worker");
            tasks.spawn(async move {
                let _permit = permit;
                engine.run_admitted(job).await;
            });
        }
    }
}
