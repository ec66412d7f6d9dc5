//! Worker runner: drives the job processor on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Notify, watch};
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};

use predict_core::config::WorkerConfig;
use predict_core::error::ErrorKind;

use crate::processor::{CycleOutcome, JobProcessor};
use crate::queue::JobQueue;

/// How long shutdown waits for an in-flight cycle before abandoning it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Scheduler driver for a [`JobProcessor`].
#[derive(Debug)]
pub struct WorkerRunner {
    /// Processor invoked once per tick
    processor: Arc<JobProcessor>,
    /// Queue over the processor's store, used for the depth gauge
    queue: JobQueue,
    /// Worker configuration
    config: WorkerConfig,
    /// On-demand cycle trigger
    trigger: Arc<Notify>,
}

impl WorkerRunner {
    /// Create a runner for a processor.
    pub fn new(processor: Arc<JobProcessor>, config: WorkerConfig) -> Self {
        let queue = JobQueue::new(Arc::clone(processor.store()));
        Self {
            processor,
            queue,
            config,
            trigger: Arc::new(Notify::new()),
        }
    }

    /// Request a cycle now instead of waiting for the next tick.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Shared handle for triggering cycles from elsewhere.
    pub fn trigger_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.trigger)
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Worker started: poll_interval={}ms, max_attempts={}, base_backoff={}s, lease_timeout={:?}",
            self.config.poll_interval_ms,
            self.config.max_attempts,
            self.config.base_backoff_seconds,
            self.config.lease_timeout_seconds
        );

        let mut poll = time::interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut maintenance = time::interval(self.config.queue_depth_refresh());
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut cycles = JoinSet::new();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Worker received shutdown signal");
                        break;
                    }
                }
                _ = poll.tick() => self.spawn_cycle(&mut cycles),
                _ = self.trigger.notified() => self.spawn_cycle(&mut cycles),
                _ = maintenance.tick() => self.maintain().await,
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Processing cycle task failed: {}", e);
                    }
                }
            }
        }

        if !cycles.is_empty() {
            tracing::info!("Waiting for in-flight cycle to finish...");
            let drained = time::timeout(SHUTDOWN_GRACE, async {
                while cycles.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                tracing::warn!(
                    "In-flight cycle did not finish within {}s; its job stays in processing",
                    SHUTDOWN_GRACE.as_secs()
                );
            }
        }

        tracing::info!("Worker shut down complete");
    }

    /// Spawn one cycle. An overdue cycle meets the processor's guard and
    /// returns `Busy` rather than queueing behind the running one.
    fn spawn_cycle(&self, cycles: &mut JoinSet<()>) {
        let processor = Arc::clone(&self.processor);
        cycles.spawn(async move {
            match processor.process_one().await {
                Ok(CycleOutcome::Idle) | Ok(CycleOutcome::Busy) => {}
                Ok(outcome) => tracing::debug!("Cycle finished: {:?}", outcome),
                Err(e) if e.kind == ErrorKind::Conflict => {
                    tracing::warn!("Processing cycle lost its claim: {}", e)
                }
                Err(e) => tracing::error!("Processing cycle aborted: {}", e),
            }
        });
    }

    /// Reclaim stale claims when a lease is configured, then refresh the
    /// queue depth gauge.
    async fn maintain(&self) {
        if let Some(lease) = self.config.lease_timeout() {
            let cutoff = chrono::Duration::from_std(lease)
                .ok()
                .and_then(|lease| Utc::now().checked_sub_signed(lease));
            if let Some(cutoff) = cutoff {
                let max_attempts = self.processor.policy().max_attempts;
                match self.processor.store().reclaim_stale(cutoff, max_attempts).await {
                    Ok(reclaimed) if reclaimed.total() == 0 => {}
                    Ok(reclaimed) => {
                        for _ in 0..reclaimed.failed {
                            self.processor.metrics().incr_failed();
                        }
                        tracing::warn!(
                            "Reclaimed stale processing jobs: requeued={}, failed={}",
                            reclaimed.requeued,
                            reclaimed.failed
                        );
                    }
                    Err(e) => tracing::error!("Failed to reclaim stale jobs: {}", e),
                }
            }
        }

        if let Err(e) = self
            .queue
            .refresh_queue_depth(self.processor.metrics().as_ref())
            .await
        {
            tracing::warn!("Failed to refresh queue depth: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Value, json};

    use predict_database::MemoryJobStore;
    use predict_database::store::JobStore;
    use predict_entity::job::{CreateJob, JobStatus, PredictionJob};

    use crate::executor::{ExecutionOutput, ExecutorError, PredictionExecutor};
    use crate::metrics::JobMetrics;
    use crate::processor::RetryPolicy;

    #[derive(Debug)]
    struct Succeeds;

    #[async_trait]
    impl PredictionExecutor for Succeeds {
        async fn execute(&self, _input: &Value) -> Result<ExecutionOutput, ExecutorError> {
            Ok(ExecutionOutput {
                exit_code: 0,
                stdout: r#"{"score": 0.5}"#.to_string(),
                stderr: String::new(),
            })
        }
    }

    fn runner(store: Arc<MemoryJobStore>, metrics: Arc<JobMetrics>, config: WorkerConfig) -> WorkerRunner {
        let processor = JobProcessor::new(
            store,
            Arc::new(Succeeds),
            metrics,
            RetryPolicy::from(&config),
        );
        WorkerRunner::new(Arc::new(processor), config)
    }

    async fn wait_for_status(store: &MemoryJobStore, id: uuid::Uuid, status: JobStatus) -> bool {
        for _ in 0..100 {
            if store
                .find_by_id(id)
                .await
                .unwrap()
                .is_some_and(|job: PredictionJob| job.status == status)
            {
                return true;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_processes_due_job_and_stops() {
        let store = MemoryJobStore::arc();
        let metrics = Arc::new(JobMetrics::new());
        let job = store
            .create(&CreateJob::with_input(json!({"title": "a"})))
            .await
            .unwrap();

        let runner = Arc::new(runner(store.clone(), metrics.clone(), WorkerConfig::default()));
        let (tx, rx) = watch::channel(false);
        let handle = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.run(rx).await })
        };

        assert!(wait_for_status(&store, job.id, JobStatus::Done).await);
        assert_eq!(metrics.snapshot().processed, 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_runs_cycle_before_next_tick() {
        let store = MemoryJobStore::arc();
        let metrics = Arc::new(JobMetrics::new());
        let config = WorkerConfig {
            poll_interval_ms: 3_600_000,
            ..WorkerConfig::default()
        };

        let runner = Arc::new(runner(store.clone(), metrics, config));
        let (tx, rx) = watch::channel(false);
        let handle = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.run(rx).await })
        };

        // Let the immediate first tick run against the empty store.
        time::sleep(Duration::from_millis(10)).await;

        let job = store
            .create(&CreateJob::with_input(json!({"title": "b"})))
            .await
            .unwrap();
        runner.trigger();

        assert!(wait_for_status(&store, job.id, JobStatus::Done).await);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_reclaims_stale_claims() {
        let store = MemoryJobStore::arc();
        let metrics = Arc::new(JobMetrics::new());
        let config = WorkerConfig {
            lease_timeout_seconds: Some(60),
            ..WorkerConfig::default()
        };

        let job = store
            .create(&CreateJob::with_input(json!({})))
            .await
            .unwrap();
        let mut stuck = job.clone();
        stuck.status = JobStatus::Processing;
        stuck.processing_at = Some(Utc::now() - chrono::Duration::minutes(5));
        store.insert(stuck).await;

        let runner = runner(store.clone(), metrics.clone(), config);
        runner.maintain().await;

        let reclaimed = store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(reclaimed.status, JobStatus::Pending);
        assert_eq!(metrics.snapshot().queue_depth, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_fails_expired_final_attempt() {
        let store = MemoryJobStore::arc();
        let metrics = Arc::new(JobMetrics::new());
        let config = WorkerConfig {
            max_attempts: 2,
            lease_timeout_seconds: Some(60),
            ..WorkerConfig::default()
        };

        let job = store
            .create(&CreateJob::with_input(json!({})))
            .await
            .unwrap();
        let mut stuck = job.clone();
        stuck.status = JobStatus::Processing;
        stuck.attempts = 2;
        stuck.processing_at = Some(Utc::now() - chrono::Duration::minutes(5));
        store.insert(stuck).await;

        let runner = runner(store.clone(), metrics.clone(), config);
        runner.maintain().await;

        let failed = store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.attempts, 2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.queue_depth, 0);
        assert_eq!(
            runner.processor.process_one().await.unwrap(),
            CycleOutcome::Idle
        );
    }
}
