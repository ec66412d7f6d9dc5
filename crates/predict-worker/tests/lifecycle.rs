//! End-to-end job lifecycle tests against the in-memory store.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use tokio::sync::Notify;
use uuid::Uuid;

use predict_core::error::{AppError, ErrorKind};
use predict_core::result::AppResult;
use predict_core::types::{PageRequest, PageResponse};
use predict_database::store::{JobStore, ReclaimedJobs};
use predict_database::{MemoryContentStore, MemoryJobStore};
use predict_entity::job::{CreateJob, JobFilter, JobStatus, PredictionJob};
use predict_worker::{
    CycleOutcome, ExecutionOutput, ExecutorError, JobMetrics, JobProcessor, JobQueue,
    MetricsSnapshot, PredictionExecutor, Requester, RetryPolicy,
};

#[derive(Debug, Clone)]
enum Step {
    Exit(i32, &'static str, &'static str),
    SpawnFailure,
}

/// Executor that replays scripted steps, repeating the last one.
#[derive(Debug)]
struct ScriptedExecutor {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Value>>,
}

impl ScriptedExecutor {
    fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn always(step: Step) -> Arc<Self> {
        Self::new([step])
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PredictionExecutor for ScriptedExecutor {
    async fn execute(&self, input: &Value) -> Result<ExecutionOutput, ExecutorError> {
        self.calls.lock().unwrap().push(input.clone());
        let step = {
            let mut steps = self.steps.lock().unwrap();
            if steps.len() > 1 {
                steps.pop_front().unwrap()
            } else {
                steps.front().cloned().unwrap()
            }
        };
        match step {
            Step::Exit(exit_code, stdout, stderr) => Ok(ExecutionOutput {
                exit_code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            }),
            Step::SpawnFailure => Err(ExecutorError::Spawn {
                program: "python3".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file"),
            }),
        }
    }
}

struct Harness {
    store: Arc<MemoryJobStore>,
    metrics: Arc<JobMetrics>,
    processor: JobProcessor,
    queue: JobQueue,
}

fn harness(executor: Arc<ScriptedExecutor>, max_attempts: u32, base_backoff_seconds: u64) -> Harness {
    let store = MemoryJobStore::arc();
    let metrics = Arc::new(JobMetrics::new());
    let processor = JobProcessor::new(
        store.clone(),
        executor,
        metrics.clone(),
        RetryPolicy {
            max_attempts,
            base_backoff_seconds,
            max_error_length: 2000,
        },
    );
    let queue = JobQueue::new(store.clone());
    Harness {
        store,
        metrics,
        processor,
        queue,
    }
}

fn job_input() -> CreateJob {
    CreateJob::with_input(json!({"title": "Launch day", "platform": "tiktok"}))
}

async fn make_due(store: &MemoryJobStore, id: Uuid) {
    let mut job = store.find_by_id(id).await.unwrap().unwrap();
    job.next_run_at = Some(Utc::now() - Duration::seconds(1));
    store.insert(job).await;
}

#[tokio::test]
async fn at_most_one_claimant_for_a_single_job() {
    let store = MemoryJobStore::arc();
    let job = store.create(&job_input()).await.unwrap();
    let now = Utc::now();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.claim_due_job(now).await.unwrap() })
        })
        .collect();
    let claims: Vec<PredictionJob> = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter_map(|res| res.unwrap())
        .collect();

    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].id, job.id);
    assert_eq!(claims[0].status, JobStatus::Processing);
}

#[tokio::test]
async fn processors_sharing_a_store_never_double_execute() {
    let store = MemoryJobStore::arc();
    let executor = ScriptedExecutor::always(Step::Exit(0, r#"{"score": 1}"#, ""));
    store.create(&job_input()).await.unwrap();

    let processors: Vec<Arc<JobProcessor>> = (0..4)
        .map(|_| {
            Arc::new(JobProcessor::new(
                store.clone(),
                executor.clone(),
                Arc::new(JobMetrics::new()),
                RetryPolicy {
                    max_attempts: 5,
                    base_backoff_seconds: 5,
                    max_error_length: 2000,
                },
            ))
        })
        .collect();

    let outcomes = futures::future::join_all(processors.iter().map(|p| {
        let p = Arc::clone(p);
        async move { p.process_one().await.unwrap() }
    }))
    .await;

    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, CycleOutcome::Completed(_)))
        .count();
    assert_eq!(completed, 1);
    assert_eq!(executor.call_count(), 1);
}

#[tokio::test]
async fn always_failing_job_fails_after_exactly_max_attempts() {
    let executor = ScriptedExecutor::always(Step::Exit(1, "", "model crashed"));
    let h = harness(executor.clone(), 3, 0);
    let job = h.queue.enqueue(job_input()).await.unwrap();

    let mut cycles = 0;
    loop {
        make_due(&h.store, job.id).await;
        cycles += 1;
        match h.processor.process_one().await.unwrap() {
            CycleOutcome::Retrying { job_id, .. } => assert_eq!(job_id, job.id),
            CycleOutcome::Failed(job_id) => {
                assert_eq!(job_id, job.id);
                break;
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(cycles < 10, "job never reached failed");
    }

    let failed = h.queue.get(job.id).await.unwrap();
    assert_eq!(cycles, 3);
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts, 3);
    assert_eq!(failed.last_error.as_deref(), Some("model crashed"));
    assert!(failed.next_run_at.is_none());
    assert!(failed.processed_at.is_some());
    assert_eq!(executor.call_count(), 3);

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.attempts, 3);
    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.processed, 0);

    assert_eq!(h.processor.process_one().await.unwrap(), CycleOutcome::Idle);
}

#[tokio::test]
async fn successful_prediction_completes_in_one_cycle() {
    let executor = ScriptedExecutor::always(Step::Exit(0, r#"{"score":0.9}"#, ""));
    let h = harness(executor.clone(), 5, 5);
    let job = h.queue.enqueue(job_input()).await.unwrap();

    let outcome = h.processor.process_one().await.unwrap();
    assert_eq!(outcome, CycleOutcome::Completed(job.id));

    let done = h.queue.get(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Done);
    assert_eq!(done.attempts, 1);
    assert_eq!(done.result.as_ref().unwrap()["score"], json!(0.9));
    assert!(done.last_error.is_none());
    assert!(done.next_run_at.is_none());
    assert!(done.processing_at.is_none());

    assert_eq!(executor.calls.lock().unwrap()[0], job.input);
    assert_eq!(h.metrics.snapshot().processed, 1);
}

#[tokio::test]
async fn success_after_retry_clears_last_error() {
    let executor = ScriptedExecutor::new([
        Step::Exit(2, "", "transient"),
        Step::Exit(0, r#"{"score": 0.3}"#, ""),
    ]);
    let h = harness(executor, 5, 0);
    let job = h.queue.enqueue(job_input()).await.unwrap();

    assert!(matches!(
        h.processor.process_one().await.unwrap(),
        CycleOutcome::Retrying { .. }
    ));
    let retrying = h.queue.get(job.id).await.unwrap();
    assert_eq!(retrying.last_error.as_deref(), Some("transient"));

    make_due(&h.store, job.id).await;
    h.processor.process_one().await.unwrap();

    let done = h.queue.get(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Done);
    assert_eq!(done.attempts, 2);
    assert!(done.last_error.is_none());
}

#[tokio::test]
async fn non_json_output_is_kept_raw() {
    let executor = ScriptedExecutor::always(Step::Exit(0, "score: high", ""));
    let h = harness(executor, 5, 5);
    let job = h.queue.enqueue(job_input()).await.unwrap();

    h.processor.process_one().await.unwrap();

    let done = h.queue.get(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Done);
    assert_eq!(done.result, Some(json!({"raw": "score: high"})));
}

#[tokio::test]
async fn spawn_failure_takes_the_retry_path() {
    let executor = ScriptedExecutor::always(Step::SpawnFailure);
    let h = harness(executor, 5, 5);
    let job = h.queue.enqueue(job_input()).await.unwrap();
    let before = Utc::now();

    let outcome = h.processor.process_one().await.unwrap();
    let CycleOutcome::Retrying { next_run_at, .. } = outcome else {
        panic!("expected retry, got {outcome:?}");
    };
    // attempt 1 with base 5s: 5000ms ± 20%
    assert!(next_run_at >= before + Duration::milliseconds(4000));
    assert!(next_run_at <= Utc::now() + Duration::milliseconds(6000));

    let pending = h.queue.get(job.id).await.unwrap();
    assert_eq!(pending.status, JobStatus::Pending);
    assert_eq!(pending.attempts, 1);
    assert!(pending.last_error.as_deref().unwrap().contains("Failed to spawn"));
    assert!(!pending.is_due(Utc::now()));
}

#[tokio::test]
async fn long_errors_are_truncated() {
    let long: &'static str = Box::leak("x".repeat(5000).into_boxed_str());
    let executor = ScriptedExecutor::always(Step::Exit(1, "", long));
    let h = harness(executor, 5, 5);
    let job = h.queue.enqueue(job_input()).await.unwrap();

    h.processor.process_one().await.unwrap();

    let job = h.queue.get(job.id).await.unwrap();
    assert_eq!(job.last_error.unwrap().chars().count(), 2000);
}

#[tokio::test]
async fn exit_code_is_used_when_output_is_empty() {
    let executor = ScriptedExecutor::always(Step::Exit(137, "", ""));
    let h = harness(executor, 5, 5);
    let job = h.queue.enqueue(job_input()).await.unwrap();

    h.processor.process_one().await.unwrap();

    let job = h.queue.get(job.id).await.unwrap();
    assert_eq!(
        job.last_error.as_deref(),
        Some("Process exited with code 137")
    );
}

#[tokio::test]
async fn cancelling_a_finished_job_is_rejected() {
    let executor = ScriptedExecutor::always(Step::Exit(0, r#"{"score": 0.1}"#, ""));
    let h = harness(executor, 5, 5);
    let owner = Uuid::new_v4();
    let job = h
        .queue
        .enqueue(CreateJob {
            enqueued_by: Some(owner),
            ..job_input()
        })
        .await
        .unwrap();
    h.processor.process_one().await.unwrap();

    let err = h
        .queue
        .cancel(job.id, &Requester::user(owner))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
    assert!(err.message.contains("Job not cancellable"));
    assert!(err.message.contains("done"));

    let after = h.queue.get(job.id).await.unwrap();
    assert_eq!(after.status, JobStatus::Done);
    assert!(after.cancelled_by.is_none());
}

#[tokio::test]
async fn cancelled_job_is_never_claimed() {
    let executor = ScriptedExecutor::always(Step::Exit(0, "{}", ""));
    let h = harness(executor.clone(), 5, 5);
    let owner = Uuid::new_v4();
    let job = h
        .queue
        .enqueue(CreateJob {
            enqueued_by: Some(owner),
            ..job_input()
        })
        .await
        .unwrap();
    h.queue.cancel(job.id, &Requester::user(owner)).await.unwrap();

    assert_eq!(h.processor.process_one().await.unwrap(), CycleOutcome::Idle);
    assert_eq!(executor.call_count(), 0);
}

#[tokio::test]
async fn polling_an_empty_queue_changes_nothing() {
    let executor = ScriptedExecutor::always(Step::Exit(0, "{}", ""));
    let h = harness(executor.clone(), 5, 5);

    assert_eq!(h.processor.process_one().await.unwrap(), CycleOutcome::Idle);
    assert_eq!(h.processor.process_one().await.unwrap(), CycleOutcome::Idle);

    assert!(h.store.all().await.is_empty());
    assert_eq!(h.metrics.snapshot(), MetricsSnapshot::default());
    assert_eq!(executor.call_count(), 0);
}

#[tokio::test]
async fn delayed_job_is_not_picked_early() {
    let executor = ScriptedExecutor::always(Step::Exit(0, "{}", ""));
    let h = harness(executor, 5, 5);
    let job = h.queue.enqueue(job_input()).await.unwrap();
    let mut delayed = h.queue.get(job.id).await.unwrap();
    delayed.next_run_at = Some(Utc::now() + Duration::minutes(10));
    h.store.insert(delayed).await;

    assert_eq!(h.processor.process_one().await.unwrap(), CycleOutcome::Idle);
    assert_eq!(h.metrics.snapshot(), MetricsSnapshot::default());
}

#[tokio::test]
async fn two_attempts_zero_backoff_scenario() {
    let executor = ScriptedExecutor::always(Step::Exit(1, "", "bad input"));
    let h = harness(executor, 2, 0);
    let job = h.queue.enqueue(job_input()).await.unwrap();

    let first = h.processor.process_one().await.unwrap();
    assert!(matches!(first, CycleOutcome::Retrying { .. }));
    let after_first = h.queue.get(job.id).await.unwrap();
    assert_eq!(after_first.attempts, 1);
    assert_eq!(after_first.status, JobStatus::Pending);
    assert!(after_first.next_run_at.is_some());

    make_due(&h.store, job.id).await;

    let second = h.processor.process_one().await.unwrap();
    assert_eq!(second, CycleOutcome::Failed(job.id));
    let after_second = h.queue.get(job.id).await.unwrap();
    assert_eq!(after_second.attempts, 2);
    assert_eq!(after_second.status, JobStatus::Failed);
}

#[tokio::test]
async fn success_pushes_summary_to_content() {
    let store = MemoryJobStore::arc();
    let contents = Arc::new(MemoryContentStore::new());
    let content_id = Uuid::new_v4();
    contents.insert_content(content_id).await;

    let executor = ScriptedExecutor::always(Step::Exit(
        0,
        r##"{"score": 0.82, "best_hours_utc": [14, 18], "hashtags": ["#launch"]}"##,
        "",
    ));
    let processor = JobProcessor::new(
        store.clone(),
        executor,
        Arc::new(JobMetrics::new()),
        RetryPolicy {
            max_attempts: 5,
            base_backoff_seconds: 5,
            max_error_length: 2000,
        },
    )
    .with_content_store(contents.clone());

    store
        .create(&CreateJob {
            content_id: Some(content_id),
            ..job_input()
        })
        .await
        .unwrap();
    processor.process_one().await.unwrap();

    let summary = contents.last_prediction(content_id).await.expect("summary");
    assert_eq!(summary.score, 0.82);
    assert_eq!(summary.best_hours_utc, vec![14, 18]);
    assert_eq!(summary.hashtags, vec!["#launch".to_string()]);
    assert_eq!(summary.raw["score"], json!(0.82));
}

#[tokio::test]
async fn content_hook_failure_does_not_fail_the_job() {
    let store = MemoryJobStore::arc();
    let contents = Arc::new(MemoryContentStore::new());
    let executor = ScriptedExecutor::always(Step::Exit(0, r#"{"score": 0.5}"#, ""));
    let processor = JobProcessor::new(
        store.clone(),
        executor,
        Arc::new(JobMetrics::new()),
        RetryPolicy {
            max_attempts: 5,
            base_backoff_seconds: 5,
            max_error_length: 2000,
        },
    )
    .with_content_store(contents);

    let job = store
        .create(&CreateJob {
            content_id: Some(Uuid::new_v4()),
            ..job_input()
        })
        .await
        .unwrap();

    assert_eq!(
        processor.process_one().await.unwrap(),
        CycleOutcome::Completed(job.id)
    );
    let done = store.find_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Done);
}

/// Executor that blocks until released.
#[derive(Debug, Default)]
struct GatedExecutor {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl PredictionExecutor for GatedExecutor {
    async fn execute(&self, _input: &Value) -> Result<ExecutionOutput, ExecutorError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(ExecutionOutput {
            exit_code: 0,
            stdout: "{}".to_string(),
            stderr: String::new(),
        })
    }
}

#[tokio::test]
async fn overlapping_cycle_reports_busy() {
    let store = MemoryJobStore::arc();
    let gate = Arc::new(GatedExecutor::default());
    let processor = Arc::new(JobProcessor::new(
        store.clone(),
        gate.clone(),
        Arc::new(JobMetrics::new()),
        RetryPolicy {
            max_attempts: 5,
            base_backoff_seconds: 5,
            max_error_length: 2000,
        },
    ));
    store.create(&job_input()).await.unwrap();
    store.create(&job_input()).await.unwrap();

    let first = {
        let processor = Arc::clone(&processor);
        tokio::spawn(async move { processor.process_one().await.unwrap() })
    };
    gate.entered.notified().await;

    assert!(processor.is_running());
    assert_eq!(processor.process_one().await.unwrap(), CycleOutcome::Busy);

    gate.release.notify_one();
    assert!(matches!(first.await.unwrap(), CycleOutcome::Completed(_)));
    assert!(!processor.is_running());
}

#[tokio::test]
async fn expired_claim_on_final_attempt_is_not_run_again() {
    let executor = ScriptedExecutor::always(Step::Exit(1, "", "boom"));
    let h = harness(executor.clone(), 2, 0);
    let job = h.store.create(&job_input()).await.unwrap();

    // A worker crashed during the second and last attempt.
    let mut stuck = job.clone();
    stuck.status = JobStatus::Processing;
    stuck.attempts = 2;
    stuck.processing_at = Some(Utc::now() - Duration::minutes(10));
    h.store.insert(stuck).await;

    let reclaimed = h
        .store
        .reclaim_stale(Utc::now() - Duration::minutes(5), 2)
        .await
        .unwrap();
    assert_eq!(reclaimed, ReclaimedJobs { requeued: 0, failed: 1 });

    assert_eq!(h.processor.process_one().await.unwrap(), CycleOutcome::Idle);
    assert_eq!(executor.call_count(), 0);

    let failed = h.store.find_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts, 2);
}

#[tokio::test]
async fn reclaimed_job_only_records_its_new_claimant() {
    let store = MemoryJobStore::arc();
    let policy = RetryPolicy {
        max_attempts: 5,
        base_backoff_seconds: 5,
        max_error_length: 2000,
    };
    let gate = Arc::new(GatedExecutor::default());
    let slow_metrics = Arc::new(JobMetrics::new());
    let slow = Arc::new(JobProcessor::new(
        store.clone(),
        gate.clone(),
        slow_metrics.clone(),
        policy,
    ));
    let fast_executor = ScriptedExecutor::always(Step::Exit(0, r#"{"score": 1}"#, ""));
    let fast = JobProcessor::new(
        store.clone(),
        fast_executor.clone(),
        Arc::new(JobMetrics::new()),
        policy,
    );
    let job = store.create(&job_input()).await.unwrap();

    let first = {
        let slow = Arc::clone(&slow);
        tokio::spawn(async move { slow.process_one().await })
    };
    gate.entered.notified().await;

    let reclaimed = store
        .reclaim_stale(Utc::now() + Duration::seconds(1), policy.max_attempts)
        .await
        .unwrap();
    assert_eq!(reclaimed.requeued, 1);
    assert_eq!(
        fast.process_one().await.unwrap(),
        CycleOutcome::Completed(job.id)
    );

    gate.release.notify_one();
    let err = first.await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
    assert_eq!(slow_metrics.snapshot().processed, 0);

    let done = store.find_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Done);
    assert_eq!(done.attempts, 2);
    assert_eq!(done.result, Some(json!({"score": 1})));
    assert_eq!(fast_executor.call_count(), 1);
}

/// Job store whose saves always fail once the job has been claimed.
#[derive(Debug, Default)]
struct BrokenSaveStore {
    inner: MemoryJobStore,
}

#[async_trait]
impl JobStore for BrokenSaveStore {
    async fn create(&self, data: &CreateJob) -> AppResult<PredictionJob> {
        self.inner.create(data).await
    }

    async fn claim_due_job(&self, now: chrono::DateTime<Utc>) -> AppResult<Option<PredictionJob>> {
        self.inner.claim_due_job(now).await
    }

    async fn save(&self, _job: &PredictionJob) -> AppResult<PredictionJob> {
        Err(AppError::database("connection reset"))
    }

    async fn save_claimed(
        &self,
        _job: &PredictionJob,
        _claimed_at: chrono::DateTime<Utc>,
    ) -> AppResult<PredictionJob> {
        Err(AppError::database("connection reset"))
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<PredictionJob>> {
        self.inner.find_by_id(id).await
    }

    async fn find_filtered(
        &self,
        filter: &JobFilter,
        page: &PageRequest,
    ) -> AppResult<PageResponse<PredictionJob>> {
        self.inner.find_filtered(filter, page).await
    }

    async fn count_by_status(&self, status: JobStatus) -> AppResult<u64> {
        self.inner.count_by_status(status).await
    }

    async fn cancel_pending(
        &self,
        id: Uuid,
        owner: Option<Uuid>,
        cancelled_by: Uuid,
        now: chrono::DateTime<Utc>,
    ) -> AppResult<Option<PredictionJob>> {
        self.inner.cancel_pending(id, owner, cancelled_by, now).await
    }

    async fn reclaim_stale(
        &self,
        cutoff: chrono::DateTime<Utc>,
        max_attempts: u32,
    ) -> AppResult<ReclaimedJobs> {
        self.inner.reclaim_stale(cutoff, max_attempts).await
    }
}

#[tokio::test]
async fn store_failure_aborts_the_cycle() {
    let store = Arc::new(BrokenSaveStore::default());
    let executor = ScriptedExecutor::always(Step::Exit(0, "{}", ""));
    let metrics = Arc::new(JobMetrics::new());
    let processor = JobProcessor::new(
        store.clone(),
        executor.clone(),
        metrics.clone(),
        RetryPolicy {
            max_attempts: 5,
            base_backoff_seconds: 5,
            max_error_length: 2000,
        },
    );
    let job = store.create(&job_input()).await.unwrap();

    let err = processor.process_one().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Database);
    assert_eq!(executor.call_count(), 0);
    assert_eq!(metrics.snapshot().attempts, 0);
    assert!(!processor.is_running());

    let stuck = store.find_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(stuck.status, JobStatus::Processing);
    assert_eq!(stuck.attempts, 0);
}
