use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use evoforge::agents::{AgentRuntime, ReporterConfig};
use evoforge::audit::AuditLog;
use evoforge::evaluator::{
    EvaluationConfig, EvaluatorBackend, EvaluatorDispatcher, EvaluatorVerdict,
};
use evoforge::event::{EventBus, ExperimentEvent};
use evoforge::jobs::{JobRunner, JobTracker};
use evoforge::metrics::AgentMetrics;
use evoforge::models::{
    CampaignConfig, CampaignStatus, EvaluatorType, JobStatus, RoundStatus, TaskType, Variant,
};
use evoforge::orchestrator::Orchestrator;
use evoforge::registry::ToolRegistry;
use evoforge::store::Store;
use uuid::Uuid;

/// Backend that takes a beat per evaluation, giving cancellation a window.
struct SlowConstScore(f64, u64);

#[async_trait]
impl EvaluatorBackend for SlowConstScore {
    async fn evaluate(
        &self,
        _variant: &Variant,
        _config: &EvaluationConfig,
    ) -> Result<EvaluatorVerdict, Box<dyn Error + Send + Sync>> {
        tokio::time::sleep(Duration::from_millis(self.1)).await;
        Ok(EvaluatorVerdict {
            score: self.0,
            feedback: "slow constant score".into(),
            criteria_scores: Default::default(),
        })
    }
}

fn build(store: Arc<Store>, eval_delay_ms: u64) -> (Arc<JobTracker>, JobRunner, EventBus) {
    let _ = env_logger::builder().is_test(true).try_init();
    let audit = Arc::new(AuditLog::new(store.clone()));
    let registry = Arc::new(ToolRegistry::new(audit.clone()));
    let runtime = Arc::new(AgentRuntime::new(
        store.clone(),
        registry,
        audit,
        Arc::new(AgentMetrics::new()),
    ));
    let dispatcher = EvaluatorDispatcher::new(store)
        .with_concurrency(2)
        .with_backend(
            EvaluatorType::LlmJudge,
            Arc::new(SlowConstScore(0.5, eval_delay_ms)),
        );
    let events = EventBus::default();
    let orchestrator = Arc::new(Orchestrator::new(
        runtime,
        Arc::new(dispatcher),
        ReporterConfig::default(),
        events.clone(),
    ));
    let tracker = Arc::new(JobTracker::new());
    let runner = JobRunner::new(tracker.clone(), orchestrator);
    (tracker, runner, events)
}

async fn wait_terminal(tracker: &JobTracker, job_id: Uuid) -> evoforge::models::Job {
    for _ in 0..600 {
        if let Some(job) = tracker.get(job_id) {
            if job.status.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {} never reached a terminal state", job_id);
}

#[test]
fn test_tracker_lifecycle_and_progress_clamping() {
    let tracker = JobTracker::new();
    let (job, _token) = tracker.create(TaskType::ExecuteRound, None, Some(1), Uuid::new_v4());
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.started_at.is_none());

    // First progress update flips pending -> running and stamps started_at.
    tracker.update_progress(job.id, 0.4);
    let running = tracker.get(job.id).unwrap();
    assert_eq!(running.status, JobStatus::Running);
    assert!(running.started_at.is_some());

    // Progress is clamped on both ends.
    tracker.update_progress(job.id, 7.5);
    assert!((tracker.get(job.id).unwrap().progress - 1.0).abs() < 1e-9);
    tracker.update_progress(job.id, -3.0);
    assert_eq!(tracker.get(job.id).unwrap().progress, 0.0);

    tracker.complete(job.id, serde_json::json!({"done": true}));
    let done = tracker.get(job.id).unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert!((done.progress - 1.0).abs() < 1e-9);
    assert!(done.completed_at.is_some());
    assert!(done.duration_seconds().is_some());

    // Terminal states are sticky.
    tracker.fail(job.id, "late failure".into());
    assert_eq!(tracker.get(job.id).unwrap().status, JobStatus::Completed);
}

#[test]
fn test_tracker_list_filters() {
    let tracker = JobTracker::new();
    let campaign_a = Uuid::new_v4();
    let campaign_b = Uuid::new_v4();
    let (job_a, _) = tracker.create(TaskType::ExecuteRound, Some(campaign_a), Some(1), Uuid::new_v4());
    let (job_b, _) = tracker.create(TaskType::ExecuteCampaign, Some(campaign_b), None, Uuid::new_v4());
    tracker.update_progress(job_b.id, 0.1);

    assert_eq!(tracker.list(None, None).len(), 2);
    assert_eq!(tracker.list(Some(campaign_a), None).len(), 1);
    assert_eq!(tracker.list(None, Some(JobStatus::Running)).len(), 1);
    assert_eq!(
        tracker.list(Some(campaign_a), Some(JobStatus::Running)).len(),
        0
    );
    assert_eq!(tracker.list(None, None)[1].id, job_a.id);
}

#[test]
fn test_cleanup_removes_only_old_terminal_jobs() {
    let tracker = JobTracker::new();
    let (done, _) = tracker.create(TaskType::ExecuteRound, None, Some(1), Uuid::new_v4());
    tracker.complete(done.id, serde_json::json!({}));
    let (live, _) = tracker.create(TaskType::ExecuteRound, None, Some(2), Uuid::new_v4());
    tracker.update_progress(live.id, 0.5);

    std::thread::sleep(Duration::from_millis(10));
    let removed = tracker.cleanup(Duration::from_millis(0));
    assert_eq!(removed, 1);
    assert!(tracker.get(done.id).is_none());
    assert!(tracker.get(live.id).is_some());

    // Recent terminal jobs survive a generous max_age.
    let (recent, _) = tracker.create(TaskType::ExecuteRound, None, Some(3), Uuid::new_v4());
    tracker.complete(recent.id, serde_json::json!({}));
    assert_eq!(tracker.cleanup(Duration::from_secs(3600)), 0);
    assert!(tracker.get(recent.id).is_some());
}

#[test]
fn test_delete_job() {
    let tracker = JobTracker::new();
    let (job, _) = tracker.create(TaskType::ExecuteRound, None, Some(1), Uuid::new_v4());
    assert!(tracker.delete(job.id));
    assert!(!tracker.delete(job.id));
    assert!(tracker.get(job.id).is_none());
}

#[tokio::test]
async fn test_submit_round_completes_with_stage_progress() {
    let store = Arc::new(Store::new());
    let (tracker, runner, _events) = build(store.clone(), 0);
    let campaign = store
        .create_campaign(
            "job round",
            None,
            CampaignConfig {
                variants_per_round: 2,
                ..CampaignConfig::default()
            },
        )
        .await
        .unwrap();
    store.start_campaign(campaign.id).await.unwrap();

    let job = runner.submit_round(campaign.id, 1, None);
    assert_eq!(job.task_type, TaskType::ExecuteRound);
    assert_eq!(job.round_number, Some(1));

    let done = wait_terminal(&tracker, job.id).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert!((done.progress - 1.0).abs() < 1e-9);
    let result = done.result.unwrap();
    assert_eq!(result["round_number"], serde_json::json!(1));
    assert!(result["report_id"].is_string());
}

#[tokio::test]
async fn test_submit_campaign_carries_trace_id_into_errors() {
    let store = Arc::new(Store::new());
    let (tracker, runner, _events) = build(store.clone(), 0);

    // Unknown campaign: the job fails and the error carries the trace id.
    let trace_id = Uuid::new_v4();
    let job = runner.submit_campaign(Uuid::new_v4(), None, Some(trace_id));
    assert_eq!(job.trace_id, trace_id);

    let done = wait_terminal(&tracker, job.id).await;
    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.error.unwrap().contains(&trace_id.to_string()));
}

#[tokio::test]
async fn test_campaign_job_runs_to_completion() {
    let store = Arc::new(Store::new());
    let (tracker, runner, _events) = build(store.clone(), 0);
    let campaign = store
        .create_campaign(
            "job campaign",
            None,
            CampaignConfig {
                max_rounds: 2,
                variants_per_round: 2,
                ..CampaignConfig::default()
            },
        )
        .await
        .unwrap();

    let job = runner.submit_campaign(campaign.id, None, None);
    let done = wait_terminal(&tracker, job.id).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.result.unwrap()["rounds_completed"], serde_json::json!(2));

    let campaign = store.get_campaign(campaign.id).await.unwrap();
    assert_eq!(campaign.status, CampaignStatus::Completed);
}

#[tokio::test]
async fn test_cancellation_mid_campaign() {
    let store = Arc::new(Store::new());
    // Slow evaluations give us time to cancel during round 2.
    let (tracker, runner, events) = build(store.clone(), 150);
    let campaign = store
        .create_campaign(
            "cancelled campaign",
            None,
            CampaignConfig {
                max_rounds: 5,
                variants_per_round: 2,
                ..CampaignConfig::default()
            },
        )
        .await
        .unwrap();

    let mut rx = events.subscribe();
    let job = runner.submit_campaign(campaign.id, None, None);

    // Wait for round 2 to start, then cancel.
    loop {
        let event = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out waiting for round 2")
            .unwrap();
        if let ExperimentEvent::RoundStarted { round_number: 2, .. } = event {
            break;
        }
    }
    // Let round 2's row land so the boundary check has a round to fail.
    for _ in 0..200 {
        if store.round_by_number(campaign.id, 2).await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tracker.cancel(job.id).unwrap();

    let done = wait_terminal(&tracker, job.id).await;
    assert_eq!(done.status, JobStatus::Cancelled);

    // Round 1 finished before the cancel; round 2 was failed by the
    // boundary check; the campaign is failed.
    let round1 = store.round_by_number(campaign.id, 1).await.unwrap();
    assert_eq!(round1.status, RoundStatus::Completed);
    let round2 = store.round_by_number(campaign.id, 2).await.unwrap();
    assert_eq!(round2.status, RoundStatus::Failed);
    let campaign = store.get_campaign(campaign.id).await.unwrap();
    assert_eq!(campaign.status, CampaignStatus::Failed);
}
