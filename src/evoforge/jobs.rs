//! Job tracker and async runner.
//!
//! The tracker decouples HTTP callers from long-running execution: a submit
//! call registers a [`Job`](crate::models::Job) and returns immediately; the
//! runner spawns the orchestrator on the tokio runtime and feeds status,
//! progress, and the terminal result back into the tracker. Status queries
//! are cheap concurrent reads; each job has a single writer (its runner
//! task).
//!
//! Cancellation is cooperative: [`JobTracker::cancel`] sets the terminal
//! `cancelled` state and trips the job's token; the orchestrator observes it
//! at the next stage boundary and stops. An in-flight evaluator call may
//! finish first.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{EvoError, EvoResult};
use crate::models::{Job, JobStatus, TaskType};
use crate::orchestrator::{Orchestrator, RunControl};
use crate::trace::TraceContext;

/// In-memory registry of submitted jobs and their cancellation tokens.
#[derive(Default)]
pub struct JobTracker {
    jobs: RwLock<HashMap<Uuid, Job>>,
    tokens: RwLock<HashMap<Uuid, CancellationToken>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending job and its cancellation token.
    pub fn create(
        &self,
        task_type: TaskType,
        campaign_id: Option<Uuid>,
        round_number: Option<u32>,
        trace_id: Uuid,
    ) -> (Job, CancellationToken) {
        let job = Job::new(task_type, campaign_id, round_number, trace_id);
        let token = CancellationToken::new();
        self.jobs.write().unwrap().insert(job.id, job.clone());
        self.tokens.write().unwrap().insert(job.id, token.clone());
        log::info!(
            "job created job_id={} task_type={} trace_id={}",
            job.id,
            task_type.as_str(),
            trace_id
        );
        (job, token)
    }

    pub fn get(&self, job_id: Uuid) -> Option<Job> {
        self.jobs.read().unwrap().get(&job_id).cloned()
    }

    /// List jobs, optionally filtered, newest first.
    pub fn list(&self, campaign_id: Option<Uuid>, status: Option<JobStatus>) -> Vec<Job> {
        let jobs = self.jobs.read().unwrap();
        let mut result: Vec<Job> = jobs
            .values()
            .filter(|j| campaign_id.map_or(true, |c| j.campaign_id == Some(c)))
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result
    }

    /// Record progress (clamped). The first progress update moves the job
    /// `pending → running` and stamps `started_at`.
    pub fn update_progress(&self, job_id: Uuid, progress: f64) {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            if job.status.is_terminal() {
                return;
            }
            if job.status == JobStatus::Pending {
                job.status = JobStatus::Running;
                job.started_at = Some(Utc::now());
            }
            job.progress = progress.clamp(0.0, 1.0);
        }
    }

    /// Terminal: completed with a result payload.
    pub fn complete(&self, job_id: Uuid, result: serde_json::Value) {
        self.finish(job_id, JobStatus::Completed, Some(result), None);
    }

    /// Terminal: failed with a short message (the trace id travels in it).
    pub fn fail(&self, job_id: Uuid, error: String) {
        self.finish(job_id, JobStatus::Failed, None, Some(error));
    }

    /// Request cooperative cancellation: the terminal state is set here,
    /// the orchestrator stops at its next stage boundary.
    pub fn cancel(&self, job_id: Uuid) -> EvoResult<Job> {
        if let Some(token) = self.tokens.read().unwrap().get(&job_id) {
            token.cancel();
        }
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| EvoError::not_found("job", job_id))?;
        if !job.status.is_terminal() {
            job.status = JobStatus::Cancelled;
            job.completed_at = Some(Utc::now());
        }
        Ok(job.clone())
    }

    pub fn delete(&self, job_id: Uuid) -> bool {
        self.tokens.write().unwrap().remove(&job_id);
        self.jobs.write().unwrap().remove(&job_id).is_some()
    }

    /// Remove terminal jobs whose completion is older than `max_age`.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::hours(24));
        let mut jobs = self.jobs.write().unwrap();
        let doomed: Vec<Uuid> = jobs
            .values()
            .filter(|j| {
                j.status.is_terminal() && j.completed_at.map_or(false, |done| done < cutoff)
            })
            .map(|j| j.id)
            .collect();
        for id in &doomed {
            jobs.remove(id);
            self.tokens.write().unwrap().remove(id);
        }
        if !doomed.is_empty() {
            log::info!("jobs cleaned up count={}", doomed.len());
        }
        doomed.len()
    }

    fn finish(
        &self,
        job_id: Uuid,
        status: JobStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(job) = jobs.get_mut(&job_id) {
            if job.status.is_terminal() {
                return;
            }
            if job.status == JobStatus::Pending {
                job.started_at = Some(Utc::now());
            }
            job.status = status;
            job.completed_at = Some(Utc::now());
            if status == JobStatus::Completed {
                job.progress = 1.0;
            }
            if let Some(result) = result {
                job.result = Some(result);
            }
            if let Some(error) = error {
                job.error = Some(error);
            }
            log::info!(
                "job finished job_id={} status={} progress={:.2}",
                job_id,
                status.as_str(),
                job.progress
            );
        }
    }
}

/// Spawns orchestrator runs as tracked background jobs.
pub struct JobRunner {
    tracker: Arc<JobTracker>,
    orchestrator: Arc<Orchestrator>,
}

impl JobRunner {
    pub fn new(tracker: Arc<JobTracker>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            tracker,
            orchestrator,
        }
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    /// Submit a single-round execution; returns the pending job
    /// immediately. Progress lands at 0.2/0.4/0.6/0.8/1.0 per stage.
    pub fn submit_round(
        &self,
        campaign_id: Uuid,
        round_number: u32,
        trace_id: Option<Uuid>,
    ) -> Job {
        let trace = trace_id
            .map(TraceContext::with_trace_id)
            .unwrap_or_default();
        let (job, token) = self.tracker.create(
            TaskType::ExecuteRound,
            Some(campaign_id),
            Some(round_number),
            trace.trace_id,
        );

        let tracker = self.tracker.clone();
        let orchestrator = self.orchestrator.clone();
        let job_id = job.id;
        tokio::spawn(async move {
            tracker.update_progress(job_id, 0.0);
            let progress_tracker = tracker.clone();
            let control = RunControl::new(
                token,
                Some(Arc::new(move |p| progress_tracker.update_progress(job_id, p))),
            );
            let outcome = orchestrator
                .execute_round(campaign_id, round_number, trace, &control)
                .await;
            Self::settle(&tracker, job_id, trace, outcome.map(|r| {
                json!({
                    "round_id": r.round_id,
                    "round_number": r.round_number,
                    "variants_generated": r.variants_generated,
                    "variants_evaluated": r.variants_evaluated,
                    "variants_selected": r.variants_selected,
                    "average_score": r.average_score,
                    "report_id": r.report_id,
                })
            }));
        });

        job
    }

    /// Submit a campaign execution; progress is completed rounds over the
    /// round budget.
    pub fn submit_campaign(
        &self,
        campaign_id: Uuid,
        max_rounds: Option<u32>,
        trace_id: Option<Uuid>,
    ) -> Job {
        let trace = trace_id
            .map(TraceContext::with_trace_id)
            .unwrap_or_default();
        let (job, token) = self.tracker.create(
            TaskType::ExecuteCampaign,
            Some(campaign_id),
            None,
            trace.trace_id,
        );

        let tracker = self.tracker.clone();
        let orchestrator = self.orchestrator.clone();
        let job_id = job.id;
        tokio::spawn(async move {
            tracker.update_progress(job_id, 0.0);
            let progress_tracker = tracker.clone();
            let control = RunControl::new(
                token,
                Some(Arc::new(move |p| progress_tracker.update_progress(job_id, p))),
            );
            let outcome = orchestrator
                .execute_campaign(campaign_id, max_rounds, trace, &control)
                .await;
            Self::settle(&tracker, job_id, trace, outcome.map(|r| {
                json!({
                    "campaign_id": r.campaign_id,
                    "rounds_completed": r.rounds_completed,
                    "final_report_id": r.final_report_id,
                })
            }));
        });

        job
    }

    fn settle(
        tracker: &JobTracker,
        job_id: Uuid,
        trace: TraceContext,
        outcome: EvoResult<serde_json::Value>,
    ) {
        match outcome {
            Ok(result) => tracker.complete(job_id, result),
            Err(EvoError::Cancelled) => {
                // cancel() already set the terminal state; this is a no-op
                // when the token came from the tracker.
                let _ = tracker.cancel(job_id);
            }
            Err(err) => tracker.fail(
                job_id,
                format!("{} (trace_id={})", err, trace.trace_id),
            ),
        }
    }
}
