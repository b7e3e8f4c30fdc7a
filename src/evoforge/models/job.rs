//! Job entity: an asynchronous handle to an orchestrator run.
//!
//! Jobs decouple submission from execution: the caller gets the job id
//! immediately and polls (or subscribes to the event bus) while the
//! orchestrator runs on its own task. Transitions:
//!
//! ```text
//! pending ──first progress──▶ running ──▶ completed | failed | cancelled
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Which orchestrator entry point the job drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ExecuteRound,
    ExecuteCampaign,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::ExecuteRound => "execute_round",
            TaskType::ExecuteCampaign => "execute_campaign",
        }
    }
}

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// Tracking record for one submitted run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub task_type: TaskType,
    pub campaign_id: Option<Uuid>,
    pub round_number: Option<u32>,
    pub trace_id: Uuid,
    pub status: JobStatus,
    /// Clamped to `[0, 1]`.
    pub progress: f64,
    pub result: Option<Value>,
    /// Short failure message carrying the trace id for correlation.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        task_type: TaskType,
        campaign_id: Option<Uuid>,
        round_number: Option<u32>,
        trace_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type,
            campaign_id,
            round_number,
            trace_id,
            status: JobStatus::Pending,
            progress: 0.0,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Wall-clock duration from first progress to completion (or now).
    pub fn duration_seconds(&self) -> Option<f64> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some((end - started).num_milliseconds() as f64 / 1000.0)
    }
}
