//! Round entity: one iteration of the five-stage pipeline.
//!
//! A round's status walks the stage order strictly:
//!
//! ```text
//! pending → planning → generating → evaluating → selecting → reporting → completed
//! ```
//!
//! Any non-terminal state may jump to `failed`. `started_at` is stamped on
//! entering `planning`, `completed_at` on entering `completed`, so the
//! observable status sequence doubles as the round's timeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EvoError, EvoResult};

/// Round pipeline stages plus the two terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Pending,
    Planning,
    Generating,
    Evaluating,
    Selecting,
    Reporting,
    Completed,
    Failed,
}

impl RoundStatus {
    /// The canonical stage order; `Failed` sits outside it.
    const ORDER: [RoundStatus; 7] = [
        RoundStatus::Pending,
        RoundStatus::Planning,
        RoundStatus::Generating,
        RoundStatus::Evaluating,
        RoundStatus::Selecting,
        RoundStatus::Reporting,
        RoundStatus::Completed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, RoundStatus::Completed | RoundStatus::Failed)
    }

    /// Whether `self → next` is a legal transition: either the immediately
    /// following stage, or a jump to `failed` from any non-terminal state.
    pub fn can_transition_to(&self, next: RoundStatus) -> bool {
        if next == RoundStatus::Failed {
            return !self.is_terminal();
        }
        let from = Self::ORDER.iter().position(|s| s == self);
        let to = Self::ORDER.iter().position(|s| *s == next);
        match (from, to) {
            (Some(f), Some(t)) => t == f + 1,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Pending => "pending",
            RoundStatus::Planning => "planning",
            RoundStatus::Generating => "generating",
            RoundStatus::Evaluating => "evaluating",
            RoundStatus::Selecting => "selecting",
            RoundStatus::Reporting => "reporting",
            RoundStatus::Completed => "completed",
            RoundStatus::Failed => "failed",
        }
    }
}

/// One round of a campaign. `unique(campaign_id, round_number)` is enforced
/// by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: Uuid,
    pub campaign_id: Uuid,
    /// 1-based position within the campaign.
    pub round_number: u32,
    pub status: RoundStatus,
    /// The planner's serialized [`RoundPlan`](crate::agents::planner::RoundPlan).
    pub plan: Option<Value>,
    /// Aggregates written as the round progresses (counts, scores).
    pub metrics: Value,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Round {
    pub fn new(campaign_id: Uuid, round_number: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            round_number,
            status: RoundStatus::Pending,
            plan: None,
            metrics: Value::Object(Default::default()),
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Advance the round to `next`, stamping timers on the planning and
    /// completed boundaries. Illegal transitions are refused.
    pub fn transition(&mut self, next: RoundStatus) -> EvoResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(EvoError::InvalidStateTransition {
                entity: "round".into(),
                current: self.status.as_str().into(),
                attempted: format!("transition to {}", next.as_str()),
            });
        }
        let now = Utc::now();
        if next == RoundStatus::Planning && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next == RoundStatus::Completed {
            self.completed_at = Some(now);
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Read `average_score` out of the metrics blob, if present.
    pub fn average_score(&self) -> Option<f64> {
        self.metrics.get("average_score").and_then(Value::as_f64)
    }
}
