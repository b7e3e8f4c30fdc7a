//! Evaluation entity and evaluator typing.
//!
//! An evaluation scores one variant under one evaluator kind. `score` stays
//! `None` until the row reaches `completed`; `result_data` carries the
//! feedback, per-criterion breakdown, and (for ensembles) the per-component
//! results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The tagged evaluator kinds the dispatcher knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorType {
    LlmJudge,
    UnitTest,
    Benchmark,
    Ensemble,
}

impl EvaluatorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluatorType::LlmJudge => "llm_judge",
            EvaluatorType::UnitTest => "unit_test",
            EvaluatorType::Benchmark => "benchmark",
            EvaluatorType::Ensemble => "ensemble",
        }
    }
}

/// One weighted member of an ensemble evaluator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnsembleComponent {
    #[serde(rename = "type")]
    pub evaluator: EvaluatorType,
    pub weight: f64,
    /// Component-specific configuration, passed through to the backend.
    #[serde(default)]
    pub config: Value,
}

/// Evaluation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl EvaluationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationStatus::Pending => "pending",
            EvaluationStatus::Running => "running",
            EvaluationStatus::Completed => "completed",
            EvaluationStatus::Failed => "failed",
        }
    }
}

/// A scored (or scoring) variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: Uuid,
    pub variant_id: Uuid,
    pub round_id: Uuid,
    pub evaluator_type: EvaluatorType,
    pub status: EvaluationStatus,
    /// In `[0, 1]`; `None` until completed (budget blocks persist 0.0 on the
    /// failed row).
    pub score: Option<f64>,
    /// `feedback`, `criteria_scores`, and for ensembles the per-component
    /// breakdown under `ensemble`.
    pub result_data: Value,
    /// The evaluator configuration this run used, persisted for
    /// reproducibility.
    pub evaluation_config: Value,
    /// Engine bookkeeping, including the config fingerprint the cache keys on.
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Evaluation {
    /// Create a pending evaluation row.
    pub fn new(
        variant_id: Uuid,
        round_id: Uuid,
        evaluator_type: EvaluatorType,
        evaluation_config: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            variant_id,
            round_id,
            evaluator_type,
            status: EvaluationStatus::Pending,
            score: None,
            result_data: Value::Object(Default::default()),
            evaluation_config,
            metadata: Value::Object(Default::default()),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Finish the row in `completed` state with a clamped score.
    pub fn complete(&mut self, score: f64, result_data: Value) {
        self.status = EvaluationStatus::Completed;
        self.score = Some(score.clamp(0.0, 1.0));
        self.result_data = result_data;
        self.completed_at = Some(Utc::now());
    }

    /// Finish the row in `failed` state. `score` is usually `None`; budget
    /// blocks persist an explicit 0.0.
    pub fn fail(&mut self, score: Option<f64>, result_data: Value) {
        self.status = EvaluationStatus::Failed;
        self.score = score.map(|s| s.clamp(0.0, 1.0));
        self.result_data = result_data;
        self.completed_at = Some(Utc::now());
    }
}
