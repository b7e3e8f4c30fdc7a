//! Agent decision row: the append-only record of every agent choice.
//!
//! Each row carries the run's trace id, the span id of the invocation that
//! produced it, and a non-empty `reasoning` string (non-negotiable). Rows
//! are SHA-256 hash-chained per trace (`prev_hash` points at the previous
//! decision in the same trace), so post-hoc tampering is detectable by
//! [`AuditLog::verify_trace`](crate::audit::AuditLog::verify_trace).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One logical decision by one agent. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDecision {
    pub id: Uuid,
    pub trace_id: Uuid,
    /// 16-hex-char id of the span active when the decision was made.
    pub span_id: String,
    /// Which agent decided: `planner`, `variant_generator`, `scorer`,
    /// `policy_maker`, `reporter`.
    pub agent_type: String,
    /// What kind of decision: `round_plan`, `variant_generated`,
    /// `variant_evaluated`, `policy_created`, `selection_applied`,
    /// `report_generated`, `execution_failed`.
    pub decision_type: String,
    pub campaign_id: Option<Uuid>,
    pub round_id: Option<Uuid>,
    pub variant_id: Option<Uuid>,
    pub policy_id: Option<Uuid>,
    pub input_data: Value,
    pub output_data: Value,
    /// Required, never empty. Failure rows carry the failure message here.
    pub reasoning: String,
    pub confidence_score: Option<f64>,
    /// LLM parameters in effect for the decision, when any.
    pub llm_config: Value,
    /// Token accounting for the decision, when any.
    pub token_usage: Value,
    pub duration_ms: Option<u64>,
    /// Hash of the previous decision in this trace; empty for the first.
    pub prev_hash: String,
    /// SHA-256 over this row's canonical fields chained to `prev_hash`.
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

/// Builder-ish input for a decision row; the [`AuditLog`](crate::audit::AuditLog)
/// fills in ids, chain hashes, and the timestamp at append time.
#[derive(Debug, Clone)]
pub struct DecisionDraft {
    pub agent_type: String,
    pub decision_type: String,
    pub input_data: Value,
    pub output_data: Value,
    pub reasoning: String,
    pub confidence_score: Option<f64>,
    pub llm_config: Value,
    pub token_usage: Value,
    pub duration_ms: Option<u64>,
}

impl DecisionDraft {
    pub fn new(
        agent_type: impl Into<String>,
        decision_type: impl Into<String>,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            agent_type: agent_type.into(),
            decision_type: decision_type.into(),
            input_data: Value::Object(Default::default()),
            output_data: Value::Object(Default::default()),
            reasoning: reasoning.into(),
            confidence_score: None,
            llm_config: Value::Object(Default::default()),
            token_usage: Value::Object(Default::default()),
            duration_ms: None,
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input_data = input;
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output_data = output;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence_score = Some(confidence);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}
