//! Tamper-evident audit log.
//!
//! Two append-only streams keyed by trace id: agent decisions and tool
//! access records. Decision rows are SHA-256 hash-chained per trace: each
//! row's `hash` covers its canonical fields plus the previous row's hash,
//! so any post-hoc edit of an earlier decision breaks every hash after it.
//!
//! ```text
//! trace 7f3a…
//!   ├─ decision #0  round_plan          hash=ab12…   prev=""
//!   ├─ decision #1  variant_generated   hash=cd34…   prev=ab12…
//!   └─ decision #2  selection_applied   hash=ef56…   prev=cd34…
//! ```
//!
//! Every agent execution writes at least one decision row before returning;
//! a failing execution still writes a failure row whose reasoning carries
//! the failure message. That discipline lives in
//! [`AgentRuntime::run_with_tracing`](crate::agents::AgentRuntime::run_with_tracing);
//! this module owns the chain arithmetic and verification.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{EvoError, EvoResult};
use crate::models::decision::{AgentDecision, DecisionDraft};
use crate::models::ToolAccessLog;
use crate::store::Store;
use crate::trace::TraceContext;

/// Entity references a decision row is scoped to.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionScope {
    pub campaign_id: Option<Uuid>,
    pub round_id: Option<Uuid>,
    pub variant_id: Option<Uuid>,
    pub policy_id: Option<Uuid>,
}

/// Writer and verifier for the audit streams.
pub struct AuditLog {
    store: Arc<Store>,
}

impl AuditLog {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Append one decision row, chaining it to the trace's current head.
    ///
    /// Returns `EvoError::Audit` when the reasoning is empty; an agent that
    /// cannot explain itself does not get to act.
    pub async fn record_decision(
        &self,
        trace: &TraceContext,
        span_id: &str,
        scope: DecisionScope,
        draft: DecisionDraft,
    ) -> EvoResult<AgentDecision> {
        if draft.reasoning.trim().is_empty() {
            return Err(EvoError::Audit(
                "agent decision reasoning must not be empty".into(),
            ));
        }

        let prev_hash = self
            .store
            .last_decision_hash(trace.trace_id)
            .await
            .unwrap_or_default();

        let created_at = Utc::now();
        let hash = compute_decision_hash(
            trace.trace_id,
            span_id,
            &draft.agent_type,
            &draft.decision_type,
            &draft.input_data,
            &draft.output_data,
            &draft.reasoning,
            &created_at.to_rfc3339(),
            &prev_hash,
        );

        let decision = AgentDecision {
            id: Uuid::new_v4(),
            trace_id: trace.trace_id,
            span_id: span_id.to_string(),
            agent_type: draft.agent_type,
            decision_type: draft.decision_type,
            campaign_id: scope.campaign_id,
            round_id: scope.round_id,
            variant_id: scope.variant_id,
            policy_id: scope.policy_id,
            input_data: draft.input_data,
            output_data: draft.output_data,
            reasoning: draft.reasoning,
            confidence_score: draft.confidence_score,
            llm_config: draft.llm_config,
            token_usage: draft.token_usage,
            duration_ms: draft.duration_ms,
            prev_hash,
            hash,
            created_at,
        };

        self.store.append_decision(decision).await
    }

    /// Append one tool access row. Called by the registry on every tool
    /// invocation, success or failure.
    pub async fn record_tool_access(&self, log: ToolAccessLog) -> EvoResult<ToolAccessLog> {
        self.store
            .append_tool_log(log)
            .await
            .map_err(|e| EvoError::Audit(e.to_string()))
    }

    /// Walk one trace's decision chain and verify every link.
    ///
    /// Returns `true` when each row's `prev_hash` matches the preceding
    /// row's `hash` and each `hash` matches its recomputed value.
    pub async fn verify_trace(&self, trace_id: Uuid) -> bool {
        let decisions = self.store.decisions_by_trace(trace_id).await;
        let mut prev_hash = String::new();
        for d in &decisions {
            if d.prev_hash != prev_hash {
                return false;
            }
            let expected = compute_decision_hash(
                d.trace_id,
                &d.span_id,
                &d.agent_type,
                &d.decision_type,
                &d.input_data,
                &d.output_data,
                &d.reasoning,
                &d.created_at.to_rfc3339(),
                &d.prev_hash,
            );
            if d.hash != expected {
                return false;
            }
            prev_hash = d.hash.clone();
        }
        true
    }
}

/// SHA-256 over the canonical pipe-joined representation of a decision.
///
/// JSON payloads are serialized compactly; any field change produces a
/// different hash.
#[allow(clippy::too_many_arguments)]
fn compute_decision_hash(
    trace_id: Uuid,
    span_id: &str,
    agent_type: &str,
    decision_type: &str,
    input_data: &Value,
    output_data: &Value,
    reasoning: &str,
    created_at: &str,
    prev_hash: &str,
) -> String {
    let canonical = format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}",
        trace_id,
        span_id,
        agent_type,
        decision_type,
        input_data,
        output_data,
        reasoning,
        created_at,
        prev_hash
    );
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}
