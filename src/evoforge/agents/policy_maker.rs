//! Policy maker agent: materializes a selection policy and applies it.
//!
//! [`materialize_and_select`](PolicyMakerAgent::materialize_and_select) is
//! the single entry for the selecting stage: it resolves the strategy,
//! ranks the round's variants on the four objective axes, runs the
//! diversity guard, and persists the versioned
//! [`Policy`](crate::models::Policy) *and* the `is_selected` marks through
//! one store transaction. Policy activation and selection are never
//! observable apart; a failure anywhere before the store write leaves
//! neither.
//!
//! Two decision rows per round: `policy_created` and `selection_applied`.
//!
//! The operation is intentionally not idempotent: a second application
//! would double-select. The orchestrator calls it exactly once per round.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::agents::{AgentContext, AgentRuntime, AgentType};
use crate::error::{EvoError, EvoResult};
use crate::models::decision::DecisionDraft;
use crate::models::{Policy, PolicyType};
use crate::selection::{
    diversity_guard, materialize_policy_config, rank_variants, resolve_adaptive, select_count,
    weights_json, ObjectiveWeights, SelectionStrategy,
};

/// Result of applying a selection policy to a round.
#[derive(Debug, Clone)]
pub struct SelectionResult {
    pub policy_id: Uuid,
    pub total_variants: usize,
    pub selected_ids: Vec<Uuid>,
    pub selection_rate: f64,
}

/// The policy maker.
pub struct PolicyMakerAgent {
    runtime: Arc<AgentRuntime>,
}

impl PolicyMakerAgent {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }

    /// Materialize a selection policy for the round and apply it in the
    /// same store transaction. Requires `context.round_id`.
    ///
    /// Returns the activated policy and the selection outcome.
    pub async fn materialize_and_select(
        &self,
        context: &AgentContext,
        round_number: u32,
        selection_pressure: f64,
        strategy: SelectionStrategy,
    ) -> EvoResult<(Policy, SelectionResult)> {
        self.runtime
            .run_with_tracing(AgentType::PolicyMaker, context, |span_id| async move {
                let round_id = context.round_id.ok_or_else(|| {
                    EvoError::Store("round_id required in context for selection".into())
                })?;

                let variants = self.runtime.store.variants_by_round(round_id).await;
                let evaluations = self.runtime.store.evaluations_by_round(round_id).await;
                let summary = self.runtime.store.round_evaluation_summary(round_id).await;

                let resolved = match strategy {
                    SelectionStrategy::Adaptive => {
                        resolve_adaptive(round_number, summary.average_score)
                    }
                    other => other,
                };
                let count = select_count(variants.len(), selection_pressure);
                let min_lineages = match resolved {
                    SelectionStrategy::Diversity => (count / 3).max(1),
                    _ => 1,
                };

                let policy_reasoning = match resolved {
                    SelectionStrategy::TopK => format!(
                        "Top-k selection: keep the {} best composites of {} variants.",
                        count,
                        variants.len()
                    ),
                    SelectionStrategy::Tournament { size } => format!(
                        "Tournament selection (size {}): scores are still low, pressure toward better solutions; keeping {}.",
                        size, count
                    ),
                    SelectionStrategy::Diversity => format!(
                        "Diversity selection: early rounds keep {} variants across distinct lineages to avoid premature convergence.",
                        count
                    ),
                    SelectionStrategy::Adaptive => unreachable!("adaptive resolves above"),
                };

                // Rank and guard before anything is persisted; the store
                // write below is the only mutation.
                let weights = ObjectiveWeights::for_pressure(selection_pressure);
                let ranked = rank_variants(&variants, &evaluations, weights);
                let selected_ids = diversity_guard(&ranked, count, min_lineages);

                let config = materialize_policy_config(
                    strategy,
                    resolved,
                    round_number,
                    selection_pressure,
                    count,
                );
                let policy = Policy::new(
                    context.campaign_id,
                    format!(
                        "{} selection policy (round {})",
                        resolved.as_str(),
                        round_number
                    ),
                    PolicyType::Selection,
                    config.clone(),
                );
                let policy = self
                    .runtime
                    .store
                    .create_policy_version_and_select(policy, round_id, &selected_ids)
                    .await?;

                // Both decision rows carry the policy scope.
                let scoped = context.clone().with_policy(policy.id);

                let draft = DecisionDraft::new(
                    AgentType::PolicyMaker.as_str(),
                    "policy_created",
                    policy_reasoning.as_str(),
                )
                .with_input(json!({
                    "round_number": round_number,
                    "strategy": strategy.as_str(),
                    "selection_pressure": selection_pressure,
                    "total_variants": variants.len(),
                    "average_score": summary.average_score,
                }))
                .with_output(json!({
                    "policy_id": policy.id,
                    "version": policy.version,
                    "select_count": count,
                    "config": config,
                }))
                .with_confidence(0.8);
                self.runtime
                    .audit
                    .record_decision(&context.trace, &span_id, scoped.scope(), draft)
                    .await?;

                let selection_reasoning = format!(
                    "Applied {} policy v{}: ranked {} variants on evaluation/novelty/diversity/innovation and selected {} across at least {} lineage(s), in the same transaction that activated the policy.",
                    resolved.as_str(),
                    policy.version,
                    variants.len(),
                    selected_ids.len(),
                    min_lineages.min(selected_ids.len().max(1)),
                );
                let draft = DecisionDraft::new(
                    AgentType::PolicyMaker.as_str(),
                    "selection_applied",
                    selection_reasoning.as_str(),
                )
                .with_input(json!({
                    "policy_id": policy.id,
                    "total_variants": variants.len(),
                    "select_count": count,
                    "min_lineages": min_lineages,
                    "weights": weights_json(weights),
                }))
                .with_output(json!({
                    "selected_count": selected_ids.len(),
                    "selected_ids": selected_ids,
                    "ranking": ranked.iter().take(20).map(|r| json!({
                        "variant_id": r.variant_id,
                        "objectives": r.objectives_json(),
                    })).collect::<Vec<_>>(),
                }))
                .with_confidence(0.85);
                self.runtime
                    .audit
                    .record_decision(&context.trace, &span_id, scoped.scope(), draft)
                    .await?;

                log::info!(
                    "policy created and applied policy_id={} version={} strategy={} selected={}/{} trace_id={}",
                    policy.id,
                    policy.version,
                    resolved.as_str(),
                    selected_ids.len(),
                    variants.len(),
                    context.trace.trace_id
                );

                let result = SelectionResult {
                    policy_id: policy.id,
                    total_variants: variants.len(),
                    selection_rate: if variants.is_empty() {
                        0.0
                    } else {
                        selected_ids.len() as f64 / variants.len() as f64
                    },
                    selected_ids,
                };
                Ok((policy, result))
            })
            .await
    }
}
