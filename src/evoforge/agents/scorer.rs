//! Scorer agent: a thin wrapper over the evaluator dispatcher.
//!
//! The scorer resolves the plan's evaluation strategy into a dispatcher
//! call (an explicit ensemble forces `evaluator_type = ensemble`, otherwise
//! the first configured evaluator runs) and writes one decision row per
//! evaluated variant.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::agents::planner::EvaluationStrategy;
use crate::agents::{AgentContext, AgentRuntime, AgentType};
use crate::error::EvoResult;
use crate::evaluator::{BatchOutcome, EvaluationConfig, EvaluationOutcome, EvaluatorDispatcher};
use crate::models::decision::DecisionDraft;
use crate::models::EvaluatorType;

/// The scorer.
pub struct ScorerAgent {
    runtime: Arc<AgentRuntime>,
    dispatcher: Arc<EvaluatorDispatcher>,
}

impl ScorerAgent {
    pub fn new(runtime: Arc<AgentRuntime>, dispatcher: Arc<EvaluatorDispatcher>) -> Self {
        Self {
            runtime,
            dispatcher,
        }
    }

    /// Translate a plan strategy into the dispatcher's evaluator type and
    /// config.
    pub fn resolve_strategy(strategy: &EvaluationStrategy) -> (EvaluatorType, EvaluationConfig) {
        let evaluator_type = if strategy.ensemble.is_some() {
            EvaluatorType::Ensemble
        } else {
            strategy.primary_evaluator
        };
        let config = EvaluationConfig {
            ensemble: strategy.ensemble.clone(),
            criteria_weights: strategy.criteria_weights.clone(),
            timeout_seconds: strategy.timeout_seconds,
            ..EvaluationConfig::default()
        };
        (evaluator_type, config)
    }

    /// Evaluate one variant, logging the scoring decision.
    pub async fn execute(
        &self,
        context: &AgentContext,
        variant_id: Uuid,
        evaluator_type: EvaluatorType,
        config: &EvaluationConfig,
    ) -> EvoResult<EvaluationOutcome> {
        self.runtime
            .run_with_tracing(AgentType::Scorer, context, |span_id| async move {
                let outcome = self
                    .dispatcher
                    .evaluate(variant_id, evaluator_type, config)
                    .await?;
                self.log_outcome(context, &span_id, &outcome).await?;
                Ok(outcome)
            })
            .await
    }

    /// Evaluate a batch under the plan's strategy, one decision row per
    /// variant. Results preserve request order; the ranking is score
    /// descending.
    pub async fn evaluate_batch(
        &self,
        context: &AgentContext,
        variant_ids: &[Uuid],
        strategy: &EvaluationStrategy,
    ) -> EvoResult<BatchOutcome> {
        self.runtime
            .run_with_tracing(AgentType::Scorer, context, |span_id| async move {
                let (evaluator_type, config) = Self::resolve_strategy(strategy);
                let batch = self
                    .dispatcher
                    .evaluate_batch(variant_ids, evaluator_type, &config)
                    .await?;

                for outcome in &batch.results {
                    self.log_outcome(context, &span_id, outcome).await?;
                }

                log::info!(
                    "batch evaluation complete count={} average_score={:.3} trace_id={}",
                    batch.results.len(),
                    batch.average_score,
                    context.trace.trace_id
                );
                Ok(batch)
            })
            .await
    }

    async fn log_outcome(
        &self,
        context: &AgentContext,
        span_id: &str,
        outcome: &EvaluationOutcome,
    ) -> EvoResult<()> {
        let evaluation = &outcome.evaluation;
        let feedback = evaluation
            .result_data
            .get("feedback")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("Evaluation produced no feedback")
            .to_string();

        let draft = DecisionDraft::new(
            AgentType::Scorer.as_str(),
            "variant_evaluated",
            feedback,
        )
        .with_input(json!({
            "variant_id": evaluation.variant_id,
            "evaluator_type": evaluation.evaluator_type.as_str(),
            "cached": outcome.cached,
            "blocked": outcome.blocked,
        }))
        .with_output(json!({
            "evaluation_id": evaluation.id,
            "score": evaluation.score,
            "status": evaluation.status.as_str(),
            "fallback_from": outcome.fallback_from.map(|f| f.as_str()),
        }))
        .with_confidence(outcome.confidence);

        self.runtime
            .audit
            .record_decision(&context.trace, span_id, context.scope(), draft)
            .await?;
        Ok(())
    }
}
