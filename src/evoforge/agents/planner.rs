//! Planner agent: decides what a round should attempt before it runs.
//!
//! The plan balances exploration against exploitation by campaign progress
//! (`round_number / max_rounds`): early rounds fan out widely across five
//! mutation operators, middle rounds adapt to the recent score trend, late
//! rounds converge on optimize/refactor under high selection pressure.
//!
//! `create_round` is idempotent per `(campaign, round_number)`: replanning
//! an existing round soft-deletes its variants, hard-deletes its
//! evaluations, resets its status and timers, and overwrites the plan in
//! one store transaction.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::agents::{AgentContext, AgentRuntime, AgentType};
use crate::error::{EvoError, EvoResult};
use crate::models::decision::DecisionDraft;
use crate::models::{EnsembleComponent, EvaluatorType, Round};

/// Evolution phase derived from campaign progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Exploration,
    Balanced,
    Exploitation,
}

impl Phase {
    /// `progress < 0.3` explores, `< 0.7` balances, the rest exploits.
    pub fn from_progress(progress: f64) -> Phase {
        if progress < 0.3 {
            Phase::Exploration
        } else if progress < 0.7 {
            Phase::Balanced
        } else {
            Phase::Exploitation
        }
    }
}

/// How the round's variants will be evaluated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationStrategy {
    pub evaluators: Vec<EvaluatorType>,
    pub primary_evaluator: EvaluatorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensemble: Option<Vec<EnsembleComponent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria_weights: Option<BTreeMap<String, f64>>,
    pub parallel_execution: bool,
    pub timeout_seconds: u64,
}

/// Aggregates the plan was based on, kept for auditability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalContext {
    pub completed_rounds: usize,
    pub total_variants: usize,
    pub max_generation: u32,
    /// Average scores of up to the last three completed rounds, oldest
    /// first.
    pub recent_scores: Vec<f64>,
}

/// The planner's product: everything downstream stages need for one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundPlan {
    pub round_number: u32,
    pub phase: Phase,
    pub variant_count: u32,
    pub mutation_types: Vec<String>,
    /// Operator name → sampling weight; weights sum to 1 per phase table.
    pub mutation_distribution: BTreeMap<String, f64>,
    pub evaluation_strategy: EvaluationStrategy,
    pub selection_pressure: f64,
    /// Seed for every sampling decision derived from this plan.
    pub seed: u64,
    pub reasoning: String,
    pub historical_context: HistoricalContext,
    /// Stable SHA-256 of the plan's canonical JSON (computed with this
    /// field empty).
    pub plan_hash: String,
}

impl RoundPlan {
    /// Recompute the canonical hash (the value `plan_hash` must hold).
    pub fn compute_hash(&self) -> String {
        let mut unhashed = self.clone();
        unhashed.plan_hash = String::new();
        let canonical = serde_json::to_string(&unhashed).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// The planner.
pub struct PlannerAgent {
    runtime: Arc<AgentRuntime>,
}

impl PlannerAgent {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }

    /// Produce a plan for `round_number`, logging the planning decision.
    pub async fn execute(
        &self,
        context: &AgentContext,
        round_number: u32,
    ) -> EvoResult<RoundPlan> {
        self.runtime
            .run_with_tracing(AgentType::Planner, context, |span_id| async move {
                self.build_plan(context, round_number, &span_id).await
            })
            .await
    }

    /// Plan and create (or replan) the round row.
    pub async fn create_round(
        &self,
        context: &AgentContext,
        round_number: u32,
    ) -> EvoResult<(Round, RoundPlan)> {
        self.runtime
            .run_with_tracing(AgentType::Planner, context, |span_id| async move {
                let plan = self.build_plan(context, round_number, &span_id).await?;
                let plan_json = serde_json::to_value(&plan)
                    .map_err(|e| EvoError::Store(format!("plan serialization failed: {}", e)))?;

                let round = match self
                    .runtime
                    .store
                    .round_by_number(context.campaign_id, round_number)
                    .await
                {
                    Ok(existing) => {
                        log::info!(
                            "replanning existing round round_id={} round_number={} trace_id={}",
                            existing.id,
                            round_number,
                            context.trace.trace_id
                        );
                        self.runtime.store.reset_round(existing.id, plan_json).await?
                    }
                    Err(EvoError::EntityNotFound { .. }) => {
                        let round = self
                            .runtime
                            .store
                            .insert_round(Round::new(context.campaign_id, round_number))
                            .await?;
                        self.runtime.store.set_round_plan(round.id, plan_json).await?
                    }
                    Err(other) => return Err(other),
                };

                Ok((round, plan))
            })
            .await
    }

    /// Gather context, pick the phase tables, and log the plan decision.
    async fn build_plan(
        &self,
        context: &AgentContext,
        round_number: u32,
        span_id: &str,
    ) -> EvoResult<RoundPlan> {
        let campaign = self.runtime.store.get_campaign(context.campaign_id).await?;
        let stats = self
            .runtime
            .store
            .campaign_statistics(context.campaign_id)
            .await?;
        let rounds = self
            .runtime
            .store
            .rounds_by_campaign(context.campaign_id)
            .await;

        // Average scores of the last three completed rounds, oldest first.
        let mut recent_scores = Vec::new();
        for round in rounds.iter().rev().take(3).collect::<Vec<_>>().into_iter().rev() {
            let summary = self.runtime.store.round_evaluation_summary(round.id).await;
            if let Some(avg) = summary.average_score {
                recent_scores.push(avg);
            }
        }

        let config = &campaign.config;
        let base = config.variants_per_round;
        let max_rounds = config.max_rounds;
        let progress = round_number as f64 / max_rounds as f64;
        let phase = Phase::from_progress(progress);

        let (variant_count, mutation_distribution, selection_pressure, reasoning) = match phase {
            Phase::Exploration => {
                let count = ((base as f64 * 1.5) as u32).max(1);
                let distribution = distribution(&[
                    ("refactor", 0.3),
                    ("optimize", 0.2),
                    ("expand", 0.2),
                    ("simplify", 0.15),
                    ("experimental", 0.15),
                ]);
                let reasoning = format!(
                    "Exploration phase (round {}/{}). High diversity with {} variants across 5 mutation types to cover the solution space broadly.",
                    round_number, max_rounds, count
                );
                (count, distribution, 0.3, reasoning)
            }
            Phase::Balanced => {
                let improving = recent_scores.len() >= 2
                    && recent_scores[recent_scores.len() - 1] - recent_scores[0] > 0.0;
                let distribution = if improving {
                    distribution(&[("refactor", 0.4), ("optimize", 0.4), ("expand", 0.2)])
                } else {
                    distribution(&[
                        ("refactor", 0.4),
                        ("experimental", 0.3),
                        ("simplify", 0.3),
                    ])
                };
                let reasoning = format!(
                    "Balanced phase (round {}/{}). Generating {} variants; recent trend {}.",
                    round_number,
                    max_rounds,
                    base,
                    if recent_scores.len() >= 2 {
                        if improving { "improving" } else { "stagnating" }
                    } else {
                        "unknown (insufficient history)"
                    }
                );
                (base.max(1), distribution, 0.5, reasoning)
            }
            Phase::Exploitation => {
                let count = ((base as f64 * 0.7) as u32).max(1);
                let distribution = distribution(&[("optimize", 0.6), ("refactor", 0.4)]);
                let reasoning = format!(
                    "Exploitation phase (round {}/{}). Refinement with {} variants under high selection pressure to converge on the best lineages.",
                    round_number, max_rounds, count
                );
                (count, distribution, 0.7, reasoning)
            }
        };

        // Ensemble: explicit config wins; multiple evaluators without one
        // become an equal-weight ensemble.
        let evaluators = config.evaluators.clone();
        let ensemble = match (&config.ensemble, evaluators.len()) {
            (Some(components), _) => Some(components.clone()),
            (None, n) if n > 1 => {
                let weight = 1.0 / n as f64;
                Some(
                    evaluators
                        .iter()
                        .map(|&evaluator| EnsembleComponent {
                            evaluator,
                            weight,
                            config: Value::Object(Default::default()),
                        })
                        .collect(),
                )
            }
            _ => None,
        };
        let evaluation_strategy = EvaluationStrategy {
            primary_evaluator: evaluators
                .first()
                .copied()
                .unwrap_or(EvaluatorType::LlmJudge),
            evaluators,
            ensemble,
            criteria_weights: config.criteria_weights.clone(),
            parallel_execution: true,
            timeout_seconds: 300,
        };

        let mut plan = RoundPlan {
            round_number,
            phase,
            variant_count,
            mutation_types: mutation_distribution.keys().cloned().collect(),
            mutation_distribution,
            evaluation_strategy,
            selection_pressure,
            seed: campaign.effective_seed(),
            reasoning: reasoning.clone(),
            historical_context: HistoricalContext {
                completed_rounds: stats.completed_rounds,
                total_variants: stats.total_variants,
                max_generation: stats.max_generation,
                recent_scores: recent_scores.clone(),
            },
            plan_hash: String::new(),
        };
        plan.plan_hash = plan.compute_hash();

        let confidence = if recent_scores.is_empty() { 0.7 } else { 0.85 };
        let draft = DecisionDraft::new(AgentType::Planner.as_str(), "round_plan", reasoning.as_str())
            .with_input(json!({
                "round_number": round_number,
                "campaign_id": context.campaign_id,
                "progress": progress,
            }))
            .with_output(serde_json::to_value(&plan).unwrap_or(Value::Null))
            .with_confidence(confidence);
        self.runtime
            .audit
            .record_decision(&context.trace, span_id, context.scope(), draft)
            .await?;

        log::info!(
            "round plan created round_number={} phase={:?} variant_count={} trace_id={}",
            round_number,
            plan.phase,
            plan.variant_count,
            context.trace.trace_id
        );
        Ok(plan)
    }
}

fn distribution(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
    entries
        .iter()
        .map(|(name, weight)| (name.to_string(), *weight))
        .collect()
}
