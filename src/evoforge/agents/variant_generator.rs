//! Variant generator agent: produces children from selected parents.
//!
//! Five mutation operators transform a parent's content deterministically
//! (the concrete transformation is a stand-in for an LLM- or AST-backed
//! mutator behind the same seam). Lineage is the non-negotiable part: every
//! child references its parent and carries `parent.generation + 1`, enforced
//! by the [`LineageEngine`](crate::lineage::LineageEngine) before any row is
//! written.
//!
//! Batch generation samples an operator per child from the plan's weighted
//! distribution using the plan's seeded RNG, round-robining over the parent
//! set up to `plan.variant_count` children.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::agents::planner::RoundPlan;
use crate::agents::{AgentContext, AgentRuntime, AgentType};
use crate::error::{EvoError, EvoResult};
use crate::lineage::LineageEngine;
use crate::models::decision::DecisionDraft;
use crate::models::Variant;

/// The mutation operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    /// Improve structure without changing behavior.
    Refactor,
    /// Improve performance or efficiency.
    Optimize,
    /// Add a capability.
    Expand,
    /// Reduce complexity.
    Simplify,
    /// Try a novel approach.
    Experimental,
}

impl Mutation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mutation::Refactor => "refactor",
            Mutation::Optimize => "optimize",
            Mutation::Expand => "expand",
            Mutation::Simplify => "simplify",
            Mutation::Experimental => "experimental",
        }
    }

    pub fn parse(name: &str) -> Option<Mutation> {
        match name {
            "refactor" => Some(Mutation::Refactor),
            "optimize" => Some(Mutation::Optimize),
            "expand" => Some(Mutation::Expand),
            "simplify" => Some(Mutation::Simplify),
            "experimental" => Some(Mutation::Experimental),
            _ => None,
        }
    }

    /// Apply the operator to a parent's content, returning the child
    /// content and the operator's reasoning.
    fn apply(&self, content: &str, child_generation: u32) -> (String, String) {
        match self {
            Mutation::Refactor => (
                format!("// refactored (generation {})\n{}", child_generation, content),
                format!(
                    "Refactored parent content at generation {}: clearer naming and organization, behavior preserved.",
                    child_generation
                ),
            ),
            Mutation::Optimize => (
                format!("// optimized (generation {})\n{}", child_generation, content),
                format!(
                    "Optimized parent content at generation {}: tightened the hot path and reduced algorithmic overhead.",
                    child_generation
                ),
            ),
            Mutation::Expand => (
                format!(
                    "// expanded (generation {})\n// added capability\n{}",
                    child_generation, content
                ),
                format!(
                    "Expanded parent content at generation {}: added a new capability on top of the existing behavior.",
                    child_generation
                ),
            ),
            Mutation::Simplify => (
                format!("// simplified (generation {})\n{}", child_generation, content),
                format!(
                    "Simplified parent content at generation {}: removed unnecessary complexity.",
                    child_generation
                ),
            ),
            Mutation::Experimental => (
                format!(
                    "// experimental (generation {})\n// alternative approach\n{}",
                    child_generation, content
                ),
                format!(
                    "Experimental mutation at generation {}: trying an alternative implementation to probe the design space.",
                    child_generation
                ),
            ),
        }
    }
}

/// The variant generator.
pub struct VariantGeneratorAgent {
    runtime: Arc<AgentRuntime>,
    lineage: LineageEngine,
}

impl VariantGeneratorAgent {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        let lineage = LineageEngine::new(runtime.store.clone());
        Self { runtime, lineage }
    }

    /// Generate one child of `parent_id` under `mutation`, logging the
    /// mutation decision. Requires `context.round_id`.
    pub async fn execute(
        &self,
        context: &AgentContext,
        parent_id: Uuid,
        mutation: Mutation,
    ) -> EvoResult<Variant> {
        self.runtime
            .run_with_tracing(AgentType::VariantGenerator, context, |span_id| async move {
                self.generate_one(context, parent_id, mutation, &span_id)
                    .await
            })
            .await
    }

    /// Generate up to `plan.variant_count` children across `parent_ids`,
    /// sampling operators from the plan's distribution with the plan's
    /// seeded RNG.
    pub async fn generate_batch(
        &self,
        context: &AgentContext,
        parent_ids: &[Uuid],
        plan: &RoundPlan,
    ) -> EvoResult<Vec<Variant>> {
        self.runtime
            .run_with_tracing(AgentType::VariantGenerator, context, |span_id| async move {
                if parent_ids.is_empty() {
                    return Err(EvoError::Store(
                        "generate_batch requires at least one parent".into(),
                    ));
                }

                let mut rng = StdRng::seed_from_u64(plan.seed);
                let weighted: Vec<(Mutation, f64)> = plan
                    .mutation_distribution
                    .iter()
                    .filter_map(|(name, weight)| Mutation::parse(name).map(|m| (m, *weight)))
                    .collect();

                let mut variants = Vec::with_capacity(plan.variant_count as usize);
                for i in 0..plan.variant_count as usize {
                    let parent_id = parent_ids[i % parent_ids.len()];
                    let mutation = sample_mutation(&weighted, &mut rng);
                    let variant = self
                        .generate_one(context, parent_id, mutation, &span_id)
                        .await?;
                    variants.push(variant);
                }

                log::info!(
                    "batch variants generated count={} round_id={:?} trace_id={}",
                    variants.len(),
                    context.round_id,
                    context.trace.trace_id
                );
                Ok(variants)
            })
            .await
    }

    /// Low-level creation with an explicit generation, used for seeding and
    /// for callers that computed lineage themselves. A lineage violation is
    /// refused with no row written, and still leaves a decision row
    /// recording the refusal.
    pub async fn create_variant(
        &self,
        context: &AgentContext,
        parent_id: Option<Uuid>,
        generation: u32,
        content: String,
        mutation_type: Option<String>,
        mutation_metadata: Value,
    ) -> EvoResult<Variant> {
        self.runtime
            .run_with_tracing(AgentType::VariantGenerator, context, |span_id| async move {
                let round_id = context.round_id.ok_or_else(|| {
                    EvoError::Store("round_id required in context for variant creation".into())
                })?;

                let result = self
                    .lineage
                    .create_variant(
                        round_id,
                        parent_id,
                        generation,
                        content,
                        mutation_type.clone(),
                        mutation_metadata,
                    )
                    .await;

                match result {
                    Ok(variant) => {
                        let draft = DecisionDraft::new(
                            AgentType::VariantGenerator.as_str(),
                            "variant_generated",
                            format!(
                                "Created generation {} variant{}",
                                variant.generation,
                                match parent_id {
                                    Some(parent) => format!(" from parent {}", parent),
                                    None => " as a seed".to_string(),
                                }
                            ),
                        )
                        .with_input(json!({
                            "parent_id": parent_id,
                            "generation": generation,
                            "mutation_type": mutation_type,
                        }))
                        .with_output(json!({
                            "variant_id": variant.id,
                            "content_hash": variant.content_hash,
                        }));
                        self.runtime
                            .audit
                            .record_decision(&context.trace, &span_id, context.scope(), draft)
                            .await?;
                        Ok(variant)
                    }
                    Err(err) => {
                        if let EvoError::LineageViolation(_) = &err {
                            let draft = DecisionDraft::new(
                                AgentType::VariantGenerator.as_str(),
                                "variant_generated",
                                format!("Variant rejected by lineage invariants: {}", err),
                            )
                            .with_input(json!({
                                "parent_id": parent_id,
                                "generation": generation,
                                "mutation_type": mutation_type,
                            }));
                            self.runtime
                                .audit
                                .record_decision(&context.trace, &span_id, context.scope(), draft)
                                .await?;
                        }
                        Err(err)
                    }
                }
            })
            .await
    }

    async fn generate_one(
        &self,
        context: &AgentContext,
        parent_id: Uuid,
        mutation: Mutation,
        span_id: &str,
    ) -> EvoResult<Variant> {
        let round_id = context.round_id.ok_or_else(|| {
            EvoError::Store("round_id required in context for variant generation".into())
        })?;

        let parent = self.runtime.store.get_variant(parent_id).await?;
        let child_generation = parent.generation + 1;
        let (content, reasoning) = mutation.apply(&parent.content, child_generation);

        // Duplicates are allowed (distinct lineage); the prior hit is
        // surfaced in the mutation metadata.
        let duplicate = self.lineage.find_duplicate(&content).await;

        let metadata = json!({
            "reasoning": reasoning,
            "parent_content_hash": parent.content_hash,
            "duplicate_of": duplicate.as_ref().map(|d| d.existing.id),
        });

        let result = self
            .lineage
            .create_variant(
                round_id,
                Some(parent_id),
                child_generation,
                content,
                Some(mutation.as_str().to_string()),
                metadata,
            )
            .await;

        let variant = match result {
            Ok(variant) => variant,
            Err(err) => {
                // A lineage violation is still a logged decision: the audit
                // trail records what was attempted and why it was refused.
                if let EvoError::LineageViolation(_) = &err {
                    let draft = DecisionDraft::new(
                        AgentType::VariantGenerator.as_str(),
                        "variant_generated",
                        format!("Variant rejected by lineage invariants: {}", err),
                    )
                    .with_input(json!({
                        "parent_id": parent_id,
                        "mutation_type": mutation.as_str(),
                        "parent_generation": parent.generation,
                    }));
                    self.runtime
                        .audit
                        .record_decision(&context.trace, span_id, context.scope(), draft)
                        .await?;
                }
                return Err(err);
            }
        };

        let draft = DecisionDraft::new(
            AgentType::VariantGenerator.as_str(),
            "variant_generated",
            reasoning.as_str(),
        )
        .with_input(json!({
            "parent_id": parent_id,
            "mutation_type": mutation.as_str(),
            "parent_generation": parent.generation,
        }))
        .with_output(json!({
            "variant_id": variant.id,
            "generation": variant.generation,
            "content_hash": variant.content_hash,
        }))
        .with_confidence(0.8);
        self.runtime
            .audit
            .record_decision(&context.trace, span_id, context.scope(), draft)
            .await?;

        Ok(variant)
    }
}

/// Weighted sample over the plan's operator distribution; uniform refactor
/// when the distribution is empty or degenerate.
fn sample_mutation(weighted: &[(Mutation, f64)], rng: &mut StdRng) -> Mutation {
    let total: f64 = weighted.iter().map(|(_, w)| w).sum();
    if weighted.is_empty() || total <= 0.0 {
        return Mutation::Refactor;
    }
    let mut point = rng.gen::<f64>() * total;
    for (mutation, weight) in weighted {
        point -= weight;
        if point <= 0.0 {
            return *mutation;
        }
    }
    weighted[weighted.len() - 1].0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_is_deterministic_for_a_seed() {
        let weighted = vec![
            (Mutation::Refactor, 0.5),
            (Mutation::Optimize, 0.3),
            (Mutation::Experimental, 0.2),
        ];
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        for _ in 0..32 {
            assert_eq!(sample_mutation(&weighted, &mut a), sample_mutation(&weighted, &mut b));
        }
    }

    #[test]
    fn degenerate_distribution_falls_back_to_refactor() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(sample_mutation(&[], &mut rng), Mutation::Refactor);
        assert_eq!(
            sample_mutation(&[(Mutation::Optimize, 0.0)], &mut rng),
            Mutation::Refactor
        );
    }
}
