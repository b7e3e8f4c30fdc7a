use std::sync::Arc;

use evoforge::agents::planner::Phase;
use evoforge::agents::{AgentContext, AgentRuntime, PlannerAgent};
use evoforge::audit::AuditLog;
use evoforge::metrics::AgentMetrics;
use evoforge::models::{Campaign, CampaignConfig, EvaluatorType, RoundStatus};
use evoforge::registry::ToolRegistry;
use evoforge::store::Store;
use evoforge::trace::TraceContext;
use serde_json::json;

async fn setup(config: CampaignConfig) -> (Arc<Store>, PlannerAgent, Campaign) {
    let store = Arc::new(Store::new());
    let audit = Arc::new(AuditLog::new(store.clone()));
    let registry = Arc::new(ToolRegistry::new(audit.clone()));
    let runtime = Arc::new(AgentRuntime::new(
        store.clone(),
        registry,
        audit,
        Arc::new(AgentMetrics::new()),
    ));
    let campaign = store
        .create_campaign("planned", None, config)
        .await
        .unwrap();
    (store, PlannerAgent::new(runtime), campaign)
}

fn context(campaign: &Campaign) -> AgentContext {
    AgentContext::new(TraceContext::new(), campaign.id)
}

#[tokio::test]
async fn test_exploration_phase_plan() {
    let config = CampaignConfig {
        max_rounds: 10,
        variants_per_round: 10,
        ..CampaignConfig::default()
    };
    let (_store, planner, campaign) = setup(config).await;

    // Round 2 of 10: progress 0.2 -> exploration.
    let plan = planner.execute(&context(&campaign), 2).await.unwrap();
    assert_eq!(plan.phase, Phase::Exploration);
    assert_eq!(plan.variant_count, 15);
    assert!((plan.selection_pressure - 0.3).abs() < 1e-9);
    assert_eq!(plan.mutation_distribution.len(), 5);
    assert!((plan.mutation_distribution["refactor"] - 0.3).abs() < 1e-9);
    assert!((plan.mutation_distribution["experimental"] - 0.15).abs() < 1e-9);
    let weight_sum: f64 = plan.mutation_distribution.values().sum();
    assert!((weight_sum - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_balanced_phase_without_history_uses_default_mix() {
    let config = CampaignConfig {
        max_rounds: 10,
        variants_per_round: 10,
        ..CampaignConfig::default()
    };
    let (_store, planner, campaign) = setup(config).await;

    // Round 5 of 10: progress 0.5 -> balanced.
    let plan = planner.execute(&context(&campaign), 5).await.unwrap();
    assert_eq!(plan.phase, Phase::Balanced);
    assert_eq!(plan.variant_count, 10);
    assert!((plan.selection_pressure - 0.5).abs() < 1e-9);
    assert!((plan.mutation_distribution["refactor"] - 0.4).abs() < 1e-9);
    assert!((plan.mutation_distribution["optimize"] - 0.4).abs() < 1e-9);
    assert!((plan.mutation_distribution["expand"] - 0.2).abs() < 1e-9);
}

#[tokio::test]
async fn test_exploitation_phase_plan() {
    let config = CampaignConfig {
        max_rounds: 10,
        variants_per_round: 10,
        ..CampaignConfig::default()
    };
    let (_store, planner, campaign) = setup(config).await;

    // Round 8 of 10: progress 0.8 -> exploitation.
    let plan = planner.execute(&context(&campaign), 8).await.unwrap();
    assert_eq!(plan.phase, Phase::Exploitation);
    assert_eq!(plan.variant_count, 7);
    assert!((plan.selection_pressure - 0.7).abs() < 1e-9);
    assert_eq!(plan.mutation_distribution.len(), 2);
    assert!((plan.mutation_distribution["optimize"] - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn test_plan_hash_is_stable_and_verifiable() {
    let (_store, planner, campaign) = setup(CampaignConfig::default()).await;
    let plan = planner.execute(&context(&campaign), 1).await.unwrap();
    assert_eq!(plan.plan_hash.len(), 64);
    assert_eq!(plan.plan_hash, plan.compute_hash());
}

#[tokio::test]
async fn test_seed_defaults_to_function_of_campaign_id() {
    let (_store, planner, campaign) = setup(CampaignConfig::default()).await;
    let plan_a = planner.execute(&context(&campaign), 1).await.unwrap();
    let plan_b = planner.execute(&context(&campaign), 1).await.unwrap();
    assert_eq!(plan_a.seed, plan_b.seed);
    assert_eq!(plan_a.seed, campaign.effective_seed());
}

#[tokio::test]
async fn test_explicit_seed_is_inherited() {
    let config = CampaignConfig {
        seed: Some(1234),
        ..CampaignConfig::default()
    };
    let (_store, planner, campaign) = setup(config).await;
    let plan = planner.execute(&context(&campaign), 1).await.unwrap();
    assert_eq!(plan.seed, 1234);
}

#[tokio::test]
async fn test_multiple_evaluators_become_equal_weight_ensemble() {
    let config = CampaignConfig {
        evaluators: vec![EvaluatorType::LlmJudge, EvaluatorType::UnitTest],
        ..CampaignConfig::default()
    };
    let (_store, planner, campaign) = setup(config).await;
    let plan = planner.execute(&context(&campaign), 1).await.unwrap();

    let ensemble = plan.evaluation_strategy.ensemble.unwrap();
    assert_eq!(ensemble.len(), 2);
    assert!((ensemble[0].weight - 0.5).abs() < 1e-9);
    assert_eq!(plan.evaluation_strategy.primary_evaluator, EvaluatorType::LlmJudge);
}

#[tokio::test]
async fn test_planning_writes_a_decision_row() {
    let (store, planner, campaign) = setup(CampaignConfig::default()).await;
    let ctx = context(&campaign);
    planner.execute(&ctx, 1).await.unwrap();

    let decisions = store.decisions_by_trace(ctx.trace.trace_id).await;
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].decision_type, "round_plan");
    assert!(!decisions[0].reasoning.is_empty());
    // No history yet: the lower confidence applies.
    assert_eq!(decisions[0].confidence_score, Some(0.7));
}

#[tokio::test]
async fn test_create_round_is_idempotent() {
    let (store, planner, campaign) = setup(CampaignConfig::default()).await;
    let ctx = context(&campaign);

    let (round_a, _plan) = planner.create_round(&ctx, 1).await.unwrap();
    // Simulate the round having progressed with some data hanging off it.
    store
        .transition_round(round_a.id, RoundStatus::Planning)
        .await
        .unwrap();
    let seed = store
        .insert_variant(evoforge::models::Variant::new_seed(
            round_a.id,
            "stale seed",
            json!({}),
        ))
        .await
        .unwrap();
    store
        .insert_evaluation(evoforge::models::Evaluation::new(
            seed.id,
            round_a.id,
            EvaluatorType::LlmJudge,
            json!({}),
        ))
        .await
        .unwrap();

    let (round_b, _plan) = planner.create_round(&ctx, 1).await.unwrap();

    // Exactly one round row, same identity, reset to pending.
    assert_eq!(round_b.id, round_a.id);
    assert_eq!(round_b.status, RoundStatus::Pending);
    assert!(round_b.started_at.is_none());
    assert_eq!(store.rounds_by_campaign(campaign.id).await.len(), 1);

    // Variants gone (soft), evaluations gone (hard).
    assert!(store.variants_by_round(round_a.id).await.is_empty());
    assert!(store.evaluations_by_round(round_a.id).await.is_empty());
}
