use std::sync::Arc;

use evoforge::agents::{AgentContext, AgentRuntime, PolicyMakerAgent};
use evoforge::audit::AuditLog;
use evoforge::error::EvoError;
use evoforge::metrics::AgentMetrics;
use evoforge::models::{
    CampaignConfig, Evaluation, EvaluatorType, PolicyType, Round, Variant,
};
use evoforge::registry::ToolRegistry;
use evoforge::selection::SelectionStrategy;
use evoforge::store::Store;
use evoforge::trace::TraceContext;
use serde_json::{json, Value};
use uuid::Uuid;

struct Fixture {
    store: Arc<Store>,
    agent: PolicyMakerAgent,
    context: AgentContext,
    round_id: Uuid,
}

async fn setup() -> Fixture {
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
        .create_campaign("policy", None, CampaignConfig::default())
        .await
        .unwrap();
    let round = store
        .insert_round(Round::new(campaign.id, 1))
        .await
        .unwrap();
    let context = AgentContext::new(TraceContext::new(), campaign.id).with_round(round.id);
    Fixture {
        store,
        agent: PolicyMakerAgent::new(runtime),
        context,
        round_id: round.id,
    }
}

async fn scored_variant(fx: &Fixture, parent: &Variant, content: &str, score: f64) -> Variant {
    let variant = fx
        .store
        .insert_variant(Variant::new_child(
            parent,
            fx.round_id,
            content,
            "refactor",
            json!({}),
        ))
        .await
        .unwrap();
    let mut eval = Evaluation::new(
        variant.id,
        fx.round_id,
        EvaluatorType::LlmJudge,
        json!({}),
    );
    eval.complete(score, json!({ "criteria_scores": {} }));
    fx.store.insert_evaluation(eval).await.unwrap();
    variant
}

#[tokio::test]
async fn test_adaptive_resolves_to_diversity_in_early_rounds() {
    let fx = setup().await;
    let (policy, _result) = fx
        .agent
        .materialize_and_select(&fx.context, 1, 0.5, SelectionStrategy::Adaptive)
        .await
        .unwrap();

    assert_eq!(policy.policy_type, PolicyType::Selection);
    assert_eq!(policy.version, 1);
    assert!(policy.is_active);
    assert_eq!(policy.config["strategy"], json!("adaptive"));
    assert_eq!(policy.config["resolved_strategy"], json!("diversity"));
}

#[tokio::test]
async fn test_policy_versions_increment_and_deactivate() {
    let fx = setup().await;
    let (v1, _) = fx
        .agent
        .materialize_and_select(&fx.context, 1, 0.5, SelectionStrategy::Adaptive)
        .await
        .unwrap();
    let (v2, _) = fx
        .agent
        .materialize_and_select(&fx.context, 2, 0.5, SelectionStrategy::TopK)
        .await
        .unwrap();
    assert_eq!(v1.version, 1);
    assert_eq!(v2.version, 2);

    let active = fx
        .store
        .active_policy(fx.context.campaign_id, PolicyType::Selection)
        .await
        .unwrap();
    assert_eq!(active.id, v2.id);
}

#[tokio::test]
async fn test_selects_exactly_select_count() {
    let fx = setup().await;
    let parent = fx
        .store
        .insert_variant(Variant::new_seed(fx.round_id, "parent", json!({})))
        .await
        .unwrap();
    // Six children; pressure 0.5 keeps floor(7 * 0.5) = 3 (the seed counts
    // as a round variant too).
    for i in 0..6 {
        scored_variant(&fx, &parent, &format!("child {}", i), 0.5 + i as f64 * 0.05).await;
    }

    let (policy, result) = fx
        .agent
        .materialize_and_select(&fx.context, 1, 0.5, SelectionStrategy::TopK)
        .await
        .unwrap();
    let select_count = policy.config["select_count"].as_u64().unwrap() as usize;
    assert_eq!(select_count, 3);
    assert_eq!(result.selected_ids.len(), select_count);
    assert_eq!(
        fx.store.selected_by_round(fx.round_id).await.len(),
        select_count
    );
}

#[tokio::test]
async fn test_selects_all_when_fewer_variants_than_quota() {
    let fx = setup().await;
    let parent = fx
        .store
        .insert_variant(Variant::new_seed(fx.round_id, "lone parent", json!({})))
        .await
        .unwrap();
    scored_variant(&fx, &parent, "only child", 0.9).await;

    // Low pressure wants floor(2 * 0.7) = 1; population is 2.
    let (_policy, result) = fx
        .agent
        .materialize_and_select(&fx.context, 1, 0.1, SelectionStrategy::TopK)
        .await
        .unwrap();
    assert_eq!(result.selected_ids.len(), 1);
}

#[tokio::test]
async fn test_selection_prefers_highest_composite() {
    let fx = setup().await;
    let parent = fx
        .store
        .insert_variant(Variant::new_seed(fx.round_id, "root parent", json!({})))
        .await
        .unwrap();
    let weak = scored_variant(&fx, &parent, "weak child", 0.1).await;
    let strong = scored_variant(&fx, &parent, "strong child", 0.9).await;
    let middling = scored_variant(&fx, &parent, "middling child", 0.5).await;

    // Pressure 0.9: keep max(floor(4*0.3), 1) = 1.
    let (_policy, result) = fx
        .agent
        .materialize_and_select(&fx.context, 6, 0.9, SelectionStrategy::TopK)
        .await
        .unwrap();
    assert_eq!(result.selected_ids.len(), 1);
    assert_eq!(result.selected_ids[0], strong.id);
    assert_ne!(result.selected_ids[0], weak.id);
    assert_ne!(result.selected_ids[0], middling.id);
}

#[tokio::test]
async fn test_both_decisions_are_logged() {
    let fx = setup().await;
    let parent = fx
        .store
        .insert_variant(Variant::new_seed(fx.round_id, "audited parent", json!({})))
        .await
        .unwrap();
    scored_variant(&fx, &parent, "audited child", 0.6).await;

    fx.agent
        .materialize_and_select(&fx.context, 1, 0.5, SelectionStrategy::Adaptive)
        .await
        .unwrap();

    let decisions = fx.store.decisions_by_trace(fx.context.trace.trace_id).await;
    let types: Vec<&str> = decisions.iter().map(|d| d.decision_type.as_str()).collect();
    assert!(types.contains(&"policy_created"));
    assert!(types.contains(&"selection_applied"));
    for d in &decisions {
        assert!(!d.reasoning.is_empty());
        assert!(d.policy_id.is_some());
    }
}

#[tokio::test]
async fn test_tournament_resolution_on_low_scores() {
    let fx = setup().await;
    let parent = fx
        .store
        .insert_variant(Variant::new_seed(fx.round_id, "low parent", json!({})))
        .await
        .unwrap();
    scored_variant(&fx, &parent, "low child", 0.2).await;

    // Round 6 (>= 5) with average below 0.5 resolves to tournament.
    let (policy, _result) = fx
        .agent
        .materialize_and_select(&fx.context, 6, 0.5, SelectionStrategy::Adaptive)
        .await
        .unwrap();
    assert_eq!(policy.config["resolved_strategy"], json!("tournament"));
    assert_eq!(policy.config["parameters"]["tournament_size"], json!(3));
}

#[tokio::test]
async fn test_topk_resolution_on_good_scores() {
    let fx = setup().await;
    let parent = fx
        .store
        .insert_variant(Variant::new_seed(fx.round_id, "good parent", json!({})))
        .await
        .unwrap();
    scored_variant(&fx, &parent, "good child", 0.8).await;

    let (policy, _result) = fx
        .agent
        .materialize_and_select(&fx.context, 6, 0.5, SelectionStrategy::Adaptive)
        .await
        .unwrap();
    assert_eq!(policy.config["resolved_strategy"], json!("top_k"));
}

#[tokio::test]
async fn test_policy_config_shape() {
    let fx = setup().await;
    let (policy, _result) = fx
        .agent
        .materialize_and_select(&fx.context, 1, 0.5, SelectionStrategy::Adaptive)
        .await
        .unwrap();

    for key in [
        "strategy",
        "resolved_strategy",
        "round_number",
        "selection_pressure",
        "select_count",
        "min_lineages",
        "rules",
        "parameters",
    ] {
        assert!(
            policy.config.get(key).is_some(),
            "policy config missing key {}",
            key
        );
    }
    assert_eq!(
        policy.config["rules"]["ranking"],
        Value::String("multi_objective".into())
    );
}

#[tokio::test]
async fn test_selection_and_activation_never_observed_apart() {
    let fx = setup().await;
    let parent = fx
        .store
        .insert_variant(Variant::new_seed(fx.round_id, "atomic parent", json!({})))
        .await
        .unwrap();
    scored_variant(&fx, &parent, "atomic child", 0.7).await;

    // Before the selecting stage: no active policy, nothing selected.
    assert!(fx
        .store
        .active_policy(fx.context.campaign_id, PolicyType::Selection)
        .await
        .is_none());
    assert!(fx.store.selected_by_round(fx.round_id).await.is_empty());

    // A failing run (bogus round in context) leaves both halves absent: no
    // policy row was activated and no variant was marked.
    let bogus = AgentContext::new(fx.context.trace, fx.context.campaign_id)
        .with_round(Uuid::new_v4());
    let err = fx
        .agent
        .materialize_and_select(&bogus, 1, 0.5, SelectionStrategy::TopK)
        .await
        .unwrap_err();
    assert!(matches!(err, EvoError::EntityNotFound { .. }));
    assert!(fx
        .store
        .policies_by_campaign(fx.context.campaign_id, false)
        .await
        .is_empty());
    assert!(fx.store.selected_by_round(fx.round_id).await.is_empty());

    // A successful run produces both together.
    let (policy, result) = fx
        .agent
        .materialize_and_select(&fx.context, 1, 0.5, SelectionStrategy::TopK)
        .await
        .unwrap();
    let active = fx
        .store
        .active_policy(fx.context.campaign_id, PolicyType::Selection)
        .await
        .unwrap();
    assert_eq!(active.id, policy.id);
    assert!(!result.selected_ids.is_empty());
    assert_eq!(
        fx.store.selected_by_round(fx.round_id).await.len(),
        result.selected_ids.len()
    );
}
