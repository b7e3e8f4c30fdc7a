use std::sync::Arc;

use evoforge::agents::{AgentContext, AgentRuntime, ReporterAgent, ReporterConfig};
use evoforge::audit::AuditLog;
use evoforge::metrics::AgentMetrics;
use evoforge::models::{
    CampaignConfig, Evaluation, EvaluatorType, Policy, PolicyType, ReportFormat, ReportType,
    Round, RoundStatus, Variant,
};
use evoforge::registry::ToolRegistry;
use evoforge::store::Store;
use evoforge::trace::TraceContext;
use serde_json::{json, Value};
use uuid::Uuid;

struct Fixture {
    store: Arc<Store>,
    runtime: Arc<AgentRuntime>,
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
        .create_campaign("reported", None, CampaignConfig::default())
        .await
        .unwrap();
    let round = store
        .insert_round(Round::new(campaign.id, 1))
        .await
        .unwrap();
    let context = AgentContext::new(TraceContext::new(), campaign.id).with_round(round.id);
    Fixture {
        store,
        runtime,
        context,
        round_id: round.id,
    }
}

async fn populate_round(fx: &Fixture) -> Variant {
    let seed = fx
        .store
        .insert_variant(Variant::new_seed(fx.round_id, "report seed", json!({})))
        .await
        .unwrap();
    let child = fx
        .store
        .insert_variant(Variant::new_child(
            &seed,
            fx.round_id,
            "report child",
            "optimize",
            json!({}),
        ))
        .await
        .unwrap();
    let mut eval = Evaluation::new(child.id, fx.round_id, EvaluatorType::LlmJudge, json!({}));
    eval.complete(0.75, json!({ "criteria_scores": {} }));
    fx.store.insert_evaluation(eval).await.unwrap();
    fx.store
        .create_policy_version_and_select(
            Policy::new(
                fx.context.campaign_id,
                "report fixture selection",
                PolicyType::Selection,
                json!({}),
            ),
            fx.round_id,
            &[child.id],
        )
        .await
        .unwrap();
    child
}

fn content_of(report: &evoforge::models::Report) -> Value {
    serde_json::from_str(&report.content).unwrap()
}

#[tokio::test]
async fn test_round_summary_document() {
    let fx = setup().await;
    populate_round(&fx).await;
    let reporter = ReporterAgent::new(fx.runtime.clone(), ReporterConfig::default());

    let report = reporter
        .execute(&fx.context, ReportType::RoundSummary, None)
        .await
        .unwrap();
    assert_eq!(report.report_type, ReportType::RoundSummary);
    assert_eq!(report.format, ReportFormat::Json);
    assert_eq!(report.round_id, fx.round_id);
    assert!(report.storage_path.is_none());

    let doc = content_of(&report);
    assert_eq!(doc["summary"]["total_variants"], json!(2));
    assert_eq!(doc["summary"]["selected_variants"], json!(1));
    assert_eq!(doc["evaluations"]["completed"], json!(1));
    assert_eq!(doc["evolution"]["max_generation"], json!(1));
    assert!(doc["insights"].as_array().unwrap().len() >= 3);
}

#[tokio::test]
async fn test_campaign_progress_document() {
    let fx = setup().await;
    populate_round(&fx).await;
    // Complete the round so it contributes to the score series.
    for status in [
        RoundStatus::Planning,
        RoundStatus::Generating,
        RoundStatus::Evaluating,
        RoundStatus::Selecting,
        RoundStatus::Reporting,
        RoundStatus::Completed,
    ] {
        fx.store.transition_round(fx.round_id, status).await.unwrap();
    }

    let reporter = ReporterAgent::new(fx.runtime.clone(), ReporterConfig::default());
    let report = reporter
        .execute(&fx.context, ReportType::CampaignProgress, None)
        .await
        .unwrap();

    let doc = content_of(&report);
    assert_eq!(doc["progress"]["completed_rounds"], json!(1));
    assert_eq!(doc["performance"]["round_scores"].as_array().unwrap().len(), 1);
    assert_eq!(doc["performance"]["trend_direction"], json!("insufficient_data"));
    assert!(doc["campaign"]["name"].is_string());
}

#[tokio::test]
async fn test_lineage_analysis_resolves_round_from_variant() {
    let fx = setup().await;
    let child = populate_round(&fx).await;
    let reporter = ReporterAgent::new(fx.runtime.clone(), ReporterConfig::default());

    // A context with no round set: the variant's round must be used.
    let bare = AgentContext::new(fx.context.trace, fx.context.campaign_id);
    let report = reporter
        .execute(&bare, ReportType::LineageAnalysis, Some(child.id))
        .await
        .unwrap();
    assert_eq!(report.round_id, fx.round_id);

    let doc = content_of(&report);
    assert_eq!(doc["lineage"]["total_ancestors"], json!(2));
    assert_eq!(doc["lineage"]["mutation_path"], json!("optimize"));
    assert_eq!(doc["evolution"]["generations"], json!(2));
}

#[tokio::test]
async fn test_final_report_lists_best_variants() {
    let fx = setup().await;
    populate_round(&fx).await;
    let reporter = ReporterAgent::new(fx.runtime.clone(), ReporterConfig::default());

    let report = reporter
        .execute(&fx.context, ReportType::FinalReport, None)
        .await
        .unwrap();
    let doc = content_of(&report);
    assert_eq!(doc["best_variants"].as_array().unwrap().len(), 1);
    assert!((doc["best_variants"][0]["score"].as_f64().unwrap() - 0.75).abs() < 1e-9);
    assert!(doc["conclusions"].as_array().unwrap().len() >= 2);
    assert!(doc["recommendations"].as_array().unwrap().len() >= 2);
}

#[tokio::test]
async fn test_large_report_spills_to_spool_dir() {
    let fx = setup().await;
    // Oversized content so the serialized summary exceeds the threshold.
    let blob = "x".repeat(4096);
    let seed = fx
        .store
        .insert_variant(Variant::new_seed(fx.round_id, blob, json!({})))
        .await
        .unwrap();
    let mut eval = Evaluation::new(seed.id, fx.round_id, EvaluatorType::LlmJudge, json!({}));
    eval.complete(0.5, json!({ "criteria_scores": {} }));
    fx.store.insert_evaluation(eval).await.unwrap();

    let spool = tempfile::tempdir().unwrap();
    let reporter = ReporterAgent::new(
        fx.runtime.clone(),
        ReporterConfig {
            inline_max_bytes: 256,
            spool_dir: Some(spool.path().to_path_buf()),
        },
    );

    let report = reporter
        .execute(&fx.context, ReportType::RoundSummary, None)
        .await
        .unwrap();
    let path = report.storage_path.clone().unwrap();
    assert!(std::path::Path::new(&path).exists());

    // The inline content became a stub; the spooled file holds the payload.
    let stub = content_of(&report);
    assert_eq!(stub["spilled"], json!(true));
    let payload: Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert!(payload.get("summary").is_some());
}

#[tokio::test]
async fn test_report_generation_is_audited() {
    let fx = setup().await;
    populate_round(&fx).await;
    let reporter = ReporterAgent::new(fx.runtime.clone(), ReporterConfig::default());
    reporter
        .execute(&fx.context, ReportType::RoundSummary, None)
        .await
        .unwrap();

    let decisions = fx.store.decisions_by_trace(fx.context.trace.trace_id).await;
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].decision_type, "report_generated");
    assert_eq!(decisions[0].confidence_score, Some(0.9));
}
