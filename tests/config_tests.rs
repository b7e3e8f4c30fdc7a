use evoforge::config::Settings;
use evoforge::event::ExperimentEvent;
use serde_json::json;
use uuid::Uuid;

// Environment mutation is process-global, so everything env-related lives in
// this single test.
#[test]
fn test_settings_from_env() {
    // Defaults with a clean environment.
    for key in [
        "STORE_URL",
        "CACHE_URL",
        "SECRET_KEY",
        "CORS_ORIGINS",
        "TOOL_REGISTRY_BOOTSTRAP_PATH",
        "OBJECT_STORE_ENDPOINT",
        "OBJECT_STORE_KEY",
        "OBJECT_STORE_SECRET",
        "OBJECT_STORE_BUCKET",
        "EVAL_CONCURRENCY",
    ] {
        std::env::remove_var(key);
    }
    let settings = Settings::from_env().unwrap();
    assert!(settings.store_url.is_none());
    assert!(settings.object_store.is_none());
    assert_eq!(settings.cors_origins, vec!["http://localhost:3000"]);
    assert!(settings.eval_concurrency >= 1);

    // Fully specified environment.
    std::env::set_var("STORE_URL", "postgresql://localhost/evoforge");
    std::env::set_var("CACHE_URL", "redis://localhost:6379/0");
    std::env::set_var("SECRET_KEY", "0123456789abcdef0123456789abcdef");
    std::env::set_var("CORS_ORIGINS", "http://a.example, http://b.example");
    std::env::set_var("TOOL_REGISTRY_BOOTSTRAP_PATH", "/etc/evoforge/tools.json");
    std::env::set_var("OBJECT_STORE_ENDPOINT", "http://minio:9000");
    std::env::set_var("OBJECT_STORE_KEY", "minio");
    std::env::set_var("OBJECT_STORE_SECRET", "miniosecret");
    std::env::set_var("OBJECT_STORE_BUCKET", "reports");
    std::env::set_var("EVAL_CONCURRENCY", "8");

    let settings = Settings::from_env().unwrap();
    assert_eq!(
        settings.store_url.as_deref(),
        Some("postgresql://localhost/evoforge")
    );
    assert_eq!(
        settings.cors_origins,
        vec!["http://a.example", "http://b.example"]
    );
    assert_eq!(settings.eval_concurrency, 8);
    let object_store = settings.object_store.unwrap();
    assert_eq!(object_store.bucket, "reports");

    // Partial object store config is a configuration error.
    std::env::remove_var("OBJECT_STORE_BUCKET");
    assert!(Settings::from_env().is_err());
    std::env::set_var("OBJECT_STORE_BUCKET", "reports");

    // Malformed concurrency is a configuration error.
    std::env::set_var("EVAL_CONCURRENCY", "not a number");
    assert!(Settings::from_env().is_err());
    std::env::set_var("EVAL_CONCURRENCY", "0");
    assert!(Settings::from_env().is_err());
}

#[test]
fn test_event_wire_format_uses_snake_case_tags() {
    let event = ExperimentEvent::RoundCompleted {
        campaign_id: Uuid::nil(),
        round_number: 3,
        trace_id: Uuid::nil(),
        average_score: 0.42,
        variants_generated: 10,
        variants_selected: 5,
    };
    let wire = serde_json::to_value(&event).unwrap();
    assert_eq!(wire["event"], json!("round_completed"));
    assert_eq!(wire["round_number"], json!(3));

    let event = ExperimentEvent::CampaignStarted {
        campaign_id: Uuid::nil(),
        trace_id: Uuid::nil(),
        max_rounds: 7,
    };
    let wire = serde_json::to_value(&event).unwrap();
    assert_eq!(wire["event"], json!("campaign_started"));

    // Round-trips through the tagged representation.
    let back: ExperimentEvent = serde_json::from_value(wire).unwrap();
    assert!(matches!(back, ExperimentEvent::CampaignStarted { .. }));
}
