use std::error::Error;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use evoforge::audit::AuditLog;
use evoforge::error::EvoError;
use evoforge::models::ToolCallStatus;
use evoforge::registry::{ToolMetadata, ToolRegistry, ToolServer, ToolServerMetadata};
use evoforge::store::Store;
use evoforge::tools::{FilesystemToolServer, StoreQueryToolServer};
use evoforge::trace::TraceContext;
use serde_json::{json, Value};

fn registry_with_store() -> (ToolRegistry, Arc<Store>) {
    let store = Arc::new(Store::new());
    let audit = Arc::new(AuditLog::new(store.clone()));
    (ToolRegistry::new(audit), store)
}

/// A configurable fake server for registry behavior tests.
struct FakeServer {
    version: &'static str,
    fail: bool,
    calls: Arc<AtomicU32>,
}

impl FakeServer {
    fn new(version: &'static str) -> Self {
        Self {
            version,
            fail: false,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    fn failing(version: &'static str) -> Self {
        Self {
            version,
            fail: true,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl ToolServer for FakeServer {
    fn metadata(&self) -> ToolServerMetadata {
        ToolServerMetadata {
            name: "fake".into(),
            version: self.version.into(),
            description: "fake server".into(),
            tools: vec![
                ToolMetadata::new("echo", "echo params back"),
                ToolMetadata::new("retryable_echo", "echo with retries").idempotent(),
            ],
        }
    }

    async fn call(
        &self,
        _tool: &str,
        params: Value,
    ) -> Result<Value, Box<dyn Error + Send + Sync>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err("synthetic tool failure".into());
        }
        Ok(json!({ "echoed": params, "version": self.version }))
    }
}

#[tokio::test]
async fn test_latest_version_wins_without_explicit_version() {
    let (mut registry, _store) = registry_with_store();
    registry.register(Arc::new(FakeServer::new("1.0.0")));
    registry.register(Arc::new(FakeServer::new("1.10.0")));
    registry.register(Arc::new(FakeServer::new("1.2.0")));

    let trace = TraceContext::new();
    let output = registry
        .call(&trace, "fake", "echo", json!({}), None)
        .await
        .unwrap();
    assert_eq!(output["version"], json!("1.10.0"));

    // Exact version still reachable.
    let output = registry
        .call(&trace, "fake", "echo", json!({}), Some("1.0.0"))
        .await
        .unwrap();
    assert_eq!(output["version"], json!("1.0.0"));
}

#[tokio::test]
async fn test_unknown_server_and_version_errors() {
    let (mut registry, _store) = registry_with_store();
    registry.register(Arc::new(FakeServer::new("1.0.0")));
    let trace = TraceContext::new();

    let err = registry
        .call(&trace, "missing", "echo", json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EvoError::ToolServerNotFound { .. }));

    let err = registry
        .call(&trace, "fake", "echo", json!({}), Some("9.9.9"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EvoError::ToolServerNotFound {
            version: Some(_),
            ..
        }
    ));
}

#[tokio::test]
async fn test_unknown_tool_reports_available_tools() {
    let (mut registry, _store) = registry_with_store();
    registry.register(Arc::new(FakeServer::new("1.0.0")));
    let trace = TraceContext::new();

    let err = registry
        .call(&trace, "fake", "nope", json!({}), None)
        .await
        .unwrap_err();
    match err {
        EvoError::ToolNotFound { available, .. } => {
            assert!(available.contains(&"echo".to_string()));
        }
        other => panic!("expected ToolNotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn test_every_call_writes_exactly_one_access_log_row() {
    let (mut registry, store) = registry_with_store();
    registry.register(Arc::new(FakeServer::new("1.0.0")));
    registry.register(Arc::new(FakeServer::failing("2.0.0")));
    let trace = TraceContext::new();

    // Success path.
    registry
        .call(&trace, "fake", "echo", json!({"a": 1}), Some("1.0.0"))
        .await
        .unwrap();
    // Failure path.
    let err = registry
        .call(&trace, "fake", "echo", json!({"b": 2}), Some("2.0.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, EvoError::ToolExecution { .. }));

    let logs = store.tool_logs_by_trace(trace.trace_id).await;
    assert_eq!(logs.len(), 2);

    assert_eq!(logs[0].status, ToolCallStatus::Success);
    assert_eq!(logs[0].server_version, "1.0.0");
    assert!(logs[0].output_data.is_some());

    assert_eq!(logs[1].status, ToolCallStatus::Error);
    assert_eq!(logs[1].server_version, "2.0.0");
    assert!(logs[1].error_message.as_deref().unwrap().contains("synthetic"));
    assert!(logs[1].output_data.is_none());
}

#[tokio::test]
async fn test_idempotent_tools_are_retried() {
    let (mut registry, _store) = registry_with_store();
    let server = Arc::new(FakeServer::failing("1.0.0"));
    let calls = server.calls.clone();
    registry.register(server);
    let trace = TraceContext::new();

    // Non-idempotent: one attempt.
    let _ = registry.call(&trace, "fake", "echo", json!({}), None).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Idempotent: the jittered retry policy makes three attempts.
    let _ = registry
        .call(&trace, "fake", "retryable_echo", json!({}), None)
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_filesystem_server_refuses_escapes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("inside.txt"), "safe content").unwrap();

    let (mut registry, store) = registry_with_store();
    registry.register(Arc::new(FilesystemToolServer::new(dir.path().to_path_buf())));
    let trace = TraceContext::new();

    let output = registry
        .call(
            &trace,
            "filesystem",
            "read_file",
            json!({"path": "inside.txt"}),
            None,
        )
        .await
        .unwrap();
    assert_eq!(output["content"], json!("safe content"));

    // Traversal and absolute paths are refused, and still logged.
    for path in ["../../etc/passwd", "/etc/passwd"] {
        let err = registry
            .call(
                &trace,
                "filesystem",
                "read_file",
                json!({ "path": path }),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EvoError::ToolExecution { .. }));
    }

    let logs = store.tool_logs_by_trace(trace.trace_id).await;
    assert_eq!(logs.len(), 3);
}

#[tokio::test]
async fn test_bootstrap_from_declarative_file() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = dir.path().join("sandbox");
    std::fs::create_dir_all(&sandbox).unwrap();
    let bootstrap_path = dir.path().join("tools.json");
    std::fs::write(
        &bootstrap_path,
        serde_json::to_string(&json!([
            { "server": "filesystem", "root": sandbox },
            { "server": "web", "allowed_hosts": ["api.example.com"] },
            { "server": "store-query", "allowed_tables": ["campaigns"] }
        ]))
        .unwrap(),
    )
    .unwrap();

    let (mut registry, store) = registry_with_store();
    let registered =
        evoforge::tools::bootstrap_registry(&mut registry, store, &bootstrap_path).unwrap();
    assert_eq!(registered, 3);

    let names: Vec<String> = registry
        .list_servers()
        .iter()
        .map(|m| m.name.clone())
        .collect();
    assert_eq!(names, vec!["filesystem", "web", "store-query"]);

    // A malformed file is a configuration error.
    std::fs::write(&bootstrap_path, "[{\"server\": \"teleporter\"}]").unwrap();
    let (mut registry, store) = registry_with_store();
    assert!(
        evoforge::tools::bootstrap_registry(&mut registry, store, &bootstrap_path).is_err()
    );
}

#[tokio::test]
async fn test_store_query_server_enforces_table_whitelist() {
    let (mut registry, store) = registry_with_store();
    let campaign = store
        .create_campaign(
            "queryable",
            None,
            evoforge::models::CampaignConfig::default(),
        )
        .await
        .unwrap();
    registry.register(Arc::new(StoreQueryToolServer::new(
        store.clone(),
        vec!["campaigns".into(), "rounds".into()],
    )));
    let trace = TraceContext::new();

    let output = registry
        .call(
            &trace,
            "store-query",
            "query",
            json!({"table": "campaigns"}),
            None,
        )
        .await
        .unwrap();
    assert_eq!(output["row_count"], json!(1));
    assert_eq!(output["rows"][0]["id"], json!(campaign.id));

    // Whitelist miss.
    let err = registry
        .call(
            &trace,
            "store-query",
            "query",
            json!({"table": "variants"}),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EvoError::ToolExecution { .. }));

    // Write-shaped operations are refused by name.
    let err = registry
        .call(
            &trace,
            "store-query",
            "query",
            json!({"table": "delete campaigns"}),
            None,
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("refused") || err.to_string().contains("failed"));
}
