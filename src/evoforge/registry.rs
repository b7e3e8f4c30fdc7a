//! Versioned tool registry: the single gated path to external capability.
//!
//! Servers register under `(name, semver)`. Calls resolve to an exact
//! version when one is requested, otherwise to the highest registered
//! version of the named server. Every invocation, success or failure,
//! produces exactly one [`ToolAccessLog`](crate::models::ToolAccessLog) row
//! carrying the *resolved* version and the wall-clock duration; a failure to
//! write that row is itself an orchestration error.
//!
//! # Architecture
//!
//! ```text
//! Agent ──▶ ToolRegistry ──▶ [filesystem@1.0.0, web@1.0.0, store-query@1.0.0]
//!               │                   each: validate params → execute
//!               └── ToolAccessLog row per call (non-negotiable)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use evoforge::registry::ToolRegistry;
//! use evoforge::tools::FilesystemToolServer;
//! use evoforge::trace::TraceContext;
//!
//! # async fn demo(registry: &mut ToolRegistry) -> evoforge::error::EvoResult<()> {
//! registry.register(Arc::new(FilesystemToolServer::new("/var/data/corpus".into())));
//! let trace = TraceContext::new();
//! let output = registry
//!     .call(&trace, "filesystem", "read_file", serde_json::json!({"path": "seed.txt"}), None)
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use crate::audit::AuditLog;
use crate::error::{EvoError, EvoResult};
use crate::models::ToolAccessLog;
use crate::trace::TraceContext;

/// Describes one tool a server exposes.
#[derive(Debug, Clone)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    /// Whether a failed call may be retried safely.
    pub idempotent: bool,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            idempotent: false,
        }
    }

    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }
}

/// Identity and tool set of a registered server.
#[derive(Debug, Clone)]
pub struct ToolServerMetadata {
    pub name: String,
    /// Semantic version (`major.minor.patch`).
    pub version: String,
    pub description: String,
    pub tools: Vec<ToolMetadata>,
}

/// One external tool server. Implementations validate their own arguments
/// (directory whitelists for paths, host whitelists for URLs, table
/// whitelists and read-only shapes for store queries) before doing any work.
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// Server identity, version, and tool listing.
    fn metadata(&self) -> ToolServerMetadata;

    /// Execute one named tool. Unknown tool names never reach this method;
    /// the registry resolves them first.
    async fn call(&self, tool: &str, params: Value)
        -> Result<Value, Box<dyn Error + Send + Sync>>;

    /// Hook for servers that need setup before first use.
    async fn initialize(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }

    /// Hook for graceful teardown; called in reverse registration order.
    async fn shutdown(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}

/// Parsed `major.minor.patch`, ordered numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct SemVer(pub u32, pub u32, pub u32);

impl SemVer {
    pub(crate) fn parse(s: &str) -> Option<SemVer> {
        let mut parts = s.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(SemVer(major, minor, patch))
    }
}

/// The registry: effectively immutable after bootstrap; only its access-log
/// writes are shared state.
pub struct ToolRegistry {
    /// Key is `name@version`.
    servers: HashMap<String, Arc<dyn ToolServer>>,
    /// Registration order, kept for reverse-order shutdown.
    registration_order: Vec<String>,
    audit: Arc<AuditLog>,
}

impl ToolRegistry {
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self {
            servers: HashMap::new(),
            registration_order: Vec::new(),
            audit,
        }
    }

    /// Register a server under its `name@version` key. Re-registering the
    /// same key is ignored with a warning, matching bootstrap idempotency.
    pub fn register(&mut self, server: Arc<dyn ToolServer>) {
        let meta = server.metadata();
        let key = format!("{}@{}", meta.name, meta.version);
        if self.servers.contains_key(&key) {
            log::warn!("tool server already registered: {}", key);
            return;
        }
        log::info!(
            "tool server registered: {} ({} tools)",
            key,
            meta.tools.len()
        );
        self.servers.insert(key.clone(), server);
        self.registration_order.push(key);
    }

    /// Resolve a server by name and optional exact version.
    ///
    /// With a version: exact key lookup. Without: highest semver among the
    /// registered versions of that name.
    pub fn get_server(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> EvoResult<Arc<dyn ToolServer>> {
        if let Some(version) = version {
            let key = format!("{}@{}", name, version);
            return self.servers.get(&key).cloned().ok_or_else(|| {
                EvoError::ToolServerNotFound {
                    server: name.to_string(),
                    version: Some(version.to_string()),
                }
            });
        }

        self.servers
            .values()
            .filter(|s| s.metadata().name == name)
            .max_by_key(|s| SemVer::parse(&s.metadata().version).unwrap_or(SemVer(0, 0, 0)))
            .cloned()
            .ok_or_else(|| EvoError::ToolServerNotFound {
                server: name.to_string(),
                version: None,
            })
    }

    /// List the metadata of every registered server.
    pub fn list_servers(&self) -> Vec<ToolServerMetadata> {
        self.registration_order
            .iter()
            .filter_map(|key| self.servers.get(key))
            .map(|s| s.metadata())
            .collect()
    }

    /// Invoke `server/tool` with `params`, logging the access
    /// unconditionally.
    ///
    /// Resolution order: exact version when given, else highest semver;
    /// then the tool must exist on the resolved server (a miss reports the
    /// available tool list). Tools declared idempotent are retried through
    /// the standard jittered policy.
    pub async fn call(
        &self,
        trace: &TraceContext,
        server_name: &str,
        tool_name: &str,
        params: Value,
        version: Option<&str>,
    ) -> EvoResult<Value> {
        let server = self.get_server(server_name, version)?;
        let meta = server.metadata();

        let tool = meta
            .tools
            .iter()
            .find(|t| t.name == tool_name)
            .ok_or_else(|| EvoError::ToolNotFound {
                server: server_name.to_string(),
                tool: tool_name.to_string(),
                available: meta.tools.iter().map(|t| t.name.clone()).collect(),
            })?;
        let idempotent = tool.idempotent;

        // Execution errors are retried only when the server declared the
        // tool idempotent; everything else gets one attempt.
        let max_attempts = if idempotent { 3 } else { 1 };
        let start = Instant::now();
        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            match server.call(tool_name, params.clone()).await {
                Ok(output) => break Ok(output),
                Err(e) => {
                    let err = EvoError::ToolExecution {
                        server: server_name.to_string(),
                        tool: tool_name.to_string(),
                        message: e.to_string(),
                    };
                    if attempt >= max_attempts {
                        break Err(err);
                    }
                    let jitter_ms = rand::Rng::gen_range(&mut rand::thread_rng(), 10..50);
                    log::warn!(
                        "idempotent tool retry attempt {}/{} server={} tool={}: {}",
                        attempt,
                        max_attempts,
                        server_name,
                        tool_name,
                        err
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(jitter_ms)).await;
                }
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        // The log row is written on both paths before the result is
        // returned; an audit failure outranks the tool outcome.
        match &result {
            Ok(output) => {
                self.audit
                    .record_tool_access(ToolAccessLog::success(
                        trace.trace_id,
                        meta.name.as_str(),
                        meta.version.as_str(),
                        tool_name,
                        params,
                        output.clone(),
                        duration_ms,
                    ))
                    .await?;
                log::info!(
                    "tool call succeeded server={} version={} tool={} duration_ms={} trace_id={}",
                    meta.name,
                    meta.version,
                    tool_name,
                    duration_ms,
                    trace.trace_id
                );
            }
            Err(err) => {
                self.audit
                    .record_tool_access(ToolAccessLog::failure(
                        trace.trace_id,
                        meta.name.as_str(),
                        meta.version.as_str(),
                        tool_name,
                        params,
                        err.to_string(),
                        duration_ms,
                    ))
                    .await?;
                log::warn!(
                    "tool call failed server={} version={} tool={} error={} trace_id={}",
                    meta.name,
                    meta.version,
                    tool_name,
                    err,
                    trace.trace_id
                );
            }
        }

        result
    }

    /// Tear down every server in reverse registration order.
    pub async fn shutdown_all(&self) {
        for key in self.registration_order.iter().rev() {
            if let Some(server) = self.servers.get(key) {
                if let Err(e) = server.shutdown().await {
                    log::warn!("tool server shutdown failed: {}: {}", key, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semver_parses_and_orders() {
        assert_eq!(SemVer::parse("1.2.3"), Some(SemVer(1, 2, 3)));
        assert_eq!(SemVer::parse("10.0.1"), Some(SemVer(10, 0, 1)));
        assert_eq!(SemVer::parse("1.2"), None);
        assert_eq!(SemVer::parse("1.2.3.4"), None);
        assert_eq!(SemVer::parse("a.b.c"), None);
        assert!(SemVer(1, 10, 0) > SemVer(1, 9, 9));
        assert!(SemVer(2, 0, 0) > SemVer(1, 99, 99));
    }
}
