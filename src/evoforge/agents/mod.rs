//! The five pipeline agents and their shared contract.
//!
//! Each agent is a struct over a shared [`AgentRuntime`] (store, tool
//! registry, audit log, metrics). The common contract:
//!
//! - Input: an [`AgentContext`] carrying the trace and entity scope, plus
//!   agent-specific parameters.
//! - Side effect: at least one audit decision row per logical decision,
//!   always with a non-empty reasoning.
//! - Tool use: external capability only through the
//!   [`ToolRegistry`](crate::registry::ToolRegistry).
//! - Observability: [`AgentRuntime::run_with_tracing`] wraps every public
//!   entry: it opens the `agent.<type>.execute` span, measures duration,
//!   bumps the success/failure counters, and writes a failure decision row
//!   when the body errors.

pub mod planner;
pub mod policy_maker;
pub mod reporter;
pub mod scorer;
pub mod variant_generator;

pub use planner::{PlannerAgent, RoundPlan};
pub use policy_maker::PolicyMakerAgent;
pub use reporter::{ReporterAgent, ReporterConfig};
pub use scorer::ScorerAgent;
pub use variant_generator::{Mutation, VariantGeneratorAgent};

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use uuid::Uuid;

use crate::audit::{AuditLog, DecisionScope};
use crate::error::EvoResult;
use crate::metrics::AgentMetrics;
use crate::models::decision::DecisionDraft;
use crate::registry::ToolRegistry;
use crate::store::Store;
use crate::trace::TraceContext;

/// The five agent roles, used as metrics keys and audit `agent_type`
/// strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentType {
    Planner = 0,
    VariantGenerator = 1,
    Scorer = 2,
    PolicyMaker = 3,
    Reporter = 4,
}

impl AgentType {
    pub const COUNT: usize = 5;

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Planner => "planner",
            AgentType::VariantGenerator => "variant_generator",
            AgentType::Scorer => "scorer",
            AgentType::PolicyMaker => "policy_maker",
            AgentType::Reporter => "reporter",
        }
    }
}

/// Execution context threaded into every agent call.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub trace: TraceContext,
    pub campaign_id: Uuid,
    pub round_id: Option<Uuid>,
    pub variant_id: Option<Uuid>,
    pub policy_id: Option<Uuid>,
    pub metadata: Value,
}

impl AgentContext {
    pub fn new(trace: TraceContext, campaign_id: Uuid) -> Self {
        Self {
            trace,
            campaign_id,
            round_id: None,
            variant_id: None,
            policy_id: None,
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn with_round(mut self, round_id: Uuid) -> Self {
        self.round_id = Some(round_id);
        self
    }

    pub fn with_variant(mut self, variant_id: Uuid) -> Self {
        self.variant_id = Some(variant_id);
        self
    }

    pub fn with_policy(mut self, policy_id: Uuid) -> Self {
        self.policy_id = Some(policy_id);
        self
    }

    /// The audit scope corresponding to this context.
    pub fn scope(&self) -> DecisionScope {
        DecisionScope {
            campaign_id: Some(self.campaign_id),
            round_id: self.round_id,
            variant_id: self.variant_id,
            policy_id: self.policy_id,
        }
    }
}

/// Shared handles every agent operates through.
pub struct AgentRuntime {
    pub store: Arc<Store>,
    pub registry: Arc<ToolRegistry>,
    pub audit: Arc<AuditLog>,
    pub metrics: Arc<AgentMetrics>,
}

impl AgentRuntime {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<ToolRegistry>,
        audit: Arc<AuditLog>,
        metrics: Arc<AgentMetrics>,
    ) -> Self {
        Self {
            store,
            registry,
            audit,
            metrics,
        }
    }

    /// Invoke an external tool on behalf of an agent, threading the
    /// context's trace id into the registry's mandatory access log.
    ///
    /// This is the only sanctioned path from an agent to external
    /// capability; agents never hold a server handle directly.
    pub async fn call_tool(
        &self,
        context: &AgentContext,
        server: &str,
        tool: &str,
        params: Value,
        version: Option<&str>,
    ) -> EvoResult<Value> {
        self.registry
            .call(&context.trace, server, tool, params, version)
            .await
    }

    /// Wrap one agent execution with span bookkeeping, duration metrics,
    /// and the failure-row guarantee.
    ///
    /// `op` receives the freshly minted span id so the decisions it writes
    /// correlate with the span. When `op` errors, a failure decision row is
    /// written (reasoning = the failure message) before the error
    /// propagates; an agent execution without at least one decision row
    /// cannot happen.
    pub async fn run_with_tracing<T, F, Fut>(
        &self,
        agent: AgentType,
        context: &AgentContext,
        op: F,
    ) -> EvoResult<T>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = EvoResult<T>>,
    {
        let span_id = context.trace.new_span();
        log::info!(
            "agent execution started span=agent.{}.execute span_id={} trace_id={} campaign_id={}",
            agent.as_str(),
            span_id,
            context.trace.trace_id,
            context.campaign_id
        );
        let start = Instant::now();

        match op(span_id.clone()).await {
            Ok(value) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                self.metrics.record_success(agent, duration_ms);
                log::info!(
                    "agent execution completed agent={} duration_ms={} trace_id={}",
                    agent.as_str(),
                    duration_ms,
                    context.trace.trace_id
                );
                Ok(value)
            }
            Err(err) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                self.metrics.record_failure(agent, duration_ms);
                log::error!(
                    "agent execution failed agent={} error={} trace_id={}",
                    agent.as_str(),
                    err,
                    context.trace.trace_id
                );
                let failure = DecisionDraft::new(
                    agent.as_str(),
                    "execution_failed",
                    format!("{} execution failed: {}", agent.as_str(), err),
                )
                .with_duration_ms(duration_ms);
                // The failure row must land even though the body errored.
                self.audit
                    .record_decision(&context.trace, &span_id, context.scope(), failure)
                    .await?;
                Err(err)
            }
        }
    }
}
