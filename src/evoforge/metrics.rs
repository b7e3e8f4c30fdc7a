//! Per-agent execution counters.
//!
//! A deliberately small metrics surface: success/failure counts and
//! cumulative duration per agent type, incremented by
//! [`run_with_tracing`](crate::agents::AgentRuntime::run_with_tracing).
//! Held as an explicit handle (no global registry) so tests and embedders
//! scope it however they want.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::agents::AgentType;

/// Counters for one agent type.
#[derive(Debug, Default)]
struct AgentCounters {
    success: AtomicU64,
    failure: AtomicU64,
    duration_ms_total: AtomicU64,
}

/// Success/failure/duration accounting across the five agent types.
#[derive(Debug, Default)]
pub struct AgentMetrics {
    counters: [AgentCounters; AgentType::COUNT],
}

/// A read-only snapshot of one agent's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub success: u64,
    pub failure: u64,
    pub duration_ms_total: u64,
}

impl AgentMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, agent: AgentType, duration_ms: u64) {
        let c = &self.counters[agent as usize];
        c.success.fetch_add(1, Ordering::Relaxed);
        c.duration_ms_total.fetch_add(duration_ms, Ordering::Relaxed);
    }

    pub fn record_failure(&self, agent: AgentType, duration_ms: u64) {
        let c = &self.counters[agent as usize];
        c.failure.fetch_add(1, Ordering::Relaxed);
        c.duration_ms_total.fetch_add(duration_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self, agent: AgentType) -> MetricsSnapshot {
        let c = &self.counters[agent as usize];
        MetricsSnapshot {
            success: c.success.load(Ordering::Relaxed),
            failure: c.failure.load(Ordering::Relaxed),
            duration_ms_total: c.duration_ms_total.load(Ordering::Relaxed),
        }
    }
}
