//! Trace propagation for audit correlation.
//!
//! A [`TraceContext`] is minted once at the top of a campaign run and carried
//! unchanged through every round, agent call, and tool call. The 128-bit
//! `trace_id` keys both audit streams; each agent or tool invocation mints a
//! fresh 16-hex-char span id so decision rows can be correlated with the
//! active span.
//!
//! # Example
//!
//! ```rust
//! use evoforge::trace::TraceContext;
//!
//! let trace = TraceContext::new();
//! let span = trace.new_span();
//! assert_eq!(span.len(), 16);
//! assert!(span.chars().all(|c| c.is_ascii_hexdigit()));
//! ```

use rand::Rng;
use uuid::Uuid;

/// Correlation context threaded through a single campaign run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceContext {
    /// 128-bit identifier shared by every audit row of the run.
    pub trace_id: Uuid,
}

impl TraceContext {
    /// Mint a fresh trace id. Called once per campaign run.
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4(),
        }
    }

    /// Adopt an externally supplied trace id (e.g. from a job request).
    pub fn with_trace_id(trace_id: Uuid) -> Self {
        Self { trace_id }
    }

    /// Mint a span id for one agent or tool invocation.
    ///
    /// Span ids are 16 lowercase hex characters (64 bits), independent of
    /// the trace id.
    pub fn new_span(&self) -> String {
        let bits: u64 = rand::thread_rng().gen();
        format!("{:016x}", bits)
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}
