//! Error taxonomy for the orchestration engine.
//!
//! Every fallible operation in the crate returns [`EvoResult`], carrying an
//! [`EvoError`] that classifies the failure the same way the orchestrator
//! reacts to it:
//!
//! | Variant | Reaction |
//! |---------|----------|
//! | `EntityNotFound` | surfaced to the caller, never retried |
//! | `InvalidStateTransition` | command refused |
//! | `LineageViolation` | fatal to the current stage, round marked failed |
//! | `Concurrency` | retried up to 3 times with jitter, then surfaced |
//! | `BudgetExceeded` | persisted as a failed evaluation, round continues |
//! | `ToolServerNotFound` / `ToolNotFound` | fatal to the current stage |
//! | `ToolExecution` | logged, the calling agent decides |
//! | `Cancelled` | terminal, non-error from the caller's perspective |
//! | `Timeout` | evaluation failed, stage continues |
//!
//! # Example
//!
//! ```rust
//! use evoforge::error::EvoError;
//!
//! let err = EvoError::EntityNotFound {
//!     entity: "campaign".into(),
//!     id: "550e8400-e29b-41d4-a716-446655440000".into(),
//! };
//! assert!(err.to_string().contains("campaign"));
//! assert!(!err.is_retryable());
//! ```

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Crate-wide result alias.
pub type EvoResult<T> = Result<T, EvoError>;

/// Classified error for every operation in the engine.
#[derive(Debug)]
pub enum EvoError {
    /// An entity id did not resolve to a live (non-soft-deleted) row.
    EntityNotFound { entity: String, id: String },
    /// A lifecycle command was issued against an entity in the wrong state.
    InvalidStateTransition {
        entity: String,
        current: String,
        attempted: String,
    },
    /// One of the three variant lineage invariants would be broken.
    LineageViolation(String),
    /// Optimistic-lock conflict: the row changed under the caller.
    Concurrency { entity: String, id: String },
    /// An evaluation exceeded its cost or latency budget without a fallback.
    BudgetExceeded(String),
    /// No tool server registered under the requested name (and version).
    ToolServerNotFound {
        server: String,
        version: Option<String>,
    },
    /// The server exists but does not expose the requested tool.
    ToolNotFound {
        server: String,
        tool: String,
        available: Vec<String>,
    },
    /// A tool ran and failed; the access log row records the details.
    ToolExecution { server: String, tool: String, message: String },
    /// Cooperative cancellation was observed at a stage boundary.
    Cancelled,
    /// An evaluator call outlived its soft timeout.
    Timeout { what: String, after_ms: u64 },
    /// Environment or bootstrap configuration was rejected.
    Config(String),
    /// The mandatory audit write itself failed. Treated as fatal.
    Audit(String),
    /// An internal store invariant broke (a bug, not a caller error).
    Store(String),
}

impl fmt::Display for EvoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvoError::EntityNotFound { entity, id } => {
                write!(f, "{} with id {} not found", entity, id)
            }
            EvoError::InvalidStateTransition {
                entity,
                current,
                attempted,
            } => write!(
                f,
                "cannot {} {} with status {}",
                attempted, entity, current
            ),
            EvoError::LineageViolation(msg) => {
                write!(f, "lineage invariant violation: {}", msg)
            }
            EvoError::Concurrency { entity, id } => {
                write!(f, "{} {} was modified by another writer", entity, id)
            }
            EvoError::BudgetExceeded(msg) => write!(f, "budget exceeded: {}", msg),
            EvoError::ToolServerNotFound { server, version } => match version {
                Some(v) => write!(f, "tool server '{}' (version {}) not found", server, v),
                None => write!(f, "tool server '{}' not found", server),
            },
            EvoError::ToolNotFound {
                server,
                tool,
                available,
            } => write!(
                f,
                "tool '{}' not found on server '{}'; available tools: {:?}",
                tool, server, available
            ),
            EvoError::ToolExecution { server, tool, message } => {
                write!(f, "tool '{}/{}' failed: {}", server, tool, message)
            }
            EvoError::Cancelled => write!(f, "cancelled"),
            EvoError::Timeout { what, after_ms } => {
                write!(f, "{} timed out after {} ms", what, after_ms)
            }
            EvoError::Config(msg) => write!(f, "configuration error: {}", msg),
            EvoError::Audit(msg) => write!(f, "audit log write failed: {}", msg),
            EvoError::Store(msg) => write!(f, "store invariant violated: {}", msg),
        }
    }
}

impl Error for EvoError {}

impl EvoError {
    /// Whether the recovery policy permits an automatic retry.
    ///
    /// Only optimistic-lock conflicts qualify; everything else is either a
    /// caller error, a policy outcome, or terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EvoError::Concurrency { .. })
    }

    /// Convenience constructor used throughout the store layer.
    pub fn not_found(entity: &str, id: impl fmt::Display) -> Self {
        EvoError::EntityNotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }
}

/// Maximum attempts for retryable errors (initial try + 2 retries = 3).
const MAX_ATTEMPTS: u32 = 3;

/// Run `op` up to 3 times, retrying only errors where
/// [`EvoError::is_retryable`] holds, sleeping a jittered backoff between
/// attempts.
///
/// Non-retryable errors surface immediately.
///
/// # Example
///
/// ```rust,no_run
/// use evoforge::error::{retry_with_jitter, EvoResult};
///
/// # async fn demo() -> EvoResult<u32> {
/// let value = retry_with_jitter(|| async { Ok::<u32, _>(42) }).await?;
/// # Ok(value)
/// # }
/// ```
pub async fn retry_with_jitter<T, F, Fut>(mut op: F) -> EvoResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EvoResult<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                let jitter_ms = rand::thread_rng().gen_range(10..50) * attempt as u64;
                log::warn!(
                    "retryable error on attempt {}/{}: {} (backing off {} ms)",
                    attempt,
                    MAX_ATTEMPTS,
                    err,
                    jitter_ms
                );
                tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
            }
            Err(err) => return Err(err),
        }
    }
}
