//! Execution event bus.
//!
//! The orchestrator emits a typed event at every campaign/round boundary;
//! the HTTP layer's SSE bridge subscribes and forwards them verbatim. Events
//! serialize with a `"event"` tag matching the wire event names
//! (`campaign_started`, `round_started`, `round_completed`, `round_failed`,
//! `campaign_completed`, `error`).
//!
//! # Example
//!
//! ```rust
//! use evoforge::event::{EventBus, ExperimentEvent};
//! use uuid::Uuid;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(16);
//! let mut rx = bus.subscribe();
//! bus.emit(ExperimentEvent::CampaignStarted {
//!     campaign_id: Uuid::new_v4(),
//!     trace_id: Uuid::new_v4(),
//!     max_rounds: 5,
//! });
//! let event = rx.try_recv().unwrap();
//! assert!(matches!(event, ExperimentEvent::CampaignStarted { .. }));
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events streamed by campaign/round execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExperimentEvent {
    CampaignStarted {
        campaign_id: Uuid,
        trace_id: Uuid,
        max_rounds: u32,
    },
    RoundStarted {
        campaign_id: Uuid,
        round_number: u32,
        trace_id: Uuid,
    },
    RoundCompleted {
        campaign_id: Uuid,
        round_number: u32,
        trace_id: Uuid,
        average_score: f64,
        variants_generated: usize,
        variants_selected: usize,
    },
    RoundFailed {
        campaign_id: Uuid,
        round_number: u32,
        trace_id: Uuid,
        reason: String,
    },
    CampaignCompleted {
        campaign_id: Uuid,
        trace_id: Uuid,
        rounds_completed: usize,
    },
    Error {
        trace_id: Uuid,
        message: String,
    },
}

/// Broadcast fan-out of [`ExperimentEvent`]s. Cloning shares the channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExperimentEvent>,
}

impl EventBus {
    /// `capacity` bounds the per-subscriber backlog; slow subscribers drop
    /// the oldest events (broadcast lag), they never block the orchestrator.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExperimentEvent> {
        self.sender.subscribe()
    }

    /// Emit to all current subscribers. Emitting with no subscribers is a
    /// no-op, not an error.
    pub fn emit(&self, event: ExperimentEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
