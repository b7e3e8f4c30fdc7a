//! Entity model for the evolutionary campaign engine.
//!
//! Every row the [`Store`](crate::store::Store) owns is defined here:
//! campaigns, rounds, variants, evaluations, policies, the two append-only
//! audit streams, reports, and async jobs. Identifiers are 128-bit UUIDs,
//! timestamps are UTC, and free-form JSON payloads are `serde_json::Value`
//! maps.
//!
//! Status enums carry their own transition rules so an invalid lifecycle
//! command is refused at the model layer with
//! [`InvalidStateTransition`](crate::error::EvoError::InvalidStateTransition)
//! before any row is touched.

pub mod campaign;
pub mod decision;
pub mod evaluation;
pub mod job;
pub mod policy;
pub mod report;
pub mod round;
pub mod tool_log;
pub mod variant;

pub use campaign::{Campaign, CampaignConfig, CampaignStatus};
pub use decision::AgentDecision;
pub use evaluation::{
    EnsembleComponent, Evaluation, EvaluationStatus, EvaluatorType,
};
pub use job::{Job, JobStatus, TaskType};
pub use policy::{Policy, PolicyType};
pub use report::{Report, ReportFormat, ReportType};
pub use round::{Round, RoundStatus};
pub use tool_log::{ToolAccessLog, ToolCallStatus};
pub use variant::Variant;
