//! Campaign entity: one complete run of the evolutionary loop.
//!
//! A campaign owns its configuration and lifecycle status. Rounds, variants,
//! and policies all hang off a campaign id. The lifecycle is:
//!
//! ```text
//! draft ──start──▶ active ◀──resume──┐
//!                    │ pause         │
//!                    ▼               │
//!                  paused ───────────┘
//!
//! active|paused ──▶ completed        (terminal)
//! any non-terminal ──▶ failed        (terminal)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{EvoError, EvoResult};
use crate::models::evaluation::{EnsembleComponent, EvaluatorType};

/// Campaign lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Failed,
}

impl CampaignStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
        }
    }
}

/// Recognized campaign configuration options.
///
/// Deserialized strictly: unknown keys are rejected so a typo in a config
/// payload fails at the boundary instead of silently falling back to a
/// default.
///
/// # Example
///
/// ```rust
/// use evoforge::models::CampaignConfig;
///
/// let config: CampaignConfig = serde_json::from_str(
///     r#"{"max_rounds": 3, "variants_per_round": 5, "evaluators": ["llm_judge"]}"#,
/// ).unwrap();
/// assert_eq!(config.max_rounds, 3);
/// assert_eq!(config.variants_per_round, 5);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CampaignConfig {
    /// Upper bound on rounds in the campaign. Must be >= 1.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Baseline number of children generated per round. Must be >= 1.
    /// The planner scales this per evolution phase.
    #[serde(default = "default_variants_per_round")]
    pub variants_per_round: u32,

    /// Ordered evaluator sequence; the first entry is the primary evaluator
    /// unless `ensemble` overrides it.
    #[serde(default = "default_evaluators")]
    pub evaluators: Vec<EvaluatorType>,

    /// When present the scorer runs a weighted-average ensemble instead of a
    /// single evaluator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensemble: Option<Vec<EnsembleComponent>>,

    /// Criterion → weight map used by the llm_judge aggregation. Weights
    /// should sum to 1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria_weights: Option<BTreeMap<String, f64>>,

    /// Seed for every RNG in the run. When absent, derived deterministically
    /// from the campaign id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_max_rounds() -> u32 {
    10
}

fn default_variants_per_round() -> u32 {
    10
}

fn default_evaluators() -> Vec<EvaluatorType> {
    vec![EvaluatorType::LlmJudge]
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            variants_per_round: default_variants_per_round(),
            evaluators: default_evaluators(),
            ensemble: None,
            criteria_weights: None,
            seed: None,
        }
    }
}

impl CampaignConfig {
    /// Validate the numeric bounds the schema requires.
    pub fn validate(&self) -> EvoResult<()> {
        if self.max_rounds < 1 {
            return Err(EvoError::Config("max_rounds must be >= 1".into()));
        }
        if self.variants_per_round < 1 {
            return Err(EvoError::Config("variants_per_round must be >= 1".into()));
        }
        if let Some(components) = &self.ensemble {
            if components.is_empty() {
                return Err(EvoError::Config("ensemble must not be empty".into()));
            }
            for c in components {
                if c.weight < 0.0 {
                    return Err(EvoError::Config(
                        "ensemble component weight must be >= 0".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// A campaign: the root entity of one evolution experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: CampaignStatus,
    pub config: CampaignConfig,
    /// Extensible metadata for custom fields; never interpreted by the core.
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Create a campaign in `draft` state.
    pub fn new(name: impl Into<String>, description: Option<String>, config: CampaignConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description,
            status: CampaignStatus::Draft,
            config,
            metadata: Value::Object(Default::default()),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// `draft → active`. Refused from any other state.
    pub fn activate(&mut self) -> EvoResult<()> {
        if self.status != CampaignStatus::Draft {
            return Err(self.transition_error("activate"));
        }
        self.set_status(CampaignStatus::Active);
        Ok(())
    }

    /// `active → paused`.
    pub fn pause(&mut self) -> EvoResult<()> {
        if self.status != CampaignStatus::Active {
            return Err(self.transition_error("pause"));
        }
        self.set_status(CampaignStatus::Paused);
        Ok(())
    }

    /// `paused → active`.
    pub fn resume(&mut self) -> EvoResult<()> {
        if self.status != CampaignStatus::Paused {
            return Err(self.transition_error("resume"));
        }
        self.set_status(CampaignStatus::Active);
        Ok(())
    }

    /// `active|paused → completed`.
    pub fn complete(&mut self) -> EvoResult<()> {
        if !matches!(self.status, CampaignStatus::Active | CampaignStatus::Paused) {
            return Err(self.transition_error("complete"));
        }
        self.set_status(CampaignStatus::Completed);
        Ok(())
    }

    /// Any non-terminal state → failed.
    pub fn fail(&mut self) -> EvoResult<()> {
        if self.status.is_terminal() {
            return Err(self.transition_error("fail"));
        }
        self.set_status(CampaignStatus::Failed);
        Ok(())
    }

    /// Soft delete; the row stays for the audit trail.
    pub fn soft_delete(&mut self) {
        self.deleted_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    /// The seed every RNG in the run derives from: the configured seed, or a
    /// deterministic function of the campaign id.
    pub fn effective_seed(&self) -> u64 {
        self.config.seed.unwrap_or_else(|| {
            let bytes = self.id.as_bytes();
            u64::from_be_bytes([
                bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14],
                bytes[15],
            ])
        })
    }

    fn set_status(&mut self, status: CampaignStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    fn transition_error(&self, attempted: &str) -> EvoError {
        EvoError::InvalidStateTransition {
            entity: "campaign".into(),
            current: self.status.as_str().into(),
            attempted: attempted.into(),
        }
    }
}
