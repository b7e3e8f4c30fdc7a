//! Policy entity: a versioned selection/mutation/termination strategy.
//!
//! `unique(campaign_id, policy_type, version)` holds in the store; creating
//! a new policy for the same `(campaign, type)` pair deactivates the prior
//! active one and takes `version = max + 1` atomically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// What aspect of the campaign a policy governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyType {
    /// Which variants advance to the next round.
    Selection,
    /// How new variants are generated.
    Mutation,
    /// When the campaign stops.
    Termination,
}

impl PolicyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyType::Selection => "selection",
            PolicyType::Mutation => "mutation",
            PolicyType::Termination => "termination",
        }
    }
}

/// A versioned strategy row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub name: String,
    pub policy_type: PolicyType,
    /// Assigned by the store on creation (`max existing + 1`).
    pub version: u32,
    /// Strategy, rules, and parameters; shape depends on the policy type.
    pub config: Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Policy {
    /// Create a policy awaiting version assignment by the store.
    pub fn new(
        campaign_id: Uuid,
        name: impl Into<String>,
        policy_type: PolicyType,
        config: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            name: name.into(),
            policy_type,
            version: 1,
            config,
            is_active: true,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.updated_at = Utc::now();
    }

    pub fn soft_delete(&mut self) {
        self.deleted_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }
}
