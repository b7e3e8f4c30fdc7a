//! Variant entity: a candidate artifact and a node in the lineage DAG.
//!
//! Lineage invariants (enforced at construction and again by the
//! [`LineageEngine`](crate::lineage::LineageEngine)):
//!
//! 1. `generation == 0` iff `parent_id == None` (seed variants).
//! 2. Every other variant has `generation == parent.generation + 1`.
//! 3. `content_hash == sha256(content)`, computed once, deterministic.
//!
//! A parent's `round_id` may differ from the child's; parents typically live
//! in the previous round. Variants form a forest rooted at generation-0
//! founders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Hex SHA-256 of a variant's content. The single hashing function used for
/// content identity everywhere in the engine.
///
/// # Example
///
/// ```rust
/// use evoforge::models::variant::content_hash;
///
/// let h = content_hash("hello");
/// assert_eq!(h.len(), 64);
/// assert_eq!(h, content_hash("hello")); // deterministic
/// ```
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A single candidate in the evolution process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub id: Uuid,
    pub round_id: Uuid,
    pub parent_id: Option<Uuid>,
    /// 0 for seed variants, parent.generation + 1 otherwise.
    pub generation: u32,
    pub content: String,
    /// Hex SHA-256 of `content`.
    pub content_hash: String,
    /// Mutation operator that produced this variant; `None` for seeds.
    pub mutation_type: Option<String>,
    /// How this variant came to be (operator reasoning, parent hash, flags).
    pub mutation_metadata: Value,
    /// Marked true by selection; selected variants parent the next round.
    pub is_selected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Variant {
    /// Build a generation-0 seed variant (no parent).
    pub fn new_seed(round_id: Uuid, content: impl Into<String>, metadata: Value) -> Self {
        let content = content.into();
        let hash = content_hash(&content);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            round_id,
            parent_id: None,
            generation: 0,
            content,
            content_hash: hash,
            mutation_type: None,
            mutation_metadata: metadata,
            is_selected: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Build a child of `parent`, incrementing the generation counter.
    pub fn new_child(
        parent: &Variant,
        round_id: Uuid,
        content: impl Into<String>,
        mutation_type: impl Into<String>,
        mutation_metadata: Value,
    ) -> Self {
        let content = content.into();
        let hash = content_hash(&content);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            round_id,
            parent_id: Some(parent.id),
            generation: parent.generation + 1,
            content,
            content_hash: hash,
            mutation_type: Some(mutation_type.into()),
            mutation_metadata,
            is_selected: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn select_for_next_round(&mut self) {
        self.is_selected = true;
        self.updated_at = Utc::now();
    }

    pub fn soft_delete(&mut self) {
        self.deleted_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }
}
