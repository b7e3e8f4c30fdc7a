//! Lineage engine: the variant DAG and its traversals.
//!
//! Variants form a forest rooted at generation-0 founders. This module is
//! the creation gate (it enforces the three lineage invariants before any
//! row is written) and the query surface for ancestry, descendants,
//! kinship, and content dedup.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use evoforge::lineage::LineageEngine;
//! use evoforge::store::Store;
//!
//! # async fn demo() -> evoforge::error::EvoResult<()> {
//! let store = Arc::new(Store::new());
//! let engine = LineageEngine::new(store);
//! # let variant_id = uuid::Uuid::new_v4();
//! let chain = engine.full_lineage(variant_id).await?;
//! // chain[0] is the variant itself, chain.last() the founder
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::error::{EvoError, EvoResult};
use crate::models::variant::{content_hash, Variant};
use crate::store::Store;

/// Kinship between two variants, derived from their lineages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relationship {
    /// `a` appears in `b`'s ancestry chain.
    Ancestor,
    /// `b` appears in `a`'s ancestry chain.
    Descendant,
    /// Same parent.
    Sibling,
    /// Distinct parents but a shared ancestor.
    Cousin,
    /// No shared ancestor.
    Unrelated,
}

/// Aggregates over one variant's chain and subtree.
#[derive(Debug, Clone)]
pub struct LineageStatistics {
    pub variant_id: Uuid,
    pub generation: u32,
    pub total_ancestors: usize,
    pub total_descendants: usize,
    /// Mutation type → occurrences along the ancestry chain.
    pub mutation_counts: Vec<(String, usize)>,
    pub selected_in_lineage: usize,
    pub selection_rate: f64,
}

/// Prior variant carrying identical content, surfaced to creators.
#[derive(Debug, Clone)]
pub struct DuplicateHit {
    pub existing: Variant,
    pub content_hash: String,
}

/// Creation gate and traversal surface for the variant DAG.
pub struct LineageEngine {
    store: Arc<Store>,
}

impl LineageEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Create a variant, enforcing the lineage invariants:
    ///
    /// 1. `generation == 0` iff `parent_id` is absent;
    /// 2. otherwise `generation == parent.generation + 1`;
    /// 3. `content_hash == sha256(content)`.
    ///
    /// Callers pass the generation they intend; a mismatch against the
    /// parent is a [`LineageViolation`](EvoError::LineageViolation) and no
    /// row is written.
    pub async fn create_variant(
        &self,
        round_id: Uuid,
        parent_id: Option<Uuid>,
        generation: u32,
        content: impl Into<String>,
        mutation_type: Option<String>,
        mutation_metadata: Value,
    ) -> EvoResult<Variant> {
        let content = content.into();
        let variant = match parent_id {
            None => {
                if generation != 0 {
                    return Err(EvoError::LineageViolation(format!(
                        "variant without parent must be generation 0, got {}",
                        generation
                    )));
                }
                Variant::new_seed(round_id, content, mutation_metadata)
            }
            Some(parent_id) => {
                let parent = self.store.get_variant(parent_id).await?;
                if generation != parent.generation + 1 {
                    return Err(EvoError::LineageViolation(format!(
                        "child generation {} must be parent generation {} + 1",
                        generation, parent.generation
                    )));
                }
                let mutation = mutation_type.unwrap_or_else(|| "unspecified".to_string());
                Variant::new_child(&parent, round_id, content, mutation, mutation_metadata)
            }
        };
        self.store.insert_variant(variant).await
    }

    /// The ancestry chain `[self, parent, …, founder]`.
    pub async fn full_lineage(&self, variant_id: Uuid) -> EvoResult<Vec<Variant>> {
        let mut chain = self.store.lineage(variant_id).await?;
        chain.reverse();
        Ok(chain)
    }

    /// Number of generations in the chain (`|full_lineage|`).
    pub async fn generations(&self, variant_id: Uuid) -> EvoResult<usize> {
        Ok(self.full_lineage(variant_id).await?.len())
    }

    /// All variants whose ancestry passes through `variant_id`.
    pub async fn descendants(&self, variant_id: Uuid) -> EvoResult<Vec<Variant>> {
        self.store.descendants(variant_id).await
    }

    /// Kinship of `a` relative to `b`, computed from the two lineages.
    pub async fn relationship(&self, a: Uuid, b: Uuid) -> EvoResult<Relationship> {
        if a == b {
            return Ok(Relationship::Ancestor);
        }
        let lineage_a = self.full_lineage(a).await?;
        let lineage_b = self.full_lineage(b).await?;

        let ids_a: HashSet<Uuid> = lineage_a.iter().map(|v| v.id).collect();
        let ids_b: HashSet<Uuid> = lineage_b.iter().map(|v| v.id).collect();

        if ids_b.contains(&a) {
            return Ok(Relationship::Ancestor);
        }
        if ids_a.contains(&b) {
            return Ok(Relationship::Descendant);
        }

        let parent_a = lineage_a.first().and_then(|v| v.parent_id);
        let parent_b = lineage_b.first().and_then(|v| v.parent_id);
        if let (Some(pa), Some(pb)) = (parent_a, parent_b) {
            if pa == pb {
                return Ok(Relationship::Sibling);
            }
        }

        if ids_a.intersection(&ids_b).next().is_some() {
            return Ok(Relationship::Cousin);
        }
        Ok(Relationship::Unrelated)
    }

    /// Content dedup probe. Creators SHOULD call this before
    /// [`create_variant`](Self::create_variant); duplicates are permitted
    /// (distinct lineage) but the prior hit is surfaced. Ties break to the
    /// earliest `created_at`.
    pub async fn find_duplicate(&self, content: &str) -> Option<DuplicateHit> {
        let hash = content_hash(content);
        self.store
            .variant_by_content_hash(&hash)
            .await
            .map(|existing| DuplicateHit {
                existing,
                content_hash: hash,
            })
    }

    /// Aggregate statistics over one variant's chain and subtree.
    pub async fn lineage_statistics(&self, variant_id: Uuid) -> EvoResult<LineageStatistics> {
        let chain = self.full_lineage(variant_id).await?;
        let descendants = self.descendants(variant_id).await?;

        let mut mutation_counts: Vec<(String, usize)> = Vec::new();
        for v in &chain {
            if let Some(mt) = &v.mutation_type {
                match mutation_counts.iter_mut().find(|(name, _)| name == mt) {
                    Some((_, count)) => *count += 1,
                    None => mutation_counts.push((mt.clone(), 1)),
                }
            }
        }

        let selected = chain.iter().filter(|v| v.is_selected).count();
        let generation = chain.first().map(|v| v.generation).unwrap_or(0);
        Ok(LineageStatistics {
            variant_id,
            generation,
            total_ancestors: chain.len(),
            total_descendants: descendants.len(),
            mutation_counts,
            selected_in_lineage: selected,
            selection_rate: if chain.is_empty() {
                0.0
            } else {
                selected as f64 / chain.len() as f64
            },
        })
    }
}
