//! Selection policy engine: strategy materialization and multi-objective
//! ranking with a diversity guard.
//!
//! Selection happens in two phases. The policy maker first *materializes* a
//! policy (a strategy, a selection count derived from the pressure, and the
//! guard parameters), then *applies* it: every round variant gets four
//! objective axes, a pressure-weighted composite, and the diversity guard
//! picks the winners.
//!
//! Axes per variant:
//!
//! | Axis | Definition |
//! |------|------------|
//! | `evaluation_score` | mean of its completed scores (0 when none) |
//! | `novelty` | `1 / count_with_same_content_hash_in_round` |
//! | `diversity` | `1 / count_with_same_parent_in_round` |
//! | `innovation` | mean per-criterion "innovation" value, falling back to the evaluation score |
//!
//! Pending and failed evaluations rank as score 0; they never block
//! selection.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::{Evaluation, EvaluationStatus, Variant};

/// Selection strategies a policy can materialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    TopK,
    Tournament { size: u32 },
    Diversity,
    Adaptive,
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionStrategy::TopK => "top_k",
            SelectionStrategy::Tournament { .. } => "tournament",
            SelectionStrategy::Diversity => "diversity",
            SelectionStrategy::Adaptive => "adaptive",
        }
    }

    /// Parse a strategy name; tournament defaults to size 3.
    pub fn parse(name: &str) -> Option<SelectionStrategy> {
        match name {
            "top_k" => Some(SelectionStrategy::TopK),
            "tournament" => Some(SelectionStrategy::Tournament { size: 3 }),
            "diversity" => Some(SelectionStrategy::Diversity),
            "adaptive" => Some(SelectionStrategy::Adaptive),
            _ => None,
        }
    }
}

/// How many variants survive a round of `total` under `pressure`.
///
/// - pressure `< 0.3` keeps `⌊n·0.7⌋`
/// - pressure `[0.3, 0.7)` keeps `⌊n·0.5⌋`
/// - pressure `>= 0.7` keeps `max(⌊n·0.3⌋, 1)`
pub fn select_count(total: usize, pressure: f64) -> usize {
    if pressure < 0.3 {
        (total as f64 * 0.7).floor() as usize
    } else if pressure < 0.7 {
        (total as f64 * 0.5).floor() as usize
    } else {
        ((total as f64 * 0.3).floor() as usize).max(1)
    }
}

/// Resolve `adaptive` into a concrete strategy: diversity early, tournament
/// while scores are poor, top-k once progress is good.
pub fn resolve_adaptive(round_number: u32, average_score: Option<f64>) -> SelectionStrategy {
    if round_number < 5 {
        SelectionStrategy::Diversity
    } else if average_score.unwrap_or(0.0) < 0.5 {
        SelectionStrategy::Tournament { size: 3 }
    } else {
        SelectionStrategy::TopK
    }
}

/// Composite weights over the four axes, keyed to the pressure bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectiveWeights {
    pub evaluation: f64,
    pub novelty: f64,
    pub diversity: f64,
    pub innovation: f64,
}

impl ObjectiveWeights {
    /// Bucketed defaults, normalized to sum 1.
    pub fn for_pressure(pressure: f64) -> ObjectiveWeights {
        let raw = if pressure < 0.4 {
            ObjectiveWeights {
                evaluation: 0.5,
                novelty: 0.25,
                diversity: 0.2,
                innovation: 0.05,
            }
        } else if pressure < 0.7 {
            ObjectiveWeights {
                evaluation: 0.65,
                novelty: 0.15,
                diversity: 0.15,
                innovation: 0.05,
            }
        } else {
            ObjectiveWeights {
                evaluation: 0.8,
                novelty: 0.1,
                diversity: 0.07,
                innovation: 0.03,
            }
        };
        raw.normalized()
    }

    pub fn normalized(&self) -> ObjectiveWeights {
        let sum = self.evaluation + self.novelty + self.diversity + self.innovation;
        if sum == 0.0 {
            return ObjectiveWeights {
                evaluation: 1.0,
                novelty: 0.0,
                diversity: 0.0,
                innovation: 0.0,
            };
        }
        ObjectiveWeights {
            evaluation: self.evaluation / sum,
            novelty: self.novelty / sum,
            diversity: self.diversity / sum,
            innovation: self.innovation / sum,
        }
    }
}

/// Parent key used by the diversity axis and guard; parentless variants
/// group under a synthetic root.
fn parent_key(variant: &Variant) -> String {
    variant
        .parent_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "root".to_string())
}

/// One variant's axes and composite, ready for the guard.
#[derive(Debug, Clone)]
pub struct RankedVariant {
    pub variant_id: Uuid,
    pub parent_key: String,
    pub created_at: DateTime<Utc>,
    pub evaluation_score: f64,
    pub novelty: f64,
    pub diversity: f64,
    pub innovation: f64,
    pub composite: f64,
}

impl RankedVariant {
    pub fn objectives_json(&self) -> Value {
        json!({
            "evaluation_score": self.evaluation_score,
            "novelty": self.novelty,
            "diversity": self.diversity,
            "innovation": self.innovation,
            "composite": self.composite,
        })
    }
}

/// Compute axes and composites for a round's variants, returning the list
/// sorted by composite descending with ties broken by earliest
/// `created_at`.
pub fn rank_variants(
    variants: &[Variant],
    evaluations: &[Evaluation],
    weights: ObjectiveWeights,
) -> Vec<RankedVariant> {
    // Mean completed score per variant.
    let mut score_sums: HashMap<Uuid, (f64, usize)> = HashMap::new();
    // Mean "innovation" criterion per variant, where present.
    let mut innovation_sums: HashMap<Uuid, (f64, usize)> = HashMap::new();
    for eval in evaluations {
        if eval.status != EvaluationStatus::Completed {
            continue;
        }
        if let Some(score) = eval.score {
            let entry = score_sums.entry(eval.variant_id).or_insert((0.0, 0));
            entry.0 += score;
            entry.1 += 1;
        }
        if let Some(innovation) = eval
            .result_data
            .get("criteria_scores")
            .and_then(|c| c.get("innovation"))
            .and_then(Value::as_f64)
        {
            let entry = innovation_sums.entry(eval.variant_id).or_insert((0.0, 0));
            entry.0 += innovation;
            entry.1 += 1;
        }
    }

    let mut hash_counts: HashMap<&str, usize> = HashMap::new();
    let mut parent_counts: HashMap<String, usize> = HashMap::new();
    for v in variants {
        *hash_counts.entry(v.content_hash.as_str()).or_insert(0) += 1;
        *parent_counts.entry(parent_key(v)).or_insert(0) += 1;
    }

    let mut ranked: Vec<RankedVariant> = variants
        .iter()
        .map(|v| {
            let evaluation_score = score_sums
                .get(&v.id)
                .map(|(sum, n)| sum / *n as f64)
                .unwrap_or(0.0);
            let novelty = 1.0 / hash_counts[v.content_hash.as_str()] as f64;
            let key = parent_key(v);
            let diversity = 1.0 / parent_counts[&key] as f64;
            let innovation = innovation_sums
                .get(&v.id)
                .map(|(sum, n)| sum / *n as f64)
                .unwrap_or(evaluation_score);
            let composite = weights.evaluation * evaluation_score
                + weights.novelty * novelty
                + weights.diversity * diversity
                + weights.innovation * innovation;
            RankedVariant {
                variant_id: v.id,
                parent_key: key,
                created_at: v.created_at,
                evaluation_score,
                novelty,
                diversity,
                innovation,
                composite,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.composite
            .partial_cmp(&a.composite)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.created_at.cmp(&b.created_at))
    });
    ranked
}

/// The diversity guard over a composite-descending list.
///
/// First pass accepts only candidates whose parent key has not been chosen
/// yet, until `min_lineages` distinct parents are represented or the quota
/// is met; the second pass fills the remainder in composite order.
pub fn diversity_guard(
    ranked: &[RankedVariant],
    select_count: usize,
    min_lineages: usize,
) -> Vec<Uuid> {
    let mut selected: Vec<Uuid> = Vec::with_capacity(select_count);
    let mut chosen_parents: HashSet<&str> = HashSet::new();

    for candidate in ranked {
        if selected.len() >= select_count || chosen_parents.len() >= min_lineages {
            break;
        }
        if chosen_parents.contains(candidate.parent_key.as_str()) {
            continue;
        }
        chosen_parents.insert(candidate.parent_key.as_str());
        selected.push(candidate.variant_id);
    }

    for candidate in ranked {
        if selected.len() >= select_count {
            break;
        }
        if !selected.contains(&candidate.variant_id) {
            selected.push(candidate.variant_id);
        }
    }

    selected
}

/// Serialize a materialized policy's rules and parameters, the shape
/// persisted in `Policy.config`.
pub fn materialize_policy_config(
    strategy: SelectionStrategy,
    resolved: SelectionStrategy,
    round_number: u32,
    selection_pressure: f64,
    select_count: usize,
) -> Value {
    let min_lineages = match resolved {
        SelectionStrategy::Diversity => (select_count / 3).max(1),
        _ => 1,
    };
    let params = match resolved {
        SelectionStrategy::TopK => json!({
            "k": select_count,
            "metric": "composite",
        }),
        SelectionStrategy::Tournament { size } => json!({
            "winners": select_count,
            "tournament_size": size,
            "replacement": false,
        }),
        SelectionStrategy::Diversity => json!({
            "count": select_count,
            "min_lineages": min_lineages,
        }),
        SelectionStrategy::Adaptive => json!({ "count": select_count }),
    };

    json!({
        "strategy": strategy.as_str(),
        "resolved_strategy": resolved.as_str(),
        "round_number": round_number,
        "selection_pressure": selection_pressure,
        "select_count": select_count,
        "min_lineages": min_lineages,
        "rules": {
            "ranking": "multi_objective",
            "objectives": ["evaluation_score", "novelty", "diversity", "innovation"],
            "guard": "lineage_diversity",
        },
        "parameters": params,
    })
}

/// Weight map rendered into decision payloads.
pub fn weights_json(weights: ObjectiveWeights) -> BTreeMap<String, f64> {
    let mut map = BTreeMap::new();
    map.insert("evaluation_score".to_string(), weights.evaluation);
    map.insert("novelty".to_string(), weights.novelty);
    map.insert("diversity".to_string(), weights.diversity);
    map.insert("innovation".to_string(), weights.innovation);
    map
}
