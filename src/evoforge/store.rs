//! Typed blackboard shared by every stage of the pipeline.
//!
//! The [`Store`] exclusively owns all entity rows. This implementation keeps
//! them in memory behind a single `tokio::sync::RwLock`; each public method
//! acquires the lock once, so every method is one logical transaction and
//! compound transitions (round replanning, policy versioning plus the
//! selection marking it authorizes) are exposed as single methods rather
//! than method sequences. In particular, marking variants `is_selected`
//! happens in the same transaction that activates the selection policy:
//! there is no method that does one without the other.
//!
//! The external relational store described by the deployment docs plugs in
//! at this seam: the method set below is the persistence contract (typed
//! CRUD per entity plus the targeted queries), and all read methods filter
//! soft-deleted rows unless the `_including_deleted` variant is used.
//!
//! Concurrency notes:
//! - Writers serialize on the lock; readers are concurrent.
//! - `update_campaign` takes the caller's previously-read `updated_at` and
//!   refuses the write with [`EvoError::Concurrency`] when the row moved
//!   underneath; callers retry through
//!   [`retry_with_jitter`](crate::error::retry_with_jitter).
//! - Audit streams (`AgentDecision`, `ToolAccessLog`) are append-only and
//!   never deleted; evaluations are hard-deleted only on round replanning.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{EvoError, EvoResult};
use crate::models::{
    AgentDecision, Campaign, CampaignConfig, CampaignStatus, Evaluation, EvaluationStatus,
    EvaluatorType, Policy, PolicyType, Report, Round, RoundStatus, ToolAccessLog, Variant,
};

/// Aggregated evaluation numbers for one round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundEvaluationSummary {
    pub round_id: Uuid,
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub running: usize,
    pub failed: usize,
    pub average_score: Option<f64>,
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
}

/// Campaign-wide aggregates used by the planner and reporter.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignStatistics {
    pub campaign_id: Uuid,
    pub total_rounds: usize,
    pub completed_rounds: usize,
    pub total_variants: usize,
    pub selected_variants: usize,
    pub max_generation: u32,
    pub selection_rate: f64,
}

#[derive(Default)]
struct StoreInner {
    campaigns: HashMap<Uuid, Campaign>,
    rounds: HashMap<Uuid, Round>,
    variants: HashMap<Uuid, Variant>,
    evaluations: HashMap<Uuid, Evaluation>,
    policies: HashMap<Uuid, Policy>,
    decisions: Vec<AgentDecision>,
    tool_logs: Vec<ToolAccessLog>,
    reports: HashMap<Uuid, Report>,
}

/// The single shared writable resource of the engine.
pub struct Store {
    inner: RwLock<StoreInner>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
        }
    }

    // ── Campaigns ────────────────────────────────────────────────────────

    /// Create a campaign in `draft` state after validating its config.
    pub async fn create_campaign(
        &self,
        name: impl Into<String>,
        description: Option<String>,
        config: CampaignConfig,
    ) -> EvoResult<Campaign> {
        config.validate()?;
        let campaign = Campaign::new(name, description, config);
        let mut inner = self.inner.write().await;
        inner.campaigns.insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    pub async fn get_campaign(&self, id: Uuid) -> EvoResult<Campaign> {
        let inner = self.inner.read().await;
        inner
            .campaigns
            .get(&id)
            .filter(|c| c.deleted_at.is_none())
            .cloned()
            .ok_or_else(|| EvoError::not_found("campaign", id))
    }

    /// List live campaigns, optionally filtered by status, newest first.
    pub async fn list_campaigns(&self, status: Option<CampaignStatus>) -> Vec<Campaign> {
        let inner = self.inner.read().await;
        let mut campaigns: Vec<Campaign> = inner
            .campaigns
            .values()
            .filter(|c| c.deleted_at.is_none())
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        campaigns
    }

    /// Replace a campaign's mutable fields with optimistic locking.
    ///
    /// `expected_updated_at` is the `updated_at` the caller read; a mismatch
    /// means another writer got there first.
    pub async fn update_campaign(
        &self,
        campaign: Campaign,
        expected_updated_at: DateTime<Utc>,
    ) -> EvoResult<Campaign> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .campaigns
            .get_mut(&campaign.id)
            .filter(|c| c.deleted_at.is_none())
            .ok_or_else(|| EvoError::not_found("campaign", campaign.id))?;
        if stored.updated_at != expected_updated_at {
            return Err(EvoError::Concurrency {
                entity: "campaign".into(),
                id: campaign.id.to_string(),
            });
        }
        let mut next = campaign;
        next.updated_at = Utc::now();
        *stored = next.clone();
        Ok(next)
    }

    /// `draft → active`.
    pub async fn start_campaign(&self, id: Uuid) -> EvoResult<Campaign> {
        self.mutate_campaign(id, |c| c.activate()).await
    }

    pub async fn pause_campaign(&self, id: Uuid) -> EvoResult<Campaign> {
        self.mutate_campaign(id, |c| c.pause()).await
    }

    pub async fn resume_campaign(&self, id: Uuid) -> EvoResult<Campaign> {
        self.mutate_campaign(id, |c| c.resume()).await
    }

    pub async fn complete_campaign(&self, id: Uuid) -> EvoResult<Campaign> {
        self.mutate_campaign(id, |c| c.complete()).await
    }

    pub async fn fail_campaign(&self, id: Uuid) -> EvoResult<Campaign> {
        self.mutate_campaign(id, |c| c.fail()).await
    }

    pub async fn soft_delete_campaign(&self, id: Uuid) -> EvoResult<()> {
        let mut inner = self.inner.write().await;
        let campaign = inner
            .campaigns
            .get_mut(&id)
            .filter(|c| c.deleted_at.is_none())
            .ok_or_else(|| EvoError::not_found("campaign", id))?;
        campaign.soft_delete();
        Ok(())
    }

    async fn mutate_campaign<F>(&self, id: Uuid, f: F) -> EvoResult<Campaign>
    where
        F: FnOnce(&mut Campaign) -> EvoResult<()>,
    {
        let mut inner = self.inner.write().await;
        let campaign = inner
            .campaigns
            .get_mut(&id)
            .filter(|c| c.deleted_at.is_none())
            .ok_or_else(|| EvoError::not_found("campaign", id))?;
        f(campaign)?;
        Ok(campaign.clone())
    }

    /// Aggregates across a campaign's live rounds and variants.
    pub async fn campaign_statistics(&self, campaign_id: Uuid) -> EvoResult<CampaignStatistics> {
        let inner = self.inner.read().await;
        if !inner
            .campaigns
            .get(&campaign_id)
            .map_or(false, |c| c.deleted_at.is_none())
        {
            return Err(EvoError::not_found("campaign", campaign_id));
        }

        let rounds: Vec<&Round> = inner
            .rounds
            .values()
            .filter(|r| r.campaign_id == campaign_id && r.deleted_at.is_none())
            .collect();
        let round_ids: Vec<Uuid> = rounds.iter().map(|r| r.id).collect();
        let variants: Vec<&Variant> = inner
            .variants
            .values()
            .filter(|v| round_ids.contains(&v.round_id) && v.deleted_at.is_none())
            .collect();

        let selected = variants.iter().filter(|v| v.is_selected).count();
        Ok(CampaignStatistics {
            campaign_id,
            total_rounds: rounds.len(),
            completed_rounds: rounds
                .iter()
                .filter(|r| r.status == RoundStatus::Completed)
                .count(),
            total_variants: variants.len(),
            selected_variants: selected,
            max_generation: variants.iter().map(|v| v.generation).max().unwrap_or(0),
            selection_rate: if variants.is_empty() {
                0.0
            } else {
                selected as f64 / variants.len() as f64
            },
        })
    }

    // ── Rounds ───────────────────────────────────────────────────────────

    /// Insert a round, enforcing `unique(campaign_id, round_number)`.
    pub async fn insert_round(&self, round: Round) -> EvoResult<Round> {
        let mut inner = self.inner.write().await;
        if !inner
            .campaigns
            .get(&round.campaign_id)
            .map_or(false, |c| c.deleted_at.is_none())
        {
            return Err(EvoError::not_found("campaign", round.campaign_id));
        }
        let duplicate = inner.rounds.values().any(|r| {
            r.campaign_id == round.campaign_id
                && r.round_number == round.round_number
                && r.deleted_at.is_none()
        });
        if duplicate {
            return Err(EvoError::Store(format!(
                "round {} already exists for campaign {}",
                round.round_number, round.campaign_id
            )));
        }
        inner.rounds.insert(round.id, round.clone());
        Ok(round)
    }

    pub async fn get_round(&self, id: Uuid) -> EvoResult<Round> {
        let inner = self.inner.read().await;
        inner
            .rounds
            .get(&id)
            .filter(|r| r.deleted_at.is_none())
            .cloned()
            .ok_or_else(|| EvoError::not_found("round", id))
    }

    /// All live rounds of a campaign ordered by round number.
    pub async fn rounds_by_campaign(&self, campaign_id: Uuid) -> Vec<Round> {
        let inner = self.inner.read().await;
        let mut rounds: Vec<Round> = inner
            .rounds
            .values()
            .filter(|r| r.campaign_id == campaign_id && r.deleted_at.is_none())
            .cloned()
            .collect();
        rounds.sort_by_key(|r| r.round_number);
        rounds
    }

    pub async fn round_by_number(&self, campaign_id: Uuid, round_number: u32) -> EvoResult<Round> {
        let inner = self.inner.read().await;
        inner
            .rounds
            .values()
            .find(|r| {
                r.campaign_id == campaign_id
                    && r.round_number == round_number
                    && r.deleted_at.is_none()
            })
            .cloned()
            .ok_or_else(|| {
                EvoError::not_found("round", format!("{}#{}", campaign_id, round_number))
            })
    }

    pub async fn latest_round(&self, campaign_id: Uuid) -> Option<Round> {
        let inner = self.inner.read().await;
        inner
            .rounds
            .values()
            .filter(|r| r.campaign_id == campaign_id && r.deleted_at.is_none())
            .max_by_key(|r| r.round_number)
            .cloned()
    }

    /// `coalesce(max(round_number), 0) + 1`.
    pub async fn next_round_number(&self, campaign_id: Uuid) -> u32 {
        let inner = self.inner.read().await;
        inner
            .rounds
            .values()
            .filter(|r| r.campaign_id == campaign_id && r.deleted_at.is_none())
            .map(|r| r.round_number)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Advance the round state machine one stage (or to `failed`).
    pub async fn transition_round(&self, round_id: Uuid, next: RoundStatus) -> EvoResult<Round> {
        let mut inner = self.inner.write().await;
        let round = inner
            .rounds
            .get_mut(&round_id)
            .filter(|r| r.deleted_at.is_none())
            .ok_or_else(|| EvoError::not_found("round", round_id))?;
        round.transition(next)?;
        Ok(round.clone())
    }

    /// Mark a round failed, recording the reason in its metrics.
    pub async fn fail_round(&self, round_id: Uuid, reason: &str) -> EvoResult<Round> {
        let mut inner = self.inner.write().await;
        let round = inner
            .rounds
            .get_mut(&round_id)
            .filter(|r| r.deleted_at.is_none())
            .ok_or_else(|| EvoError::not_found("round", round_id))?;
        round.transition(RoundStatus::Failed)?;
        if let Value::Object(map) = &mut round.metrics {
            map.insert("failure_reason".into(), Value::String(reason.into()));
        }
        Ok(round.clone())
    }

    /// Merge keys into the round's metrics blob.
    pub async fn update_round_metrics(&self, round_id: Uuid, metrics: Value) -> EvoResult<Round> {
        let mut inner = self.inner.write().await;
        let round = inner
            .rounds
            .get_mut(&round_id)
            .filter(|r| r.deleted_at.is_none())
            .ok_or_else(|| EvoError::not_found("round", round_id))?;
        if let (Value::Object(target), Value::Object(updates)) = (&mut round.metrics, metrics) {
            for (k, v) in updates {
                target.insert(k, v);
            }
        }
        round.updated_at = Utc::now();
        Ok(round.clone())
    }

    /// The idempotent-replan transaction: soft-delete the round's variants,
    /// hard-delete its evaluations, reset status to `pending`, clear timers,
    /// and overwrite the plan.
    pub async fn reset_round(&self, round_id: Uuid, plan: Value) -> EvoResult<Round> {
        let mut inner = self.inner.write().await;
        if !inner
            .rounds
            .get(&round_id)
            .map_or(false, |r| r.deleted_at.is_none())
        {
            return Err(EvoError::not_found("round", round_id));
        }

        let now = Utc::now();
        for variant in inner.variants.values_mut() {
            if variant.round_id == round_id && variant.deleted_at.is_none() {
                variant.deleted_at = Some(now);
                variant.updated_at = now;
            }
        }
        inner.evaluations.retain(|_, e| e.round_id != round_id);

        let round = inner.rounds.get_mut(&round_id).ok_or_else(|| {
            EvoError::not_found("round", round_id)
        })?;
        round.status = RoundStatus::Pending;
        round.plan = Some(plan);
        round.metrics = Value::Object(Default::default());
        round.started_at = None;
        round.completed_at = None;
        round.updated_at = now;
        Ok(round.clone())
    }

    /// Store the planner's plan on a freshly created round.
    pub async fn set_round_plan(&self, round_id: Uuid, plan: Value) -> EvoResult<Round> {
        let mut inner = self.inner.write().await;
        let round = inner
            .rounds
            .get_mut(&round_id)
            .filter(|r| r.deleted_at.is_none())
            .ok_or_else(|| EvoError::not_found("round", round_id))?;
        round.plan = Some(plan);
        round.updated_at = Utc::now();
        Ok(round.clone())
    }

    // ── Variants ─────────────────────────────────────────────────────────

    /// Insert a variant after checking referential integrity and the three
    /// lineage invariants. This is the single gate; no code path writes a
    /// variant row around it.
    pub async fn insert_variant(&self, variant: Variant) -> EvoResult<Variant> {
        let mut inner = self.inner.write().await;
        if !inner
            .rounds
            .get(&variant.round_id)
            .map_or(false, |r| r.deleted_at.is_none())
        {
            return Err(EvoError::not_found("round", variant.round_id));
        }

        match variant.parent_id {
            None => {
                if variant.generation != 0 {
                    return Err(EvoError::LineageViolation(format!(
                        "variant without parent must be generation 0, got {}",
                        variant.generation
                    )));
                }
            }
            Some(parent_id) => {
                if variant.generation == 0 {
                    return Err(EvoError::LineageViolation(
                        "generation 0 variant must not have a parent".into(),
                    ));
                }
                let parent = inner
                    .variants
                    .get(&parent_id)
                    .ok_or_else(|| EvoError::not_found("variant", parent_id))?;
                if variant.generation != parent.generation + 1 {
                    return Err(EvoError::LineageViolation(format!(
                        "child generation {} must be parent generation {} + 1",
                        variant.generation, parent.generation
                    )));
                }
            }
        }

        let expected = crate::models::variant::content_hash(&variant.content);
        if variant.content_hash != expected {
            return Err(EvoError::LineageViolation(
                "content_hash does not match sha256(content)".into(),
            ));
        }

        inner.variants.insert(variant.id, variant.clone());
        Ok(variant)
    }

    pub async fn get_variant(&self, id: Uuid) -> EvoResult<Variant> {
        let inner = self.inner.read().await;
        inner
            .variants
            .get(&id)
            .filter(|v| v.deleted_at.is_none())
            .cloned()
            .ok_or_else(|| EvoError::not_found("variant", id))
    }

    /// Live variants in a round, oldest first.
    pub async fn variants_by_round(&self, round_id: Uuid) -> Vec<Variant> {
        let inner = self.inner.read().await;
        let mut variants: Vec<Variant> = inner
            .variants
            .values()
            .filter(|v| v.round_id == round_id && v.deleted_at.is_none())
            .cloned()
            .collect();
        variants.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        variants
    }

    pub async fn selected_by_round(&self, round_id: Uuid) -> Vec<Variant> {
        let inner = self.inner.read().await;
        let mut variants: Vec<Variant> = inner
            .variants
            .values()
            .filter(|v| v.round_id == round_id && v.is_selected && v.deleted_at.is_none())
            .cloned()
            .collect();
        variants.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        variants
    }

    pub async fn variants_by_parent(&self, parent_id: Uuid) -> Vec<Variant> {
        let inner = self.inner.read().await;
        let mut variants: Vec<Variant> = inner
            .variants
            .values()
            .filter(|v| v.parent_id == Some(parent_id) && v.deleted_at.is_none())
            .cloned()
            .collect();
        variants.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        variants
    }

    /// First live variant carrying this content hash; ties broken by
    /// earliest `created_at`.
    pub async fn variant_by_content_hash(&self, hash: &str) -> Option<Variant> {
        let inner = self.inner.read().await;
        inner
            .variants
            .values()
            .filter(|v| v.content_hash == hash && v.deleted_at.is_none())
            .min_by(|a, b| a.created_at.cmp(&b.created_at))
            .cloned()
    }

    /// The ancestry chain of a variant as a recursive closure over
    /// `parent_id`, ordered by generation ascending (founder first).
    pub async fn lineage(&self, variant_id: Uuid) -> EvoResult<Vec<Variant>> {
        let inner = self.inner.read().await;
        let mut chain = Vec::new();
        let mut cursor = Some(variant_id);
        while let Some(id) = cursor {
            let variant = inner
                .variants
                .get(&id)
                .ok_or_else(|| EvoError::not_found("variant", id))?;
            cursor = variant.parent_id;
            chain.push(variant.clone());
            if chain.len() > inner.variants.len() {
                return Err(EvoError::Store(format!(
                    "lineage cycle detected at variant {}",
                    id
                )));
            }
        }
        chain.reverse();
        Ok(chain)
    }

    /// Every variant whose ancestry chain passes through `variant_id`.
    pub async fn descendants(&self, variant_id: Uuid) -> EvoResult<Vec<Variant>> {
        let inner = self.inner.read().await;
        if !inner.variants.contains_key(&variant_id) {
            return Err(EvoError::not_found("variant", variant_id));
        }
        let mut children_of: HashMap<Uuid, Vec<&Variant>> = HashMap::new();
        for v in inner.variants.values() {
            if let Some(parent) = v.parent_id {
                children_of.entry(parent).or_default().push(v);
            }
        }
        let mut result = Vec::new();
        let mut stack = vec![variant_id];
        while let Some(id) = stack.pop() {
            if let Some(children) = children_of.get(&id) {
                for child in children {
                    stack.push(child.id);
                    result.push((*child).clone());
                }
            }
        }
        result.sort_by(|a, b| {
            a.generation
                .cmp(&b.generation)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(result)
    }

    pub async fn soft_delete_variant(&self, id: Uuid) -> EvoResult<()> {
        let mut inner = self.inner.write().await;
        let variant = inner
            .variants
            .get_mut(&id)
            .filter(|v| v.deleted_at.is_none())
            .ok_or_else(|| EvoError::not_found("variant", id))?;
        variant.soft_delete();
        Ok(())
    }

    // ── Evaluations ──────────────────────────────────────────────────────

    pub async fn insert_evaluation(&self, evaluation: Evaluation) -> EvoResult<Evaluation> {
        let mut inner = self.inner.write().await;
        if !inner.variants.contains_key(&evaluation.variant_id) {
            return Err(EvoError::not_found("variant", evaluation.variant_id));
        }
        inner.evaluations.insert(evaluation.id, evaluation.clone());
        Ok(evaluation)
    }

    pub async fn get_evaluation(&self, id: Uuid) -> EvoResult<Evaluation> {
        let inner = self.inner.read().await;
        inner
            .evaluations
            .get(&id)
            .cloned()
            .ok_or_else(|| EvoError::not_found("evaluation", id))
    }

    /// Replace an evaluation row (single-writer: the dispatcher).
    pub async fn update_evaluation(&self, evaluation: Evaluation) -> EvoResult<Evaluation> {
        let mut inner = self.inner.write().await;
        if !inner.evaluations.contains_key(&evaluation.id) {
            return Err(EvoError::not_found("evaluation", evaluation.id));
        }
        inner.evaluations.insert(evaluation.id, evaluation.clone());
        Ok(evaluation)
    }

    pub async fn evaluations_by_variant(&self, variant_id: Uuid) -> Vec<Evaluation> {
        let inner = self.inner.read().await;
        let mut evals: Vec<Evaluation> = inner
            .evaluations
            .values()
            .filter(|e| e.variant_id == variant_id)
            .cloned()
            .collect();
        evals.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        evals
    }

    pub async fn evaluations_by_round(&self, round_id: Uuid) -> Vec<Evaluation> {
        let inner = self.inner.read().await;
        let mut evals: Vec<Evaluation> = inner
            .evaluations
            .values()
            .filter(|e| e.round_id == round_id)
            .cloned()
            .collect();
        evals.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        evals
    }

    /// Hard delete, used only when a round is replanned.
    pub async fn delete_evaluations_by_round(&self, round_id: Uuid) -> usize {
        let mut inner = self.inner.write().await;
        let before = inner.evaluations.len();
        inner.evaluations.retain(|_, e| e.round_id != round_id);
        before - inner.evaluations.len()
    }

    /// Cache lookup: a completed row for the same variant, evaluator, and
    /// config fingerprint.
    pub async fn find_cached_evaluation(
        &self,
        variant_id: Uuid,
        evaluator_type: EvaluatorType,
        config_fingerprint: &str,
    ) -> Option<Evaluation> {
        let inner = self.inner.read().await;
        inner
            .evaluations
            .values()
            .filter(|e| {
                e.variant_id == variant_id
                    && e.evaluator_type == evaluator_type
                    && e.status == EvaluationStatus::Completed
                    && e.metadata
                        .get("config_fingerprint")
                        .and_then(Value::as_str)
                        == Some(config_fingerprint)
            })
            .min_by(|a, b| a.created_at.cmp(&b.created_at))
            .cloned()
    }

    pub async fn round_evaluation_summary(&self, round_id: Uuid) -> RoundEvaluationSummary {
        let inner = self.inner.read().await;
        let evals: Vec<&Evaluation> = inner
            .evaluations
            .values()
            .filter(|e| e.round_id == round_id)
            .collect();
        let completed: Vec<&&Evaluation> = evals
            .iter()
            .filter(|e| e.status == EvaluationStatus::Completed)
            .collect();
        let scores: Vec<f64> = completed.iter().filter_map(|e| e.score).collect();
        RoundEvaluationSummary {
            round_id,
            total: evals.len(),
            completed: completed.len(),
            pending: evals
                .iter()
                .filter(|e| e.status == EvaluationStatus::Pending)
                .count(),
            running: evals
                .iter()
                .filter(|e| e.status == EvaluationStatus::Running)
                .count(),
            failed: evals
                .iter()
                .filter(|e| e.status == EvaluationStatus::Failed)
                .count(),
            average_score: if scores.is_empty() {
                None
            } else {
                Some(scores.iter().sum::<f64>() / scores.len() as f64)
            },
            min_score: scores.iter().cloned().fold(None, |acc, s| {
                Some(acc.map_or(s, |a: f64| a.min(s)))
            }),
            max_score: scores.iter().cloned().fold(None, |acc, s| {
                Some(acc.map_or(s, |a: f64| a.max(s)))
            }),
        }
    }

    pub async fn list_evaluations(&self) -> Vec<Evaluation> {
        let inner = self.inner.read().await;
        let mut evals: Vec<Evaluation> = inner.evaluations.values().cloned().collect();
        evals.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        evals
    }

    // ── Policies ─────────────────────────────────────────────────────────

    /// The selection transaction: deactivate any active policy for the same
    /// `(campaign, type)`, assign `version = max + 1`, insert the new policy
    /// active, and mark the selected variants, all under one write-lock
    /// acquisition. No reader can observe an active policy without its
    /// selection, or selected variants without the policy that chose them.
    ///
    /// `variant_ids` may be empty (mutation/termination policies select
    /// nothing). Every id is validated before any row is touched, so a bad
    /// id leaves the store exactly as it was.
    pub async fn create_policy_version_and_select(
        &self,
        mut policy: Policy,
        round_id: Uuid,
        variant_ids: &[Uuid],
    ) -> EvoResult<Policy> {
        let mut inner = self.inner.write().await;
        if !inner
            .campaigns
            .get(&policy.campaign_id)
            .map_or(false, |c| c.deleted_at.is_none())
        {
            return Err(EvoError::not_found("campaign", policy.campaign_id));
        }
        if !inner
            .rounds
            .get(&round_id)
            .map_or(false, |r| r.deleted_at.is_none())
        {
            return Err(EvoError::not_found("round", round_id));
        }

        // Validate the whole selection before mutating anything.
        for id in variant_ids {
            let variant = inner
                .variants
                .get(id)
                .filter(|v| v.deleted_at.is_none())
                .ok_or_else(|| EvoError::not_found("variant", *id))?;
            if variant.round_id != round_id {
                return Err(EvoError::Store(format!(
                    "variant {} does not belong to round {}",
                    id, round_id
                )));
            }
        }

        let max_version = inner
            .policies
            .values()
            .filter(|p| {
                p.campaign_id == policy.campaign_id && p.policy_type == policy.policy_type
            })
            .map(|p| p.version)
            .max()
            .unwrap_or(0);

        for existing in inner.policies.values_mut() {
            if existing.campaign_id == policy.campaign_id
                && existing.policy_type == policy.policy_type
                && existing.is_active
            {
                existing.deactivate();
            }
        }

        policy.version = max_version + 1;
        policy.is_active = true;
        inner.policies.insert(policy.id, policy.clone());

        for id in variant_ids {
            if let Some(variant) = inner.variants.get_mut(id) {
                variant.select_for_next_round();
            }
        }

        Ok(policy)
    }

    pub async fn get_policy(&self, id: Uuid) -> EvoResult<Policy> {
        let inner = self.inner.read().await;
        inner
            .policies
            .get(&id)
            .filter(|p| p.deleted_at.is_none())
            .cloned()
            .ok_or_else(|| EvoError::not_found("policy", id))
    }

    /// The at-most-one active policy for `(campaign, type)`.
    pub async fn active_policy(
        &self,
        campaign_id: Uuid,
        policy_type: PolicyType,
    ) -> Option<Policy> {
        let inner = self.inner.read().await;
        inner
            .policies
            .values()
            .find(|p| {
                p.campaign_id == campaign_id
                    && p.policy_type == policy_type
                    && p.is_active
                    && p.deleted_at.is_none()
            })
            .cloned()
    }

    pub async fn policies_by_campaign(
        &self,
        campaign_id: Uuid,
        active_only: bool,
    ) -> Vec<Policy> {
        let inner = self.inner.read().await;
        let mut policies: Vec<Policy> = inner
            .policies
            .values()
            .filter(|p| p.campaign_id == campaign_id && p.deleted_at.is_none())
            .filter(|p| !active_only || p.is_active)
            .cloned()
            .collect();
        policies.sort_by_key(|p| p.version);
        policies
    }

    // ── Audit streams (append-only) ──────────────────────────────────────

    pub async fn append_decision(&self, decision: AgentDecision) -> EvoResult<AgentDecision> {
        if decision.reasoning.trim().is_empty() {
            return Err(EvoError::Audit(
                "agent decision reasoning must not be empty".into(),
            ));
        }
        let mut inner = self.inner.write().await;
        inner.decisions.push(decision.clone());
        Ok(decision)
    }

    /// Decisions of one trace in write order.
    pub async fn decisions_by_trace(&self, trace_id: Uuid) -> Vec<AgentDecision> {
        let inner = self.inner.read().await;
        inner
            .decisions
            .iter()
            .filter(|d| d.trace_id == trace_id)
            .cloned()
            .collect()
    }

    pub async fn decisions_by_agent(&self, agent_type: &str) -> Vec<AgentDecision> {
        let inner = self.inner.read().await;
        inner
            .decisions
            .iter()
            .filter(|d| d.agent_type == agent_type)
            .cloned()
            .collect()
    }

    /// Hash of the most recent decision in a trace (chain head).
    pub async fn last_decision_hash(&self, trace_id: Uuid) -> Option<String> {
        let inner = self.inner.read().await;
        inner
            .decisions
            .iter()
            .rev()
            .find(|d| d.trace_id == trace_id)
            .map(|d| d.hash.clone())
    }

    pub async fn append_tool_log(&self, log: ToolAccessLog) -> EvoResult<ToolAccessLog> {
        let mut inner = self.inner.write().await;
        inner.tool_logs.push(log.clone());
        Ok(log)
    }

    pub async fn tool_logs_by_trace(&self, trace_id: Uuid) -> Vec<ToolAccessLog> {
        let inner = self.inner.read().await;
        inner
            .tool_logs
            .iter()
            .filter(|l| l.trace_id == trace_id)
            .cloned()
            .collect()
    }

    pub async fn list_tool_logs(&self) -> Vec<ToolAccessLog> {
        let inner = self.inner.read().await;
        inner.tool_logs.clone()
    }

    // ── Reports ──────────────────────────────────────────────────────────

    pub async fn insert_report(&self, report: Report) -> EvoResult<Report> {
        let mut inner = self.inner.write().await;
        if !inner
            .rounds
            .get(&report.round_id)
            .map_or(false, |r| r.deleted_at.is_none())
        {
            return Err(EvoError::not_found("round", report.round_id));
        }
        inner.reports.insert(report.id, report.clone());
        Ok(report)
    }

    pub async fn get_report(&self, id: Uuid) -> EvoResult<Report> {
        let inner = self.inner.read().await;
        inner
            .reports
            .get(&id)
            .cloned()
            .ok_or_else(|| EvoError::not_found("report", id))
    }

    pub async fn reports_by_round(&self, round_id: Uuid) -> Vec<Report> {
        let inner = self.inner.read().await;
        let mut reports: Vec<Report> = inner
            .reports
            .values()
            .filter(|r| r.round_id == round_id)
            .cloned()
            .collect();
        reports.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        reports
    }

    pub async fn list_reports(&self) -> Vec<Report> {
        let inner = self.inner.read().await;
        let mut reports: Vec<Report> = inner.reports.values().cloned().collect();
        reports.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        reports
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
