//! Round and campaign orchestration.
//!
//! The [`Orchestrator`] drives the five-stage pipeline per round and the
//! round loop per campaign. Stage order is strict and observable through
//! `Round.status`; any stage failure marks the round `failed`, the campaign
//! `failed`, and aborts the loop.
//!
//! ```text
//! plan ▶ generate ▶ evaluate ▶ select ▶ report ▶ completed
//!   │        │          │         │        │
//!   └────────┴──────────┴─────────┴────────┴──▶ failed (any stage)
//! ```
//!
//! Cancellation is cooperative: a [`RunControl`]'s token is checked at every
//! stage boundary; an in-flight evaluator call may finish, but no next stage
//! starts once cancellation is observed.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agents::planner::RoundPlan;
use crate::agents::{
    AgentContext, AgentRuntime, PlannerAgent, PolicyMakerAgent, ReporterAgent, ReporterConfig,
    ScorerAgent, VariantGeneratorAgent,
};
use crate::error::{EvoError, EvoResult};
use crate::evaluator::EvaluatorDispatcher;
use crate::event::{EventBus, ExperimentEvent};
use crate::models::{CampaignStatus, ReportType, RoundStatus};
use crate::selection::SelectionStrategy;
use crate::store::Store;
use crate::trace::TraceContext;

/// Content of the deterministic generation-0 seed variant.
const SEED_CONTENT: &str = "// seed artifact (generation 0)\nfn solve() -> &'static str {\n    \"hello, world\"\n}\n";

/// Cancellation token plus optional progress sink for one run.
#[derive(Clone)]
pub struct RunControl {
    cancel: CancellationToken,
    progress: Option<Arc<dyn Fn(f64) + Send + Sync>>,
}

impl RunControl {
    /// No cancellation source, no progress sink.
    pub fn noop() -> Self {
        Self {
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn new(
        cancel: CancellationToken,
        progress: Option<Arc<dyn Fn(f64) + Send + Sync>>,
    ) -> Self {
        Self { cancel, progress }
    }

    /// Same cancellation source, no progress reporting.
    pub fn without_progress(&self) -> Self {
        Self {
            cancel: self.cancel.clone(),
            progress: None,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn report(&self, progress: f64) {
        if let Some(sink) = &self.progress {
            sink(progress);
        }
    }

    /// The stage-boundary check.
    fn ensure_not_cancelled(&self) -> EvoResult<()> {
        if self.cancel.is_cancelled() {
            Err(EvoError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Outcome of one completed round.
#[derive(Debug, Clone)]
pub struct RoundResult {
    pub round_id: Uuid,
    pub round_number: u32,
    pub variants_generated: usize,
    pub variants_evaluated: usize,
    pub variants_selected: usize,
    pub average_score: f64,
    pub report_id: Uuid,
    pub trace_id: Uuid,
}

/// Outcome of a campaign run.
#[derive(Debug, Clone)]
pub struct CampaignResult {
    pub campaign_id: Uuid,
    pub rounds_completed: usize,
    pub round_results: Vec<RoundResult>,
    pub final_report_id: Uuid,
    pub trace_id: Uuid,
}

/// Composes the five agents over the shared runtime and drives the state
/// machine. One orchestrator owns a campaign while executing it.
pub struct Orchestrator {
    store: Arc<Store>,
    events: EventBus,
    planner: PlannerAgent,
    variant_generator: VariantGeneratorAgent,
    scorer: ScorerAgent,
    policy_maker: PolicyMakerAgent,
    reporter: ReporterAgent,
}

impl Orchestrator {
    pub fn new(
        runtime: Arc<AgentRuntime>,
        dispatcher: Arc<EvaluatorDispatcher>,
        reporter_config: ReporterConfig,
        events: EventBus,
    ) -> Self {
        Self {
            store: runtime.store.clone(),
            events,
            planner: PlannerAgent::new(runtime.clone()),
            variant_generator: VariantGeneratorAgent::new(runtime.clone()),
            scorer: ScorerAgent::new(runtime.clone(), dispatcher),
            policy_maker: PolicyMakerAgent::new(runtime.clone()),
            reporter: ReporterAgent::new(runtime, reporter_config),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Execute one round end to end. On any stage failure the round is
    /// marked `failed` (with the reason in its metrics), a `round_failed`
    /// event is emitted, and the error propagates to the caller.
    pub async fn execute_round(
        &self,
        campaign_id: Uuid,
        round_number: u32,
        trace: TraceContext,
        control: &RunControl,
    ) -> EvoResult<RoundResult> {
        self.events.emit(ExperimentEvent::RoundStarted {
            campaign_id,
            round_number,
            trace_id: trace.trace_id,
        });
        log::info!(
            "round execution started campaign_id={} round_number={} trace_id={}",
            campaign_id,
            round_number,
            trace.trace_id
        );

        let mut round_id = None;
        match self
            .run_round_stages(campaign_id, round_number, trace, control, &mut round_id)
            .await
        {
            Ok(result) => {
                self.events.emit(ExperimentEvent::RoundCompleted {
                    campaign_id,
                    round_number,
                    trace_id: trace.trace_id,
                    average_score: result.average_score,
                    variants_generated: result.variants_generated,
                    variants_selected: result.variants_selected,
                });
                Ok(result)
            }
            Err(err) => {
                let reason = err.to_string();
                if let Some(round_id) = round_id {
                    // The round may already be terminal when the failure
                    // happened after its last transition.
                    if let Err(fail_err) = self.store.fail_round(round_id, &reason).await {
                        log::warn!(
                            "could not mark round failed round_id={}: {}",
                            round_id,
                            fail_err
                        );
                    }
                }
                self.events.emit(ExperimentEvent::RoundFailed {
                    campaign_id,
                    round_number,
                    trace_id: trace.trace_id,
                    reason: reason.clone(),
                });
                log::error!(
                    "round execution failed campaign_id={} round_number={} error={} trace_id={}",
                    campaign_id,
                    round_number,
                    reason,
                    trace.trace_id
                );
                Err(err)
            }
        }
    }

    async fn run_round_stages(
        &self,
        campaign_id: Uuid,
        round_number: u32,
        trace: TraceContext,
        control: &RunControl,
        round_id_out: &mut Option<Uuid>,
    ) -> EvoResult<RoundResult> {
        let context = AgentContext::new(trace, campaign_id);

        // Stage 1: plan. The planner writes the round as pending; moving it
        // through planning stamps started_at.
        control.ensure_not_cancelled()?;
        let (round, plan) = self.planner.create_round(&context, round_number).await?;
        *round_id_out = Some(round.id);
        let context = context.with_round(round.id);
        self.store
            .transition_round(round.id, RoundStatus::Planning)
            .await?;
        control.report(0.2);

        // Stage 2: generate.
        control.ensure_not_cancelled()?;
        self.store
            .transition_round(round.id, RoundStatus::Generating)
            .await?;
        let parents = self
            .resolve_parents(&context, round_number, &plan)
            .await?;
        if parents.is_empty() {
            return Err(EvoError::Store(format!(
                "no parent variants found for round {}",
                round_number
            )));
        }
        let variants = self
            .variant_generator
            .generate_batch(&context, &parents, &plan)
            .await?;
        control.report(0.4);

        // Stage 3: evaluate.
        control.ensure_not_cancelled()?;
        self.store
            .transition_round(round.id, RoundStatus::Evaluating)
            .await?;
        let variant_ids: Vec<Uuid> = variants.iter().map(|v| v.id).collect();
        let batch = self
            .scorer
            .evaluate_batch(&context, &variant_ids, &plan.evaluation_strategy)
            .await?;
        control.report(0.6);

        // Stage 4: select. Policy activation and the is_selected marks are
        // one store transaction inside this call.
        control.ensure_not_cancelled()?;
        self.store
            .transition_round(round.id, RoundStatus::Selecting)
            .await?;
        let (policy, selection) = self
            .policy_maker
            .materialize_and_select(
                &context,
                round_number,
                plan.selection_pressure,
                SelectionStrategy::Adaptive,
            )
            .await?;
        let context = context.with_policy(policy.id);
        control.report(0.8);

        // Stage 5: report.
        control.ensure_not_cancelled()?;
        self.store
            .transition_round(round.id, RoundStatus::Reporting)
            .await?;
        let report = self
            .reporter
            .execute(&context, ReportType::RoundSummary, None)
            .await?;

        self.store
            .update_round_metrics(
                round.id,
                json!({
                    "variants_generated": variants.len(),
                    "variants_evaluated": batch.results.len(),
                    "variants_selected": selection.selected_ids.len(),
                    "average_score": batch.average_score,
                    "best_score": batch.ranked.first().map(|(_, s)| s),
                }),
            )
            .await?;
        self.store
            .transition_round(round.id, RoundStatus::Completed)
            .await?;
        control.report(1.0);

        log::info!(
            "round execution completed round_id={} variants={} selected={} average_score={:.3} trace_id={}",
            round.id,
            variants.len(),
            selection.selected_ids.len(),
            batch.average_score,
            trace.trace_id
        );

        Ok(RoundResult {
            round_id: round.id,
            round_number,
            variants_generated: variants.len(),
            variants_evaluated: batch.results.len(),
            variants_selected: selection.selected_ids.len(),
            average_score: batch.average_score,
            report_id: report.id,
            trace_id: trace.trace_id,
        })
    }

    /// Round 1 seeds the population; later rounds inherit the previous
    /// round's selected variants.
    async fn resolve_parents(
        &self,
        context: &AgentContext,
        round_number: u32,
        plan: &RoundPlan,
    ) -> EvoResult<Vec<Uuid>> {
        if round_number == 1 {
            let seed = self
                .variant_generator
                .create_variant(
                    context,
                    None,
                    0,
                    SEED_CONTENT.to_string(),
                    None,
                    json!({ "is_initial": true, "plan_hash": plan.plan_hash }),
                )
                .await?;
            return Ok(vec![seed.id]);
        }

        let previous = self
            .store
            .round_by_number(context.campaign_id, round_number - 1)
            .await?;
        Ok(self
            .store
            .selected_by_round(previous.id)
            .await
            .into_iter()
            .map(|v| v.id)
            .collect())
    }

    /// Execute a campaign: loop rounds sequentially, stop early once a
    /// round's average score reaches 0.95, and finish with a final report.
    /// A round failure (or observed cancellation) marks the campaign
    /// `failed` and aborts the loop.
    pub async fn execute_campaign(
        &self,
        campaign_id: Uuid,
        max_rounds: Option<u32>,
        trace: TraceContext,
        control: &RunControl,
    ) -> EvoResult<CampaignResult> {
        let campaign = self.store.get_campaign(campaign_id).await?;
        match campaign.status {
            CampaignStatus::Draft => {
                self.store.start_campaign(campaign_id).await?;
            }
            CampaignStatus::Paused => {
                self.store.resume_campaign(campaign_id).await?;
            }
            CampaignStatus::Active => {}
            CampaignStatus::Completed | CampaignStatus::Failed => {
                return Err(EvoError::InvalidStateTransition {
                    entity: "campaign".into(),
                    current: campaign.status.as_str().into(),
                    attempted: "execute".into(),
                });
            }
        }

        let max_rounds = max_rounds.unwrap_or(campaign.config.max_rounds).max(1);
        self.events.emit(ExperimentEvent::CampaignStarted {
            campaign_id,
            trace_id: trace.trace_id,
            max_rounds,
        });
        log::info!(
            "campaign execution started campaign_id={} max_rounds={} trace_id={}",
            campaign_id,
            max_rounds,
            trace.trace_id
        );

        let round_control = control.without_progress();
        let mut round_results: Vec<RoundResult> = Vec::new();

        for round_number in 1..=max_rounds {
            if let Err(err) = control.ensure_not_cancelled() {
                self.fail_campaign_quietly(campaign_id).await;
                self.events.emit(ExperimentEvent::Error {
                    trace_id: trace.trace_id,
                    message: "campaign cancelled".into(),
                });
                return Err(err);
            }

            match self
                .execute_round(campaign_id, round_number, trace, &round_control)
                .await
            {
                Ok(result) => {
                    let average_score = result.average_score;
                    round_results.push(result);
                    control.report(round_number as f64 / max_rounds as f64);

                    if average_score >= 0.95 {
                        log::info!(
                            "early stop: round {} average score {:.3} >= 0.95 trace_id={}",
                            round_number,
                            average_score,
                            trace.trace_id
                        );
                        break;
                    }
                }
                Err(err) => {
                    self.fail_campaign_quietly(campaign_id).await;
                    return Err(err);
                }
            }
        }

        let context = AgentContext::new(trace, campaign_id);
        let final_report = self
            .reporter
            .execute(&context, ReportType::FinalReport, None)
            .await?;
        self.store.complete_campaign(campaign_id).await?;

        self.events.emit(ExperimentEvent::CampaignCompleted {
            campaign_id,
            trace_id: trace.trace_id,
            rounds_completed: round_results.len(),
        });
        log::info!(
            "campaign execution completed campaign_id={} rounds_completed={} trace_id={}",
            campaign_id,
            round_results.len(),
            trace.trace_id
        );

        Ok(CampaignResult {
            campaign_id,
            rounds_completed: round_results.len(),
            round_results,
            final_report_id: final_report.id,
            trace_id: trace.trace_id,
        })
    }

    /// Mark the campaign failed, tolerating an already-terminal status.
    async fn fail_campaign_quietly(&self, campaign_id: Uuid) {
        if let Err(err) = self.store.fail_campaign(campaign_id).await {
            log::warn!(
                "could not mark campaign failed campaign_id={}: {}",
                campaign_id,
                err
            );
        }
    }
}
