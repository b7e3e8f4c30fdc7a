//! Reporter agent: turns round and campaign state into persisted documents.
//!
//! Four document types: `round_summary`, `campaign_progress`,
//! `lineage_analysis`, `final_report`. Content is stored inline as
//! JSON-serialized text; payloads over the configured threshold spill to a
//! spool directory and the row keeps a stub plus `storage_path`.
//!
//! The report row's `round_id` resolution: from context for round-scoped
//! reports, from the subject variant's round for lineage reports, from the
//! campaign's latest round for campaign-wide reports.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::agents::{AgentContext, AgentRuntime, AgentType};
use crate::error::{EvoError, EvoResult};
use crate::lineage::LineageEngine;
use crate::models::decision::DecisionDraft;
use crate::models::{Report, ReportType, RoundStatus};

/// Spill policy for large report payloads.
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Payloads at most this many bytes stay inline.
    pub inline_max_bytes: usize,
    /// Directory for spilled payloads; `None` disables spilling (content
    /// stays inline regardless of size).
    pub spool_dir: Option<PathBuf>,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            inline_max_bytes: 64 * 1024,
            spool_dir: None,
        }
    }
}

/// The reporter.
pub struct ReporterAgent {
    runtime: Arc<AgentRuntime>,
    lineage: LineageEngine,
    config: ReporterConfig,
}

impl ReporterAgent {
    pub fn new(runtime: Arc<AgentRuntime>, config: ReporterConfig) -> Self {
        let lineage = LineageEngine::new(runtime.store.clone());
        Self {
            runtime,
            lineage,
            config,
        }
    }

    /// Generate and persist one report. `variant_id` is required for
    /// lineage analysis and ignored otherwise.
    pub async fn execute(
        &self,
        context: &AgentContext,
        report_type: ReportType,
        variant_id: Option<Uuid>,
    ) -> EvoResult<Report> {
        self.runtime
            .run_with_tracing(AgentType::Reporter, context, |span_id| async move {
                let (content, round_id) = match report_type {
                    ReportType::RoundSummary => {
                        let round_id = context.round_id.ok_or_else(|| {
                            EvoError::Store("round_id required for round summary".into())
                        })?;
                        (self.round_summary(round_id).await?, round_id)
                    }
                    ReportType::CampaignProgress => {
                        let round_id = self.latest_round_id(context.campaign_id).await?;
                        (self.campaign_progress(context.campaign_id).await?, round_id)
                    }
                    ReportType::LineageAnalysis => {
                        let variant_id = variant_id.ok_or_else(|| {
                            EvoError::Store("variant_id required for lineage analysis".into())
                        })?;
                        let variant = self.runtime.store.get_variant(variant_id).await?;
                        (self.lineage_analysis(variant_id).await?, variant.round_id)
                    }
                    ReportType::FinalReport => {
                        let round_id = self.latest_round_id(context.campaign_id).await?;
                        (self.final_report(context.campaign_id).await?, round_id)
                    }
                };

                let serialized = serde_json::to_string(&content)
                    .map_err(|e| EvoError::Store(format!("report serialization failed: {}", e)))?;
                let mut report = Report::new(
                    round_id,
                    report_type,
                    serialized.clone(),
                    json!({ "report_version": "1.0" }),
                );

                if serialized.len() > self.config.inline_max_bytes {
                    if let Some(spool_dir) = &self.config.spool_dir {
                        let path = spool_dir.join(format!("report-{}.json", report.id));
                        std::fs::create_dir_all(spool_dir).map_err(|e| {
                            EvoError::Store(format!("report spool dir unavailable: {}", e))
                        })?;
                        std::fs::write(&path, &serialized).map_err(|e| {
                            EvoError::Store(format!("report spill failed: {}", e))
                        })?;
                        report.storage_path = Some(path.to_string_lossy().into_owned());
                        report.content = json!({
                            "spilled": true,
                            "bytes": serialized.len(),
                        })
                        .to_string();
                    }
                }

                let report = self.runtime.store.insert_report(report).await?;

                let draft = DecisionDraft::new(
                    AgentType::Reporter.as_str(),
                    "report_generated",
                    format!("Generated {} report", report_type.as_str()),
                )
                .with_input(json!({
                    "report_type": report_type.as_str(),
                    "campaign_id": context.campaign_id,
                    "round_id": round_id,
                }))
                .with_output(json!({
                    "report_id": report.id,
                    "content_size": serialized.len(),
                    "spilled": report.storage_path.is_some(),
                }))
                .with_confidence(0.9);
                self.runtime
                    .audit
                    .record_decision(&context.trace, &span_id, context.scope(), draft)
                    .await?;

                log::info!(
                    "report generated report_id={} report_type={} trace_id={}",
                    report.id,
                    report_type.as_str(),
                    context.trace.trace_id
                );
                Ok(report)
            })
            .await
    }

    async fn latest_round_id(&self, campaign_id: Uuid) -> EvoResult<Uuid> {
        self.runtime
            .store
            .latest_round(campaign_id)
            .await
            .map(|r| r.id)
            .ok_or_else(|| EvoError::Store("no rounds exist for campaign report".into()))
    }

    async fn round_summary(&self, round_id: Uuid) -> EvoResult<Value> {
        let variants = self.runtime.store.variants_by_round(round_id).await;
        let summary = self.runtime.store.round_evaluation_summary(round_id).await;

        let selected = variants.iter().filter(|v| v.is_selected).count();
        let generations: Vec<u32> = variants.iter().map(|v| v.generation).collect();
        let max_generation = generations.iter().max().copied().unwrap_or(0);
        let avg_generation = if generations.is_empty() {
            0.0
        } else {
            generations.iter().map(|g| *g as f64).sum::<f64>() / generations.len() as f64
        };

        let mut mutation_counts: Vec<(String, usize)> = Vec::new();
        for v in &variants {
            if let Some(mt) = &v.mutation_type {
                match mutation_counts.iter_mut().find(|(name, _)| name == mt) {
                    Some((_, n)) => *n += 1,
                    None => mutation_counts.push((mt.clone(), 1)),
                }
            }
        }
        let top_mutation = mutation_counts
            .iter()
            .max_by_key(|(_, n)| *n)
            .map(|(name, _)| name.clone());

        let avg = summary.average_score.unwrap_or(0.0);
        Ok(json!({
            "summary": {
                "round_id": round_id,
                "total_variants": variants.len(),
                "selected_variants": selected,
                "selection_rate": if variants.is_empty() { 0.0 } else { selected as f64 / variants.len() as f64 },
            },
            "evaluations": {
                "total_evaluations": summary.total,
                "completed": summary.completed,
                "failed": summary.failed,
                "average_score": summary.average_score,
                "min_score": summary.min_score,
                "max_score": summary.max_score,
            },
            "evolution": {
                "max_generation": max_generation,
                "average_generation": avg_generation,
                "mutation_distribution": mutation_counts.iter().cloned().collect::<std::collections::BTreeMap<String, usize>>(),
            },
            "insights": [
                format!("Generated {} variants with {} selected", variants.len(), selected),
                format!("Average score: {:.2}", avg),
                format!("Evolution reached generation {}", max_generation),
                format!("Most common mutation: {}", top_mutation.unwrap_or_else(|| "n/a".into())),
            ],
        }))
    }

    async fn campaign_progress(&self, campaign_id: Uuid) -> EvoResult<Value> {
        let campaign = self.runtime.store.get_campaign(campaign_id).await?;
        let stats = self.runtime.store.campaign_statistics(campaign_id).await?;
        let rounds = self.runtime.store.rounds_by_campaign(campaign_id).await;

        let mut round_scores = Vec::new();
        for round in &rounds {
            if round.status == RoundStatus::Completed {
                let summary = self.runtime.store.round_evaluation_summary(round.id).await;
                if let Some(avg) = summary.average_score {
                    round_scores.push(json!({
                        "round_number": round.round_number,
                        "average_score": avg,
                    }));
                }
            }
        }

        let (trend, trend_direction) = if round_scores.len() >= 2 {
            let first = round_scores[0]["average_score"].as_f64().unwrap_or(0.0);
            let last = round_scores[round_scores.len() - 1]["average_score"]
                .as_f64()
                .unwrap_or(0.0);
            let trend = last - first;
            let direction = if trend > 0.0 {
                "improving"
            } else if trend < 0.0 {
                "declining"
            } else {
                "stable"
            };
            (trend, direction)
        } else {
            (0.0, "insufficient_data")
        };

        Ok(json!({
            "campaign": {
                "id": campaign.id,
                "name": campaign.name,
                "status": campaign.status.as_str(),
            },
            "progress": {
                "total_rounds": rounds.len(),
                "completed_rounds": stats.completed_rounds,
                "total_variants": stats.total_variants,
                "max_generation": stats.max_generation,
            },
            "performance": {
                "round_scores": round_scores,
                "trend": trend,
                "trend_direction": trend_direction,
            },
            "insights": [
                format!("Campaign '{}' has completed {} rounds", campaign.name, stats.completed_rounds),
                format!("Generated {} variants across {} generations", stats.total_variants, stats.max_generation),
                format!("Performance trend: {} ({:+.2})", trend_direction, trend),
            ],
        }))
    }

    async fn lineage_analysis(&self, variant_id: Uuid) -> EvoResult<Value> {
        let chain = self.lineage.full_lineage(variant_id).await?;
        let statistics = self.lineage.lineage_statistics(variant_id).await?;

        let mutations: Vec<String> = chain
            .iter()
            .filter_map(|v| v.mutation_type.clone())
            .collect();
        let mutation_path = if mutations.is_empty() {
            "no mutations".to_string()
        } else {
            mutations.join(" -> ")
        };
        let unique_mutations = mutations
            .iter()
            .collect::<std::collections::HashSet<_>>()
            .len();

        Ok(json!({
            "variant": {
                "id": variant_id,
                "generation": statistics.generation,
            },
            "lineage": {
                "total_ancestors": statistics.total_ancestors,
                "total_descendants": statistics.total_descendants,
                "founder": chain.last().map(|v| v.id),
                "mutation_path": mutation_path,
                "mutations": mutations,
            },
            "evolution": {
                "generations": chain.len(),
                "mutation_diversity": unique_mutations,
                "selected_in_lineage": statistics.selected_in_lineage,
            },
            "insights": [
                format!("Variant has {} ancestors across {} generations", statistics.total_ancestors, chain.len()),
                format!("Mutation path: {}", mutation_path),
                format!("Mutation diversity: {} unique mutation types", unique_mutations),
            ],
        }))
    }

    async fn final_report(&self, campaign_id: Uuid) -> EvoResult<Value> {
        let campaign = self.runtime.store.get_campaign(campaign_id).await?;
        let stats = self.runtime.store.campaign_statistics(campaign_id).await?;
        let rounds = self.runtime.store.rounds_by_campaign(campaign_id).await;

        // Best variants across all rounds, by mean completed score.
        let mut best: Vec<(Uuid, f64, u32)> = Vec::new();
        for round in &rounds {
            for variant in self.runtime.store.variants_by_round(round.id).await {
                let evals = self.runtime.store.evaluations_by_variant(variant.id).await;
                let scores: Vec<f64> = evals.iter().filter_map(|e| e.score).collect();
                if !scores.is_empty() {
                    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
                    best.push((variant.id, mean, variant.generation));
                }
            }
        }
        best.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let best_variants: Vec<Value> = best
            .iter()
            .take(10)
            .map(|(id, score, generation)| {
                json!({ "variant_id": id, "score": score, "generation": generation })
            })
            .collect();

        Ok(json!({
            "campaign": {
                "id": campaign.id,
                "name": campaign.name,
                "status": campaign.status.as_str(),
            },
            "results": {
                "total_rounds": rounds.len(),
                "completed_rounds": stats.completed_rounds,
                "total_variants": stats.total_variants,
                "max_generation": stats.max_generation,
                "selection_rate": stats.selection_rate,
            },
            "best_variants": best_variants,
            "conclusions": [
                format!("Experiment completed {} rounds", stats.completed_rounds),
                format!("Evolved {} variants over {} generations", stats.total_variants, stats.max_generation),
                format!("Overall selection rate: {:.1}%", stats.selection_rate * 100.0),
            ],
            "recommendations": [
                "Consider additional rounds if convergence was not reached",
                "Inspect the top lineages for recurring mutation patterns",
                "Revisit the mutation distribution if diversity collapsed early",
            ],
        }))
    }
}
