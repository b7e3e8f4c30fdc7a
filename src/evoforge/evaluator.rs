//! Budget-aware evaluator dispatcher.
//!
//! Scores variants under a tagged evaluator kind, enforcing cost/latency
//! budgets, caching by `(variant, evaluator, config fingerprint)`, and
//! aggregating weighted ensembles with renormalization on partial failure.
//!
//! Per-variant protocol:
//!
//! 1. **Estimate**: `tokens ≈ len(content) / 4`; cost and latency from
//!    per-type coefficients (overridable in config).
//! 2. **Budget check**: over budget with a fallback, swap evaluators and
//!    record `fallback_from`. Over budget without one (and not allowed
//!    over): persist a `failed` row scored 0.0 and return a blocked result.
//! 3. **Cache**: a completed row for the same fingerprint is returned with
//!    `cached = true` and confidence 0.95.
//! 4. **Execute**: pending → running → completed/failed, under the
//!    configured soft timeout.
//! 5. **Ensemble**: components run concurrently; the aggregate is
//!    `Σ(wᵢ·sᵢ) / Σwᵢ` over the components that succeeded.
//!
//! The concrete LLM/test/benchmark runners sit behind
//! [`EvaluatorBackend`]; the deterministic reference backends shipped here
//! keep the pipeline runnable end-to-end and are what the tests exercise.

use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::error::{EvoError, EvoResult};
use crate::models::{
    EnsembleComponent, Evaluation, EvaluatorType, Variant,
};
use crate::store::Store;

/// Per-type cost/latency coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    pub usd_per_1k_tokens: f64,
    pub base_latency_ms: f64,
    pub latency_ms_per_token: f64,
}

impl CostModel {
    /// Built-in coefficients per evaluator type.
    pub fn default_for(evaluator: EvaluatorType) -> CostModel {
        match evaluator {
            EvaluatorType::LlmJudge => CostModel {
                usd_per_1k_tokens: 0.002,
                base_latency_ms: 800.0,
                latency_ms_per_token: 0.4,
            },
            EvaluatorType::Benchmark => CostModel {
                usd_per_1k_tokens: 0.0,
                base_latency_ms: 500.0,
                latency_ms_per_token: 0.2,
            },
            EvaluatorType::UnitTest => CostModel {
                usd_per_1k_tokens: 0.0,
                base_latency_ms: 200.0,
                latency_ms_per_token: 0.1,
            },
            // Ensembles are estimated as the sum of their components.
            EvaluatorType::Ensemble => CostModel {
                usd_per_1k_tokens: 0.0,
                base_latency_ms: 0.0,
                latency_ms_per_token: 0.0,
            },
        }
    }
}

fn default_timeout_seconds() -> u64 {
    300
}

/// Evaluation configuration, including the optional budget fields.
///
/// Serialized canonically (struct order, `BTreeMap` maps) so its fingerprint
/// is stable: two calls with equal configs share one cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub max_cost_usd: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub allow_over_budget: bool,
    pub fallback_evaluator: Option<EvaluatorType>,
    /// Components for ensemble runs.
    pub ensemble: Option<Vec<EnsembleComponent>>,
    /// Criterion weights for the llm_judge aggregation.
    pub criteria_weights: Option<BTreeMap<String, f64>>,
    /// Per-type coefficient overrides, keyed by evaluator type name.
    pub cost_models: Option<BTreeMap<String, CostModel>>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            max_cost_usd: None,
            max_latency_ms: None,
            allow_over_budget: false,
            fallback_evaluator: None,
            ensemble: None,
            criteria_weights: None,
            cost_models: None,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl EvaluationConfig {
    fn cost_model(&self, evaluator: EvaluatorType) -> CostModel {
        self.cost_models
            .as_ref()
            .and_then(|m| m.get(evaluator.as_str()))
            .copied()
            .unwrap_or_else(|| CostModel::default_for(evaluator))
    }

    /// Stable SHA-256 fingerprint of this config joined with the evaluator
    /// type; the cache key component.
    pub fn fingerprint(&self, evaluator: EvaluatorType) -> String {
        let canonical = format!(
            "{}|{}",
            evaluator.as_str(),
            serde_json::to_string(self).unwrap_or_default()
        );
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Up-front resource estimate for one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    pub tokens: u64,
    pub cost_usd: f64,
    pub latency_ms: f64,
}

/// Estimate tokens/cost/latency for evaluating `content_len` characters
/// under `evaluator`. Ensembles sum their components' estimates.
pub fn estimate_cost(
    content_len: usize,
    evaluator: EvaluatorType,
    config: &EvaluationConfig,
) -> CostEstimate {
    let tokens = (content_len / 4) as u64;
    if evaluator == EvaluatorType::Ensemble {
        let components = config.ensemble.clone().unwrap_or_default();
        let mut cost = 0.0;
        let mut latency = 0.0;
        for c in &components {
            let model = config.cost_model(c.evaluator);
            cost += tokens as f64 / 1000.0 * model.usd_per_1k_tokens;
            latency += model.base_latency_ms + model.latency_ms_per_token * tokens as f64;
        }
        return CostEstimate {
            tokens,
            cost_usd: cost,
            latency_ms: latency,
        };
    }
    let model = config.cost_model(evaluator);
    CostEstimate {
        tokens,
        cost_usd: tokens as f64 / 1000.0 * model.usd_per_1k_tokens,
        latency_ms: model.base_latency_ms + model.latency_ms_per_token * tokens as f64,
    }
}

/// What a backend concludes about one variant.
#[derive(Debug, Clone)]
pub struct EvaluatorVerdict {
    /// Clamped into `[0, 1]` by the dispatcher.
    pub score: f64,
    pub feedback: String,
    pub criteria_scores: BTreeMap<String, f64>,
}

/// The seam to the concrete LLM/test/benchmark runners.
#[async_trait]
pub trait EvaluatorBackend: Send + Sync {
    async fn evaluate(
        &self,
        variant: &Variant,
        config: &EvaluationConfig,
    ) -> Result<EvaluatorVerdict, Box<dyn Error + Send + Sync>>;
}

lazy_static::lazy_static! {
    /// Default criterion weights for the judge aggregation.
    static ref DEFAULT_CRITERIA_WEIGHTS: BTreeMap<String, f64> = {
        let mut w = BTreeMap::new();
        w.insert("correctness".to_string(), 0.3);
        w.insert("code_quality".to_string(), 0.25);
        w.insert("performance".to_string(), 0.2);
        w.insert("innovation".to_string(), 0.15);
        w.insert("simplicity".to_string(), 0.1);
        w
    };
}

/// Deterministic judge backend: criteria-based scoring with a small
/// innovation reward per generation.
pub struct HeuristicJudgeBackend;

#[async_trait]
impl EvaluatorBackend for HeuristicJudgeBackend {
    async fn evaluate(
        &self,
        variant: &Variant,
        config: &EvaluationConfig,
    ) -> Result<EvaluatorVerdict, Box<dyn Error + Send + Sync>> {
        let mut criteria = BTreeMap::new();
        criteria.insert("correctness".to_string(), 0.8);
        criteria.insert("code_quality".to_string(), 0.75);
        criteria.insert("performance".to_string(), 0.7);
        criteria.insert(
            "innovation".to_string(),
            (0.6 + variant.generation as f64 * 0.02).min(1.0f64),
        );
        criteria.insert("simplicity".to_string(), 0.85);

        let weights = config
            .criteria_weights
            .clone()
            .unwrap_or_else(|| DEFAULT_CRITERIA_WEIGHTS.clone());
        let score: f64 = criteria
            .iter()
            .map(|(k, v)| v * weights.get(k).copied().unwrap_or(0.0))
            .sum();

        let feedback = format!(
            "Judge evaluation of variant (generation {}):\n\
             - correctness: {:.2}\n- code_quality: {:.2}\n- performance: {:.2}\n\
             - innovation: {:.2}\n- simplicity: {:.2}\nOverall score: {:.2}",
            variant.generation,
            criteria["correctness"],
            criteria["code_quality"],
            criteria["performance"],
            criteria["innovation"],
            criteria["simplicity"],
            score
        );
        Ok(EvaluatorVerdict {
            score,
            feedback,
            criteria_scores: criteria,
        })
    }
}

/// Deterministic unit-test backend standing in for a real test runner.
pub struct TestHarnessBackend;

#[async_trait]
impl EvaluatorBackend for TestHarnessBackend {
    async fn evaluate(
        &self,
        _variant: &Variant,
        _config: &EvaluationConfig,
    ) -> Result<EvaluatorVerdict, Box<dyn Error + Send + Sync>> {
        let total_tests = 10u32;
        let passed_tests = 8u32;
        let score = passed_tests as f64 / total_tests as f64;

        let mut criteria = BTreeMap::new();
        criteria.insert("tests_passed".to_string(), score);
        criteria.insert("coverage".to_string(), 0.75);
        criteria.insert("execution_time".to_string(), 0.9);

        Ok(EvaluatorVerdict {
            score,
            feedback: format!(
                "Unit test evaluation:\n- tests passed: {}/{}\n- coverage: 0.75\n- execution time: 0.90",
                passed_tests, total_tests
            ),
            criteria_scores: criteria,
        })
    }
}

/// Deterministic benchmark backend standing in for a real harness.
pub struct BenchmarkBackend;

#[async_trait]
impl EvaluatorBackend for BenchmarkBackend {
    async fn evaluate(
        &self,
        _variant: &Variant,
        _config: &EvaluationConfig,
    ) -> Result<EvaluatorVerdict, Box<dyn Error + Send + Sync>> {
        let mut criteria = BTreeMap::new();
        criteria.insert("throughput".to_string(), 0.8);
        criteria.insert("latency".to_string(), 0.85);
        criteria.insert("memory".to_string(), 0.75);
        criteria.insert("cpu".to_string(), 0.8);
        let score = criteria.values().sum::<f64>() / criteria.len() as f64;

        Ok(EvaluatorVerdict {
            score,
            feedback: format!(
                "Benchmark evaluation:\n- throughput: 0.80\n- latency: 0.85\n- memory: 0.75\n- cpu: 0.80\nAggregate score: {:.2}",
                score
            ),
            criteria_scores: criteria,
        })
    }
}

/// Outcome of one dispatch, cached or fresh.
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub evaluation: Evaluation,
    pub cached: bool,
    /// Set when the budget check swapped evaluators.
    pub fallback_from: Option<EvaluatorType>,
    /// Set when the budget check refused to run at all.
    pub blocked: bool,
    pub confidence: f64,
}

impl EvaluationOutcome {
    /// The score ranking uses: missing/failed scores count as 0.
    pub fn effective_score(&self) -> f64 {
        self.evaluation.score.unwrap_or(0.0)
    }
}

/// Fan-out result over a batch of variants.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// One entry per requested variant, in request order.
    pub results: Vec<EvaluationOutcome>,
    /// `(variant_id, score)` sorted by score descending.
    pub ranked: Vec<(Uuid, f64)>,
    pub best: Option<Uuid>,
    pub worst: Option<Uuid>,
    pub average_score: f64,
}

/// The dispatcher: estimates, budgets, caches, executes, aggregates.
pub struct EvaluatorDispatcher {
    store: Arc<Store>,
    backends: HashMap<EvaluatorType, Arc<dyn EvaluatorBackend>>,
    concurrency: usize,
}

impl EvaluatorDispatcher {
    /// Construct with the deterministic reference backends registered.
    pub fn new(store: Arc<Store>) -> Self {
        let mut backends: HashMap<EvaluatorType, Arc<dyn EvaluatorBackend>> = HashMap::new();
        backends.insert(EvaluatorType::LlmJudge, Arc::new(HeuristicJudgeBackend));
        backends.insert(EvaluatorType::UnitTest, Arc::new(TestHarnessBackend));
        backends.insert(EvaluatorType::Benchmark, Arc::new(BenchmarkBackend));
        Self {
            store,
            backends,
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }

    /// Swap in a concrete backend for one evaluator type.
    pub fn with_backend(
        mut self,
        evaluator: EvaluatorType,
        backend: Arc<dyn EvaluatorBackend>,
    ) -> Self {
        self.backends.insert(evaluator, backend);
        self
    }

    /// Cap for the batch fan-out worker pool.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Run the full per-variant protocol.
    pub async fn evaluate(
        &self,
        variant_id: Uuid,
        evaluator_type: EvaluatorType,
        config: &EvaluationConfig,
    ) -> EvoResult<EvaluationOutcome> {
        let variant = self.store.get_variant(variant_id).await?;

        // Step 1: estimate.
        let mut effective_type = evaluator_type;
        let mut fallback_from = None;
        let mut estimate = estimate_cost(variant.content.len(), effective_type, config);

        // Step 2: budget check. Equal-to-budget is within budget.
        let over_cost = config
            .max_cost_usd
            .map_or(false, |max| estimate.cost_usd > max);
        let over_latency = config
            .max_latency_ms
            .map_or(false, |max| estimate.latency_ms > max);
        if over_cost || over_latency {
            if let Some(fallback) = config.fallback_evaluator {
                fallback_from = Some(effective_type);
                effective_type = fallback;
                estimate = estimate_cost(variant.content.len(), effective_type, config);
            } else if !config.allow_over_budget {
                return self
                    .persist_budget_block(&variant, evaluator_type, config, estimate)
                    .await;
            }
        }

        // Step 3: cache.
        let fingerprint = config.fingerprint(effective_type);
        if let Some(cached) = self
            .store
            .find_cached_evaluation(variant.id, effective_type, &fingerprint)
            .await
        {
            return Ok(EvaluationOutcome {
                evaluation: cached,
                cached: true,
                fallback_from,
                blocked: false,
                confidence: 0.95,
            });
        }

        // Step 4: execute.
        let mut evaluation = Evaluation::new(
            variant.id,
            variant.round_id,
            effective_type,
            serde_json::to_value(config).unwrap_or(Value::Null),
        );
        evaluation.metadata = json!({
            "config_fingerprint": fingerprint,
            "fallback_from": fallback_from.map(|f| f.as_str()),
        });
        let mut evaluation = self.store.insert_evaluation(evaluation).await?;
        evaluation.status = crate::models::EvaluationStatus::Running;
        let mut evaluation = self.store.update_evaluation(evaluation).await?;

        let started = Instant::now();
        let run = self.run_evaluator(&variant, effective_type, config);
        let timeout = Duration::from_secs(config.timeout_seconds);
        let outcome = tokio::time::timeout(timeout, run).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok((verdict, component_results))) => {
                let mut result_data = json!({
                    "feedback": verdict.feedback,
                    "criteria_scores": verdict.criteria_scores,
                    "execution": {
                        "evaluator_type": effective_type.as_str(),
                        "duration_ms": duration_ms,
                    },
                    "budget": {
                        "estimated_tokens": estimate.tokens,
                        "estimated_cost_usd": estimate.cost_usd,
                        "estimated_latency_ms": estimate.latency_ms,
                        "max_cost_usd": config.max_cost_usd,
                        "max_latency_ms": config.max_latency_ms,
                    },
                });
                if let Some(components) = component_results {
                    result_data["ensemble"] = components;
                }
                evaluation.complete(verdict.score, result_data);
                let evaluation = self.store.update_evaluation(evaluation).await?;
                Ok(EvaluationOutcome {
                    evaluation,
                    cached: false,
                    fallback_from,
                    blocked: false,
                    confidence: 0.85,
                })
            }
            Ok(Err(err)) => {
                evaluation.fail(
                    None,
                    json!({
                        "feedback": format!("Evaluation failed: {}", err),
                        "criteria_scores": {},
                    }),
                );
                let evaluation = self.store.update_evaluation(evaluation).await?;
                Ok(EvaluationOutcome {
                    evaluation,
                    cached: false,
                    fallback_from,
                    blocked: false,
                    confidence: 0.0,
                })
            }
            Err(_) => {
                evaluation.fail(
                    None,
                    json!({
                        "feedback": format!(
                            "Evaluation timed out after {} seconds",
                            config.timeout_seconds
                        ),
                        "criteria_scores": {},
                    }),
                );
                let evaluation = self.store.update_evaluation(evaluation).await?;
                Ok(EvaluationOutcome {
                    evaluation,
                    cached: false,
                    fallback_from,
                    blocked: false,
                    confidence: 0.0,
                })
            }
        }
    }

    /// Fan out over `variant_ids` under the concurrency cap, preserving
    /// request order in `results`.
    pub async fn evaluate_batch(
        &self,
        variant_ids: &[Uuid],
        evaluator_type: EvaluatorType,
        config: &EvaluationConfig,
    ) -> EvoResult<BatchOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let futures = variant_ids.iter().map(|&variant_id| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| EvoError::Cancelled)?;
                self.evaluate(variant_id, evaluator_type, config).await
            }
        });

        let mut results = Vec::with_capacity(variant_ids.len());
        for outcome in join_all(futures).await {
            results.push(outcome?);
        }

        let mut ranked: Vec<(Uuid, f64)> = results
            .iter()
            .map(|o| (o.evaluation.variant_id, o.effective_score()))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let average_score = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|o| o.effective_score()).sum::<f64>() / results.len() as f64
        };

        Ok(BatchOutcome {
            best: ranked.first().map(|(id, _)| *id),
            worst: ranked.last().map(|(id, _)| *id),
            ranked,
            results,
            average_score,
        })
    }

    /// Persist the blocked-by-budget failed row (score 0.0, marker
    /// criterion) and wrap it in a blocked outcome.
    async fn persist_budget_block(
        &self,
        variant: &Variant,
        evaluator_type: EvaluatorType,
        config: &EvaluationConfig,
        estimate: CostEstimate,
    ) -> EvoResult<EvaluationOutcome> {
        let mut evaluation = Evaluation::new(
            variant.id,
            variant.round_id,
            evaluator_type,
            serde_json::to_value(config).unwrap_or(Value::Null),
        );
        evaluation.metadata = json!({
            "config_fingerprint": config.fingerprint(evaluator_type),
            "budget_blocked": true,
        });
        evaluation.fail(
            Some(0.0),
            json!({
                "feedback": "Evaluation blocked by budget constraints",
                "criteria_scores": { "budget_exceeded": 1.0 },
                "budget": {
                    "estimated_tokens": estimate.tokens,
                    "estimated_cost_usd": estimate.cost_usd,
                    "estimated_latency_ms": estimate.latency_ms,
                    "max_cost_usd": config.max_cost_usd,
                    "max_latency_ms": config.max_latency_ms,
                },
            }),
        );
        let evaluation = self.store.insert_evaluation(evaluation).await?;
        log::warn!(
            "evaluation blocked by budget variant_id={} evaluator={} est_cost={:.6} est_latency_ms={:.1}",
            variant.id,
            evaluator_type.as_str(),
            estimate.cost_usd,
            estimate.latency_ms
        );
        Ok(EvaluationOutcome {
            evaluation,
            cached: false,
            fallback_from: None,
            blocked: true,
            confidence: 0.0,
        })
    }

    /// Execute one evaluator (or ensemble). Returns the verdict plus, for
    /// ensembles, the per-component breakdown.
    async fn run_evaluator(
        &self,
        variant: &Variant,
        evaluator_type: EvaluatorType,
        config: &EvaluationConfig,
    ) -> Result<(EvaluatorVerdict, Option<Value>), Box<dyn Error + Send + Sync>> {
        if evaluator_type == EvaluatorType::Ensemble {
            return self.run_ensemble(variant, config).await;
        }
        let backend = self.backends.get(&evaluator_type).ok_or_else(|| {
            Box::new(EvoError::Config(format!(
                "no backend registered for evaluator type {}",
                evaluator_type.as_str()
            ))) as Box<dyn Error + Send + Sync>
        })?;
        let mut verdict = backend.evaluate(variant, config).await?;
        verdict.score = verdict.score.clamp(0.0, 1.0);
        Ok((verdict, None))
    }

    /// Run ensemble components concurrently and aggregate the weighted
    /// average over the components that succeeded, renormalizing weights.
    /// All components failing fails the evaluation.
    async fn run_ensemble(
        &self,
        variant: &Variant,
        config: &EvaluationConfig,
    ) -> Result<(EvaluatorVerdict, Option<Value>), Box<dyn Error + Send + Sync>> {
        let components = match &config.ensemble {
            Some(components) if !components.is_empty() => components.clone(),
            // No components declared: degrade to a single-judge ensemble.
            _ => vec![EnsembleComponent {
                evaluator: EvaluatorType::LlmJudge,
                weight: 1.0,
                config: Value::Object(Default::default()),
            }],
        };

        let runs = components.iter().map(|component| {
            let component_config: EvaluationConfig =
                serde_json::from_value(component.config.clone()).unwrap_or_default();
            let evaluator = component.evaluator;
            async move {
                let backend = self.backends.get(&evaluator)?;
                backend
                    .evaluate(variant, &component_config)
                    .await
                    .ok()
                    .map(|v| (evaluator, v))
            }
        });
        let verdicts: Vec<Option<(EvaluatorType, EvaluatorVerdict)>> = join_all(runs).await;

        let mut breakdown = Vec::new();
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        for (component, verdict) in components.iter().zip(verdicts) {
            match verdict {
                Some((evaluator, verdict)) => {
                    let score = verdict.score.clamp(0.0, 1.0);
                    weighted_sum += score * component.weight;
                    total_weight += component.weight;
                    breakdown.push(json!({
                        "type": evaluator.as_str(),
                        "weight": component.weight,
                        "score": score,
                        "criteria_scores": verdict.criteria_scores,
                        "feedback": verdict.feedback,
                    }));
                }
                None => {
                    breakdown.push(json!({
                        "type": component.evaluator.as_str(),
                        "weight": component.weight,
                        "failed": true,
                    }));
                }
            }
        }

        if total_weight == 0.0 {
            return Err(Box::new(EvoError::ToolExecution {
                server: "evaluator".into(),
                tool: "ensemble".into(),
                message: "all ensemble components failed".into(),
            }));
        }

        let aggregate = (weighted_sum / total_weight).clamp(0.0, 1.0);
        let feedback = format!(
            "Ensemble evaluation over {} components, aggregate score {:.2}",
            components.len(),
            aggregate
        );
        Ok((
            EvaluatorVerdict {
                score: aggregate,
                feedback,
                criteria_scores: BTreeMap::new(),
            },
            Some(Value::Array(breakdown)),
        ))
    }
}
