//! Evoforge: an evolutionary campaign orchestration engine.
//!
//! A **campaign** runs sequential **rounds**; each round executes a strict
//! five-stage pipeline (plan → generate → evaluate → select → report)
//! through five specialized agents sharing a typed store, with every
//! decision and every external tool call landing in a tamper-evident audit
//! trail.
//!
//! # Architecture
//!
//! ```text
//! JobRunner ──▶ Orchestrator ──▶ Planner ─▶ VariantGenerator ─▶ Scorer ─▶ PolicyMaker ─▶ Reporter
//!    │                │                                │
//!    │                └── Store (typed blackboard)     └── EvaluatorDispatcher (budgets, cache, ensembles)
//!    │
//!    └── JobTracker (status/progress/cancel)   EventBus (SSE bridge feed)
//!
//! Every agent/tool call: TraceContext ──▶ AuditLog (hash-chained decisions, tool access rows)
//! Tool access: ToolRegistry (versioned, whitelisted servers, mandatory logging)
//! ```

pub mod agents;
pub mod audit;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod event;
pub mod jobs;
pub mod lineage;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod selection;
pub mod store;
pub mod tools;
pub mod trace;
