//! # Scorecard
//!
//! Evaluation orchestration and statistical model comparison for GenAI
//! applications.
//!
//! Scorecard drives conversational evaluation data through configurable
//! quality metrics: layered override resolution decides which metrics run
//! on which turn or conversation, a per-group state machine sequences
//! setup, turns, and cleanup with failure propagation and skip semantics,
//! and a bounded scheduler fans work out across threads and across
//! provider/model sweeps. Completed runs feed a comparison engine that
//! computes significance tests, confidence intervals, and a composite
//! ranking.
//!
//! Metric scoring itself, LLM clients, and report rendering are external
//! collaborators behind the [`metrics::Scorer`], [`api::AgentClient`],
//! and [`output::ReportSink`] traits.

pub mod api;
pub mod comparison;
pub mod config;
pub mod errors;
pub mod evaluation;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod output;
pub mod runner;
pub mod scheduler;
pub mod script;

pub use api::{AgentClient, AgentQuery, AgentReply};
pub use comparison::{ComparisonEngine, ComparisonReport, CompositeWeights};
pub use config::{SystemConfig, SystemDefaults};
pub use errors::{ConfigurationError, EvalError, ExternalCallError, ScriptError};
pub use evaluation::{ConversationOrchestrator, ResultCollection, UnitEvaluator};
pub use metrics::{MetricIdentifier, MetricRegistry, MetricScope, MetricSpec, Scorer, Threshold};
pub use models::{ConversationGroup, EvaluationResult, EvaluationStatus, MetricOverride, RunSummary, Turn};
pub use runner::{run_evaluation, run_model_sweep, RunOptions};
pub use scheduler::{ConcurrencyConfig, ProviderModel, SweepScheduler};
pub use script::ScriptRunner;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
