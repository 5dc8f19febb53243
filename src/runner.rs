//! Run drivers: a single evaluation run, and the cross-run sweep over
//! provider/model combinations.

use std::path::PathBuf;
use std::time::Duration;

use crate::api::AgentClient;
use crate::config::{validate_evaluation_data, SystemConfig};
use crate::errors::EvalError;
use crate::evaluation::orchestrator::ConversationOrchestrator;
use crate::evaluation::results::ResultCollection;
use crate::metrics::MetricRegistry;
use crate::models::data::ConversationGroup;
use crate::models::result::RunSummary;
use crate::output::{log_summary, JsonSummaryWriter, ReportSink};
use crate::scheduler::{run_parallel_map, ProviderModel, SweepReport, SweepScheduler};
use crate::script::ScriptRunner;

/// Per-run options the configuration file does not carry.
#[derive(Default)]
pub struct RunOptions<'a> {
    /// Run label, typically `provider/model`.
    pub label: String,
    /// Directory relative script paths resolve against, normally the
    /// evaluation-data file's location.
    pub data_dir: Option<PathBuf>,
    /// Agent collaborator for live-data mode.
    pub agent: Option<&'a dyn AgentClient>,
}

/// Execute one full evaluation run: fail-fast validation, orchestration
/// of every conversation group under the intra-run thread budget, and
/// summary construction from the completed result collection.
pub fn run_evaluation(
    config: &SystemConfig,
    registry: &MetricRegistry,
    groups: Vec<ConversationGroup>,
    options: RunOptions<'_>,
) -> Result<RunSummary, EvalError> {
    config.validate(registry)?;
    validate_evaluation_data(&groups, options.data_dir.as_deref())?;

    log::info!(
        "starting evaluation run {} ({} conversation groups)",
        options.label,
        groups.len()
    );

    let mut scripts =
        ScriptRunner::new().with_timeout(Duration::from_secs(config.script_timeout_secs()));
    if let Some(dir) = &options.data_dir {
        scripts = scripts.with_base_dir(dir);
    }

    let agent = match (config.api.enabled, options.agent) {
        (true, Some(agent)) => Some(agent),
        (true, None) => {
            log::warn!("live-data mode is enabled but no agent client was provided; evaluating stored responses");
            None
        }
        (false, agent) => {
            if agent.is_some() {
                log::debug!("agent client ignored: live-data mode is disabled");
            }
            None
        }
    };

    let results = ResultCollection::new();
    let mut orchestrator = ConversationOrchestrator::new(
        registry,
        &config.defaults,
        scripts,
        results.clone(),
    )
    .with_skip_on_failure_default(config.skip_on_failure)
    .with_turn_workers(config.concurrency.threads_per_worker);
    if let Some(agent) = agent {
        orchestrator = orchestrator.with_agent(agent);
    }

    // Conversation groups are independent of each other; dispatch them
    // over the intra-run thread budget.
    let runs = run_parallel_map(
        groups,
        config.concurrency.threads_per_worker,
        |mut group| orchestrator.process_group(&mut group),
    );
    for run in &runs {
        log::debug!(
            "group {} finished: {} rows, setup_failed={}, cascade={}",
            run.group_id,
            run.results_recorded,
            run.setup_failed,
            run.cascade_triggered
        );
    }

    let summary = RunSummary::from_results(options.label, results.into_results());
    log_summary(&summary);
    Ok(summary)
}

/// Run the same evaluation data across provider/model combinations.
///
/// Each combination executes as an isolated sweep worker with its own
/// output directory; `make_agent` supplies the live-data client for a
/// combination (return `None` to evaluate offline data). Worker failures
/// are isolated into the report.
pub fn run_model_sweep<F>(
    config: &SystemConfig,
    registry: &MetricRegistry,
    groups: &[ConversationGroup],
    combos: Vec<ProviderModel>,
    data_dir: Option<PathBuf>,
    make_agent: F,
) -> Result<SweepReport, EvalError>
where
    F: Fn(&ProviderModel) -> Option<Box<dyn AgentClient>> + Sync,
{
    let scheduler = SweepScheduler::new(config.concurrency, config.output.output_dir.clone());

    scheduler.run(combos, |combo, output_dir| {
        let mut run_config = config.clone();
        run_config.api.provider = combo.provider.clone();
        run_config.api.model = combo.model.clone();

        let agent = make_agent(combo);
        let summary = run_evaluation(
            &run_config,
            registry,
            groups.to_vec(),
            RunOptions {
                label: combo.to_string(),
                data_dir: data_dir.clone(),
                agent: agent.as_deref(),
            },
        )?;

        JsonSummaryWriter::new(output_dir).write(&summary)?;
        Ok(summary)
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::comparison::ComparisonEngine;
    use crate::config::{MetricSetting, SystemDefaults};
    use crate::metrics::test_support::StaticScorer;
    use crate::metrics::{MetricIdentifier, MetricScope, MetricSpec, Scorer, Threshold};
    use crate::models::data::Turn;
    use crate::models::result::EvaluationStatus;
    use crate::scheduler::ConcurrencyConfig;

    fn id(s: &str) -> MetricIdentifier {
        s.parse().unwrap()
    }

    fn registry_scoring(score: f64) -> MetricRegistry {
        let mut registry = MetricRegistry::new();
        registry.register(
            id("f:m1"),
            MetricSpec {
                scope: MetricScope::Turn,
                default_eligible: true,
                threshold: Threshold::AtLeast(0.5),
                requires: |_| Vec::new(),
                scorer: StaticScorer::scoring(score) as Arc<dyn Scorer>,
            },
        );
        registry
    }

    fn config() -> SystemConfig {
        SystemConfig {
            defaults: SystemDefaults {
                turn_metrics: vec![MetricSetting {
                    metric: id("f:m1"),
                    default: true,
                    threshold: Some(0.8),
                }],
                conversation_metrics: Vec::new(),
            },
            ..SystemConfig::default()
        }
    }

    fn groups(count: usize) -> Vec<ConversationGroup> {
        (0..count)
            .map(|g| {
                ConversationGroup::new(
                    format!("g{g}"),
                    vec![
                        Turn::new("t1", "first").with_response("r1"),
                        Turn::new("t2", "second").with_response("r2"),
                    ],
                )
            })
            .collect()
    }

    #[test]
    fn run_produces_a_complete_summary() {
        let registry = registry_scoring(0.9);
        let summary = run_evaluation(
            &config(),
            &registry,
            groups(3),
            RunOptions { label: "local".to_string(), ..RunOptions::default() },
        )
        .unwrap();

        // 3 groups x 2 turns x 1 metric.
        assert_eq!(summary.total, 6);
        assert_eq!(summary.passed, 6);
        assert_eq!(summary.label, "local");
        assert!(summary.by_metric.contains_key("f:m1"));
    }

    #[test]
    fn parallel_groups_record_every_row() {
        let registry = registry_scoring(0.9);
        let mut parallel_config = config();
        parallel_config.concurrency = ConcurrencyConfig { workers: 1, threads_per_worker: 4 };

        let summary = run_evaluation(
            &parallel_config,
            &registry,
            groups(8),
            RunOptions { label: "parallel".to_string(), ..RunOptions::default() },
        )
        .unwrap();
        assert_eq!(summary.total, 16);
    }

    #[test]
    fn invalid_configuration_aborts_before_evaluation() {
        let registry = MetricRegistry::new();
        let err = run_evaluation(
            &config(),
            &registry,
            groups(1),
            RunOptions::default(),
        );
        // f:m1 is configured as a default but not registered.
        assert!(matches!(err, Err(EvalError::Configuration(_))));
    }

    #[test]
    fn sweep_writes_summaries_and_ranks_models() {
        let out = tempfile::tempdir().unwrap();
        let mut sweep_config = config();
        sweep_config.output.output_dir = out.path().to_path_buf();
        sweep_config.concurrency = ConcurrencyConfig { workers: 2, threads_per_worker: 1 };

        // The scorer keys off the model under test via the registry built
        // per sweep in real use; here a single registry serves both.
        let registry = registry_scoring(0.9);
        let report = run_model_sweep(
            &sweep_config,
            &registry,
            &groups(2),
            vec![
                ProviderModel::new("openai", "gpt-4o"),
                ProviderModel::new("openai", "gpt-4o-mini"),
            ],
            None,
            |_| None,
        )
        .unwrap();

        assert_eq!(report.succeeded(), 2);
        assert!(out
            .path()
            .join("openai")
            .join("gpt-4o")
            .join("openai_gpt-4o_summary.json")
            .is_file());

        let summaries: Vec<_> = report.summaries().into_iter().cloned().collect();
        let ranking = ComparisonEngine::new(0.05).rank(&summaries);
        assert_eq!(ranking.rankings.len(), 2);
        assert!(ranking.rankings.iter().all(|r| r.rank >= 1));
    }

    #[test]
    fn run_summary_reflects_failures() {
        let registry = registry_scoring(0.3);
        let summary = run_evaluation(
            &config(),
            &registry,
            groups(1),
            RunOptions { label: "failing".to_string(), ..RunOptions::default() },
        )
        .unwrap();
        assert_eq!(summary.failed, 2);
        assert!(summary
            .results
            .iter()
            .all(|r| r.status == EvaluationStatus::Fail));
    }
}
