//! Conversation orchestration: the setup → turns → cleanup lifecycle.
//!
//! Each conversation group is driven through an explicit state machine.
//! A failed setup script sweeps every resolved metric of the group to
//! ERROR and still runs cleanup. While running, a FAIL or ERROR turn
//! cascades into SKIPPED rows for the remaining turns when the group's
//! effective skip-on-failure flag is set; otherwise sibling turns execute
//! independently. Conversation-level metrics always observe the complete
//! ordered turn history.

use crate::api::{AgentClient, AmendError, DataAmender};
use crate::config::SystemDefaults;
use crate::errors::ExternalCallError;
use crate::evaluation::evaluator::UnitEvaluator;
use crate::evaluation::results::ResultCollection;
use crate::metrics::resolution::{
    resolve_conversation_metrics, resolve_turn_metrics, ResolvedEntry,
};
use crate::metrics::{MetricRegistry, UnitView};
use crate::models::data::ConversationGroup;
use crate::models::result::EvaluationResult;
use crate::scheduler::run_parallel_map;
use crate::script::ScriptRunner;

/// Lifecycle states of one conversation group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Pending,
    Setup,
    Running,
    Cleanup,
    Done,
    SetupFailed,
}

/// Outcome of driving one group to its terminal state.
#[derive(Debug, Clone)]
pub struct GroupRun {
    pub group_id: String,
    /// Terminal state; always `Done`.
    pub state: GroupState,
    pub setup_failed: bool,
    /// Whether skip-on-failure cut the group short.
    pub cascade_triggered: bool,
    /// Result rows this group contributed.
    pub results_recorded: usize,
}

/// Drives conversation groups through their lifecycle and appends one
/// result per resolved (unit, metric) pair to the shared collection.
pub struct ConversationOrchestrator<'a> {
    registry: &'a MetricRegistry,
    defaults: &'a SystemDefaults,
    scripts: ScriptRunner,
    agent: Option<&'a dyn AgentClient>,
    skip_on_failure_default: bool,
    turn_workers: usize,
    results: ResultCollection,
}

impl<'a> ConversationOrchestrator<'a> {
    pub fn new(
        registry: &'a MetricRegistry,
        defaults: &'a SystemDefaults,
        scripts: ScriptRunner,
        results: ResultCollection,
    ) -> Self {
        Self {
            registry,
            defaults,
            scripts,
            agent: None,
            skip_on_failure_default: false,
            turn_workers: 1,
            results,
        }
    }

    /// Enable live-data mode: turns are populated through this client
    /// before evaluation.
    pub fn with_agent(mut self, agent: &'a dyn AgentClient) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_skip_on_failure_default(mut self, skip: bool) -> Self {
        self.skip_on_failure_default = skip;
        self
    }

    /// Worker budget for concurrent turn evaluation. Only groups whose
    /// effective skip-on-failure flag is off may use it; cascading groups
    /// are strictly sequential.
    pub fn with_turn_workers(mut self, workers: usize) -> Self {
        self.turn_workers = workers.max(1);
        self
    }

    /// Drive one group from PENDING to DONE.
    pub fn process_group(&self, group: &mut ConversationGroup) -> GroupRun {
        log::info!("evaluating conversation group: {}", group.group_id);
        let recorded_before = self.results.len();

        let turn_entries: Vec<Vec<ResolvedEntry>> = group
            .turns
            .iter()
            .map(|turn| resolve_turn_metrics(self.registry, self.defaults, group, turn))
            .collect();
        let conv_entries = resolve_conversation_metrics(self.registry, self.defaults, group);

        let mut state = GroupState::Pending;
        let mut setup_failed = false;
        let mut cascade_triggered = false;

        loop {
            log::debug!("group {}: state {state:?}", group.group_id);
            state = match state {
                GroupState::Pending => match group.setup_script {
                    Some(_) => GroupState::Setup,
                    None => GroupState::Running,
                },
                GroupState::Setup => match group.setup_script.clone() {
                    Some(script) => match self.run_lifecycle_script(&script) {
                        Ok(()) => GroupState::Running,
                        Err(reason) => {
                            setup_failed = true;
                            log::error!("group {}: setup failed: {reason}", group.group_id);
                            self.sweep_error(
                                group,
                                &turn_entries,
                                &conv_entries,
                                &format!("setup failed: {reason}"),
                            );
                            GroupState::SetupFailed
                        }
                    },
                    None => GroupState::Running,
                },
                GroupState::Running => {
                    cascade_triggered = self.run_turns(group, &turn_entries, &conv_entries);
                    GroupState::Cleanup
                }
                // Setup failure still proceeds to cleanup.
                GroupState::SetupFailed => GroupState::Cleanup,
                GroupState::Cleanup => {
                    if let Some(script) = group.cleanup_script.clone() {
                        if let Err(reason) = self.run_lifecycle_script(&script) {
                            // Non-critical: logged, never a result status.
                            log::warn!(
                                "cleanup failed for group {}: {reason}",
                                group.group_id
                            );
                        }
                    }
                    GroupState::Done
                }
                GroupState::Done => break,
            };
        }

        GroupRun {
            group_id: group.group_id.clone(),
            state,
            setup_failed,
            cascade_triggered,
            results_recorded: self.results.len() - recorded_before,
        }
    }

    fn run_lifecycle_script(&self, script: &std::path::Path) -> Result<(), String> {
        match self.scripts.run(script) {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(format!(
                "script {} exited with status {}",
                script.display(),
                output.exit_code
            )),
            Err(err) => Err(err.to_string()),
        }
    }

    /// Record ERROR for every resolved metric of every turn and for the
    /// conversation-level set. No queries are sent.
    fn sweep_error(
        &self,
        group: &ConversationGroup,
        turn_entries: &[Vec<ResolvedEntry>],
        conv_entries: &[ResolvedEntry],
        reason: &str,
    ) {
        for (turn, entries) in group.turns.iter().zip(turn_entries) {
            for entry in entries {
                self.results.append(EvaluationResult::error(
                    group.group_id.clone(),
                    Some(turn.turn_id.clone()),
                    entry.id().clone(),
                    reason,
                ));
            }
        }
        for entry in conv_entries {
            self.results.append(EvaluationResult::error(
                group.group_id.clone(),
                None,
                entry.id().clone(),
                reason,
            ));
        }
    }

    /// Evaluate the group's turns and conversation metrics. Returns
    /// whether the skip cascade was triggered.
    fn run_turns(
        &self,
        group: &mut ConversationGroup,
        turn_entries: &[Vec<ResolvedEntry>],
        conv_entries: &[ResolvedEntry],
    ) -> bool {
        let skip_on_failure = group.effective_skip_on_failure(self.skip_on_failure_default);

        // Live mode first: agent queries are inherently sequential because
        // each turn threads the prior turn's conversation id.
        let amend_error: Option<AmendError> = match self.agent {
            Some(client) => DataAmender::new(client).amend_group(group).err(),
            None => None,
        };

        let cascade = if skip_on_failure || self.turn_workers <= 1 {
            self.run_turns_sequential(group, turn_entries, skip_on_failure, &amend_error)
        } else {
            self.run_turns_concurrent(group, turn_entries, &amend_error);
            false
        };

        if cascade {
            for entry in conv_entries {
                self.results.append(EvaluationResult::skipped(
                    group.group_id.clone(),
                    None,
                    entry.id().clone(),
                    "skipped due to prior turn failure",
                ));
            }
            return true;
        }

        // Conversation metrics observe the full, fully-evaluated history.
        let group: &ConversationGroup = group;
        let view = UnitView::Conversation { group };
        let evaluator = UnitEvaluator::new(self.registry);
        for entry in conv_entries {
            self.results.append(evaluator.evaluate(&view, entry));
        }
        false
    }

    fn run_turns_sequential(
        &self,
        group: &ConversationGroup,
        turn_entries: &[Vec<ResolvedEntry>],
        skip_on_failure: bool,
        amend_error: &Option<AmendError>,
    ) -> bool {
        let evaluator = UnitEvaluator::new(self.registry);
        let mut prior_failure = false;

        for (index, (turn, entries)) in group.turns.iter().zip(turn_entries).enumerate() {
            if prior_failure && skip_on_failure {
                for entry in entries {
                    self.results.append(EvaluationResult::skipped(
                        group.group_id.clone(),
                        Some(turn.turn_id.clone()),
                        entry.id().clone(),
                        "skipped due to prior turn failure",
                    ));
                }
                continue;
            }

            if let Some(error) = amend_error.as_ref().filter(|e| e.turn_index == index) {
                let reason = ExternalCallError::Agent(error.message.clone()).to_string();
                for entry in entries {
                    self.results.append(EvaluationResult::error(
                        group.group_id.clone(),
                        Some(turn.turn_id.clone()),
                        entry.id().clone(),
                        reason.clone(),
                    ));
                }
                if !entries.is_empty() {
                    prior_failure = true;
                }
                continue;
            }

            let view = UnitView::Turn { group, turn };
            for entry in entries {
                let result = evaluator.evaluate(&view, entry);
                if result.status.is_failure() {
                    prior_failure = true;
                }
                self.results.append(result);
            }
        }

        prior_failure && skip_on_failure
    }

    /// Skip-on-failure is off: every (turn, metric) evaluation is
    /// independent and may be dispatched concurrently.
    fn run_turns_concurrent(
        &self,
        group: &ConversationGroup,
        turn_entries: &[Vec<ResolvedEntry>],
        amend_error: &Option<AmendError>,
    ) {
        let evaluator = UnitEvaluator::new(self.registry);
        let tasks: Vec<(usize, &ResolvedEntry)> = turn_entries
            .iter()
            .enumerate()
            .flat_map(|(index, entries)| entries.iter().map(move |entry| (index, entry)))
            .collect();

        let results = run_parallel_map(tasks, self.turn_workers, |(index, entry)| {
            let turn = &group.turns[index];
            if let Some(error) = amend_error.as_ref().filter(|e| e.turn_index == index) {
                return EvaluationResult::error(
                    group.group_id.clone(),
                    Some(turn.turn_id.clone()),
                    entry.id().clone(),
                    ExternalCallError::Agent(error.message.clone()).to_string(),
                );
            }
            let view = UnitView::Turn { group, turn };
            evaluator.evaluate(&view, entry)
        });
        self.results.extend(results);
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use super::*;
    use crate::api::{AgentQuery, AgentReply};
    use crate::config::{MetricSetting, SystemDefaults};
    use crate::metrics::test_support::StaticScorer;
    use crate::metrics::{
        MetricIdentifier, MetricScope, MetricSpec, Scorer, Threshold,
    };
    use crate::models::data::{MetricOverride, Turn};
    use crate::models::result::EvaluationStatus;

    fn id(s: &str) -> MetricIdentifier {
        s.parse().unwrap()
    }

    fn register(
        registry: &mut MetricRegistry,
        metric: &str,
        scope: MetricScope,
        scorer: Arc<dyn Scorer>,
        threshold: Threshold,
    ) {
        registry.register(
            id(metric),
            MetricSpec {
                scope,
                default_eligible: false,
                threshold,
                requires: |_| Vec::new(),
                scorer,
            },
        );
    }

    fn defaults_with(turn_metric: &str) -> SystemDefaults {
        SystemDefaults {
            turn_metrics: vec![MetricSetting {
                metric: id(turn_metric),
                default: true,
                threshold: Some(0.8),
            }],
            conversation_metrics: Vec::new(),
        }
    }

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/bash\n{body}").unwrap();
        path
    }

    fn turn(idx: usize) -> Turn {
        Turn::new(format!("t{idx}"), format!("query {idx}")).with_response("an answer")
    }

    /// End-to-end scenario: one turn, override unset, system default m1
    /// with threshold 0.8, scorer returns 0.9.
    #[test]
    fn default_metric_passes_when_score_clears_threshold() {
        let mut registry = MetricRegistry::new();
        register(
            &mut registry,
            "f:m1",
            MetricScope::Turn,
            StaticScorer::scoring(0.9),
            Threshold::AtLeast(0.5),
        );
        let defaults = defaults_with("f:m1");
        let results = ResultCollection::new();
        let orchestrator = ConversationOrchestrator::new(
            &registry,
            &defaults,
            ScriptRunner::new(),
            results.clone(),
        );

        let mut group = ConversationGroup::new("g1", vec![turn(1)]);
        let run = orchestrator.process_group(&mut group);

        let rows = results.into_results();
        assert_eq!(run.state, GroupState::Done);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, EvaluationStatus::Pass);
        assert_eq!(rows[0].score, Some(0.9));
        assert_eq!(rows[0].threshold, Some(0.8));
    }

    /// End-to-end scenario: `turn_metrics: []` yields zero rows regardless
    /// of system defaults.
    #[test]
    fn empty_turn_override_produces_zero_rows() {
        let mut registry = MetricRegistry::new();
        register(
            &mut registry,
            "f:m1",
            MetricScope::Turn,
            StaticScorer::scoring(0.9),
            Threshold::AtLeast(0.5),
        );
        let defaults = defaults_with("f:m1");
        let results = ResultCollection::new();
        let orchestrator = ConversationOrchestrator::new(
            &registry,
            &defaults,
            ScriptRunner::new(),
            results.clone(),
        );

        let mut group = ConversationGroup::new(
            "g2",
            vec![turn(1).with_metrics(MetricOverride::Empty)],
        );
        orchestrator.process_group(&mut group);
        assert!(results.is_empty());
    }

    /// End-to-end scenario: setup exits 2 with two resolved metrics on
    /// one turn: exactly two ERROR rows, and cleanup runs exactly once.
    #[test]
    fn setup_failure_sweeps_all_metrics_and_still_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let setup = write_script(dir.path(), "setup.sh", "exit 2");
        let marker = dir.path().join("cleanup_ran");
        let cleanup = write_script(
            dir.path(),
            "cleanup.sh",
            &format!("echo once >> {}", marker.display()),
        );

        let scorer = StaticScorer::scoring(0.9);
        let mut registry = MetricRegistry::new();
        register(
            &mut registry,
            "f:m1",
            MetricScope::Turn,
            scorer.clone(),
            Threshold::AtLeast(0.5),
        );
        register(
            &mut registry,
            "f:m2",
            MetricScope::Turn,
            scorer.clone(),
            Threshold::AtLeast(0.5),
        );
        let defaults = SystemDefaults::default();
        let results = ResultCollection::new();
        let orchestrator = ConversationOrchestrator::new(
            &registry,
            &defaults,
            ScriptRunner::new(),
            results.clone(),
        );

        let mut group = ConversationGroup::new(
            "g3",
            vec![turn(1).with_metrics(MetricOverride::Explicit(vec![id("f:m1"), id("f:m2")]))],
        )
        .with_setup_script(&setup)
        .with_cleanup_script(&cleanup);

        let run = orchestrator.process_group(&mut group);

        assert!(run.setup_failed);
        assert_eq!(run.state, GroupState::Done);
        let rows = results.into_results();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row.status, EvaluationStatus::Error);
            assert!(row.reason.starts_with("setup failed"), "reason: {}", row.reason);
        }
        // No scoring call was made for the swept metrics.
        assert_eq!(scorer.call_count(), 0);
        // Cleanup ran exactly once.
        let marker_content = fs::read_to_string(&marker).unwrap();
        assert_eq!(marker_content.lines().count(), 1);
    }

    #[test]
    fn setup_failure_also_sweeps_conversation_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let setup = write_script(dir.path(), "setup.sh", "exit 1");

        let mut registry = MetricRegistry::new();
        register(
            &mut registry,
            "f:m1",
            MetricScope::Turn,
            StaticScorer::scoring(0.9),
            Threshold::AtLeast(0.5),
        );
        register(
            &mut registry,
            "c:whole",
            MetricScope::Conversation,
            StaticScorer::scoring(0.9),
            Threshold::AtLeast(0.5),
        );
        let defaults = SystemDefaults::default();
        let results = ResultCollection::new();
        let orchestrator = ConversationOrchestrator::new(
            &registry,
            &defaults,
            ScriptRunner::new(),
            results.clone(),
        );

        let mut group = ConversationGroup::new(
            "g1",
            vec![
                turn(1).with_metrics(MetricOverride::Explicit(vec![id("f:m1")])),
                turn(2).with_metrics(MetricOverride::Explicit(vec![id("f:m1")])),
            ],
        )
        .with_conversation_metrics(MetricOverride::Explicit(vec![id("c:whole")]))
        .with_setup_script(&setup);

        orchestrator.process_group(&mut group);

        let rows = results.into_results();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.status == EvaluationStatus::Error));
        assert_eq!(rows.iter().filter(|r| r.turn_id.is_none()).count(), 1);
    }

    /// Skip cascade: [A(FAIL), B, C] with skip-on-failure. B and C must be
    /// SKIPPED with zero external calls.
    #[test]
    fn skip_cascade_skips_remaining_turns_without_external_calls() {
        let failing = StaticScorer::scoring(0.2);
        let passing = StaticScorer::scoring(0.9);
        let mut registry = MetricRegistry::new();
        register(
            &mut registry,
            "f:low",
            MetricScope::Turn,
            failing.clone(),
            Threshold::AtLeast(0.5),
        );
        register(
            &mut registry,
            "f:high",
            MetricScope::Turn,
            passing.clone(),
            Threshold::AtLeast(0.5),
        );
        let defaults = SystemDefaults::default();
        let results = ResultCollection::new();
        let orchestrator = ConversationOrchestrator::new(
            &registry,
            &defaults,
            ScriptRunner::new(),
            results.clone(),
        )
        .with_skip_on_failure_default(true);

        let mut group = ConversationGroup::new(
            "g1",
            vec![
                turn(1).with_metrics(MetricOverride::Explicit(vec![id("f:low")])),
                turn(2).with_metrics(MetricOverride::Explicit(vec![id("f:high")])),
                turn(3).with_metrics(MetricOverride::Explicit(vec![id("f:high")])),
            ],
        );

        let run = orchestrator.process_group(&mut group);

        assert!(run.cascade_triggered);
        let rows = results.into_results();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].status, EvaluationStatus::Fail);
        assert_eq!(rows[1].status, EvaluationStatus::Skipped);
        assert_eq!(rows[2].status, EvaluationStatus::Skipped);
        // The skipped turns' scorer was never invoked.
        assert_eq!(passing.call_count(), 0);
        assert_eq!(failing.call_count(), 1);
    }

    #[test]
    fn without_skip_on_failure_siblings_run_after_a_failure() {
        let failing = StaticScorer::scoring(0.2);
        let passing = StaticScorer::scoring(0.9);
        let mut registry = MetricRegistry::new();
        register(
            &mut registry,
            "f:low",
            MetricScope::Turn,
            failing,
            Threshold::AtLeast(0.5),
        );
        register(
            &mut registry,
            "f:high",
            MetricScope::Turn,
            passing.clone(),
            Threshold::AtLeast(0.5),
        );
        let defaults = SystemDefaults::default();
        let results = ResultCollection::new();
        let orchestrator = ConversationOrchestrator::new(
            &registry,
            &defaults,
            ScriptRunner::new(),
            results.clone(),
        )
        .with_skip_on_failure_default(false);

        let mut group = ConversationGroup::new(
            "g1",
            vec![
                turn(1).with_metrics(MetricOverride::Explicit(vec![id("f:low")])),
                turn(2).with_metrics(MetricOverride::Explicit(vec![id("f:high")])),
                turn(3).with_metrics(MetricOverride::Explicit(vec![id("f:high")])),
            ],
        );

        let run = orchestrator.process_group(&mut group);

        assert!(!run.cascade_triggered);
        let rows = results.into_results();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].status, EvaluationStatus::Fail);
        assert_eq!(rows[1].status, EvaluationStatus::Pass);
        assert_eq!(rows[2].status, EvaluationStatus::Pass);
        assert_eq!(passing.call_count(), 2);
    }

    #[test]
    fn cascade_skips_conversation_metrics_as_placeholders() {
        let mut registry = MetricRegistry::new();
        register(
            &mut registry,
            "f:low",
            MetricScope::Turn,
            StaticScorer::scoring(0.2),
            Threshold::AtLeast(0.5),
        );
        let conv_scorer = StaticScorer::scoring(0.9);
        register(
            &mut registry,
            "c:whole",
            MetricScope::Conversation,
            conv_scorer.clone(),
            Threshold::AtLeast(0.5),
        );
        let defaults = SystemDefaults::default();
        let results = ResultCollection::new();
        let orchestrator = ConversationOrchestrator::new(
            &registry,
            &defaults,
            ScriptRunner::new(),
            results.clone(),
        )
        .with_skip_on_failure_default(true);

        let mut group = ConversationGroup::new(
            "g1",
            vec![
                turn(1).with_metrics(MetricOverride::Explicit(vec![id("f:low")])),
                turn(2).with_metrics(MetricOverride::Explicit(vec![id("f:low")])),
            ],
        )
        .with_conversation_metrics(MetricOverride::Explicit(vec![id("c:whole")]));

        orchestrator.process_group(&mut group);

        let rows = results.into_results();
        // 1 FAIL + 1 turn SKIPPED + 1 conversation SKIPPED.
        assert_eq!(rows.len(), 3);
        let conv_row = rows.iter().find(|r| r.turn_id.is_none()).unwrap();
        assert_eq!(conv_row.status, EvaluationStatus::Skipped);
        assert_eq!(conv_scorer.call_count(), 0);
    }

    #[test]
    fn conversation_metrics_observe_full_turn_history() {
        struct HistoryScorer;
        impl Scorer for HistoryScorer {
            fn score(
                &self,
                unit: &UnitView<'_>,
            ) -> Result<crate::metrics::Scored, crate::errors::ExternalCallError> {
                // Scores by the fraction of turns carrying responses.
                let turns = unit.turns();
                let with_response =
                    turns.iter().filter(|t| t.response.is_some()).count() as f64;
                Ok(crate::metrics::Scored::numeric(
                    with_response / turns.len() as f64,
                    format!("saw {} turns", turns.len()),
                ))
            }
        }

        let mut registry = MetricRegistry::new();
        register(
            &mut registry,
            "c:whole",
            MetricScope::Conversation,
            Arc::new(HistoryScorer),
            Threshold::AtLeast(0.5),
        );
        let defaults = SystemDefaults::default();
        let results = ResultCollection::new();
        let orchestrator = ConversationOrchestrator::new(
            &registry,
            &defaults,
            ScriptRunner::new(),
            results.clone(),
        );

        let mut group = ConversationGroup::new("g1", vec![turn(1), turn(2), turn(3)])
            .with_conversation_metrics(MetricOverride::Explicit(vec![id("c:whole")]));
        orchestrator.process_group(&mut group);

        let rows = results.into_results();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].reason, "saw 3 turns");
        assert_eq!(rows[0].score, Some(1.0));
    }

    #[test]
    fn unknown_metric_in_explicit_override_is_an_error_row_only() {
        let mut registry = MetricRegistry::new();
        register(
            &mut registry,
            "f:known",
            MetricScope::Turn,
            StaticScorer::scoring(0.9),
            Threshold::AtLeast(0.5),
        );
        let defaults = SystemDefaults::default();
        let results = ResultCollection::new();
        let orchestrator = ConversationOrchestrator::new(
            &registry,
            &defaults,
            ScriptRunner::new(),
            results.clone(),
        );

        let mut group = ConversationGroup::new(
            "g1",
            vec![turn(1)
                .with_metrics(MetricOverride::Explicit(vec![id("nope:m"), id("f:known")]))],
        );
        orchestrator.process_group(&mut group);

        let rows = results.into_results();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, EvaluationStatus::Error);
        assert_eq!(rows[1].status, EvaluationStatus::Pass);
    }

    #[test]
    fn concurrent_turn_mode_records_every_metric_once() {
        let scorer = StaticScorer::scoring(0.9);
        let mut registry = MetricRegistry::new();
        register(
            &mut registry,
            "f:m1",
            MetricScope::Turn,
            scorer.clone(),
            Threshold::AtLeast(0.5),
        );
        let defaults = defaults_with("f:m1");
        let results = ResultCollection::new();
        let orchestrator = ConversationOrchestrator::new(
            &registry,
            &defaults,
            ScriptRunner::new(),
            results.clone(),
        )
        .with_skip_on_failure_default(false)
        .with_turn_workers(4);

        let turns: Vec<Turn> = (0..12).map(turn).collect();
        let mut group = ConversationGroup::new("g1", turns);
        let run = orchestrator.process_group(&mut group);

        assert_eq!(run.results_recorded, 12);
        let rows = results.into_results();
        assert_eq!(rows.len(), 12);
        assert!(rows.iter().all(|r| r.status == EvaluationStatus::Pass));
        assert_eq!(scorer.call_count(), 12);
    }

    #[test]
    fn agent_failure_marks_turn_metrics_error_and_cascades() {
        struct FailingSecondClient;
        impl AgentClient for FailingSecondClient {
            fn query(&self, request: &AgentQuery<'_>) -> Result<AgentReply, ExternalCallError> {
                if request.query.contains("query 2") {
                    Err(ExternalCallError::Agent("gateway timeout".to_string()))
                } else {
                    Ok(AgentReply {
                        response: "fine".to_string(),
                        ..AgentReply::default()
                    })
                }
            }
        }

        let mut registry = MetricRegistry::new();
        register(
            &mut registry,
            "f:m1",
            MetricScope::Turn,
            StaticScorer::scoring(0.9),
            Threshold::AtLeast(0.5),
        );
        let defaults = defaults_with("f:m1");
        let results = ResultCollection::new();
        let client = FailingSecondClient;
        let orchestrator = ConversationOrchestrator::new(
            &registry,
            &defaults,
            ScriptRunner::new(),
            results.clone(),
        )
        .with_agent(&client)
        .with_skip_on_failure_default(true);

        let mut group = ConversationGroup::new(
            "g1",
            vec![
                Turn::new("t1", "query 1"),
                Turn::new("t2", "query 2"),
                Turn::new("t3", "query 3"),
            ],
        );
        orchestrator.process_group(&mut group);

        let rows = results.into_results();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].status, EvaluationStatus::Pass);
        assert_eq!(rows[1].status, EvaluationStatus::Error);
        assert!(rows[1].reason.contains("gateway timeout"));
        assert_eq!(rows[2].status, EvaluationStatus::Skipped);
        // The first turn was amended before evaluation.
        assert_eq!(group.turns[0].response.as_deref(), Some("fine"));
    }

    /// Result completeness: rows equal the sum of resolved set sizes.
    #[test]
    fn one_row_per_resolved_metric_pair() {
        let mut registry = MetricRegistry::new();
        register(
            &mut registry,
            "f:m1",
            MetricScope::Turn,
            StaticScorer::scoring(0.9),
            Threshold::AtLeast(0.5),
        );
        register(
            &mut registry,
            "f:m2",
            MetricScope::Turn,
            StaticScorer::failing("boom"),
            Threshold::AtLeast(0.5),
        );
        register(
            &mut registry,
            "c:whole",
            MetricScope::Conversation,
            StaticScorer::scoring(0.7),
            Threshold::AtLeast(0.5),
        );
        let defaults = SystemDefaults::default();
        let results = ResultCollection::new();
        let orchestrator = ConversationOrchestrator::new(
            &registry,
            &defaults,
            ScriptRunner::new(),
            results.clone(),
        );

        let both = MetricOverride::Explicit(vec![id("f:m1"), id("f:m2")]);
        let mut group = ConversationGroup::new(
            "g1",
            vec![
                turn(1).with_metrics(both.clone()),
                turn(2).with_metrics(MetricOverride::Empty),
                turn(3).with_metrics(both),
            ],
        )
        .with_conversation_metrics(MetricOverride::Explicit(vec![id("c:whole")]));

        let run = orchestrator.process_group(&mut group);

        // 2 + 0 + 2 turn rows plus 1 conversation row.
        assert_eq!(run.results_recorded, 5);
        let rows = results.into_results();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows.iter().filter(|r| r.turn_id.is_none()).count(), 1);
    }
}
