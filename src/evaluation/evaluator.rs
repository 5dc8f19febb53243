//! Unit evaluator: one metric against one unit.

use std::time::Instant;

use crate::metrics::resolution::ResolvedEntry;
use crate::metrics::{MetricRegistry, UnitView};
use crate::models::result::{EvaluationResult, EvaluationStatus};

/// Executes a single resolved metric against a single unit and converts
/// the outcome into a typed result. Stateless apart from the registry
/// reference; never mutates the unit.
#[derive(Debug, Clone, Copy)]
pub struct UnitEvaluator<'a> {
    registry: &'a MetricRegistry,
}

impl<'a> UnitEvaluator<'a> {
    pub fn new(registry: &'a MetricRegistry) -> Self {
        Self { registry }
    }

    pub fn evaluate(&self, unit: &UnitView<'_>, entry: &ResolvedEntry) -> EvaluationResult {
        let group_id = unit.group_id().to_string();
        let turn_id = unit.turn_id().map(String::from);

        let (id, threshold) = match entry {
            ResolvedEntry::Unresolved { id, reason } => {
                return EvaluationResult::error(group_id, turn_id, id.clone(), reason.clone());
            }
            ResolvedEntry::Metric { id, threshold } => (id, *threshold),
        };

        let spec = match self.registry.get(id) {
            Some(spec) => spec,
            None => {
                return EvaluationResult::error(
                    group_id,
                    turn_id,
                    id.clone(),
                    format!("unknown metric identifier: {id}"),
                );
            }
        };

        let missing = (spec.requires)(unit);
        if !missing.is_empty() {
            return EvaluationResult::error(
                group_id,
                turn_id,
                id.clone(),
                format!("missing required field(s): {}", missing.join(", ")),
            );
        }

        log::debug!(
            "evaluating {id} for {}{}",
            group_id,
            turn_id.as_deref().map(|t| format!("/{t}")).unwrap_or_default()
        );

        let start = Instant::now();
        match spec.scorer.score(unit) {
            Ok(scored) => {
                let score = scored.value.as_f64();
                let status = if threshold.passes(score) {
                    EvaluationStatus::Pass
                } else {
                    EvaluationStatus::Fail
                };
                EvaluationResult {
                    group_id,
                    turn_id,
                    metric: id.clone(),
                    status,
                    score: Some(score),
                    threshold: Some(threshold.value()),
                    reason: scored.reason,
                    duration: start.elapsed(),
                }
            }
            Err(err) => {
                let mut result =
                    EvaluationResult::error(group_id, turn_id, id.clone(), err.to_string());
                result.duration = start.elapsed();
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::metrics::test_support::StaticScorer;
    use crate::metrics::{MetricIdentifier, MetricScope, MetricSpec, Scorer, Threshold};
    use crate::models::data::{ConversationGroup, Turn};

    fn id(s: &str) -> MetricIdentifier {
        s.parse().unwrap()
    }

    fn group_with_response() -> ConversationGroup {
        ConversationGroup::new(
            "g1",
            vec![Turn::new("t1", "what is a pod?").with_response("a pod is...")],
        )
    }

    fn spec(
        scorer: Arc<dyn Scorer>,
        threshold: Threshold,
        requires: crate::metrics::RequiredInputs,
    ) -> MetricSpec {
        MetricSpec {
            scope: MetricScope::Turn,
            default_eligible: true,
            threshold,
            requires,
            scorer,
        }
    }

    fn entry(metric: &str, threshold: Threshold) -> ResolvedEntry {
        ResolvedEntry::Metric { id: id(metric), threshold }
    }

    #[test]
    fn score_meeting_threshold_passes() {
        let scorer = StaticScorer::scoring(0.9);
        let mut registry = MetricRegistry::new();
        registry.register(
            id("a:m"),
            spec(scorer.clone(), Threshold::AtLeast(0.8), |_| Vec::new()),
        );

        let group = group_with_response();
        let unit = UnitView::Turn { group: &group, turn: &group.turns[0] };
        let result =
            UnitEvaluator::new(&registry).evaluate(&unit, &entry("a:m", Threshold::AtLeast(0.8)));

        assert_eq!(result.status, EvaluationStatus::Pass);
        assert_eq!(result.score, Some(0.9));
        assert_eq!(result.threshold, Some(0.8));
        assert_eq!(result.turn_id.as_deref(), Some("t1"));
        assert_eq!(scorer.call_count(), 1);
    }

    #[test]
    fn score_below_threshold_fails() {
        let mut registry = MetricRegistry::new();
        registry.register(
            id("a:m"),
            spec(StaticScorer::scoring(0.5), Threshold::AtLeast(0.8), |_| Vec::new()),
        );

        let group = group_with_response();
        let unit = UnitView::Turn { group: &group, turn: &group.turns[0] };
        let result =
            UnitEvaluator::new(&registry).evaluate(&unit, &entry("a:m", Threshold::AtLeast(0.8)));
        assert_eq!(result.status, EvaluationStatus::Fail);
    }

    #[test]
    fn binary_metric_uses_exact_match() {
        let mut registry = MetricRegistry::new();
        registry.register(
            id("a:binary"),
            spec(StaticScorer::binary(false), Threshold::Exactly(1.0), |_| Vec::new()),
        );

        let group = group_with_response();
        let unit = UnitView::Turn { group: &group, turn: &group.turns[0] };
        let result = UnitEvaluator::new(&registry)
            .evaluate(&unit, &entry("a:binary", Threshold::Exactly(1.0)));

        assert_eq!(result.status, EvaluationStatus::Fail);
        assert_eq!(result.score, Some(0.0));
    }

    #[test]
    fn missing_required_input_skips_the_scorer() {
        let scorer = StaticScorer::scoring(1.0);
        let mut registry = MetricRegistry::new();
        registry.register(
            id("a:m"),
            spec(scorer.clone(), Threshold::AtLeast(0.5), |unit| {
                match unit.turn().and_then(|t| t.response.as_deref()) {
                    Some(_) => Vec::new(),
                    None => vec!["response", "contexts"],
                }
            }),
        );

        let group = ConversationGroup::new("g1", vec![Turn::new("t1", "q")]);
        let unit = UnitView::Turn { group: &group, turn: &group.turns[0] };
        let result =
            UnitEvaluator::new(&registry).evaluate(&unit, &entry("a:m", Threshold::AtLeast(0.5)));

        assert_eq!(result.status, EvaluationStatus::Error);
        assert_eq!(result.reason, "missing required field(s): response, contexts");
        assert!(result.score.is_none());
        assert_eq!(scorer.call_count(), 0);
    }

    #[test]
    fn scorer_failure_captures_message_verbatim() {
        let mut registry = MetricRegistry::new();
        registry.register(
            id("a:m"),
            spec(
                StaticScorer::failing("judge model unavailable: 503"),
                Threshold::AtLeast(0.5),
                |_| Vec::new(),
            ),
        );

        let group = group_with_response();
        let unit = UnitView::Turn { group: &group, turn: &group.turns[0] };
        let result =
            UnitEvaluator::new(&registry).evaluate(&unit, &entry("a:m", Threshold::AtLeast(0.5)));

        assert_eq!(result.status, EvaluationStatus::Error);
        assert_eq!(result.reason, "judge model unavailable: 503");
    }

    #[test]
    fn unresolved_entry_becomes_error_row() {
        let registry = MetricRegistry::new();
        let group = group_with_response();
        let unit = UnitView::Turn { group: &group, turn: &group.turns[0] };
        let result = UnitEvaluator::new(&registry).evaluate(
            &unit,
            &ResolvedEntry::Unresolved {
                id: id("nope:missing"),
                reason: "unknown metric identifier: nope:missing".to_string(),
            },
        );
        assert_eq!(result.status, EvaluationStatus::Error);
        assert!(result.reason.contains("unknown metric identifier"));
    }

    #[test]
    fn conversation_unit_has_no_turn_id() {
        let mut registry = MetricRegistry::new();
        registry.register(
            id("c:m"),
            MetricSpec {
                scope: MetricScope::Conversation,
                default_eligible: true,
                threshold: Threshold::AtLeast(0.5),
                requires: |_| Vec::new(),
                scorer: StaticScorer::scoring(0.6),
            },
        );

        let group = group_with_response();
        let unit = UnitView::Conversation { group: &group };
        let result =
            UnitEvaluator::new(&registry).evaluate(&unit, &entry("c:m", Threshold::AtLeast(0.5)));
        assert_eq!(result.turn_id, None);
        assert_eq!(result.status, EvaluationStatus::Pass);
    }
}
