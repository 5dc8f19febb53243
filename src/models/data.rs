//! Conversation groups, turns, and metric override data.
//!
//! These types are constructed from external configuration at run start.
//! The orchestrator is the only mutator: in live-data mode it populates
//! turn responses and tool calls before evaluation; after the run the data
//! is immutable.

use std::collections::HashMap;
use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::metrics::MetricIdentifier;

/// Tri-state metric override.
///
/// A closed three-variant type instead of a nullable list: `Unset` falls
/// through to the next layer of the override chain, `Empty` is an explicit
/// "evaluate zero metrics" that never falls back, and `Explicit` replaces
/// the inherited set entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MetricOverride {
    #[default]
    Unset,
    Empty,
    Explicit(Vec<MetricIdentifier>),
}

impl MetricOverride {
    /// Map an optional list onto the three states: absent/null is `Unset`,
    /// an empty list is `Empty`, anything else is `Explicit` with
    /// duplicates dropped (first occurrence wins, order preserved).
    pub fn from_option(value: Option<Vec<MetricIdentifier>>) -> Self {
        match value {
            None => MetricOverride::Unset,
            Some(ids) if ids.is_empty() => MetricOverride::Empty,
            Some(ids) => {
                let mut seen = Vec::with_capacity(ids.len());
                for id in ids {
                    if !seen.contains(&id) {
                        seen.push(id);
                    }
                }
                MetricOverride::Explicit(seen)
            }
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, MetricOverride::Unset)
    }
}

impl Serialize for MetricOverride {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MetricOverride::Unset => serializer.serialize_none(),
            MetricOverride::Empty => Vec::<MetricIdentifier>::new().serialize(serializer),
            MetricOverride::Explicit(ids) => ids.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for MetricOverride {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<Vec<MetricIdentifier>>::deserialize(deserializer).map(Self::from_option)
    }
}

/// An actually observed tool call: name plus literal arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments: serde_json::Map::new(),
        }
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.arguments.insert(key.into(), value);
        self
    }
}

/// Expectation for one tool-call argument: either an exact literal value
/// or a regular-expression pattern matched against the rendered value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgExpectation {
    Pattern { pattern: String },
    Literal(serde_json::Value),
}

impl ArgExpectation {
    pub fn matches(&self, actual: &serde_json::Value) -> bool {
        match self {
            ArgExpectation::Literal(expected) => expected == actual,
            ArgExpectation::Pattern { pattern } => {
                let rendered = match actual {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Regex::new(pattern)
                    .map(|re| re.is_match(&rendered))
                    .unwrap_or(false)
            }
        }
    }
}

/// Expected tool call: a name plus per-argument expectations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallSpec {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: HashMap<String, ArgExpectation>,
}

impl ToolCallSpec {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments: HashMap::new(),
        }
    }

    pub fn with_argument(mut self, key: impl Into<String>, expectation: ArgExpectation) -> Self {
        self.arguments.insert(key.into(), expectation);
        self
    }

    /// Whether an observed call satisfies this expectation: the name must
    /// match and every expected argument must be present and matching.
    /// Extra observed arguments are ignored.
    pub fn matches(&self, call: &ToolCall) -> bool {
        if self.tool_name != call.tool_name {
            return false;
        }
        self.arguments.iter().all(|(key, expectation)| {
            call.arguments
                .get(key)
                .map(|value| expectation.matches(value))
                .unwrap_or(false)
        })
    }
}

/// One query/response exchange within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Turn {
    /// Turn identifier, unique within its group.
    pub turn_id: String,
    /// Query text sent to the application under evaluation.
    pub query: String,
    /// Response text; populated by the agent collaborator in live mode.
    #[serde(default)]
    pub response: Option<String>,
    /// Context documents retrieved for this turn.
    #[serde(default)]
    pub contexts: Vec<String>,
    /// Attachments passed with the query.
    #[serde(default)]
    pub attachments: Vec<String>,
    /// Reference answer for correctness-style metrics.
    #[serde(default)]
    pub expected_response: Option<String>,
    /// Expected tool-call sequences.
    #[serde(default)]
    pub expected_tool_calls: Vec<Vec<ToolCallSpec>>,
    /// Observed tool-call sequences; populated by the agent collaborator.
    #[serde(default)]
    pub tool_calls: Vec<Vec<ToolCall>>,
    /// Verify script consumed by script-backed metrics.
    #[serde(default)]
    pub verify_script: Option<PathBuf>,
    /// Conversation identifier threaded by the agent collaborator.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Turn-level metric override.
    #[serde(default)]
    pub turn_metrics: MetricOverride,
    /// Turn-level threshold overrides.
    #[serde(default)]
    pub turn_thresholds: HashMap<MetricIdentifier, f64>,
}

impl Turn {
    pub fn new(turn_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            turn_id: turn_id.into(),
            query: query.into(),
            response: None,
            contexts: Vec::new(),
            attachments: Vec::new(),
            expected_response: None,
            expected_tool_calls: Vec::new(),
            tool_calls: Vec::new(),
            verify_script: None,
            conversation_id: None,
            turn_metrics: MetricOverride::Unset,
            turn_thresholds: HashMap::new(),
        }
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    pub fn with_contexts(mut self, contexts: Vec<String>) -> Self {
        self.contexts = contexts;
        self
    }

    pub fn with_expected_response(mut self, expected: impl Into<String>) -> Self {
        self.expected_response = Some(expected.into());
        self
    }

    pub fn with_metrics(mut self, metrics: MetricOverride) -> Self {
        self.turn_metrics = metrics;
        self
    }

    pub fn with_threshold(mut self, metric: MetricIdentifier, threshold: f64) -> Self {
        self.turn_thresholds.insert(metric, threshold);
        self
    }
}

/// An ordered sequence of turns sharing setup/cleanup lifecycle and
/// conversation-level metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConversationGroup {
    /// Group identifier, unique within a run.
    pub group_id: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Script run before the first turn; a non-zero exit fails the group.
    #[serde(default)]
    pub setup_script: Option<PathBuf>,
    /// Script run after the group finishes; failures are logged only.
    #[serde(default)]
    pub cleanup_script: Option<PathBuf>,
    /// Per-group skip-on-failure; falls back to the run-wide default.
    #[serde(default)]
    pub skip_on_failure: Option<bool>,
    /// Group-level override for turn-scoped metrics.
    #[serde(default)]
    pub turn_metrics: MetricOverride,
    /// Group-level threshold overrides for turn-scoped metrics.
    #[serde(default)]
    pub turn_thresholds: HashMap<MetricIdentifier, f64>,
    /// Override for conversation-scoped metrics.
    #[serde(default)]
    pub conversation_metrics: MetricOverride,
    /// Threshold overrides for conversation-scoped metrics.
    #[serde(default)]
    pub conversation_thresholds: HashMap<MetricIdentifier, f64>,
    /// Ordered turns; must be non-empty.
    pub turns: Vec<Turn>,
}

impl ConversationGroup {
    pub fn new(group_id: impl Into<String>, turns: Vec<Turn>) -> Self {
        Self {
            group_id: group_id.into(),
            description: None,
            setup_script: None,
            cleanup_script: None,
            skip_on_failure: None,
            turn_metrics: MetricOverride::Unset,
            turn_thresholds: HashMap::new(),
            conversation_metrics: MetricOverride::Unset,
            conversation_thresholds: HashMap::new(),
            turns,
        }
    }

    pub fn with_setup_script(mut self, path: impl Into<PathBuf>) -> Self {
        self.setup_script = Some(path.into());
        self
    }

    pub fn with_cleanup_script(mut self, path: impl Into<PathBuf>) -> Self {
        self.cleanup_script = Some(path.into());
        self
    }

    pub fn with_skip_on_failure(mut self, skip: bool) -> Self {
        self.skip_on_failure = Some(skip);
        self
    }

    pub fn with_turn_metrics(mut self, metrics: MetricOverride) -> Self {
        self.turn_metrics = metrics;
        self
    }

    pub fn with_conversation_metrics(mut self, metrics: MetricOverride) -> Self {
        self.conversation_metrics = metrics;
        self
    }

    /// The group's skip-on-failure policy, falling back to the run-wide
    /// default when unset.
    pub fn effective_skip_on_failure(&self, run_default: bool) -> bool {
        self.skip_on_failure.unwrap_or(run_default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> MetricIdentifier {
        s.parse().unwrap()
    }

    #[test]
    fn metric_override_distinguishes_unset_empty_and_explicit() {
        assert_eq!(MetricOverride::from_option(None), MetricOverride::Unset);
        assert_eq!(
            MetricOverride::from_option(Some(Vec::new())),
            MetricOverride::Empty
        );
        assert_eq!(
            MetricOverride::from_option(Some(vec![id("ragas:faithfulness")])),
            MetricOverride::Explicit(vec![id("ragas:faithfulness")])
        );
    }

    #[test]
    fn metric_override_deduplicates_preserving_order() {
        let explicit = MetricOverride::from_option(Some(vec![
            id("a:one"),
            id("a:two"),
            id("a:one"),
        ]));
        assert_eq!(
            explicit,
            MetricOverride::Explicit(vec![id("a:one"), id("a:two")])
        );
    }

    #[test]
    fn metric_override_yaml_forms() {
        #[derive(Deserialize)]
        struct Holder {
            #[serde(default)]
            metrics: MetricOverride,
        }

        let absent: Holder = serde_yaml::from_str("{}").unwrap();
        assert_eq!(absent.metrics, MetricOverride::Unset);

        let null: Holder = serde_yaml::from_str("metrics: null").unwrap();
        assert_eq!(null.metrics, MetricOverride::Unset);

        let empty: Holder = serde_yaml::from_str("metrics: []").unwrap();
        assert_eq!(empty.metrics, MetricOverride::Empty);

        let explicit: Holder = serde_yaml::from_str("metrics: [\"ragas:faithfulness\"]").unwrap();
        assert_eq!(
            explicit.metrics,
            MetricOverride::Explicit(vec![id("ragas:faithfulness")])
        );
    }

    #[test]
    fn arg_expectation_literal_matches_exact_value() {
        let expectation = ArgExpectation::Literal(serde_json::json!("openshift"));
        assert!(expectation.matches(&serde_json::json!("openshift")));
        assert!(!expectation.matches(&serde_json::json!("kubernetes")));
    }

    #[test]
    fn arg_expectation_pattern_matches_rendered_value() {
        let expectation = ArgExpectation::Pattern {
            pattern: "^ns-[0-9]+$".to_string(),
        };
        assert!(expectation.matches(&serde_json::json!("ns-42")));
        assert!(!expectation.matches(&serde_json::json!("ns-")));
    }

    #[test]
    fn arg_expectation_yaml_forms() {
        let literal: ArgExpectation = serde_yaml::from_str("\"exact\"").unwrap();
        assert_eq!(literal, ArgExpectation::Literal(serde_json::json!("exact")));

        let pattern: ArgExpectation = serde_yaml::from_str("pattern: \"^x\"").unwrap();
        assert_eq!(
            pattern,
            ArgExpectation::Pattern {
                pattern: "^x".to_string()
            }
        );
    }

    #[test]
    fn tool_call_spec_requires_name_and_arguments() {
        let spec = ToolCallSpec::new("list_pods")
            .with_argument("namespace", ArgExpectation::Literal(serde_json::json!("prod")));

        let matching = ToolCall::new("list_pods")
            .with_argument("namespace", serde_json::json!("prod"))
            .with_argument("verbose", serde_json::json!(true));
        assert!(spec.matches(&matching));

        let wrong_arg = ToolCall::new("list_pods").with_argument("namespace", serde_json::json!("dev"));
        assert!(!spec.matches(&wrong_arg));

        let wrong_name = ToolCall::new("get_pods").with_argument("namespace", serde_json::json!("prod"));
        assert!(!spec.matches(&wrong_name));
    }

    #[test]
    fn group_skip_on_failure_falls_back_to_run_default() {
        let group = ConversationGroup::new("g1", vec![Turn::new("t1", "q")]);
        assert!(group.effective_skip_on_failure(true));
        assert!(!group.effective_skip_on_failure(false));

        let pinned = group.with_skip_on_failure(false);
        assert!(!pinned.effective_skip_on_failure(true));
    }

    #[test]
    fn group_yaml_round_trip() {
        let yaml = r#"
group_id: g1
description: basic flow
setup_script: scripts/setup.sh
conversation_metrics: []
turns:
  - turn_id: t1
    query: what is a pod?
    turn_metrics:
      - ragas:response_relevancy
    turn_thresholds:
      ragas:response_relevancy: 0.9
"#;
        let group: ConversationGroup = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(group.group_id, "g1");
        assert_eq!(group.conversation_metrics, MetricOverride::Empty);
        assert_eq!(
            group.turns[0].turn_metrics,
            MetricOverride::Explicit(vec![id("ragas:response_relevancy")])
        );
        assert_eq!(
            group.turns[0].turn_thresholds.get(&id("ragas:response_relevancy")),
            Some(&0.9)
        );

        let back = serde_yaml::to_string(&group).unwrap();
        let reparsed: ConversationGroup = serde_yaml::from_str(&back).unwrap();
        assert_eq!(reparsed.turns[0].turn_metrics, group.turns[0].turn_metrics);
    }
}
