//! Metric identity, capability records, and the metric registry.
//!
//! A metric is addressed by a namespaced [`MetricIdentifier`]
//! (`framework:name`). The [`MetricRegistry`] maps each identifier to a
//! [`MetricSpec`] capability record: the scope it evaluates at, whether it
//! is eligible as a system default, the inputs it requires, its built-in
//! threshold, and the scoring entrypoint. Resolution and evaluation consult
//! the registry instead of branching on metric names.

pub mod resolution;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{ConfigurationError, ExternalCallError};
use crate::models::data::{ConversationGroup, Turn};

/// Namespaced metric identifier: a (framework, name) pair such as
/// `ragas:faithfulness`. Equality and hashing are value-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricIdentifier {
    framework: String,
    name: String,
}

impl MetricIdentifier {
    pub fn new(framework: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            framework: framework.into(),
            name: name.into(),
        }
    }

    pub fn framework(&self) -> &str {
        &self.framework
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for MetricIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.framework, self.name)
    }
}

impl FromStr for MetricIdentifier {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((framework, name)) if !framework.is_empty() && !name.is_empty() => {
                Ok(Self::new(framework, name))
            }
            _ => Err(ConfigurationError::MalformedMetricIdentifier {
                identifier: s.to_string(),
            }),
        }
    }
}

impl Serialize for MetricIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MetricIdentifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// Whether a metric evaluates a single turn or the full conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricScope {
    Turn,
    Conversation,
}

impl fmt::Display for MetricScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricScope::Turn => write!(f, "turn"),
            MetricScope::Conversation => write!(f, "conversation"),
        }
    }
}

/// Pass criterion for a metric score.
///
/// Numeric metrics pass when the score meets or exceeds the value; binary
/// metrics carry the exact-match sentinel and pass only on equality.
/// Threshold overrides replace the numeric value but never the comparison
/// kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Threshold {
    AtLeast(f64),
    Exactly(f64),
}

impl Threshold {
    pub fn value(&self) -> f64 {
        match self {
            Threshold::AtLeast(v) | Threshold::Exactly(v) => *v,
        }
    }

    /// Same comparison kind with a replaced numeric value.
    pub fn with_value(&self, value: f64) -> Self {
        match self {
            Threshold::AtLeast(_) => Threshold::AtLeast(value),
            Threshold::Exactly(_) => Threshold::Exactly(value),
        }
    }

    pub fn passes(&self, score: f64) -> bool {
        match self {
            Threshold::AtLeast(v) => score >= *v,
            Threshold::Exactly(v) => score == *v,
        }
    }
}

/// Score produced by a scoring entrypoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreValue {
    Numeric(f64),
    Binary(bool),
}

impl ScoreValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            ScoreValue::Numeric(v) => *v,
            ScoreValue::Binary(true) => 1.0,
            ScoreValue::Binary(false) => 0.0,
        }
    }
}

/// Output of a scoring entrypoint: a score plus a free-text reason.
#[derive(Debug, Clone)]
pub struct Scored {
    pub value: ScoreValue,
    pub reason: String,
}

impl Scored {
    pub fn numeric(score: f64, reason: impl Into<String>) -> Self {
        Self {
            value: ScoreValue::Numeric(score),
            reason: reason.into(),
        }
    }

    pub fn binary(pass: bool, reason: impl Into<String>) -> Self {
        Self {
            value: ScoreValue::Binary(pass),
            reason: reason.into(),
        }
    }
}

/// Read-only view of the unit a metric evaluates.
///
/// Turn-scoped metrics see one turn (plus its owning group); conversation
/// metrics see the full ordered turn history.
#[derive(Clone, Copy)]
pub enum UnitView<'a> {
    Turn {
        group: &'a ConversationGroup,
        turn: &'a Turn,
    },
    Conversation { group: &'a ConversationGroup },
}

impl<'a> UnitView<'a> {
    pub fn group_id(&self) -> &str {
        match self {
            UnitView::Turn { group, .. } | UnitView::Conversation { group } => &group.group_id,
        }
    }

    pub fn turn_id(&self) -> Option<&str> {
        match self {
            UnitView::Turn { turn, .. } => Some(&turn.turn_id),
            UnitView::Conversation { .. } => None,
        }
    }

    pub fn scope(&self) -> MetricScope {
        match self {
            UnitView::Turn { .. } => MetricScope::Turn,
            UnitView::Conversation { .. } => MetricScope::Conversation,
        }
    }

    pub fn turn(&self) -> Option<&'a Turn> {
        match *self {
            UnitView::Turn { turn, .. } => Some(turn),
            UnitView::Conversation { .. } => None,
        }
    }

    /// The ordered turn history visible to this unit: the single turn for
    /// turn scope, every turn of the group for conversation scope.
    pub fn turns(&self) -> &'a [Turn] {
        match *self {
            UnitView::Turn { turn, .. } => std::slice::from_ref(turn),
            UnitView::Conversation { group } => &group.turns,
        }
    }
}

/// Scoring entrypoint for a metric.
///
/// Implementations are external collaborators (judge LLMs, NLP scorers,
/// script-backed checks). They receive a read-only view of the unit and
/// must not retain or mutate it.
pub trait Scorer: Send + Sync {
    fn score(&self, unit: &UnitView<'_>) -> Result<Scored, ExternalCallError>;
}

/// Required-input predicate: returns the names of fields the unit is
/// missing for this metric. An empty result means the metric can run.
pub type RequiredInputs = fn(&UnitView<'_>) -> Vec<&'static str>;

/// Capability record for one registered metric.
pub struct MetricSpec {
    pub scope: MetricScope,
    pub default_eligible: bool,
    pub threshold: Threshold,
    pub requires: RequiredInputs,
    pub scorer: Arc<dyn Scorer>,
}

impl fmt::Debug for MetricSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricSpec")
            .field("scope", &self.scope)
            .field("default_eligible", &self.default_eligible)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

/// Registry mapping metric identifiers to capability records.
///
/// Registration order is preserved so that default-eligible resolution is
/// deterministic.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    specs: HashMap<MetricIdentifier, MetricSpec>,
    order: Vec<MetricIdentifier>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a metric. Re-registering an identifier replaces its spec
    /// and keeps its original position.
    pub fn register(&mut self, id: MetricIdentifier, spec: MetricSpec) {
        if self.specs.insert(id.clone(), spec).is_none() {
            self.order.push(id);
        }
    }

    pub fn get(&self, id: &MetricIdentifier) -> Option<&MetricSpec> {
        self.specs.get(id)
    }

    pub fn contains(&self, id: &MetricIdentifier) -> bool {
        self.specs.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Identifiers registered for `scope`, in registration order.
    pub fn identifiers(&self, scope: MetricScope) -> impl Iterator<Item = &MetricIdentifier> {
        self.order
            .iter()
            .filter(move |id| self.specs.get(id).map(|s| s.scope) == Some(scope))
    }

    /// Default-eligible identifiers for `scope`, in registration order.
    pub fn default_eligible(&self, scope: MetricScope) -> Vec<MetricIdentifier> {
        self.order
            .iter()
            .filter(|id| {
                self.specs
                    .get(id)
                    .map(|s| s.scope == scope && s.default_eligible)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Build a registry from the built-in catalog, attaching a scorer to
    /// each entry the resolver knows. Entries without a scorer are left
    /// unregistered.
    pub fn from_catalog<F>(scorer_for: F) -> Self
    where
        F: Fn(&MetricIdentifier) -> Option<Arc<dyn Scorer>>,
    {
        let mut registry = Self::new();
        for entry in METRIC_CATALOG.iter() {
            let id = entry.identifier();
            if let Some(scorer) = scorer_for(&id) {
                registry.register(id, entry.spec(scorer));
            }
        }
        registry
    }
}

/// Catalog entry for a well-known metric: everything a [`MetricSpec`]
/// carries except the scoring entrypoint, which callers inject.
#[derive(Debug, Clone, Copy)]
pub struct CatalogEntry {
    pub framework: &'static str,
    pub name: &'static str,
    pub scope: MetricScope,
    pub default_eligible: bool,
    pub threshold: Threshold,
    pub requires: RequiredInputs,
}

impl CatalogEntry {
    pub fn identifier(&self) -> MetricIdentifier {
        MetricIdentifier::new(self.framework, self.name)
    }

    pub fn spec(&self, scorer: Arc<dyn Scorer>) -> MetricSpec {
        MetricSpec {
            scope: self.scope,
            default_eligible: self.default_eligible,
            threshold: self.threshold,
            requires: self.requires,
            scorer,
        }
    }
}

fn has_response(turn: &Turn) -> bool {
    turn.response.as_deref().is_some_and(|r| !r.is_empty())
}

fn requires_response(unit: &UnitView<'_>) -> Vec<&'static str> {
    match unit.turn() {
        Some(turn) if has_response(turn) => Vec::new(),
        _ => vec!["response"],
    }
}

fn requires_response_and_contexts(unit: &UnitView<'_>) -> Vec<&'static str> {
    let mut missing = requires_response(unit);
    if unit.turn().map(|t| t.contexts.is_empty()).unwrap_or(true) {
        missing.push("contexts");
    }
    missing
}

fn requires_contexts_and_expected_response(unit: &UnitView<'_>) -> Vec<&'static str> {
    let mut missing = Vec::new();
    match unit.turn() {
        Some(turn) => {
            if turn.contexts.is_empty() {
                missing.push("contexts");
            }
            if turn.expected_response.as_deref().unwrap_or("").is_empty() {
                missing.push("expected_response");
            }
        }
        None => missing.extend(["contexts", "expected_response"]),
    }
    missing
}

fn requires_response_and_expected_response(unit: &UnitView<'_>) -> Vec<&'static str> {
    let mut missing = requires_response(unit);
    if unit
        .turn()
        .map(|t| t.expected_response.as_deref().unwrap_or("").is_empty())
        .unwrap_or(true)
    {
        missing.push("expected_response");
    }
    missing
}

fn requires_tool_calls(unit: &UnitView<'_>) -> Vec<&'static str> {
    let mut missing = Vec::new();
    match unit.turn() {
        Some(turn) => {
            if turn.expected_tool_calls.is_empty() {
                missing.push("expected_tool_calls");
            }
            if turn.tool_calls.is_empty() {
                missing.push("tool_calls");
            }
        }
        None => missing.extend(["expected_tool_calls", "tool_calls"]),
    }
    missing
}

fn requires_verify_script(unit: &UnitView<'_>) -> Vec<&'static str> {
    match unit.turn() {
        Some(turn) if turn.verify_script.is_some() => Vec::new(),
        _ => vec!["verify_script"],
    }
}

fn requires_complete_history(unit: &UnitView<'_>) -> Vec<&'static str> {
    if unit.turns().iter().all(has_response) {
        Vec::new()
    } else {
        vec!["response"]
    }
}

/// Built-in metric catalog. Scoring entrypoints are injected at registry
/// construction; the catalog only records scope, eligibility, required
/// inputs, and the built-in threshold.
pub static METRIC_CATALOG: Lazy<Vec<CatalogEntry>> = Lazy::new(|| {
    vec![
        CatalogEntry {
            framework: "ragas",
            name: "faithfulness",
            scope: MetricScope::Turn,
            default_eligible: false,
            threshold: Threshold::AtLeast(0.8),
            requires: requires_response_and_contexts,
        },
        CatalogEntry {
            framework: "ragas",
            name: "response_relevancy",
            scope: MetricScope::Turn,
            default_eligible: true,
            threshold: Threshold::AtLeast(0.7),
            requires: requires_response,
        },
        CatalogEntry {
            framework: "ragas",
            name: "context_recall",
            scope: MetricScope::Turn,
            default_eligible: false,
            threshold: Threshold::AtLeast(0.8),
            requires: requires_contexts_and_expected_response,
        },
        CatalogEntry {
            framework: "custom",
            name: "answer_correctness",
            scope: MetricScope::Turn,
            default_eligible: true,
            threshold: Threshold::AtLeast(0.75),
            requires: requires_response_and_expected_response,
        },
        CatalogEntry {
            framework: "custom",
            name: "tool_eval",
            scope: MetricScope::Turn,
            default_eligible: false,
            threshold: Threshold::Exactly(1.0),
            requires: requires_tool_calls,
        },
        CatalogEntry {
            framework: "script",
            name: "verify",
            scope: MetricScope::Turn,
            default_eligible: false,
            threshold: Threshold::Exactly(1.0),
            requires: requires_verify_script,
        },
        CatalogEntry {
            framework: "deepeval",
            name: "conversation_completeness",
            scope: MetricScope::Conversation,
            default_eligible: true,
            threshold: Threshold::AtLeast(0.7),
            requires: requires_complete_history,
        },
        CatalogEntry {
            framework: "deepeval",
            name: "conversation_relevancy",
            scope: MetricScope::Conversation,
            default_eligible: false,
            threshold: Threshold::AtLeast(0.7),
            requires: requires_complete_history,
        },
    ]
});
