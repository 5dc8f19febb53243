//! Metric resolution: computing the effective metric set and thresholds
//! for a unit from layered overrides.
//!
//! The override chain is strict precedence, not a merge: unit override,
//! else group override, else system defaults. An explicit empty override
//! means "evaluate zero metrics" and never falls back. Thresholds resolve
//! through their own chain: unit, group, system default, registry built-in.

use std::collections::HashMap;

use crate::config::SystemDefaults;
use crate::metrics::{MetricIdentifier, MetricRegistry, MetricScope, Threshold};
use crate::models::data::{ConversationGroup, MetricOverride, Turn};

/// One entry of a resolved metric set.
///
/// Unknown identifiers in explicit overrides stay in the set as
/// `Unresolved` so the orchestrator can record an ERROR result for them
/// without failing the whole unit.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedEntry {
    Metric {
        id: MetricIdentifier,
        threshold: Threshold,
    },
    Unresolved {
        id: MetricIdentifier,
        reason: String,
    },
}

impl ResolvedEntry {
    pub fn id(&self) -> &MetricIdentifier {
        match self {
            ResolvedEntry::Metric { id, .. } | ResolvedEntry::Unresolved { id, .. } => id,
        }
    }
}

/// Resolve the effective ordered metric set for one unit.
///
/// `unit_override` is the override attached to the unit itself,
/// `group_override` the intermediate layer (for conversation-scoped units
/// there is none), and the threshold maps follow the same layering.
pub fn resolve(
    scope: MetricScope,
    registry: &MetricRegistry,
    defaults: &SystemDefaults,
    group_override: &MetricOverride,
    unit_override: &MetricOverride,
    unit_thresholds: &HashMap<MetricIdentifier, f64>,
    group_thresholds: Option<&HashMap<MetricIdentifier, f64>>,
) -> Vec<ResolvedEntry> {
    let chosen: Option<&[MetricIdentifier]> = match unit_override {
        MetricOverride::Empty => return Vec::new(),
        MetricOverride::Explicit(ids) => Some(ids),
        MetricOverride::Unset => match group_override {
            MetricOverride::Empty => return Vec::new(),
            MetricOverride::Explicit(ids) => Some(ids),
            MetricOverride::Unset => None,
        },
    };

    let ids: Vec<MetricIdentifier> = match chosen {
        Some(ids) => ids.to_vec(),
        None => defaults.default_metrics(scope, registry),
    };

    ids.into_iter()
        .map(|id| {
            let spec = match registry.get(&id) {
                Some(spec) => spec,
                None => {
                    return ResolvedEntry::Unresolved {
                        reason: format!("unknown metric identifier: {id}"),
                        id,
                    }
                }
            };
            if spec.scope != scope {
                return ResolvedEntry::Unresolved {
                    reason: format!("metric {id} is {}-scoped, not {scope}", spec.scope),
                    id,
                };
            }
            let value = unit_thresholds
                .get(&id)
                .copied()
                .or_else(|| group_thresholds.and_then(|m| m.get(&id).copied()))
                .or_else(|| defaults.threshold_for(scope, &id))
                .unwrap_or_else(|| spec.threshold.value());
            ResolvedEntry::Metric {
                threshold: spec.threshold.with_value(value),
                id,
            }
        })
        .collect()
}

/// Resolve the metric set for one turn: turn override, else the group's
/// turn-metrics override, else system defaults.
pub fn resolve_turn_metrics(
    registry: &MetricRegistry,
    defaults: &SystemDefaults,
    group: &ConversationGroup,
    turn: &Turn,
) -> Vec<ResolvedEntry> {
    resolve(
        MetricScope::Turn,
        registry,
        defaults,
        &group.turn_metrics,
        &turn.turn_metrics,
        &turn.turn_thresholds,
        Some(&group.turn_thresholds),
    )
}

/// Resolve the conversation-level metric set for a group. The group's
/// conversation override is the unit layer; there is no intermediate.
pub fn resolve_conversation_metrics(
    registry: &MetricRegistry,
    defaults: &SystemDefaults,
    group: &ConversationGroup,
) -> Vec<ResolvedEntry> {
    resolve(
        MetricScope::Conversation,
        registry,
        defaults,
        &MetricOverride::Unset,
        &group.conversation_metrics,
        &group.conversation_thresholds,
        None,
    )
}
