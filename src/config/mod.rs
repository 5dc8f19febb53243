//! System configuration: defaults, API mode, concurrency, and output.
//!
//! Configuration files are YAML. Loading is a thin serde wrapper; the
//! interesting part is validation, which is fail-fast: any problem found
//! here aborts the run before a single evaluation starts.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigurationError;
use crate::metrics::{MetricIdentifier, MetricRegistry, MetricScope};
use crate::models::data::ConversationGroup;
use crate::scheduler::ConcurrencyConfig;
use crate::script::{ScriptRunner, DEFAULT_SCRIPT_TIMEOUT_SECS};

/// Default base URL of the application under evaluation.
pub const DEFAULT_API_BASE: &str = "http://localhost:8080";
/// Default agent/judge call timeout in seconds.
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 300;
/// Default judge/agent provider.
pub const DEFAULT_PROVIDER: &str = "openai";
/// Default judge/agent model.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
/// Default output directory.
pub const DEFAULT_OUTPUT_DIR: &str = "./eval_output";

/// One system-level metric default: the metric, whether it runs when no
/// override selects metrics, and an optional threshold override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSetting {
    pub metric: MetricIdentifier,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub threshold: Option<f64>,
}

/// System-wide metric defaults for both scopes, in declared order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemDefaults {
    pub turn_metrics: Vec<MetricSetting>,
    pub conversation_metrics: Vec<MetricSetting>,
}

impl SystemDefaults {
    pub fn settings(&self, scope: MetricScope) -> &[MetricSetting] {
        match scope {
            MetricScope::Turn => &self.turn_metrics,
            MetricScope::Conversation => &self.conversation_metrics,
        }
    }

    /// Metrics evaluated when no override selects a set: the settings
    /// flagged `default: true`, in declared order. With no settings
    /// configured for the scope, the registry's default-eligible metrics
    /// apply instead.
    pub fn default_metrics(
        &self,
        scope: MetricScope,
        registry: &MetricRegistry,
    ) -> Vec<MetricIdentifier> {
        let settings = self.settings(scope);
        if settings.is_empty() {
            return registry.default_eligible(scope);
        }
        settings
            .iter()
            .filter(|s| s.default)
            .map(|s| s.metric.clone())
            .collect()
    }

    /// System-level threshold override for one metric, if configured.
    pub fn threshold_for(&self, scope: MetricScope, id: &MetricIdentifier) -> Option<f64> {
        self.settings(scope)
            .iter()
            .find(|s| &s.metric == id)
            .and_then(|s| s.threshold)
    }
}

/// Agent/API collaborator settings; only consulted in live-data mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub provider: String,
    pub model: String,
    pub api_base: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: DEFAULT_PROVIDER.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            timeout_secs: DEFAULT_API_TIMEOUT_SECS,
        }
    }
}

/// Output settings relevant to the core: where run artifacts land.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub output_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

/// Full system configuration for an evaluation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SystemConfig {
    pub defaults: SystemDefaults,
    pub api: ApiConfig,
    pub concurrency: ConcurrencyConfig,
    pub output: OutputConfig,
    /// Run-wide skip-on-failure default; groups may override it.
    pub skip_on_failure: bool,
    /// Wall-clock timeout for setup/cleanup/verify scripts.
    pub script_timeout_secs: Option<u64>,
}

impl SystemConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigurationError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn script_timeout_secs(&self) -> u64 {
        self.script_timeout_secs
            .unwrap_or(DEFAULT_SCRIPT_TIMEOUT_SECS)
    }

    /// Fail-fast validation of the system defaults against the registry:
    /// every configured metric must be registered, at the right scope,
    /// with thresholds inside the score range.
    pub fn validate(&self, registry: &MetricRegistry) -> Result<(), ConfigurationError> {
        for scope in [MetricScope::Turn, MetricScope::Conversation] {
            for setting in self.defaults.settings(scope) {
                let spec = registry.get(&setting.metric).ok_or_else(|| {
                    ConfigurationError::UnknownDefaultMetric {
                        identifier: setting.metric.to_string(),
                    }
                })?;
                if spec.scope != scope {
                    return Err(ConfigurationError::DefaultScopeMismatch {
                        identifier: setting.metric.to_string(),
                        actual: spec.scope.to_string(),
                        configured: scope.to_string(),
                    });
                }
                if let Some(threshold) = setting.threshold {
                    if !(0.0..=1.0).contains(&threshold) {
                        return Err(ConfigurationError::ThresholdOutOfRange {
                            identifier: setting.metric.to_string(),
                            value: threshold,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Load conversation groups from an evaluation-data YAML file.
pub fn load_evaluation_data(path: &Path) -> Result<Vec<ConversationGroup>, ConfigurationError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| ConfigurationError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Fail-fast validation of evaluation data: identifier uniqueness,
/// non-empty groups, threshold ranges, and script existence.
///
/// `script_base` is the directory relative script references resolve
/// against, normally the evaluation-data file's location.
pub fn validate_evaluation_data(
    groups: &[ConversationGroup],
    script_base: Option<&Path>,
) -> Result<(), ConfigurationError> {
    let mut runner = ScriptRunner::new();
    if let Some(base) = script_base {
        runner = runner.with_base_dir(base);
    }

    let mut group_ids = HashSet::new();
    for group in groups {
        if !group_ids.insert(group.group_id.as_str()) {
            return Err(ConfigurationError::DuplicateGroupId {
                group_id: group.group_id.clone(),
            });
        }
        if group.turns.is_empty() {
            return Err(ConfigurationError::EmptyGroup {
                group_id: group.group_id.clone(),
            });
        }

        let mut turn_ids = HashSet::new();
        for turn in &group.turns {
            if !turn_ids.insert(turn.turn_id.as_str()) {
                return Err(ConfigurationError::DuplicateTurnId {
                    group_id: group.group_id.clone(),
                    turn_id: turn.turn_id.clone(),
                });
            }
            check_thresholds(turn.turn_thresholds.iter())?;
        }
        check_thresholds(group.turn_thresholds.iter())?;
        check_thresholds(group.conversation_thresholds.iter())?;

        for (kind, script) in [
            ("setup", group.setup_script.as_deref()),
            ("cleanup", group.cleanup_script.as_deref()),
        ] {
            if let Some(script) = script {
                runner.resolve_path(script).map_err(|_| {
                    ConfigurationError::MissingScript {
                        kind,
                        group_id: group.group_id.clone(),
                        path: script.to_path_buf(),
                    }
                })?;
            }
        }
    }
    Ok(())
}

fn check_thresholds<'a>(
    thresholds: impl Iterator<Item = (&'a MetricIdentifier, &'a f64)>,
) -> Result<(), ConfigurationError> {
    for (id, value) in thresholds {
        if !(0.0..=1.0).contains(value) {
            return Err(ConfigurationError::ThresholdOutOfRange {
                identifier: id.to_string(),
                value: *value,
            });
        }
    }
    Ok(())
}
