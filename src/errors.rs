//! Error types for the evaluation core.
//!
//! The taxonomy separates fail-fast configuration problems from locally
//! recovered failures: a `ConfigurationError` aborts a run before any
//! evaluation starts, while script, scorer, and agent failures are captured
//! as ERROR results for the affected (unit, metric) pairs only.

use std::path::PathBuf;

use thiserror::Error;

/// Configuration problems detected before evaluation starts.
///
/// These abort the run immediately; they are never converted into
/// per-metric ERROR results.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A metric identifier string did not parse as `framework:name`.
    #[error("malformed metric identifier {identifier:?}: expected \"framework:name\"")]
    MalformedMetricIdentifier { identifier: String },

    /// A system default references a metric the registry does not know.
    #[error("unknown metric {identifier:?} in system defaults")]
    UnknownDefaultMetric { identifier: String },

    /// A system default references a metric registered under another scope.
    #[error("metric {identifier:?} is {actual}-scoped but listed as a {configured} default")]
    DefaultScopeMismatch {
        identifier: String,
        actual: String,
        configured: String,
    },

    /// A threshold override is outside the valid score range.
    #[error("threshold {value} for metric {identifier:?} is outside 0.0..=1.0")]
    ThresholdOutOfRange { identifier: String, value: f64 },

    /// Two conversation groups share an identifier.
    #[error("duplicate conversation group id {group_id:?}")]
    DuplicateGroupId { group_id: String },

    /// Two turns within one group share an identifier.
    #[error("duplicate turn id {turn_id:?} in group {group_id:?}")]
    DuplicateTurnId { group_id: String, turn_id: String },

    /// A group has no turns.
    #[error("conversation group {group_id:?} has no turns")]
    EmptyGroup { group_id: String },

    /// A referenced setup/cleanup script does not exist.
    #[error("{kind} script for group {group_id:?} not found: {}", .path.display())]
    MissingScript {
        kind: &'static str,
        group_id: String,
        path: PathBuf,
    },

    /// A configuration file could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file could not be parsed.
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Failures while executing an external script.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The resolved script path does not exist.
    #[error("script not found: {}", .path.display())]
    NotFound { path: PathBuf },

    /// The resolved script path is not a regular file.
    #[error("script path is not a file: {}", .path.display())]
    NotAFile { path: PathBuf },

    /// The script ran past its wall-clock timeout and was killed.
    #[error("script timed out after {timeout_secs}s: {}", .path.display())]
    Timeout { path: PathBuf, timeout_secs: u64 },

    /// Spawning or waiting on the script process failed.
    #[error("failed to run script {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A failure raised by an external collaborator during evaluation.
///
/// The triggering message is carried verbatim into the ERROR result's
/// reason field.
#[derive(Debug, Error)]
pub enum ExternalCallError {
    /// The scoring entrypoint for a metric failed.
    #[error("{0}")]
    Scorer(String),

    /// An agent/API query failed.
    #[error("agent query failed: {0}")]
    Agent(String),

    /// Script execution failed.
    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// Top-level error for evaluation runs and cross-run sweeps.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The sweep was started without any provider/model combinations.
    #[error("sweep produced no provider/model combinations")]
    EmptySweep,

    /// Sanitizing a provider/model pair produced an empty or unsafe path.
    #[error("unsafe provider/model path: {provider}/{model}")]
    UnsafeOutputPath { provider: String, model: String },

    /// An output directory could not be created.
    #[error("failed to create output directory {}: {source}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
