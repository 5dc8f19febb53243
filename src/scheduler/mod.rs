//! Concurrency scheduling: bounded thread dispatch within a run, and the
//! cross-run sweep over provider/model combinations.
//!
//! There are two independent bounding layers. Inside one run, conversation
//! groups (and, with skip-on-failure disabled, turn evaluations) are
//! dispatched over a bounded pool of worker threads. Across runs, one
//! worker per provider/model combination executes an entire evaluation in
//! an isolated output directory. Workers block on external calls; nothing
//! busy-waits.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::EvalError;
use crate::models::result::RunSummary;

/// Worker budgets for the two bounding layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Cross-run workers: provider/model sweeps in flight at once.
    pub workers: usize,
    /// Intra-run worker threads per sweep worker.
    pub threads_per_worker: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { workers: 1, threads_per_worker: 4 }
    }
}

impl ConcurrencyConfig {
    pub fn total_concurrency(&self) -> usize {
        self.workers.max(1) * self.threads_per_worker.max(1)
    }

    /// Warn when both layers together oversubscribe the host. Both layers
    /// issue external network calls, so running far past the available
    /// parallelism mostly exhausts rate limits and memory.
    pub fn warn_if_oversubscribed(&self) -> bool {
        let available = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let total = self.total_concurrency();
        if total > 2 * available {
            log::warn!(
                "total concurrency {total} ({} workers x {} threads) exceeds twice the \
                 available parallelism ({available}); judge/agent endpoints may throttle",
                self.workers,
                self.threads_per_worker
            );
            true
        } else {
            false
        }
    }
}

/// Run `f` over `items` on up to `workers` scoped threads, preserving
/// input order in the returned vector.
///
/// With a budget of one (or one item) this degenerates to a plain
/// sequential map on the calling thread.
pub fn run_parallel_map<T, R, F>(items: Vec<T>, workers: usize, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    if workers <= 1 || items.len() <= 1 {
        return items.into_iter().map(f).collect();
    }

    let count = items.len();
    let queue: Mutex<VecDeque<(usize, T)>> = Mutex::new(items.into_iter().enumerate().collect());
    let slots: Mutex<Vec<Option<R>>> = Mutex::new((0..count).map(|_| None).collect());

    thread::scope(|scope| {
        for _ in 0..workers.min(count) {
            scope.spawn(|| loop {
                let next = queue.lock().pop_front();
                match next {
                    Some((index, item)) => {
                        let result = f(item);
                        slots.lock()[index] = Some(result);
                    }
                    None => break,
                }
            });
        }
    });

    slots
        .into_inner()
        .into_iter()
        .map(|slot| slot.expect("every queued task stores its result before the scope ends"))
        .collect()
}

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.-]+").expect("sanitize pattern is valid"));

/// Sanitize one provider or model name for filesystem use: collapse every
/// run of unsafe characters to `_` and trim leading/trailing `.` and `_`.
pub fn sanitize_component(raw: &str) -> String {
    UNSAFE_CHARS
        .replace_all(raw, "_")
        .trim_matches(['.', '_'])
        .to_string()
}

/// One provider/model combination of a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderModel {
    pub provider: String,
    pub model: String,
}

impl ProviderModel {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self { provider: provider.into(), model: model.into() }
    }
}

impl std::fmt::Display for ProviderModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Process-exclusive output directory for one combination, namespaced by
/// the sanitized provider and model so cross-run workers never contend on
/// files. A pair that sanitizes to nothing is rejected rather than mapped
/// onto a shared directory.
pub fn combo_output_dir(
    base: &Path,
    combo: &ProviderModel,
) -> Result<PathBuf, EvalError> {
    let provider = sanitize_component(&combo.provider);
    let model = sanitize_component(&combo.model);
    if provider.is_empty() || model.is_empty() {
        return Err(EvalError::UnsafeOutputPath {
            provider: combo.provider.clone(),
            model: combo.model.clone(),
        });
    }
    Ok(base.join(provider).join(model))
}

/// Status of one sweep worker.
#[derive(Debug)]
pub struct WorkerOutcome {
    pub combo: ProviderModel,
    pub output_dir: PathBuf,
    /// The run summary on success.
    pub summary: Option<RunSummary>,
    /// The captured failure on error; failures never affect other workers.
    pub error: Option<String>,
    pub duration: Duration,
}

impl WorkerOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of a full cross-run sweep.
#[derive(Debug)]
pub struct SweepReport {
    pub outcomes: Vec<WorkerOutcome>,
}

impl SweepReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Run summaries of the successful workers, in combination order.
    pub fn summaries(&self) -> Vec<&RunSummary> {
        self.outcomes.iter().filter_map(|o| o.summary.as_ref()).collect()
    }
}

/// Fans whole evaluation runs out over provider/model combinations.
#[derive(Debug, Clone)]
pub struct SweepScheduler {
    concurrency: ConcurrencyConfig,
    output_base: PathBuf,
}

impl SweepScheduler {
    pub fn new(concurrency: ConcurrencyConfig, output_base: impl Into<PathBuf>) -> Self {
        Self { concurrency, output_base: output_base.into() }
    }

    /// Execute `run_one` for every combination, up to the worker budget in
    /// parallel. Each worker gets its own pre-created output directory.
    /// Worker failures are isolated into their [`WorkerOutcome`]; only
    /// configuration-level problems fail the sweep itself.
    pub fn run<F>(&self, combos: Vec<ProviderModel>, run_one: F) -> Result<SweepReport, EvalError>
    where
        F: Fn(&ProviderModel, &Path) -> anyhow::Result<RunSummary> + Sync,
    {
        if combos.is_empty() {
            return Err(EvalError::EmptySweep);
        }
        self.concurrency.warn_if_oversubscribed();

        let mut tasks = Vec::with_capacity(combos.len());
        for combo in combos {
            let dir = combo_output_dir(&self.output_base, &combo)?;
            std::fs::create_dir_all(&dir)
                .map_err(|source| EvalError::OutputDir { path: dir.clone(), source })?;
            tasks.push((combo, dir));
        }

        let outcomes = run_parallel_map(tasks, self.concurrency.workers, |(combo, dir)| {
            let started = Instant::now();
            log::info!("starting evaluation: {combo}");
            let (summary, error) = match run_one(&combo, &dir) {
                Ok(summary) => {
                    log::info!(
                        "completed {combo}: pass {} / fail {} / error {}",
                        summary.passed,
                        summary.failed,
                        summary.errored
                    );
                    (Some(summary), None)
                }
                Err(err) => {
                    log::error!("evaluation failed for {combo}: {err:#}");
                    (None, Some(format!("{err:#}")))
                }
            };
            WorkerOutcome {
                combo,
                output_dir: dir,
                summary,
                error,
                duration: started.elapsed(),
            }
        });

        Ok(SweepReport { outcomes })
    }
}
