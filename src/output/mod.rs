//! Run summary hand-off.
//!
//! The core's obligation at hand-off is result immutability and
//! completeness: one row per resolved (unit, metric) pair, including the
//! SKIPPED and ERROR placeholders. Serialization beyond the JSON summary
//! (CSV, plots) belongs to external report collaborators implementing
//! [`ReportSink`].

use std::fs;
use std::path::PathBuf;

use crate::models::result::RunSummary;
use crate::scheduler::sanitize_component;

/// Receives the finalized, immutable run summary.
pub trait ReportSink {
    fn write(&self, summary: &RunSummary) -> anyhow::Result<()>;
}

/// Writes the run summary as pretty-printed JSON into a directory,
/// named `<label>_summary.json` with the label sanitized for filesystem
/// use.
#[derive(Debug, Clone)]
pub struct JsonSummaryWriter {
    dir: PathBuf,
}

impl JsonSummaryWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn summary_path(&self, summary: &RunSummary) -> PathBuf {
        let label = sanitize_component(&summary.label);
        let stem = if label.is_empty() { "evaluation".to_string() } else { label };
        self.dir.join(format!("{stem}_summary.json"))
    }
}

impl ReportSink for JsonSummaryWriter {
    fn write(&self, summary: &RunSummary) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.summary_path(summary);
        let file = fs::File::create(&path)?;
        serde_json::to_writer_pretty(file, summary)?;
        log::info!("summary written: {}", path.display());
        Ok(())
    }
}

/// Log the run's headline numbers.
pub fn log_summary(summary: &RunSummary) {
    log::info!(
        "evaluation summary for {}: {} total, {} passed, {} failed, {} errored, {} skipped \
         (pass rate {:.1}%)",
        summary.label,
        summary.total,
        summary.passed,
        summary.failed,
        summary.errored,
        summary.skipped,
        summary.pass_rate * 100.0
    );
}
