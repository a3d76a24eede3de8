//! Progress and outcome reporting for a batch.
//!
//! The coordinator never prints. It calls a [`BatchReporter`]; the console
//! implementation logs through `tracing` and draws an `indicatif` byte bar
//! per file.

use std::io::IsTerminal;
use std::sync::Mutex;
use std::time::Duration;

use indicatif::{HumanBytes, ProgressBar, ProgressStyle};

use super::{BatchPlan, BatchSummary, TransferOutcome};
use crate::discover::UploadItem;

pub trait BatchReporter: Send + Sync {
    /// A file is about to be sent. `position` is 1-based.
    fn file_started(&self, position: usize, total: usize, item: &UploadItem);

    /// Cumulative bytes of the current file accepted by the server.
    fn bytes_sent(&self, sent: u64);

    fn file_finished(&self, filename: &str, outcome: &TransferOutcome);

    /// Later copy of a file already seen in this batch.
    fn duplicate(&self, filename: &str, original: &str);

    /// Something went wrong that does not change any file's outcome.
    fn warn(&self, message: &str);
}

/// Create a progress bar with a consistent template.
///
/// Hidden when the user passed `--no-progress-bar` or stdout is not a TTY.
pub fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

/// Reporter for interactive and logged runs.
pub struct ConsoleReporter {
    no_progress_bar: bool,
    bar: Mutex<ProgressBar>,
}

impl ConsoleReporter {
    pub fn new(no_progress_bar: bool) -> Self {
        Self {
            no_progress_bar,
            bar: Mutex::new(ProgressBar::hidden()),
        }
    }

    fn bar(&self) -> ProgressBar {
        match self.bar.lock() {
            Ok(pb) => pb.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl BatchReporter for ConsoleReporter {
    fn file_started(&self, position: usize, total: usize, item: &UploadItem) {
        let pb = create_progress_bar(self.no_progress_bar, item.file.size);
        pb.set_message(item.filename().to_string());
        pb.suspend(|| {
            tracing::info!(
                "[{}/{}] Uploading {} ({}, {})",
                position,
                total,
                item.filename(),
                item.file.upload_type.label(),
                HumanBytes(item.file.size)
            );
        });
        match self.bar.lock() {
            Ok(mut slot) => *slot = pb,
            Err(poisoned) => *poisoned.into_inner() = pb,
        }
    }

    fn bytes_sent(&self, sent: u64) {
        self.bar().set_position(sent);
    }

    fn file_finished(&self, filename: &str, outcome: &TransferOutcome) {
        let pb = self.bar();
        pb.finish_and_clear();
        match outcome {
            TransferOutcome::Uploaded { dataset_id } => {
                tracing::info!("Uploaded {} as dataset {}", filename, dataset_id);
            }
            TransferOutcome::Failed { error } => {
                tracing::error!("Upload failed: {}: {}", filename, error);
            }
        }
    }

    fn duplicate(&self, filename: &str, original: &str) {
        tracing::warn!("Skipping {}: identical to {}", filename, original);
    }

    fn warn(&self, message: &str) {
        self.bar().suspend(|| tracing::warn!("{}", message));
    }
}

pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

pub fn log_plan(plan: &BatchPlan, dry_run: bool) {
    let header = if dry_run {
        "── Dry Run ──"
    } else {
        "── Plan ──"
    };
    tracing::info!("{}", header);
    tracing::info!("  session: {}", plan.checkpoint.session_id);
    if !plan.already_completed.is_empty() {
        tracing::info!(
            "  {} already uploaded in this session",
            plan.already_completed.len()
        );
    }
    if !plan.previously_skipped.is_empty() {
        tracing::info!("  {} skipped earlier", plan.previously_skipped.len());
    }
    for (dup, original) in &plan.duplicates {
        tracing::info!("  duplicate: {} (same content as {})", dup, original);
    }
    tracing::info!(
        "  {} file(s) to upload, {}",
        plan.to_upload.len(),
        HumanBytes(plan.total_bytes())
    );
    if dry_run {
        for item in &plan.to_upload {
            tracing::info!(
                "  [DRY RUN] Would upload {} ({}, {})",
                item.filename(),
                item.file.upload_type.label(),
                HumanBytes(item.file.size)
            );
        }
    }
}

pub fn log_summary(summary: &BatchSummary) {
    tracing::info!("── Summary ──");
    if summary.interrupted {
        tracing::info!("  Interrupted; remaining files stay pending for the next run");
    }
    tracing::info!(
        "  {} uploaded, {} failed, {} skipped, {} pending",
        summary.uploaded.len(),
        summary.failed.len(),
        summary.skipped,
        summary.pending
    );
    tracing::info!("  elapsed: {}", format_duration(summary.elapsed));
    for (filename, id) in &summary.uploaded {
        tracing::info!("  {} → dataset {}", filename, id);
    }
    for (filename, error) in &summary.failed {
        tracing::error!("  failed: {}: {}", filename, error);
    }
    if let Some(reason) = &summary.halted {
        tracing::error!("  Batch halted: {}", reason);
    }
}
