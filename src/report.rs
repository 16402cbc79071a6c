//! Training progress and evaluation summaries, and the observers that
//! consume them.

use crate::data::Split;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

/// Snapshot emitted every `log_interval` training batches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainProgress {
    pub epoch: usize,
    /// Examples seen before the current batch.
    pub processed: usize,
    pub dataset_len: usize,
    pub percent: f64,
    /// Mean loss of the current batch.
    pub loss: f32,
}

impl fmt::Display for TrainProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Train Epoch: {} [{}/{} ({:.0}%)]\tLoss: {:.6}",
            self.epoch, self.processed, self.dataset_len, self.percent, self.loss
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalReport {
    pub split: Split,
    pub average_loss: f64,
    pub correct: usize,
    pub total: usize,
    /// 100 * correct / total
    pub accuracy: f64,
}

impl EvalReport {
    pub fn rounded_accuracy(&self) -> u32 {
        self.accuracy.round() as u32
    }
}

impl fmt::Display for EvalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} set: Average loss: {:.4}, Accuracy: {}/{} ({}%)",
            self.split,
            self.average_loss,
            self.correct,
            self.total,
            self.rounded_accuracy()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub train: EvalReport,
    pub test: EvalReport,
}

/// Side-channel for what the training loop does. Observers never influence
/// training.
pub trait Observer {
    fn on_batch_end(&mut self, _epoch: usize, _batch_idx: usize) {}
    fn on_train_progress(&mut self, _progress: &TrainProgress) {}
    fn on_evaluation(&mut self, _report: &EvalReport) {}
    fn on_epoch_end(&mut self, _report: &EpochReport) {}
}

/// Discards everything.
pub struct NoopObserver;

impl Observer for NoopObserver {}

impl Observer for Vec<Box<dyn Observer>> {
    fn on_batch_end(&mut self, epoch: usize, batch_idx: usize) {
        for o in self.iter_mut() {
            o.on_batch_end(epoch, batch_idx);
        }
    }

    fn on_train_progress(&mut self, progress: &TrainProgress) {
        for o in self.iter_mut() {
            o.on_train_progress(progress);
        }
    }

    fn on_evaluation(&mut self, report: &EvalReport) {
        for o in self.iter_mut() {
            o.on_evaluation(report);
        }
    }

    fn on_epoch_end(&mut self, report: &EpochReport) {
        for o in self.iter_mut() {
            o.on_epoch_end(report);
        }
    }
}

/// Reports through `tracing` at info level.
pub struct LogObserver;

impl Observer for LogObserver {
    fn on_train_progress(&mut self, progress: &TrainProgress) {
        info!("{}", progress);
    }

    fn on_evaluation(&mut self, report: &EvalReport) {
        info!("{}", report);
    }
}

/// Progress bar over every training batch of the run; lines are printed above it.
pub struct ProgressBarObserver {
    pb: ProgressBar,
}

impl ProgressBarObserver {
    pub fn new(total_batches: u64) -> ProgressBarObserver {
        let pb = ProgressBar::new(total_batches);
        let style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        ProgressBarObserver { pb }
    }
}

impl Observer for ProgressBarObserver {
    fn on_batch_end(&mut self, _epoch: usize, _batch_idx: usize) {
        self.pb.inc(1);
    }

    fn on_train_progress(&mut self, progress: &TrainProgress) {
        self.pb.println(progress.to_string());
    }

    fn on_evaluation(&mut self, report: &EvalReport) {
        self.pb.println(format!("\n{}\n", report));
    }
}

impl Drop for ProgressBarObserver {
    fn drop(&mut self) {
        self.pb.finish();
    }
}

/// Appends one JSON object per finished epoch.
pub struct JsonLinesObserver<W: Write> {
    out: W,
}

impl JsonLinesObserver<BufWriter<File>> {
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(JsonLinesObserver {
            out: BufWriter::new(File::create(path)?),
        })
    }
}

impl<W: Write> JsonLinesObserver<W> {
    pub fn new(out: W) -> Self {
        JsonLinesObserver { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_report(&mut self, report: &EpochReport) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, report)?;
        writeln!(self.out)?;
        self.out.flush()
    }
}

impl<W: Write> Observer for JsonLinesObserver<W> {
    fn on_epoch_end(&mut self, report: &EpochReport) {
        // best effort
        if let Err(e) = self.write_report(report) {
            warn!(error = %e, epoch = report.epoch, "could not write epoch metrics");
        }
    }
}
