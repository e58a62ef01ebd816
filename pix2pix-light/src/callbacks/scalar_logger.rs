//! Scalar logging for plotting loss curves after (or during) a run.
//!
//! Every logged value goes to a TensorBoard event file under the log
//! directory and is mirrored as one line of `scalars.jsonl`, which is appended
//! to so that resumed runs extend the same curves.

use super::{Callback, EpochMetrics};
use crate::trainer::is_due;
use crate::{LightModule, StepOutput, Trainer};
use candle::Result;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tensorboard_rs::summary_writer::SummaryWriter;

pub const JSONL_FILE: &str = "scalars.jsonl";
/// Prefix of the event files written for TensorBoard.
pub const EVENTS_PREFIX: &str = "events.out.tfevents";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScalarRecord {
    pub tag: String,
    pub step: usize,
    pub value: f32,
    /// Seconds since the unix epoch.
    pub wall_time: f64,
}

pub struct ScalarLogger {
    log_dir: PathBuf,
    every_n_steps: usize,
    writer: Option<SummaryWriter>,
    jsonl: Option<BufWriter<File>>,
}

impl ScalarLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            every_n_steps: 100,
            writer: None,
            jsonl: None,
        }
    }

    pub fn every_n_steps(mut self, n: usize) -> Self {
        self.every_n_steps = n;
        self
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    fn open(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.log_dir).map_err(candle::Error::wrap)?;
        let jsonl = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_dir.join(JSONL_FILE))
            .map_err(candle::Error::wrap)?;
        self.jsonl = Some(BufWriter::new(jsonl));
        self.writer = Some(SummaryWriter::new(&self.log_dir));
        tracing::debug!("logging scalars to {}", self.log_dir.display());
        Ok(())
    }

    /// Append one scalar to both sinks.
    pub fn add_scalar(&mut self, tag: &str, value: f32, step: usize) -> Result<()> {
        if self.writer.is_none() {
            self.open()?;
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.add_scalar(tag, value, step);
        }
        let record = ScalarRecord {
            tag: tag.to_string(),
            step,
            value,
            wall_time: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        };
        if let Some(jsonl) = self.jsonl.as_mut() {
            serde_json::to_writer(&mut *jsonl, &record).map_err(candle::Error::wrap)?;
            writeln!(jsonl).map_err(candle::Error::wrap)?;
            jsonl.flush().map_err(candle::Error::wrap)?;
        }
        Ok(())
    }

    /// Flush pending events to disk.
    pub fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush();
        }
    }
}

/// TensorBoard event files under `log_dir`, sorted by name.
pub fn event_files(log_dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(log_dir).map_err(candle::Error::wrap)? {
        let path = entry.map_err(candle::Error::wrap)?.path();
        let is_events = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(EVENTS_PREFIX));
        if is_events {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Read back every record of a `scalars.jsonl` file.
pub fn read_scalars(path: impl AsRef<Path>) -> Result<Vec<ScalarRecord>> {
    let content = std::fs::read_to_string(path).map_err(candle::Error::wrap)?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(candle::Error::wrap))
        .collect()
}

impl<M: LightModule> Callback<M> for ScalarLogger {
    fn on_fit_start(&mut self, _trainer: &Trainer<M>, _model: &M) -> Result<()> {
        self.open()
    }

    fn on_train_batch_end(
        &mut self,
        trainer: &Trainer<M>,
        _model: &M,
        _batch_idx: usize,
        output: &StepOutput,
    ) -> Result<()> {
        let step = trainer.global_step();
        if !is_due(step, self.every_n_steps) {
            return Ok(());
        }
        for (tag, value) in output.losses.iter() {
            self.add_scalar(tag, *value, step)?;
        }
        Ok(())
    }

    fn on_epoch_end(
        &mut self,
        _trainer: &Trainer<M>,
        _model: &M,
        _epoch: usize,
        _metrics: &EpochMetrics,
    ) -> Result<()> {
        self.flush();
        Ok(())
    }

    fn on_fit_end(&mut self, _trainer: &Trainer<M>, _model: &M) -> Result<()> {
        self.flush();
        self.writer = None;
        self.jsonl = None;
        Ok(())
    }
}
