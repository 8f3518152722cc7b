//! Training driver: feeds synthetic batches to a [`Regressor`] and writes
//! periodic checkpoints.

use crate::batch::{generate_batch, Batch};
use crate::config::{SceneConfig, TrainingConfig, TrainingPolicy};
use crate::error::{LaneError, LaneResult};
use crate::model::{CheckpointPaths, Regressor};
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

/// Summary of a finished training run.
#[derive(Debug, Clone, Default)]
pub struct TrainingReport {
    pub epochs: usize,
    /// Optimisation steps over all epochs.
    pub steps: usize,
    /// Mean training loss of the last epoch.
    pub train_loss: f32,
    /// Loss on held-out scenes after the last epoch, if any were held out.
    pub validation_loss: Option<f32>,
    pub last_checkpoint: Option<PathBuf>,
}

/// Runs the epochs of one training run against any [`Regressor`].
pub struct Trainer<'a, R: Rng> {
    /// Size of the generated scenes.
    scene: &'a SceneConfig,
    config: &'a TrainingConfig,
    /// Where snapshots of this run are written.
    paths: CheckpointPaths,
    /// Source of scenes and shuffling; seed it for reproducible runs.
    rng: R,
}

impl<'a, R: Rng> Trainer<'a, R> {
    pub fn new(scene: &'a SceneConfig, config: &'a TrainingConfig, rng: R) -> Self {
        Self {
            scene,
            config,
            paths: CheckpointPaths::new(&config.checkpoint_dir, &config.run_id),
            rng,
        }
    }

    /// Trains `model` for `config.epochs` epochs using the configured
    /// batch policy.
    pub fn run<M: Regressor>(&mut self, model: &mut M) -> LaneResult<TrainingReport> {
        if self.config.batch_size == 0 || self.config.snapshot_every == 0 {
            return Err(LaneError::Config(
                "training.batch_size and training.snapshot_every must be non-zero".to_string(),
            ));
        }

        info!(
            "Training {} for {} epochs ({:?}, batch size {})",
            self.config.run_id, self.config.epochs, self.config.policy, self.config.batch_size
        );

        let mut report = match self.config.policy {
            TrainingPolicy::FixedDataset => self.run_fixed(model)?,
            TrainingPolicy::FreshBatches => self.run_fresh(model)?,
        };

        // Make sure the final state is on disk even if it fell between snapshots.
        if report.epochs > 0 && report.epochs % self.config.snapshot_every != 0 {
            report.last_checkpoint = Some(self.snapshot(model, report.epochs)?);
        }

        info!(
            "Training finished after {} steps: loss {:.6}, validation {:?}",
            report.steps, report.train_loss, report.validation_loss
        );
        Ok(report)
    }

    /// One dataset generated up front, shuffled into mini-batches every epoch.
    fn run_fixed<M: Regressor>(&mut self, model: &mut M) -> LaneResult<TrainingReport> {
        let dataset = generate_batch(&mut self.rng, self.scene, self.config.data_size);
        let (train, validation) = dataset.split_validation(self.config.validation_fraction);
        let validation_targets = validation.as_ref().map(Batch::labels_column).transpose()?;
        info!(
            "Generated {} training and {} validation samples",
            train.len(),
            validation.as_ref().map_or(0, Batch::len)
        );

        let mut report = TrainingReport::default();
        let mut order: Vec<usize> = (0..train.len()).collect();

        for epoch in 1..=self.config.epochs {
            let started = Instant::now();
            order.shuffle(&mut self.rng);

            let mut loss_sum = 0.0;
            let mut batches = 0;
            for chunk in order.chunks(self.config.batch_size) {
                let batch = train.select(chunk);
                let targets = batch.labels_column()?;
                loss_sum += model.train_step(batch.images.view(), targets.view())?;
                batches += 1;
                report.steps += 1;
            }

            report.epochs = epoch;
            report.train_loss = loss_sum / batches.max(1) as f32;
            report.validation_loss = match (&validation, &validation_targets) {
                (Some(batch), Some(targets)) => Some(model.evaluate(batch.images.view(), targets.view())?),
                _ => None,
            };
            self.end_epoch(model, epoch, &mut report, started)?;
        }

        Ok(report)
    }

    /// A fresh batch for every step, validated on a fresh batch per epoch.
    fn run_fresh<M: Regressor>(&mut self, model: &mut M) -> LaneResult<TrainingReport> {
        let mut report = TrainingReport::default();
        let validation_size =
            (self.config.batch_size as f32 * self.config.validation_fraction).ceil() as usize;

        for epoch in 1..=self.config.epochs {
            let started = Instant::now();

            let mut loss_sum = 0.0;
            for _ in 0..self.config.steps_per_epoch {
                let batch = generate_batch(&mut self.rng, self.scene, self.config.batch_size);
                let targets = batch.labels_column()?;
                loss_sum += model.train_step(batch.images.view(), targets.view())?;
                report.steps += 1;
            }

            report.epochs = epoch;
            report.train_loss = loss_sum / self.config.steps_per_epoch as f32;
            report.validation_loss = if validation_size > 0 {
                let batch = generate_batch(&mut self.rng, self.scene, validation_size);
                let targets = batch.labels_column()?;
                Some(model.evaluate(batch.images.view(), targets.view())?)
            } else {
                None
            };
            self.end_epoch(model, epoch, &mut report, started)?;
        }

        Ok(report)
    }

    fn end_epoch<M: Regressor>(
        &self,
        model: &M,
        epoch: usize,
        report: &mut TrainingReport,
        started: Instant,
    ) -> LaneResult<()> {
        match report.validation_loss {
            Some(val) => info!(
                "Epoch {epoch}/{}: loss {:.6}, val_loss {val:.6} ({:.1?})",
                self.config.epochs,
                report.train_loss,
                started.elapsed()
            ),
            None => info!(
                "Epoch {epoch}/{}: loss {:.6} ({:.1?})",
                self.config.epochs,
                report.train_loss,
                started.elapsed()
            ),
        }

        if epoch % self.config.snapshot_every == 0 {
            report.last_checkpoint = Some(self.snapshot(model, epoch)?);
        }
        Ok(())
    }

    fn snapshot<M: Regressor>(&self, model: &M, epoch: usize) -> LaneResult<PathBuf> {
        let path = self.paths.for_epoch(epoch);
        model.save(&path, epoch)?;
        debug!("Saved snapshot {}", path.display());
        Ok(path)
    }
}
