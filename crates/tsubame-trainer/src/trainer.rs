//! Training loop for the CRF model.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use candle_core::{Device, Tensor};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use tsubame_core::{CrfModel, Gradient, LabeledSequence, TsubameError};

use crate::optimizer::{Optimizer, OptimizerKind};

/// Optimizer state written next to the model in a checkpoint directory.
pub const OPTIMIZER_FILE: &str = "optimizer.safetensors";

const WEIGHT_STATE: &str = "emission_weights";
const TRANSITION_STATE: &str = "transitions";

/// Configuration for the training loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Number of passes over the training set.
    pub epochs: usize,
    /// Optimizer step size.
    pub learning_rate: f64,
    /// Examples per gradient update.
    pub batch_size: usize,
    /// Update rule.
    pub optimizer: OptimizerKind,
    /// Shuffle the example order every epoch.
    pub shuffle: bool,
    /// Seed for shuffling.
    pub seed: u64,
    /// Compute the gradients of a batch on the rayon pool.
    pub parallel: bool,
    /// Save the model and optimizer state here after every epoch.
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 20,
            learning_rate: 0.1,
            batch_size: 1,
            optimizer: OptimizerKind::Adagrad,
            shuffle: true,
            seed: 11,
            parallel: false,
            checkpoint_dir: None,
        }
    }
}

impl TrainerConfig {
    /// Create a trainer configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of epochs.
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Set the learning rate.
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the mini-batch size (at least 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the update rule.
    pub fn with_optimizer(mut self, optimizer: OptimizerKind) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Enable or disable per-epoch shuffling.
    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Set the shuffling seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Enable or disable parallel gradient computation.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Save a checkpoint to `dir` after every epoch.
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }
}

/// Outcome of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochStats {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Mean negative log-likelihood over the examples used.
    pub average_loss: f64,
    /// Examples that contributed a gradient.
    pub examples: usize,
    /// Examples skipped because of label problems.
    pub skipped: usize,
}

/// Per-epoch statistics of a training run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainingReport {
    pub epochs: Vec<EpochStats>,
}

impl TrainingReport {
    /// Average loss of the last epoch.
    pub fn final_loss(&self) -> Option<f64> {
        self.epochs.last().map(|e| e.average_loss)
    }
}

/// Drives gradient updates of a [`CrfModel`].
pub struct Trainer {
    config: TrainerConfig,
    model: CrfModel,
    weight_optimizer: Box<dyn Optimizer>,
    transition_optimizer: Option<Box<dyn Optimizer>>,
    rng: oorandom::Rand64,
}

impl Trainer {
    /// Wrap a model (fresh or loaded from a checkpoint).
    pub fn new(model: CrfModel, config: TrainerConfig) -> Self {
        let weight_optimizer = config
            .optimizer
            .build(config.learning_rate, model.weights().len());
        let transition_optimizer = model.transitions().has_trainable().then(|| {
            config
                .optimizer
                .build(config.learning_rate, model.transitions().as_slice().len())
        });
        let rng = oorandom::Rand64::new(u128::from(config.seed));

        Self {
            config,
            model,
            weight_optimizer,
            transition_optimizer,
            rng,
        }
    }

    /// The model being trained.
    pub fn model(&self) -> &CrfModel {
        &self.model
    }

    /// Consume the trainer and return the model.
    pub fn into_model(self) -> CrfModel {
        self.model
    }

    /// Run all configured epochs.
    pub fn train(&mut self, examples: &[LabeledSequence]) -> Result<TrainingReport> {
        info!(
            examples = examples.len(),
            epochs = self.config.epochs,
            batch_size = self.config.batch_size,
            optimizer = ?self.config.optimizer,
            "starting CRF training"
        );

        let mut report = TrainingReport::default();
        for epoch in 1..=self.config.epochs {
            let stats = self.train_epoch(epoch, examples)?;
            info!(
                epoch,
                average_loss = stats.average_loss,
                examples = stats.examples,
                skipped = stats.skipped,
                "epoch complete"
            );

            if let Some(dir) = &self.config.checkpoint_dir {
                self.save_checkpoint(dir)
                    .with_context(|| format!("saving checkpoint after epoch {epoch}"))?;
            }
            report.epochs.push(stats);
        }
        Ok(report)
    }

    /// Write the model and the optimizer state into `dir`.
    pub fn save_checkpoint(&self, dir: &Path) -> Result<()> {
        self.model.save(dir)?;

        let mut tensors = HashMap::new();
        if let Some(state) = self.weight_optimizer.state() {
            tensors.insert(WEIGHT_STATE, state_tensor(state)?);
        }
        if let Some(state) = self.transition_optimizer.as_ref().and_then(|o| o.state()) {
            tensors.insert(TRANSITION_STATE, state_tensor(state)?);
        }
        if !tensors.is_empty() {
            candle_core::safetensors::save(&tensors, dir.join(OPTIMIZER_FILE))?;
        }
        Ok(())
    }

    /// Restore optimizer state saved by [`save_checkpoint`](Self::save_checkpoint).
    ///
    /// Returns `false` when `dir` holds no optimizer state; the optimizer then
    /// starts fresh.
    pub fn restore_optimizer_state(&mut self, dir: &Path) -> Result<bool> {
        let path = dir.join(OPTIMIZER_FILE);
        if !path.exists() {
            warn!(path = %path.display(), "no optimizer state; starting fresh");
            return Ok(false);
        }
        let tensors = candle_core::safetensors::load(&path, &Device::Cpu)
            .with_context(|| format!("loading {}", path.display()))?;

        if let Some(tensor) = tensors.get(WEIGHT_STATE) {
            self.weight_optimizer
                .restore_state(&tensor.to_vec1::<f64>()?)
                .context("restoring emission weight optimizer")?;
        }
        if let (Some(tensor), Some(optimizer)) = (
            tensors.get(TRANSITION_STATE),
            self.transition_optimizer.as_mut(),
        ) {
            optimizer
                .restore_state(&tensor.to_vec1::<f64>()?)
                .context("restoring transition optimizer")?;
        }
        info!(path = %path.display(), "restored optimizer state");
        Ok(true)
    }

    /// One pass over `examples`.
    pub fn train_epoch(
        &mut self,
        epoch: usize,
        examples: &[LabeledSequence],
    ) -> Result<EpochStats> {
        let mut order: Vec<usize> = (0..examples.len()).collect();
        if self.config.shuffle {
            self.shuffle(&mut order);
        }

        let mut loss_sum = 0.0;
        let mut used = 0usize;
        let mut skipped = 0usize;

        for (step, chunk) in order.chunks(self.config.batch_size.max(1)).enumerate() {
            let batch: Vec<&LabeledSequence> = chunk.iter().map(|&i| &examples[i]).collect();
            let (mut gradient, batch_skipped) = self.batch_gradient(&batch)?;
            skipped += batch_skipped;
            if gradient.examples == 0 {
                continue;
            }

            loss_sum += gradient.loss;
            used += gradient.examples;
            gradient.average();
            if !gradient.is_finite() {
                bail!(TsubameError::NumericalInstability(format!(
                    "non-finite gradient at epoch {epoch}, step {step}"
                )));
            }
            self.apply(&gradient);

            debug!(epoch, step, batch_loss = gradient.loss, "applied update");
        }

        let average_loss = if used == 0 {
            0.0
        } else {
            loss_sum / used as f64
        };
        Ok(EpochStats {
            epoch,
            average_loss,
            examples: used,
            skipped,
        })
    }

    /// Sum of the per-example gradients of a batch, in batch order.
    fn batch_gradient(&self, batch: &[&LabeledSequence]) -> Result<(Gradient, usize)> {
        let model = &self.model;
        let results: Vec<tsubame_core::Result<Gradient>> = if self.config.parallel {
            batch.par_iter().map(|ex| model.gradient(ex)).collect()
        } else {
            batch.iter().map(|ex| model.gradient(ex)).collect()
        };

        let mut total = Gradient::zeros(model.weights().len(), model.transitions().size());
        let mut skipped = 0;
        for result in results {
            match result {
                Ok(g) => total.accumulate(&g),
                Err(e @ (TsubameError::LengthMismatch { .. } | TsubameError::InvalidLabel(_))) => {
                    warn!(error = %e, "skipping example");
                    skipped += 1;
                }
                Err(e) => return Err(anyhow::Error::new(e).context("computing gradient")),
            }
        }
        Ok((total, skipped))
    }

    fn apply(&mut self, gradient: &Gradient) {
        self.weight_optimizer
            .step(self.model.weights_mut(), &gradient.emission);
        if let Some(optimizer) = self.transition_optimizer.as_mut() {
            optimizer.step(
                self.model.transitions_mut().as_mut_slice(),
                &gradient.transitions,
            );
        }
    }

    /// Fisher-Yates with the trainer's seeded generator.
    fn shuffle(&mut self, order: &mut [usize]) {
        for i in (1..order.len()).rev() {
            let j = self.rng.rand_range(0..(i as u64 + 1)) as usize;
            order.swap(i, j);
        }
    }
}

fn state_tensor(state: &[f64]) -> Result<Tensor> {
    Ok(Tensor::from_vec(state.to_vec(), state.len(), &Device::Cpu)?)
}
