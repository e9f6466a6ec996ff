//! # CRF Model
//!
//! Owns the emission weight vector and the transition matrix, and wires the
//! scorer, the forward-backward lattice and the Viterbi decoder together.
//!
//! Training objective per sequence (to be minimised):
//!
//! ```text
//! nll = log Z(x) - score(y_gold, x)   >= 0
//! ```
//!
//! Its gradient is "expected feature counts minus observed feature counts",
//! with expectations taken from the lattice marginals.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::emission::{EmissionScorer, Emissions};
use super::forward::{Lattice, log_partition};
use super::gradient::Gradient;
use super::path::path_score;
use super::transitions::{TransitionConfig, TransitionMatrix};
use super::viterbi::{Decoded, ViterbiDecoder};
use crate::error::{Result, TsubameError};
use crate::tags::TagSet;
use crate::types::{LabeledSequence, TokenSequence};

/// File holding the parameter tensors inside a model directory.
pub const MODEL_FILE: &str = "model.safetensors";
/// File holding the [`ModelConfig`] inside a model directory.
pub const CONFIG_FILE: &str = "config.json";

const WEIGHTS_TENSOR: &str = "emission_weights";
const TRANSITIONS_TENSOR: &str = "transitions";

/// Log-likelihoods above this are reported as a computation bug.
const POSITIVE_LL_TOLERANCE: f64 = 1e-6;

/// Shape and initialisation of a [`CrfModel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Label alphabet.
    pub tags: TagSet,
    /// Width of one label's block in the weight vector.
    pub num_base_features: usize,
    /// Exact number of active features per token.
    pub features_per_token: usize,
    /// Transition matrix constants.
    pub transitions: TransitionConfig,
    /// Weights start uniformly in `[-init_scale, init_scale]`.
    pub init_scale: f64,
    /// Seed for weight initialisation.
    pub seed: u64,
}

impl ModelConfig {
    /// Configuration with the CoNLL tag set and default constants.
    pub fn new(num_base_features: usize, features_per_token: usize) -> Self {
        Self {
            tags: TagSet::conll(),
            num_base_features,
            features_per_token,
            transitions: TransitionConfig::default(),
            init_scale: 0.1,
            seed: 0,
        }
    }

    /// Set the label alphabet.
    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    /// Set the transition constants.
    pub fn with_transitions(mut self, transitions: TransitionConfig) -> Self {
        self.transitions = transitions;
        self
    }

    /// Set the initialisation range.
    pub fn with_init_scale(mut self, scale: f64) -> Self {
        self.init_scale = scale.abs();
        self
    }

    /// Set the initialisation seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.num_base_features == 0 {
            return Err(TsubameError::InvalidConfig(
                "num_base_features must be positive".into(),
            ));
        }
        if self.features_per_token == 0 {
            return Err(TsubameError::InvalidConfig(
                "features_per_token must be positive".into(),
            ));
        }
        // Re-checks alphabets that came in through deserialization.
        TagSet::new(self.tags.labels().to_vec())?;
        Ok(())
    }
}

/// Gold-path score and log-partition of one sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequenceLoss {
    /// Score of the gold label path.
    pub gold_score: f64,
    /// `log Z` over all label paths.
    pub log_partition: f64,
}

impl SequenceLoss {
    /// `gold_score - log Z`, never positive for a correct lattice.
    pub fn log_likelihood(&self) -> f64 {
        self.gold_score - self.log_partition
    }

    /// `log Z - gold_score`, the training loss.
    pub fn negative_log_likelihood(&self) -> f64 {
        self.log_partition - self.gold_score
    }
}

/// A linear-chain CRF over sparse per-token features.
#[derive(Debug, Clone)]
pub struct CrfModel {
    config: ModelConfig,
    scorer: EmissionScorer,
    decoder: ViterbiDecoder,
    weights: Vec<f64>,
    transitions: TransitionMatrix,
}

impl CrfModel {
    /// Build a freshly initialised model.
    pub fn new(config: ModelConfig) -> Result<Self> {
        config.validate()?;
        let scorer = Self::scorer_for(&config);

        let mut rng = oorandom::Rand64::new(u128::from(config.seed));
        let weights: Vec<f64> = (0..scorer.weight_len())
            .map(|_| (rng.rand_float() * 2.0 - 1.0) * config.init_scale)
            .collect();
        let transitions = TransitionMatrix::build(&config.tags, &config.transitions);

        debug!(
            labels = config.tags.num_labels(),
            num_base_features = config.num_base_features,
            weights = weights.len(),
            "initialised CRF model"
        );

        Ok(Self {
            decoder: ViterbiDecoder::new(config.tags.size()),
            config,
            scorer,
            weights,
            transitions,
        })
    }

    /// Assemble a model from existing parameters.
    pub fn from_parts(
        config: ModelConfig,
        weights: Vec<f64>,
        transitions: TransitionMatrix,
    ) -> Result<Self> {
        config.validate()?;
        let scorer = Self::scorer_for(&config);
        if weights.len() != scorer.weight_len() {
            return Err(TsubameError::ShapeMismatch {
                context: "emission weight vector",
                expected: scorer.weight_len(),
                actual: weights.len(),
            });
        }
        if transitions.size() != config.tags.size() {
            return Err(TsubameError::ShapeMismatch {
                context: "transition matrix side",
                expected: config.tags.size(),
                actual: transitions.size(),
            });
        }
        Ok(Self {
            decoder: ViterbiDecoder::new(config.tags.size()),
            config,
            scorer,
            weights,
            transitions,
        })
    }

    fn scorer_for(config: &ModelConfig) -> EmissionScorer {
        EmissionScorer::new(
            config.num_base_features,
            config.features_per_token,
            config.tags.num_labels(),
        )
    }

    /// Model configuration.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Label alphabet.
    pub fn tags(&self) -> &TagSet {
        &self.config.tags
    }

    /// Emission scorer.
    pub fn scorer(&self) -> &EmissionScorer {
        &self.scorer
    }

    /// Emission weight vector.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Mutable emission weight vector (for optimizers).
    pub fn weights_mut(&mut self) -> &mut [f64] {
        &mut self.weights
    }

    /// Transition matrix.
    pub fn transitions(&self) -> &TransitionMatrix {
        &self.transitions
    }

    /// Mutable transition matrix (for optimizers and manual constraints).
    pub fn transitions_mut(&mut self) -> &mut TransitionMatrix {
        &mut self.transitions
    }

    /// Emission tensor `[len, L + 2]` for a sequence.
    pub fn emissions(&self, input: &TokenSequence) -> Result<Emissions> {
        input.validate()?;
        self.scorer.score(&self.weights, &input.features)
    }

    /// Best label path (indices).
    pub fn decode(&self, input: &TokenSequence) -> Result<Decoded> {
        let emissions = self.emissions(input)?;
        self.decoder.decode(&emissions, &self.transitions)
    }

    /// Best label path as label names.
    pub fn predict(&self, input: &TokenSequence) -> Result<Vec<String>> {
        let decoded = self.decode(input)?;
        self.config.tags.decode(&decoded.labels)
    }

    /// `log Z` for a sequence.
    pub fn log_partition(&self, input: &TokenSequence) -> Result<f64> {
        let emissions = self.emissions(input)?;
        log_partition(&emissions, &self.transitions)
    }

    /// Score of the gold path of a labeled sequence.
    pub fn gold_score(&self, example: &LabeledSequence) -> Result<f64> {
        let emissions = self.emissions(&example.input)?;
        path_score(&emissions, &self.transitions, &example.labels)
    }

    /// Gold score and log-partition of a labeled sequence.
    pub fn loss(&self, example: &LabeledSequence) -> Result<SequenceLoss> {
        let emissions = self.emissions(&example.input)?;
        let gold = path_score(&emissions, &self.transitions, &example.labels)?;
        let log_z = log_partition(&emissions, &self.transitions)?;
        check_loss(gold, log_z)
    }

    /// Per-position label marginals `P(y_i = y | x)`, `[len][L]`.
    pub fn marginals(&self, input: &TokenSequence) -> Result<Vec<Vec<f64>>> {
        let emissions = self.emissions(input)?;
        Ok(Lattice::compute(&emissions, &self.transitions)?.marginals())
    }

    /// Negative log-likelihood and its gradient for one labeled sequence.
    ///
    /// The transition part is only filled for trainable entries.
    pub fn gradient(&self, example: &LabeledSequence) -> Result<Gradient> {
        let emissions = self.emissions(&example.input)?;
        let gold = path_score(&emissions, &self.transitions, &example.labels)?;
        let lattice = Lattice::compute(&emissions, &self.transitions)?;
        let loss = check_loss(gold, lattice.log_partition())?;

        let mut grad = Gradient::zeros(self.weights.len(), self.transitions.size());
        grad.loss = loss.negative_log_likelihood();
        grad.examples = 1;

        let seq_len = emissions.len();
        if seq_len == 0 {
            return Ok(grad);
        }
        let num_labels = self.config.tags.num_labels();
        let labels = &example.labels;

        for (pos, features) in example.input.features.iter().enumerate() {
            for y in 0..num_labels {
                let observed = if labels[pos] == y { 1.0 } else { 0.0 };
                let coef = lattice.marginal(pos, y) - observed;
                if coef != 0.0 {
                    self.scorer
                        .accumulate_gradient(&mut grad.emission, features, y, coef);
                }
            }
        }

        if self.transitions.has_trainable() {
            let size = self.transitions.size();
            let (bos, eos) = (self.config.tags.bos(), self.config.tags.eos());
            let t = &mut grad.transitions;

            for y in 0..num_labels {
                t[bos * size + y] += lattice.marginal(0, y);
                t[y * size + eos] += lattice.marginal(seq_len - 1, y);
            }
            t[bos * size + labels[0]] -= 1.0;
            t[labels[seq_len - 1] * size + eos] -= 1.0;

            for pos in 1..seq_len {
                for prev in 0..num_labels {
                    for next in 0..num_labels {
                        t[prev * size + next] += lattice.pairwise_marginal(
                            pos,
                            prev,
                            next,
                            &emissions,
                            &self.transitions,
                        );
                    }
                }
                t[labels[pos - 1] * size + labels[pos]] -= 1.0;
            }

            for (g, &trainable) in t.iter_mut().zip(self.transitions.trainable_mask()) {
                if !trainable {
                    *g = 0.0;
                }
            }
        }

        Ok(grad)
    }

    /// Write `config.json` and `model.safetensors` into `dir`.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        std::fs::write(
            dir.join(CONFIG_FILE),
            serde_json::to_string_pretty(&self.config)?,
        )?;

        let device = Device::Cpu;
        let size = self.transitions.size();
        let mut tensors = HashMap::new();
        tensors.insert(
            WEIGHTS_TENSOR,
            Tensor::from_vec(self.weights.clone(), self.weights.len(), &device)
                .map_err(candle_error)?,
        );
        tensors.insert(
            TRANSITIONS_TENSOR,
            Tensor::from_vec(self.transitions.as_slice().to_vec(), (size, size), &device)
                .map_err(candle_error)?,
        );
        candle_core::safetensors::save(&tensors, dir.join(MODEL_FILE)).map_err(candle_error)?;

        info!(path = %dir.display(), "saved CRF model");
        Ok(())
    }

    /// Load a model written by [`save`](Self::save).
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let model_path = dir.join(MODEL_FILE);
        let config_path = dir.join(CONFIG_FILE);
        if !model_path.exists() {
            return Err(TsubameError::ModelLoadError(format!(
                "model not found at {}",
                model_path.display()
            )));
        }
        if !config_path.exists() {
            return Err(TsubameError::ModelLoadError(format!(
                "config not found at {}",
                config_path.display()
            )));
        }

        let config: ModelConfig = serde_json::from_str(&std::fs::read_to_string(&config_path)?)?;
        let tensors =
            candle_core::safetensors::load(&model_path, &Device::Cpu).map_err(candle_error)?;

        let weights = tensors
            .get(WEIGHTS_TENSOR)
            .ok_or_else(|| missing_tensor(WEIGHTS_TENSOR))?
            .to_vec1::<f64>()
            .map_err(candle_error)?;

        let transitions_tensor = tensors
            .get(TRANSITIONS_TENSOR)
            .ok_or_else(|| missing_tensor(TRANSITIONS_TENSOR))?;
        let size = config.tags.size();
        if transitions_tensor.dims() != [size, size] {
            return Err(TsubameError::ModelLoadError(format!(
                "transitions tensor has shape {:?}, expected [{size}, {size}]",
                transitions_tensor.dims()
            )));
        }
        let scores = transitions_tensor
            .flatten_all()
            .and_then(|t| t.to_vec1::<f64>())
            .map_err(candle_error)?;

        let mut transitions = TransitionMatrix::build(&config.tags, &config.transitions);
        transitions.replace_scores(scores)?;

        info!(path = %dir.display(), "loaded CRF model");
        Self::from_parts(config, weights, transitions)
    }
}

fn check_loss(gold_score: f64, log_partition: f64) -> Result<SequenceLoss> {
    let loss = SequenceLoss {
        gold_score,
        log_partition,
    };
    let ll = loss.log_likelihood();
    if !ll.is_finite() {
        return Err(TsubameError::NumericalInstability(format!(
            "log-likelihood is {ll} (gold score {gold_score}, log Z {log_partition})"
        )));
    }
    if ll > POSITIVE_LL_TOLERANCE {
        warn!(
            log_likelihood = ll,
            gold_score, log_partition, "positive log-likelihood; lattice and path scorer disagree"
        );
    }
    Ok(loss)
}

fn candle_error(e: candle_core::Error) -> TsubameError {
    TsubameError::CandleError(e.to_string())
}

fn missing_tensor(name: &str) -> TsubameError {
    TsubameError::ModelLoadError(format!("tensor {name} missing from {MODEL_FILE}"))
}
