//! # Tsubame Trainer
//!
//! Maximum-likelihood training for Tsubame CRF models: JSONL data loading,
//! SGD/Adagrad updates over shuffled mini-batches, per-epoch checkpoints,
//! and token-level evaluation.

pub mod data;
pub mod evaluate;
pub mod optimizer;
pub mod trainer;

pub use data::{SequenceRecord, load_labeled_dataset, read_records, write_records};
pub use evaluate::{Evaluation, evaluate};
pub use optimizer::{Adagrad, Optimizer, OptimizerKind, Sgd};
pub use trainer::{EpochStats, Trainer, TrainerConfig, TrainingReport};
