//! # Tsubame
//!
//! Linear-chain CRF sequence labeling. Re-exports the inference core and
//! the training utilities under one crate.

pub use tsubame_core::*;

/// Training loop, optimizers, data loading and evaluation.
pub mod train {
    pub use tsubame_trainer::*;
}
