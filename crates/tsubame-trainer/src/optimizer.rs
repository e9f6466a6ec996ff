//! Parameter update rules.

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

/// Which update rule to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    /// Plain gradient descent.
    Sgd,
    /// Per-coordinate step sizes from accumulated squared gradients.
    Adagrad,
}

impl OptimizerKind {
    /// Instantiate the optimizer for `num_params` parameters.
    pub fn build(self, learning_rate: f64, num_params: usize) -> Box<dyn Optimizer> {
        match self {
            OptimizerKind::Sgd => Box::new(Sgd::new(learning_rate)),
            OptimizerKind::Adagrad => Box::new(Adagrad::new(learning_rate, num_params)),
        }
    }
}

/// Applies a descent step to a parameter slice in place.
pub trait Optimizer: Send {
    /// `params -= f(gradient)`; both slices have the same length.
    fn step(&mut self, params: &mut [f64], gradient: &[f64]);

    /// Per-coordinate state to checkpoint, if the rule keeps any.
    fn state(&self) -> Option<&[f64]> {
        None
    }

    /// Restore state previously returned by [`state`](Self::state).
    fn restore_state(&mut self, _state: &[f64]) -> Result<()> {
        Ok(())
    }
}

/// `p -= lr * g`
#[derive(Debug, Clone)]
pub struct Sgd {
    learning_rate: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut [f64], gradient: &[f64]) {
        for (p, g) in params.iter_mut().zip(gradient) {
            *p -= self.learning_rate * g;
        }
    }
}

/// Unregularized Adagrad: `acc += g^2; p -= lr * g / (sqrt(acc) + eps)`.
///
/// Coordinates with a zero gradient are left untouched, so features that
/// never fire keep their initial value and their full step size.
#[derive(Debug, Clone)]
pub struct Adagrad {
    learning_rate: f64,
    epsilon: f64,
    accumulated: Vec<f64>,
}

impl Adagrad {
    pub fn new(learning_rate: f64, num_params: usize) -> Self {
        Self {
            learning_rate,
            epsilon: 1e-8,
            accumulated: vec![0.0; num_params],
        }
    }

    /// Sum of squared gradients seen so far, per coordinate.
    pub fn accumulated(&self) -> &[f64] {
        &self.accumulated
    }
}

impl Optimizer for Adagrad {
    fn step(&mut self, params: &mut [f64], gradient: &[f64]) {
        for ((p, &g), acc) in params
            .iter_mut()
            .zip(gradient)
            .zip(self.accumulated.iter_mut())
        {
            if g == 0.0 {
                continue;
            }
            *acc += g * g;
            *p -= self.learning_rate * g / (acc.sqrt() + self.epsilon);
        }
    }

    fn state(&self) -> Option<&[f64]> {
        Some(&self.accumulated)
    }

    fn restore_state(&mut self, state: &[f64]) -> Result<()> {
        ensure!(
            state.len() == self.accumulated.len(),
            "adagrad state has {} entries, expected {}",
            state.len(),
            self.accumulated.len()
        );
        self.accumulated.copy_from_slice(state);
        Ok(())
    }
}
