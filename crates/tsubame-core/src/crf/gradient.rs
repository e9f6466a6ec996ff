//! Dense gradient buffers aligned with the model parameters.

/// Gradient of the negative log-likelihood, summed over some examples.
#[derive(Debug, Clone, PartialEq)]
pub struct Gradient {
    /// d(loss)/dW, same layout as the emission weight vector.
    pub emission: Vec<f64>,
    /// d(loss)/dT, row-major like the transition matrix. Untouched when
    /// the model has no trainable transitions.
    pub transitions: Vec<f64>,
    /// Summed negative log-likelihood.
    pub loss: f64,
    /// Number of examples folded in.
    pub examples: usize,
}

impl Gradient {
    /// Zero gradient for `weight_len` emission weights and a
    /// `[num_tags x num_tags]` transition matrix.
    pub fn zeros(weight_len: usize, num_tags: usize) -> Self {
        Self {
            emission: vec![0.0; weight_len],
            transitions: vec![0.0; num_tags * num_tags],
            loss: 0.0,
            examples: 0,
        }
    }

    /// Add another gradient into this one.
    pub fn accumulate(&mut self, other: &Gradient) {
        for (a, b) in self.emission.iter_mut().zip(&other.emission) {
            *a += b;
        }
        for (a, b) in self.transitions.iter_mut().zip(&other.transitions) {
            *a += b;
        }
        self.loss += other.loss;
        self.examples += other.examples;
    }

    /// Divide by the example count (mean over the batch).
    pub fn average(&mut self) {
        if self.examples == 0 {
            return;
        }
        let inv = 1.0 / self.examples as f64;
        self.emission.iter_mut().for_each(|g| *g *= inv);
        self.transitions.iter_mut().for_each(|g| *g *= inv);
        self.loss *= inv;
    }

    /// Whether every entry and the loss are finite.
    pub fn is_finite(&self) -> bool {
        self.loss.is_finite()
            && self.emission.iter().all(|g| g.is_finite())
            && self.transitions.iter().all(|g| g.is_finite())
    }
}
