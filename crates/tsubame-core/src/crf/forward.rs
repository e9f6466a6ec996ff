//! # Forward-Backward (log-partition)
//!
//! Sums the exponentiated scores of every label sequence in log space.
//! Only real labels are lattice states; BOS/EOS enter through the first
//! and last transition:
//!
//! ```text
//! alpha[0][y] = T[BOS, y] + e[0, y]
//! alpha[i][y] = logsumexp_p(alpha[i-1][p] + T[p, y]) + e[i, y]
//! log Z       = logsumexp_y(alpha[N-1][y] + T[y, EOS])
//!
//! beta[N-1][y] = T[y, EOS]
//! beta[i][y]   = logsumexp_n(T[y, n] + e[i+1, n] + beta[i+1][n])
//! ```
//!
//! The backward table gives the marginals that form the gradient of
//! `log Z` with respect to emissions and transitions.

use super::check_shapes;
use super::emission::Emissions;
use super::logspace::{log_sum_exp, normalized_exp};
use super::transitions::TransitionMatrix;
use crate::error::Result;

/// Forward recursion only: `log Z` for one sequence.
///
/// An empty sequence has a single (empty) path of score 0.
pub fn log_partition(emissions: &Emissions, transitions: &TransitionMatrix) -> Result<f64> {
    let num_labels = check_shapes(emissions, transitions)?;
    if emissions.is_empty() {
        return Ok(0.0);
    }
    let alpha = forward_table(emissions, transitions, num_labels);
    Ok(final_log_partition(&alpha, emissions.len(), num_labels, transitions))
}

/// `log Z` for each sequence of a batch.
pub fn log_partition_batch(
    batch: &[Emissions],
    transitions: &TransitionMatrix,
) -> Result<Vec<f64>> {
    batch
        .iter()
        .map(|emissions| log_partition(emissions, transitions))
        .collect()
}

fn forward_table(
    emissions: &Emissions,
    transitions: &TransitionMatrix,
    num_labels: usize,
) -> Vec<f64> {
    let seq_len = emissions.len();
    let bos = num_labels;
    let mut alpha = vec![f64::NEG_INFINITY; seq_len * num_labels];
    let mut terms = vec![0.0; num_labels];

    for y in 0..num_labels {
        alpha[y] = transitions.get(bos, y) + emissions.get(0, y);
    }
    for i in 1..seq_len {
        let (done, rest) = alpha.split_at_mut(i * num_labels);
        let prev = &done[(i - 1) * num_labels..];
        for y in 0..num_labels {
            for p in 0..num_labels {
                terms[p] = prev[p] + transitions.get(p, y);
            }
            rest[y] = log_sum_exp(&terms) + emissions.get(i, y);
        }
    }
    alpha
}

fn final_log_partition(
    alpha: &[f64],
    seq_len: usize,
    num_labels: usize,
    transitions: &TransitionMatrix,
) -> f64 {
    let eos = num_labels + 1;
    let last = &alpha[(seq_len - 1) * num_labels..];
    let terms: Vec<f64> = (0..num_labels)
        .map(|y| last[y] + transitions.get(y, eos))
        .collect();
    log_sum_exp(&terms)
}

/// Filled forward and backward tables for one sequence.
#[derive(Debug, Clone)]
pub struct Lattice {
    seq_len: usize,
    num_labels: usize,
    alpha: Vec<f64>,
    beta: Vec<f64>,
    log_z: f64,
}

impl Lattice {
    /// Run both recursions.
    pub fn compute(emissions: &Emissions, transitions: &TransitionMatrix) -> Result<Self> {
        let num_labels = check_shapes(emissions, transitions)?;
        let seq_len = emissions.len();
        if seq_len == 0 {
            return Ok(Self {
                seq_len,
                num_labels,
                alpha: Vec::new(),
                beta: Vec::new(),
                log_z: 0.0,
            });
        }

        let alpha = forward_table(emissions, transitions, num_labels);
        let log_z = final_log_partition(&alpha, seq_len, num_labels, transitions);

        let eos = num_labels + 1;
        let mut beta = vec![f64::NEG_INFINITY; seq_len * num_labels];
        let mut terms = vec![0.0; num_labels];
        for y in 0..num_labels {
            beta[(seq_len - 1) * num_labels + y] = transitions.get(y, eos);
        }
        for i in (0..seq_len - 1).rev() {
            let (head, tail) = beta.split_at_mut((i + 1) * num_labels);
            let next = &tail[..num_labels];
            let current = &mut head[i * num_labels..];
            for y in 0..num_labels {
                for n in 0..num_labels {
                    terms[n] = transitions.get(y, n) + emissions.get(i + 1, n) + next[n];
                }
                current[y] = log_sum_exp(&terms);
            }
        }

        Ok(Self {
            seq_len,
            num_labels,
            alpha,
            beta,
            log_z,
        })
    }

    /// `log Z`.
    pub fn log_partition(&self) -> f64 {
        self.log_z
    }

    /// Sequence length.
    pub fn len(&self) -> usize {
        self.seq_len
    }

    /// Whether the lattice covers an empty sequence.
    pub fn is_empty(&self) -> bool {
        self.seq_len == 0
    }

    /// Forward score `alpha[pos][label]`.
    pub fn alpha(&self, pos: usize, label: usize) -> f64 {
        self.alpha[pos * self.num_labels + label]
    }

    /// Backward score `beta[pos][label]`.
    pub fn beta(&self, pos: usize, label: usize) -> f64 {
        self.beta[pos * self.num_labels + label]
    }

    /// `P(y_pos = label | x)`.
    pub fn marginal(&self, pos: usize, label: usize) -> f64 {
        normalized_exp(self.alpha(pos, label) + self.beta(pos, label), self.log_z)
    }

    /// `P(y_{pos-1} = prev, y_pos = next | x)` for `pos >= 1`.
    pub fn pairwise_marginal(
        &self,
        pos: usize,
        prev: usize,
        next: usize,
        emissions: &Emissions,
        transitions: &TransitionMatrix,
    ) -> f64 {
        normalized_exp(
            self.alpha(pos - 1, prev)
                + transitions.get(prev, next)
                + emissions.get(pos, next)
                + self.beta(pos, next),
            self.log_z,
        )
    }

    /// Every position's label distribution, `[seq_len][num_labels]`.
    pub fn marginals(&self) -> Vec<Vec<f64>> {
        (0..self.seq_len)
            .map(|pos| {
                (0..self.num_labels)
                    .map(|label| self.marginal(pos, label))
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crf::path::path_score;

    fn small_transitions() -> TransitionMatrix {
        // 2 real labels + BOS + EOS
        let b = -10_000.0;
        TransitionMatrix::from_scores(
            4,
            vec![
                0.3, -0.2, b, 0.1, //
                0.5, 0.0, b, -0.4, //
                0.2, -0.1, b, 0.0, //
                b, b, b, b,
            ],
        )
        .unwrap()
    }

    fn small_emissions() -> Emissions {
        Emissions::from_rows(
            &[
                vec![1.0, -0.5, 0.0, 0.0],
                vec![0.2, 0.7, 0.0, 0.0],
                vec![-0.3, 0.4, 0.0, 0.0],
            ],
            4,
        )
        .unwrap()
    }

    fn all_paths(num_labels: usize, len: usize) -> Vec<Vec<usize>> {
        let mut out = vec![Vec::new()];
        for _ in 0..len {
            out = out
                .into_iter()
                .flat_map(|p| {
                    (0..num_labels).map(move |y| {
                        let mut q = p.clone();
                        q.push(y);
                        q
                    })
                })
                .collect();
        }
        out
    }

    #[test]
    fn test_matches_brute_force_enumeration() {
        let t = small_transitions();
        let e = small_emissions();
        let naive: f64 = all_paths(2, 3)
            .iter()
            .map(|p| path_score(&e, &t, p).unwrap().exp())
            .sum::<f64>()
            .ln();
        let got = log_partition(&e, &t).unwrap();
        assert!((got - naive).abs() < 1e-10, "{got} vs {naive}");
    }

    #[test]
    fn test_bounds_every_path_score() {
        let t = small_transitions();
        let e = small_emissions();
        let log_z = log_partition(&e, &t).unwrap();
        for p in all_paths(2, 3) {
            assert!(path_score(&e, &t, &p).unwrap() <= log_z);
        }
    }

    #[test]
    fn test_wide_score_range_stays_finite() {
        let t = small_transitions();
        let e = Emissions::from_rows(
            &[
                vec![1000.0, -1000.0, 0.0, 0.0],
                vec![-1000.0, 1000.0, 0.0, 0.0],
                vec![500.0, -750.0, 0.0, 0.0],
            ],
            4,
        )
        .unwrap();

        // Reference: enumerate path scores, then sum relative to the max
        // (the exact sum of the exponentials overflows f64).
        let scores: Vec<f64> = all_paths(2, 3)
            .iter()
            .map(|p| path_score(&e, &t, p).unwrap())
            .collect();
        let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let reference = max + scores.iter().map(|s| (s - max).exp()).sum::<f64>().ln();

        let got = log_partition(&e, &t).unwrap();
        assert!(got.is_finite());
        assert!((got - reference).abs() < 1e-9, "{got} vs {reference}");
    }

    #[test]
    fn test_shift_invariance() {
        // Adding c to every label at one position shifts log Z by exactly c.
        let t = small_transitions();
        let e = small_emissions();
        let mut shifted = e.clone();
        for y in 0..2 {
            shifted.set(1, y, e.get(1, y) + 900.0);
        }
        let base = log_partition(&e, &t).unwrap();
        let moved = log_partition(&shifted, &t).unwrap();
        assert!((moved - base - 900.0).abs() < 1e-9);
    }

    #[test]
    fn test_lattice_agrees_with_forward_and_normalises() {
        let t = small_transitions();
        let e = small_emissions();
        let lattice = Lattice::compute(&e, &t).unwrap();
        assert!((lattice.log_partition() - log_partition(&e, &t).unwrap()).abs() < 1e-12);

        for row in lattice.marginals() {
            let total: f64 = row.iter().sum();
            assert!((total - 1.0).abs() < 1e-9);
        }

        // Pairwise marginals sum to the unary marginal of the next position.
        for next in 0..2 {
            let summed: f64 = (0..2)
                .map(|prev| lattice.pairwise_marginal(2, prev, next, &e, &t))
                .sum();
            assert!((summed - lattice.marginal(2, next)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_marginals_match_enumeration() {
        let t = small_transitions();
        let e = small_emissions();
        let lattice = Lattice::compute(&e, &t).unwrap();
        let log_z = lattice.log_partition();

        let mut expected = vec![vec![0.0; 2]; 3];
        for p in all_paths(2, 3) {
            let w = (path_score(&e, &t, &p).unwrap() - log_z).exp();
            for (pos, &y) in p.iter().enumerate() {
                expected[pos][y] += w;
            }
        }
        for (pos, row) in lattice.marginals().iter().enumerate() {
            for y in 0..2 {
                assert!((row[y] - expected[pos][y]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_empty_and_batch() {
        let t = small_transitions();
        let empty = Emissions::zeros(0, 4);
        assert_eq!(log_partition(&empty, &t).unwrap(), 0.0);
        assert!(Lattice::compute(&empty, &t).unwrap().is_empty());

        let batch = vec![small_emissions(), empty];
        let out = log_partition_batch(&batch, &t).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], 0.0);
    }

    #[test]
    fn test_shape_mismatch() {
        let t = small_transitions();
        let e = Emissions::zeros(2, 5);
        assert!(log_partition(&e, &t).is_err());
    }
}
