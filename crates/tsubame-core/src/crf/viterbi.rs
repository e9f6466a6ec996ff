//! # Viterbi Decoding for CRF
//!
//! Finds the highest-scoring label sequence given emission scores and the
//! transition matrix. Same lattice as the forward algorithm, with `max`
//! in place of `logsumexp` and a backpointer per cell.

use super::check_shapes;
use super::emission::Emissions;
use super::transitions::TransitionMatrix;
use crate::error::{Result, TsubameError};

/// Best path found by the decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// Total path score, including the BOS and EOS transitions.
    pub score: f64,
    /// One real label per token.
    pub labels: Vec<usize>,
}

/// Viterbi decoder for CRF tag sequences.
#[derive(Debug, Clone)]
pub struct ViterbiDecoder {
    num_tags: usize,
}

impl ViterbiDecoder {
    /// Create a new Viterbi decoder.
    ///
    /// # Arguments
    /// * `num_tags` - Size of the extended alphabet (real labels + BOS + EOS)
    pub fn new(num_tags: usize) -> Self {
        Self { num_tags }
    }

    /// Decode the optimal tag sequence.
    ///
    /// # Arguments
    /// * `emissions` - Tensor of shape [seq_len, num_tags]
    /// * `transitions` - Matrix of shape [num_tags, num_tags]
    ///
    /// Ties are broken towards the lowest label index, so repeated calls
    /// are bit-identical.
    pub fn decode(&self, emissions: &Emissions, transitions: &TransitionMatrix) -> Result<Decoded> {
        if emissions.num_tags() != self.num_tags {
            return Err(TsubameError::ShapeMismatch {
                context: "emission tag dimension",
                expected: self.num_tags,
                actual: emissions.num_tags(),
            });
        }
        let num_labels = check_shapes(emissions, transitions)?;
        let seq_len = emissions.len();
        if seq_len == 0 {
            return Ok(Decoded {
                score: 0.0,
                labels: Vec::new(),
            });
        }
        let (bos, eos) = (num_labels, num_labels + 1);

        // DP table and backpointers: [seq_len][num_labels], scoped to this call.
        let mut dp = vec![f64::NEG_INFINITY; seq_len * num_labels];
        let mut backptr = vec![bos; seq_len * num_labels];

        for tag in 0..num_labels {
            dp[tag] = transitions.get(bos, tag) + emissions.get(0, tag);
        }

        for pos in 1..seq_len {
            for curr in 0..num_labels {
                let (best_prev, best_score) = best_predecessor(
                    &dp[(pos - 1) * num_labels..pos * num_labels],
                    |prev| transitions.get(prev, curr),
                );
                dp[pos * num_labels + curr] = best_score + emissions.get(pos, curr);
                backptr[pos * num_labels + curr] = best_prev;
            }
        }

        let (best_final, best_score) = best_predecessor(
            &dp[(seq_len - 1) * num_labels..],
            |last| transitions.get(last, eos),
        );

        // Backtrack
        let mut path = vec![0; seq_len];
        path[seq_len - 1] = best_final;
        for pos in (1..seq_len).rev() {
            path[pos - 1] = backptr[pos * num_labels + path[pos]];
        }

        Ok(Decoded {
            score: best_score,
            labels: path,
        })
    }

    /// Decode every sequence of a batch.
    pub fn decode_batch(
        &self,
        batch: &[Emissions],
        transitions: &TransitionMatrix,
    ) -> Result<Vec<Decoded>> {
        batch
            .iter()
            .map(|emissions| self.decode(emissions, transitions))
            .collect()
    }
}

/// Argmax over `scores[p] + edge(p)`; first index wins ties.
fn best_predecessor(scores: &[f64], edge: impl Fn(usize) -> f64) -> (usize, f64) {
    let mut best = (0, f64::NEG_INFINITY);
    for (p, &s) in scores.iter().enumerate() {
        let candidate = s + edge(p);
        if candidate > best.1 {
            best = (p, candidate);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crf::path::path_score;
    use crate::crf::transitions::TransitionConfig;
    use crate::tags::TagSet;

    fn neutral_transitions(num_labels: usize) -> TransitionMatrix {
        let size = num_labels + 2;
        let mut t = TransitionMatrix::from_scores(size, vec![0.0; size * size]).unwrap();
        for a in 0..size {
            t.set(a, num_labels, -10_000.0);
            t.set(num_labels + 1, a, -10_000.0);
        }
        t
    }

    fn brute_force(e: &Emissions, t: &TransitionMatrix, num_labels: usize) -> (f64, Vec<usize>) {
        let n = e.len();
        let mut best = (f64::NEG_INFINITY, Vec::new());
        for code in 0..num_labels.pow(n as u32) {
            let mut path = Vec::with_capacity(n);
            let mut c = code;
            for _ in 0..n {
                path.push(c % num_labels);
                c /= num_labels;
            }
            path.reverse();
            let s = path_score(e, t, &path).unwrap();
            if s > best.0 {
                best = (s, path);
            }
        }
        best
    }

    #[test]
    fn test_end_to_end_per_per_o() {
        // Labels {O = 0, PER = 1}; PER, PER, O wins on emissions alone.
        let e = Emissions::from_rows(
            &[
                vec![0.1, 2.0, 0.0, 0.0],
                vec![0.2, 1.5, 0.0, 0.0],
                vec![1.8, 0.3, 0.0, 0.0],
            ],
            4,
        )
        .unwrap();
        let t = neutral_transitions(2);
        let decoded = ViterbiDecoder::new(4).decode(&e, &t).unwrap();
        assert_eq!(decoded.labels, vec![1, 1, 0]);
        assert!((decoded.score - 5.3).abs() < 1e-12);
    }

    #[test]
    fn test_matches_brute_force() {
        let t = TransitionMatrix::from_scores(
            4,
            vec![
                0.5, -1.0, -10_000.0, 0.2, //
                1.5, -0.3, -10_000.0, -0.7, //
                -0.2, 0.4, -10_000.0, 0.0, //
                -10_000.0, -10_000.0, -10_000.0, -10_000.0,
            ],
        )
        .unwrap();
        let cases = [
            vec![vec![0.3, 0.1], vec![-0.5, 0.9], vec![0.0, 0.2]],
            vec![vec![2.0, -2.0], vec![-1.0, 1.0], vec![0.4, 0.5]],
            vec![vec![-0.1, 0.1], vec![0.1, -0.1], vec![-0.3, 0.3]],
        ];
        for case in cases {
            let rows: Vec<Vec<f64>> = case
                .into_iter()
                .map(|mut r| {
                    r.extend([0.0, 0.0]);
                    r
                })
                .collect();
            let e = Emissions::from_rows(&rows, 4).unwrap();
            let decoded = ViterbiDecoder::new(4).decode(&e, &t).unwrap();
            let (score, path) = brute_force(&e, &t, 2);
            assert_eq!(decoded.labels, path);
            assert!((decoded.score - score).abs() < 1e-12);
        }
    }

    #[test]
    fn test_forced_transitions_respected() {
        let tags = TagSet::conll();
        let t = TransitionMatrix::build(&tags, &TransitionConfig::default());
        let i_per = tags.index_of("I-PER").unwrap();
        let b_per = tags.index_of("B-PER").unwrap();
        let o = tags.index_of("O").unwrap();

        // I-PER has the best emission everywhere, O is second best.
        let mut rows = Vec::new();
        for _ in 0..4 {
            let mut row = vec![0.0; tags.size()];
            row[i_per] = 5.0;
            row[o] = 4.0;
            rows.push(row);
        }
        let e = Emissions::from_rows(&rows, tags.size()).unwrap();
        let decoded = ViterbiDecoder::new(tags.size()).decode(&e, &t).unwrap();

        assert_ne!(decoded.labels[0], i_per);
        for pair in decoded.labels.windows(2) {
            if pair[1] == i_per {
                assert!(pair[0] == b_per || pair[0] == i_per);
            }
        }
        assert!(decoded.labels.iter().all(|&y| tags.is_real(y)));
    }

    #[test]
    fn test_ties_pick_lowest_index_and_are_deterministic() {
        let e = Emissions::zeros(3, 5);
        let t = neutral_transitions(3);
        let decoder = ViterbiDecoder::new(5);
        let first = decoder.decode(&e, &t).unwrap();
        assert_eq!(first.labels, vec![0, 0, 0]);
        for _ in 0..10 {
            let again = decoder.decode(&e, &t).unwrap();
            assert_eq!(again.labels, first.labels);
            assert_eq!(again.score.to_bits(), first.score.to_bits());
        }
    }

    #[test]
    fn test_single_token_uses_boundaries() {
        let mut t = neutral_transitions(2);
        t.set(1, 3, -5.0); // label 1 -> EOS is expensive
        let e = Emissions::from_rows(&[vec![0.0, 1.0, 0.0, 0.0]], 4).unwrap();
        let decoded = ViterbiDecoder::new(4).decode(&e, &t).unwrap();
        assert_eq!(decoded.labels, vec![0]);
    }

    #[test]
    fn test_viterbi_empty() {
        let decoder = ViterbiDecoder::new(4);
        let decoded = decoder
            .decode(&Emissions::zeros(0, 4), &neutral_transitions(2))
            .unwrap();
        assert!(decoded.labels.is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let decoder = ViterbiDecoder::new(4);
        let err = decoder
            .decode(&Emissions::zeros(2, 5), &neutral_transitions(2))
            .unwrap_err();
        assert!(matches!(err, TsubameError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_decode_batch() {
        let decoder = ViterbiDecoder::new(4);
        let t = neutral_transitions(2);
        let batch = vec![Emissions::zeros(2, 4), Emissions::zeros(1, 4)];
        let out = decoder.decode_batch(&batch, &t).unwrap();
        assert_eq!(out[0].labels.len(), 2);
        assert_eq!(out[1].labels.len(), 1);
    }
}
