//! Token-level evaluation of a trained model.

use std::fmt;

use serde::Serialize;
use tsubame_core::{CrfModel, LabeledSequence, Result, TsubameError};

/// Token-level counts. A token is "positive" when its label is anything
/// other than the tag set's `O` label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub correct: usize,
    pub total: usize,
    pub true_positive: usize,
    pub predicted_positive: usize,
    pub gold_positive: usize,
}

impl Evaluation {
    /// Fold one (gold, predicted) token pair in.
    pub fn record(&mut self, gold: usize, predicted: usize, outside: Option<usize>) {
        let is_positive = |y: usize| Some(y) != outside;
        self.total += 1;
        if gold == predicted {
            self.correct += 1;
        }
        if is_positive(predicted) {
            self.predicted_positive += 1;
        }
        if is_positive(gold) {
            self.gold_positive += 1;
            if gold == predicted {
                self.true_positive += 1;
            }
        }
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct, self.total)
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positive, self.predicted_positive)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positive, self.gold_positive)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p > 0.0 && r > 0.0 {
            2.0 * p * r / (p + r)
        } else {
            0.0
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accuracy {}/{} = {:.4}, precision {}/{} = {:.4}, recall {}/{} = {:.4}, F1 {:.4}",
            self.correct,
            self.total,
            self.accuracy(),
            self.true_positive,
            self.predicted_positive,
            self.precision(),
            self.true_positive,
            self.gold_positive,
            self.recall(),
            self.f1()
        )
    }
}

/// Decode every example and compare with its gold labels.
pub fn evaluate(model: &CrfModel, examples: &[LabeledSequence]) -> Result<Evaluation> {
    let outside = model.tags().outside();
    let mut eval = Evaluation::default();
    for example in examples {
        let decoded = model.decode(&example.input)?;
        if decoded.labels.len() != example.labels.len() {
            return Err(TsubameError::LengthMismatch {
                tokens: decoded.labels.len(),
                labels: example.labels.len(),
            });
        }
        for (&gold, &predicted) in example.labels.iter().zip(&decoded.labels) {
            eval.record(gold, predicted, outside);
        }
    }
    Ok(eval)
}
