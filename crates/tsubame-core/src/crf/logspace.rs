//! Numerically stable log-space arithmetic.

/// `ln(Σ exp(x))` computed by factoring out the maximum.
///
/// Returns `-inf` for an empty slice or when every term is `-inf`, `+inf`
/// when any term is `+inf`, and NaN when any term is NaN.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let mut max = f64::NEG_INFINITY;
    for &v in values {
        if v.is_nan() {
            return f64::NAN;
        }
        if v > max {
            max = v;
        }
    }
    if max.is_infinite() {
        return max;
    }
    let sum: f64 = values.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Softmax-style normalisation: `exp(x - log_norm)`.
#[inline]
pub fn normalized_exp(value: f64, log_norm: f64) -> f64 {
    if value == f64::NEG_INFINITY {
        0.0
    } else {
        (value - log_norm).exp()
    }
}
