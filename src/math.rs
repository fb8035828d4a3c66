//! Log-domain arithmetic.

/// Computes `log(exp(a) + exp(b))` without overflow.
#[inline(always)]
pub fn logsumexp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY && b == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if a > b {
        a + (b - a).exp().ln_1p()
    } else {
        b + (a - b).exp().ln_1p()
    }
}

/// Computes `log(sum(exp(x)))` over a slice. An empty slice yields negative infinity.
pub fn log_sum(xs: &[f64]) -> f64 {
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY || max.is_nan() {
        return max;
    }
    if max == f64::INFINITY {
        return f64::INFINITY;
    }
    let mut total = 0.0;
    for &x in xs {
        total += (x - max).exp();
    }
    max + total.ln()
}

/// Exponentiates log-scores in place and normalizes them to sum to 1.
///
/// Returns `false` if every score is negative infinity (or not a number), leaving
/// the slice unnormalized.
pub fn exp_normalize(scores: &mut [f64]) -> bool {
    let z = log_sum(scores);
    if !z.is_finite() {
        return false;
    }
    for s in scores.iter_mut() {
        *s = (*s - z).exp();
    }
    true
}

/// Draws an index from a normalized distribution by inverse-CDF sampling.
///
/// `u` must be drawn uniformly from `[0, 1)`.
pub fn sample_from_distribution(dist: &[f64], u: f64) -> usize {
    let mut cumulative = 0.0;
    for (i, &p) in dist.iter().enumerate() {
        cumulative += p;
        if u < cumulative {
            return i;
        }
    }
    // Rounding may leave the cumulative sum slightly below 1.
    dist.iter().rposition(|&p| p > 0.0).unwrap_or(0)
}
