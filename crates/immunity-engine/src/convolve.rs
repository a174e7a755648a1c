//! Forward convolution of a dose stream with an efficacy curve.

use crate::curve::EfficacyCurve;
use immunity_core::{validate_doses, Regimen, SimError};

/// Causal convolution: every value at day `i` contributes
/// `stream[i] * kernel(d - i)` to each day `d >= i`. Quadratic in the
/// series length.
pub fn convolve<F>(stream: &[f64], kernel: F) -> Vec<f64>
where
    F: Fn(usize) -> f64,
{
    let n = stream.len();
    let mut out = vec![0.0; n];
    for (i, &x) in stream.iter().enumerate() {
        if x == 0.0 {
            continue;
        }
        for (offset, slot) in out[i..].iter_mut().enumerate() {
            *slot += x * kernel(offset);
        }
    }
    out
}

/// Immunity series for `stream` under `regimen`, divided by `normalization`.
///
/// For per-million dose inputs and `normalization = 1e6` the result is the
/// expected immune fraction of the population.
pub fn simulate(
    stream: &[f64],
    curve: &EfficacyCurve,
    regimen: Regimen,
    normalization: f64,
) -> Result<Vec<f64>, SimError> {
    validate_doses("dose stream", stream)?;
    if !normalization.is_finite() || normalization <= 0.0 {
        return Err(SimError::InvalidConfig(format!(
            "normalization must be > 0, got {normalization}"
        )));
    }
    let mut out = convolve(stream, |offset| curve.at_day(regimen, offset));
    for v in &mut out {
        *v /= normalization;
    }
    Ok(out)
}
