use super::InferenceError;
use rayon::prelude::*;

/// Grid resolution for the coarse scan over `[min, 2 * min]`.
const GRID_POINTS: usize = 512;

/// Iteration cap for the golden-section refinement.
const MAX_ITERATIONS: usize = 200;

/// Relative bracket width at which refinement stops.
const TOLERANCE: f64 = 1e-10;

/// Sum of squared distances between each lag and its nearest integer
/// multiple of `step`.
pub fn squared_residual(lags: &[f64], step: f64) -> f64 {
    lags.iter()
        .map(|&lag| {
            let r = lag - step * (lag / step).round();
            r * r
        })
        .sum()
}

/// First approximation of the quantum: minimize [`squared_residual`] over
/// `step >= min(lags)`.
///
/// The objective is a sawtooth in `step`, so a gradient method only finds the
/// nearest local minimum. A parallel coarse scan picks the basin, then a
/// golden-section search narrows it down. Above `2 * min` the unit lags stop
/// rounding to one step, so the scan ends there.
pub fn rough_step(lags: &[f64]) -> Result<f64, InferenceError> {
    let lower = lags.iter().copied().fold(f64::INFINITY, f64::min);
    if !lower.is_finite() || lower <= 0.0 {
        return Err(InferenceError::NonFinite);
    }
    let upper = 2.0 * lower;
    let cell = (upper - lower) / (GRID_POINTS - 1) as f64;

    let scan: Vec<f64> = (0..GRID_POINTS)
        .into_par_iter()
        .map(|i| squared_residual(lags, lower + i as f64 * cell))
        .collect();

    let (best_idx, best_value) = scan
        .iter()
        .copied()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .ok_or(InferenceError::NonFinite)?;
    if !best_value.is_finite() {
        return Err(InferenceError::NonFinite);
    }
    let best_step = lower + best_idx as f64 * cell;

    let refined = golden_section(
        |step| squared_residual(lags, step),
        (best_step - cell).max(lower),
        (best_step + cell).min(upper),
    )?;

    // Refinement may settle on a shallower neighbouring tooth; never do worse
    // than the scan.
    if squared_residual(lags, refined) <= best_value {
        Ok(refined)
    } else {
        Ok(best_step)
    }
}

/// Golden-section search for a minimum of `f` on `[a, b]`.
pub fn golden_section<F>(f: F, mut a: f64, mut b: f64) -> Result<f64, InferenceError>
where
    F: Fn(f64) -> f64,
{
    let inv_phi = (5f64.sqrt() - 1.0) / 2.0;
    let mut c = b - inv_phi * (b - a);
    let mut d = a + inv_phi * (b - a);
    let mut fc = f(c);
    let mut fd = f(d);

    for _ in 0..MAX_ITERATIONS {
        if (b - a).abs() <= TOLERANCE * (a.abs() + b.abs()).max(1.0) {
            return Ok(0.5 * (a + b));
        }
        if !fc.is_finite() || !fd.is_finite() {
            return Err(InferenceError::NonFinite);
        }
        if fc <= fd {
            b = d;
            d = c;
            fd = fc;
            c = b - inv_phi * (b - a);
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + inv_phi * (b - a);
            fd = f(d);
        }
    }

    Err(InferenceError::NotConverged {
        iterations: MAX_ITERATIONS,
    })
}
