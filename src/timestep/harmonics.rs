use super::InferenceError;

/// One bin of the harmonic sweep. `order` is the integer multiple of the
/// quantum the bin stands for (1-based); `mean` is `None` for an empty bin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Harmonic {
    pub order: usize,
    pub mean: Option<f64>,
    pub count: usize,
}

/// Sweep a bin of width `step` along the lag axis, starting at `step / 2`.
///
/// A populated bin records its mean and re-centres the cursor on it, so the
/// sweep follows the actual lag density instead of a rigid grid. An empty
/// bin just moves the cursor one step. Bins are open intervals
/// `(cursor, cursor + step)`.
pub fn bin_harmonics(lags: &[f64], step: f64) -> Vec<Harmonic> {
    let mut sorted = lags.to_vec();
    sorted.sort_by(f64::total_cmp);
    let Some(&max_lag) = sorted.last() else {
        return Vec::new();
    };
    if !step.is_finite() || step <= 0.0 {
        return Vec::new();
    }

    let mut harmonics = Vec::new();
    let mut cursor = 0.5 * step;
    while cursor < max_lag {
        let start = sorted.partition_point(|&lag| lag <= cursor);
        let end = sorted.partition_point(|&lag| lag < cursor + step);
        let order = harmonics.len() + 1;

        if end > start {
            let bin = &sorted[start..end];
            let mean = bin.iter().sum::<f64>() / bin.len() as f64;
            harmonics.push(Harmonic {
                order,
                mean: Some(mean),
                count: bin.len(),
            });
            cursor = mean + 0.5 * step;
        } else {
            harmonics.push(Harmonic {
                order,
                mean: None,
                count: 0,
            });
            cursor += step;
        }
    }

    harmonics
}

/// Weighted least-squares slope of `mean = a * order` through the origin.
///
/// Each harmonic carries `sigma = 1 / sqrt(count - 1)`, i.e. weight
/// `count - 1`, so single-sample bins drop out. If every populated bin is a
/// single sample the fit falls back to uniform weights.
pub fn fit_slope(harmonics: &[Harmonic]) -> Result<f64, InferenceError> {
    let points: Vec<(f64, f64, f64)> = harmonics
        .iter()
        .filter_map(|h| {
            h.mean
                .map(|mean| (h.order as f64, mean, h.count.saturating_sub(1) as f64))
        })
        .collect();
    if points.is_empty() {
        return Err(InferenceError::NoHarmonics);
    }

    let weighted = |weight: &dyn Fn(f64) -> f64| {
        let mut sxy = 0.0;
        let mut sxx = 0.0;
        for &(x, y, w) in &points {
            sxy += weight(w) * x * y;
            sxx += weight(w) * x * x;
        }
        (sxy, sxx)
    };

    let (mut sxy, mut sxx) = weighted(&|w| w);
    if sxx == 0.0 {
        log::debug!("All harmonic bins hold a single lag, fitting unweighted");
        (sxy, sxx) = weighted(&|_| 1.0);
    }

    let slope = sxy / sxx;
    if !slope.is_finite() || slope <= 0.0 {
        return Err(InferenceError::InvalidSlope(slope));
    }
    Ok(slope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bins_lock_onto_density() {
        let lags = vec![1.0, 1.1, 0.9, 3.05, 2.95];
        let bins = bin_harmonics(&lags, 1.0);

        assert_eq!(bins.len(), 3);
        assert_relative_eq!(bins[0].mean.unwrap(), 1.0);
        assert_eq!(bins[0].count, 3);
        assert_eq!(bins[1].mean, None);
        assert_eq!(bins[1].count, 0);
        assert_eq!(bins[2].order, 3);
        assert_relative_eq!(bins[2].mean.unwrap(), 3.0);
        assert_eq!(bins[2].count, 2);
    }

    #[test]
    fn test_bin_edges_are_open() {
        // 0.5 sits exactly on the first cursor and is excluded.
        let bins = bin_harmonics(&[0.5, 1.0], 1.0);
        assert_eq!(bins[0].count, 1);
    }

    #[test]
    fn test_fit_weights_by_count() {
        let harmonics = vec![
            Harmonic { order: 1, mean: Some(1.0), count: 11 },
            Harmonic { order: 2, mean: None, count: 0 },
            Harmonic { order: 3, mean: Some(3.3), count: 2 },
        ];
        // sxy = 10 * 1 * 1 + 1 * 3 * 3.3 = 19.9, sxx = 10 + 9 = 19
        assert_relative_eq!(fit_slope(&harmonics).unwrap(), 19.9 / 19.0);
    }

    #[test]
    fn test_fit_single_sample_bins_fall_back_to_uniform() {
        let harmonics = vec![
            Harmonic { order: 1, mean: Some(1.0), count: 1 },
            Harmonic { order: 2, mean: Some(2.0), count: 1 },
        ];
        assert_relative_eq!(fit_slope(&harmonics).unwrap(), 1.0);
    }

    #[test]
    fn test_fit_without_harmonics() {
        let harmonics = vec![Harmonic { order: 1, mean: None, count: 0 }];
        assert_eq!(fit_slope(&harmonics).unwrap_err(), InferenceError::NoHarmonics);
    }
}
