//! Recovery of the global time quantum from noisy MINFLUX timestamps.
//!
//! Three stages, each in its own module:
//! 1. within-track lag collection (here), rescaled by the smallest lag
//! 2. rough step by bounded minimization of the rounding residual ([`minimize`])
//! 3. harmonic binning plus a weighted fit through the origin ([`harmonics`])
//!
//! Frame indices are then assigned per track from the fitted `dt` ([`frames`]).

pub mod frames;
pub mod harmonics;
pub mod minimize;

use std::collections::BTreeMap;
use thiserror::Error;

/// Malformed or degenerate raw track data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("No detections in input")]
    Empty,
    #[error("Column length mismatch: {times} timestamps, {ids} track ids")]
    LengthMismatch { times: usize, ids: usize },
    #[error("Column length mismatch: {rows} timestamps, {positions} positions")]
    PositionMismatch { rows: usize, positions: usize },
    #[error("Found zero time lag in track {track_id} at t = {time}")]
    ZeroTimeLag { track_id: i64, time: f64 },
    #[error("No track has more than one detection, cannot infer a timestep")]
    Degenerate,
    #[error("Non-finite timestamp at row {row}")]
    NonFiniteTime { row: usize },
}

/// The timestep optimization could not produce a trustworthy `dt`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("Step minimization did not converge after {iterations} iterations")]
    NotConverged { iterations: usize },
    #[error("Residual objective is not finite")]
    NonFinite,
    #[error("No populated harmonic bins to fit")]
    NoHarmonics,
    #[error("Fitted timestep {0} is not a positive finite number")]
    InvalidSlope(f64),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimestepError {
    #[error("Invalid input: {0}")]
    Input(#[from] InputError),
    #[error("Inference failed: {0}")]
    Inference(#[from] InferenceError),
}

pub type Result<T> = std::result::Result<T, TimestepError>;

/// Row indices of one track, ordered by time.
#[derive(Debug, Clone)]
pub struct TrackGroup {
    pub track_id: i64,
    pub rows: Vec<usize>,
}

/// Inferred quantum plus the frame column, aligned with the input rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Timestep {
    pub dt: f64,
    pub frames: Vec<i64>,
}

/// Infer `dt` and assign every detection a frame index relative to the
/// first detection of its track.
pub fn infer(time: &[f64], track_id: &[i64]) -> Result<Timestep> {
    let groups = group_by_track(time, track_id)?;
    let dt = find_timestep(time, &groups)?;
    let frames = frames::assign_frames(time, &groups, dt);
    Ok(Timestep { dt, frames })
}

/// Group rows by track id. Rows inside a group are sorted by time; ties keep
/// input order.
pub fn group_by_track(time: &[f64], track_id: &[i64]) -> std::result::Result<Vec<TrackGroup>, InputError> {
    if time.len() != track_id.len() {
        return Err(InputError::LengthMismatch {
            times: time.len(),
            ids: track_id.len(),
        });
    }
    if time.is_empty() {
        return Err(InputError::Empty);
    }
    if let Some(row) = time.iter().position(|t| !t.is_finite()) {
        return Err(InputError::NonFiniteTime { row });
    }

    let mut by_id: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (row, &id) in track_id.iter().enumerate() {
        by_id.entry(id).or_default().push(row);
    }

    Ok(by_id
        .into_iter()
        .map(|(track_id, mut rows)| {
            rows.sort_by(|&a, &b| time[a].total_cmp(&time[b]));
            TrackGroup { track_id, rows }
        })
        .collect())
}

/// Consecutive time lags within each track. Lags spanning two tracks are
/// never formed.
pub fn within_track_lags(time: &[f64], groups: &[TrackGroup]) -> std::result::Result<Vec<f64>, InputError> {
    let mut lags = Vec::with_capacity(time.len());
    for group in groups {
        for pair in group.rows.windows(2) {
            let lag = time[pair[1]] - time[pair[0]];
            if lag == 0.0 {
                return Err(InputError::ZeroTimeLag {
                    track_id: group.track_id,
                    time: time[pair[1]],
                });
            }
            lags.push(lag);
        }
    }
    if lags.is_empty() {
        return Err(InputError::Degenerate);
    }
    Ok(lags)
}

/// Estimate the shared time quantum from grouped detections.
pub fn find_timestep(time: &[f64], groups: &[TrackGroup]) -> Result<f64> {
    let mut lags = within_track_lags(time, groups)?;

    // Work in units of the smallest lag so the search is O(1)-conditioned.
    let scale = lags.iter().copied().fold(f64::INFINITY, f64::min);
    for lag in lags.iter_mut() {
        *lag /= scale;
    }

    let step = minimize::rough_step(&lags)?;
    log::debug!("Rough step estimate: {:.6} (scaled units)", step);

    let bins = harmonics::bin_harmonics(&lags, step);
    let slope = harmonics::fit_slope(&bins)?;

    let dt = slope * scale;
    if !dt.is_finite() || dt <= 0.0 {
        return Err(InferenceError::InvalidSlope(dt).into());
    }

    log::info!(
        "Inferred timestep {:.6e} s from {} lags ({} harmonics)",
        dt,
        lags.len(),
        bins.iter().filter(|h| h.mean.is_some()).count()
    );
    Ok(dt)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Interleave `n_tracks` tracks sampled at integer multiples of `dt`,
    /// with uniform timestamp jitter of +/- `jitter`. Each track skips
    /// between 1 and `max_gap` frames per detection.
    pub(crate) fn synthetic_tracks(
        seed: u64,
        dt: f64,
        jitter: f64,
        n_tracks: usize,
        per_track: usize,
        max_gap: i64,
    ) -> (Vec<f64>, Vec<i64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut time = Vec::new();
        let mut tid = Vec::new();
        let mut k = vec![0i64; n_tracks];
        for _ in 0..per_track {
            for track in 0..n_tracks {
                let noise = rng.gen_range(-jitter..=jitter);
                time.push(dt * k[track] as f64 + noise);
                tid.push(track as i64 + 1);
                k[track] += rng.gen_range(1..=max_gap);
            }
        }
        (time, tid)
    }

    #[test]
    fn test_clean_grid() {
        let time: Vec<f64> = (0..100).map(|k| 0.5 * k as f64).collect();
        let tid = vec![7; 100];
        let result = infer(&time, &tid).unwrap();
        assert!((result.dt - 0.5).abs() < 1e-9);
        assert_eq!(result.frames, (0..100).collect::<Vec<i64>>());
    }

    #[test]
    fn test_interleaved_minflux_scenario() {
        let dt_true = 0.002;
        let (time, tid) = synthetic_tracks(42, dt_true, 0.00005, 2, 500, 1);
        let result = infer(&time, &tid).unwrap();

        assert!(((result.dt - dt_true) / dt_true).abs() < 0.01);

        // Frames count from each track's first detection.
        let groups = group_by_track(&time, &tid).unwrap();
        let mut worst: f64 = 0.0;
        for group in &groups {
            let t0 = time[group.rows[0]];
            for &row in &group.rows {
                let err = (time[row] - t0 - result.dt * result.frames[row] as f64).abs();
                worst = worst.max(err);
            }
        }
        assert!(worst < 0.0005, "worst reconstruction error {}", worst);
    }

    #[test]
    fn test_lags_never_span_tracks() {
        // Track 2 starts long after track 1 ends; a cross-track lag would be 1000.
        let time = vec![0.0, 1.0, 2.0, 1002.0, 1003.0];
        let tid = vec![1, 1, 1, 2, 2];
        let groups = group_by_track(&time, &tid).unwrap();
        let lags = within_track_lags(&time, &groups).unwrap();
        assert_eq!(lags, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_unsorted_rows_are_time_ordered() {
        let time = vec![3.0, 1.0, 2.0, 0.0];
        let tid = vec![1, 1, 1, 1];
        let groups = group_by_track(&time, &tid).unwrap();
        assert_eq!(groups[0].rows, vec![3, 1, 2, 0]);

        let result = infer(&time, &tid).unwrap();
        assert_eq!(result.frames, vec![3, 1, 2, 0]);
    }

    #[test]
    fn test_zero_lag_is_input_error() {
        let time = vec![0.0, 0.1, 0.1, 0.2];
        let tid = vec![1, 1, 1, 1];
        let err = infer(&time, &tid).unwrap_err();
        assert!(matches!(
            err,
            TimestepError::Input(InputError::ZeroTimeLag { track_id: 1, .. })
        ));
    }

    #[test]
    fn test_equal_times_across_tracks_are_fine() {
        let time = vec![0.0, 0.1, 0.0, 0.1];
        let tid = vec![1, 1, 2, 2];
        let result = infer(&time, &tid).unwrap();
        assert!((result.dt - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_and_empty_input() {
        assert_eq!(
            infer(&[], &[]).unwrap_err(),
            TimestepError::Input(InputError::Empty)
        );
        assert_eq!(
            infer(&[0.0, 5.0], &[1, 2]).unwrap_err(),
            TimestepError::Input(InputError::Degenerate)
        );
        assert_eq!(
            infer(&[0.0, 1.0], &[1]).unwrap_err(),
            TimestepError::Input(InputError::LengthMismatch { times: 2, ids: 1 })
        );
        assert_eq!(
            infer(&[0.0, f64::NAN], &[1, 1]).unwrap_err(),
            TimestepError::Input(InputError::NonFiniteTime { row: 1 })
        );
    }

    #[test]
    fn test_rerun_is_identical() {
        let (time, tid) = synthetic_tracks(7, 0.013, 0.0003, 4, 200, 3);
        let first = infer(&time, &tid).unwrap();
        let second = infer(&time, &tid).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_gaps_without_unit_lag_neighbors() {
        // Large gaps (missing detections) must not drag the estimate.
        let mut time = Vec::new();
        let mut k = 0i64;
        let mut last_k = 0i64;
        for i in 0..300 {
            time.push(0.01 * k as f64);
            last_k = k;
            k += if i % 10 == 9 { 17 } else { 1 };
        }
        let tid = vec![3; time.len()];
        let result = infer(&time, &tid).unwrap();
        assert!((result.dt - 0.01).abs() < 1e-6);
        assert_eq!(*result.frames.last().unwrap(), last_k);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        /// The estimate is within 1% of the true quantum at any absolute scale.
        #[test]
        fn inferred_dt_is_scale_invariant(
            exponent in -6.0f64..3.0,
            mantissa in 1.0f64..9.9,
            seed in 0u64..1000,
        ) {
            let dt_true = mantissa * 10f64.powf(exponent);
            let (time, tid) = synthetic_tracks(seed, dt_true, 0.02 * dt_true, 3, 150, 3);
            let result = infer(&time, &tid).unwrap();
            prop_assert!(((result.dt - dt_true) / dt_true).abs() < 0.01);
        }
    }
}
