use super::TrackGroup;

/// Assign each row an integer frame counted from its track's first detection.
///
/// Per track, in time order, every lag is divided by `dt` and rounded; the
/// frame index is the running sum of those integer steps, starting at 0.
/// The returned column is aligned with the input rows.
pub fn assign_frames(time: &[f64], groups: &[TrackGroup], dt: f64) -> Vec<i64> {
    let mut frames = vec![0i64; time.len()];
    for group in groups {
        let mut frame = 0i64;
        for pair in group.rows.windows(2) {
            let lag = time[pair[1]] - time[pair[0]];
            frame += (lag / dt).round() as i64;
            frames[pair[1]] = frame;
        }
    }
    frames
}
