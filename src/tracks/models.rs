use nalgebra::Vector3;
use serde::Serialize;

/// Label offset from the centroid, in units of the per-axis spread.
pub const LABEL_SPREAD_FACTOR: f64 = 1.25;

/// Raw detection columns as handed over by a file reader, before any frame
/// has been assigned.
#[derive(Debug, Clone, Default)]
pub struct RawDetections {
    pub time: Vec<f64>,
    pub track_id: Vec<i64>,
    pub position: Vec<Vector3<f64>>,
}

impl RawDetections {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn push(&mut self, time: f64, track_id: i64, position: Vector3<f64>) {
        self.time.push(time);
        self.track_id.push(track_id);
        self.position.push(position);
    }
}

/// One detection after ingestion. Immutable once the store is built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Localization {
    pub frame: i64,
    /// `dt * frame`, relative to the track's first detection.
    pub time: f64,
    /// Timestamp exactly as read from the file.
    pub original_time: f64,
    pub position: Vector3<f64>,
    pub track_id: i64,
}

/// Derived per-track statistics, computed once at load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackStats {
    pub track_id: i64,
    pub localizations: usize,
    pub centroid: Vector3<f64>,
    /// Population standard deviation per axis.
    pub spread: Vector3<f64>,
    pub max_frame: i64,
}

impl TrackStats {
    pub fn from_records(track_id: i64, records: &[Localization]) -> Self {
        let n = records.len().max(1) as f64;
        let centroid = records
            .iter()
            .fold(Vector3::zeros(), |acc, r| acc + r.position)
            / n;
        let variance = records.iter().fold(Vector3::zeros(), |acc, r| {
            let d = r.position - centroid;
            acc + d.component_mul(&d)
        }) / n;

        Self {
            track_id,
            localizations: records.len(),
            centroid,
            spread: variance.map(f64::sqrt),
            max_frame: records.iter().map(|r| r.frame).max().unwrap_or(0),
        }
    }

    /// Where a renderer should put the track's id label.
    pub fn label_anchor(&self) -> Vector3<f64> {
        self.centroid + LABEL_SPREAD_FACTOR * self.spread
    }
}
