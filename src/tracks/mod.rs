pub mod models;

use crate::timestep::{self, InputError, TimestepError};
use models::{Localization, RawDetections, TrackStats};
use std::collections::BTreeMap;
use std::ops::Range;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Unknown track id {0}")]
    UnknownTrack(i64),
    #[error("Invalid {field}: {value} (must be > 0)")]
    InvalidConfig { field: &'static str, value: i64 },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error(transparent)]
    Timestep(#[from] TimestepError),
}

impl From<InputError> for StoreError {
    fn from(e: InputError) -> Self {
        StoreError::Timestep(e.into())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Canonical table of all localizations of one loaded file.
///
/// Records are stored grouped by track and time-ordered within a track, so a
/// track is a contiguous slice and a frame window is a binary search away.
#[derive(Debug, Clone)]
pub struct TrackStore {
    dt: f64,
    records: Vec<Localization>,
    spans: BTreeMap<i64, Range<usize>>,
    stats: BTreeMap<i64, TrackStats>,
    max_frame: i64,
}

impl TrackStore {
    /// Infer the timestep, assign frames and derive per-track statistics.
    /// Either the whole file loads or nothing does.
    pub fn build(raw: RawDetections) -> Result<Self> {
        if raw.position.len() != raw.time.len() {
            return Err(InputError::PositionMismatch {
                rows: raw.time.len(),
                positions: raw.position.len(),
            }
            .into());
        }

        let groups = timestep::group_by_track(&raw.time, &raw.track_id)?;
        let dt = timestep::find_timestep(&raw.time, &groups)?;
        let frames = timestep::frames::assign_frames(&raw.time, &groups, dt);

        let mut records = Vec::with_capacity(raw.len());
        let mut spans = BTreeMap::new();
        let mut stats = BTreeMap::new();

        for group in &groups {
            let start = records.len();
            records.extend(group.rows.iter().map(|&row| Localization {
                frame: frames[row],
                time: dt * frames[row] as f64,
                original_time: raw.time[row],
                position: raw.position[row],
                track_id: group.track_id,
            }));
            let span = start..records.len();
            stats.insert(
                group.track_id,
                TrackStats::from_records(group.track_id, &records[span.clone()]),
            );
            spans.insert(group.track_id, span);
        }

        let max_frame = stats.values().map(|s| s.max_frame).max().unwrap_or(0);

        log::info!(
            "Loaded {} localizations in {} tracks (dt = {:.6e} s, max frame {})",
            records.len(),
            spans.len(),
            dt,
            max_frame
        );

        Ok(Self {
            dt,
            records,
            spans,
            stats,
            max_frame,
        })
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Largest frame index over all tracks.
    pub fn max_frame(&self) -> i64 {
        self.max_frame
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn n_tracks(&self) -> usize {
        self.spans.len()
    }

    /// Track ids in ascending order.
    pub fn track_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.spans.keys().copied()
    }

    pub fn contains(&self, track_id: i64) -> bool {
        self.spans.contains_key(&track_id)
    }

    /// All records of one track, in time order.
    pub fn records(&self, track_id: i64) -> std::result::Result<&[Localization], ValidationError> {
        self.spans
            .get(&track_id)
            .map(|span| &self.records[span.clone()])
            .ok_or(ValidationError::UnknownTrack(track_id))
    }

    /// Records of one track with `lo <= frame <= hi`. Empty when `hi < lo`.
    pub fn records_in(
        &self,
        track_id: i64,
        lo: i64,
        hi: i64,
    ) -> std::result::Result<&[Localization], ValidationError> {
        let records = self.records(track_id)?;
        if hi < lo {
            return Ok(&records[..0]);
        }
        let start = records.partition_point(|r| r.frame < lo);
        let end = records.partition_point(|r| r.frame <= hi);
        Ok(&records[start..end.max(start)])
    }

    pub fn stats(&self, track_id: i64) -> std::result::Result<&TrackStats, ValidationError> {
        self.stats
            .get(&track_id)
            .ok_or(ValidationError::UnknownTrack(track_id))
    }

    pub fn all_stats(&self) -> impl Iterator<Item = &TrackStats> {
        self.stats.values()
    }
}
