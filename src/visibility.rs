//! Per-track visibility and frame-range restriction.

use crate::tracks::{TrackStore, ValidationError};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Inclusive frame window `[start, end]`. `start <= end` always holds for
/// windows owned by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameRange {
    pub start: i64,
    pub end: i64,
}

impl FrameRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, frame: i64) -> bool {
        self.start <= frame && frame <= self.end
    }

    /// Number of frames spanned, `end - start`.
    pub fn span(&self) -> i64 {
        self.end - self.start
    }
}

#[derive(Debug, Clone)]
struct TrackState {
    visible: bool,
    range: FrameRange,
    max_frame: i64,
}

/// Mutable display state, keyed by track id. Holds no records; those stay in
/// the [`TrackStore`].
#[derive(Debug, Clone)]
pub struct VisibilityController {
    tracks: BTreeMap<i64, TrackState>,
    dirty: BTreeSet<i64>,
}

impl VisibilityController {
    /// Every track starts visible with its full `[0, max_frame]` range.
    pub fn new(store: &TrackStore) -> Self {
        let tracks = store
            .all_stats()
            .map(|s| {
                (
                    s.track_id,
                    TrackState {
                        visible: true,
                        range: FrameRange::new(0, s.max_frame),
                        max_frame: s.max_frame,
                    },
                )
            })
            .collect();
        Self {
            tracks,
            dirty: BTreeSet::new(),
        }
    }

    fn state_mut(&mut self, track_id: i64) -> Result<&mut TrackState, ValidationError> {
        let state = self
            .tracks
            .get_mut(&track_id)
            .ok_or(ValidationError::UnknownTrack(track_id))?;
        self.dirty.insert(track_id);
        Ok(state)
    }

    fn state(&self, track_id: i64) -> Result<&TrackState, ValidationError> {
        self.tracks
            .get(&track_id)
            .ok_or(ValidationError::UnknownTrack(track_id))
    }

    pub fn set_visible(&mut self, track_id: i64, visible: bool) -> Result<(), ValidationError> {
        self.state_mut(track_id)?.visible = visible;
        log::debug!("Track {} visible = {}", track_id, visible);
        Ok(())
    }

    pub fn is_visible(&self, track_id: i64) -> Result<bool, ValidationError> {
        Ok(self.state(track_id)?.visible)
    }

    pub fn show_all(&mut self) {
        for (id, state) in self.tracks.iter_mut() {
            state.visible = true;
            self.dirty.insert(*id);
        }
    }

    pub fn hide_all(&mut self) {
        for (id, state) in self.tracks.iter_mut() {
            state.visible = false;
            self.dirty.insert(*id);
        }
    }

    /// Visible track ids in ascending order.
    pub fn visible_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.tracks
            .iter()
            .filter(|(_, s)| s.visible)
            .map(|(id, _)| *id)
    }

    pub fn frame_range(&self, track_id: i64) -> Result<FrameRange, ValidationError> {
        Ok(self.state(track_id)?.range)
    }

    /// Move the lower bound, clamped to `[0, max_frame]`. A start past the
    /// current end drags the end along with it.
    pub fn set_range_start(&mut self, track_id: i64, value: i64) -> Result<FrameRange, ValidationError> {
        let state = self.state_mut(track_id)?;
        let value = value.clamp(0, state.max_frame);
        state.range.start = value;
        if state.range.end < value {
            state.range.end = value;
        }
        Ok(state.range)
    }

    /// Move the upper bound, clamped to `[0, max_frame]`. An end before the
    /// current start drags the start along with it.
    pub fn set_range_end(&mut self, track_id: i64, value: i64) -> Result<FrameRange, ValidationError> {
        let state = self.state_mut(track_id)?;
        let value = value.clamp(0, state.max_frame);
        state.range.end = value;
        if state.range.start > value {
            state.range.start = value;
        }
        Ok(state.range)
    }

    /// Restore every range to `[0, max_frame]`.
    pub fn reset_ranges(&mut self) {
        for (id, state) in self.tracks.iter_mut() {
            state.range = FrameRange::new(0, state.max_frame);
            self.dirty.insert(*id);
        }
    }

    /// Drain the ids edited since the last call.
    pub fn take_dirty(&mut self) -> BTreeSet<i64> {
        std::mem::take(&mut self.dirty)
    }
}
