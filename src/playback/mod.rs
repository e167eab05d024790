//! Chunked replay of tracks.
//!
//! The engine is a two-state machine (`Idle`, `Playing`) driven by an
//! external timer. Every [`ChunkEngine::query`] while playing is one tick and
//! advances the frame windows; while idle a query shows each visible track's
//! full frame range.

pub mod rate;

use crate::config::PlaybackConfig;
use crate::tracks::models::Localization;
use crate::tracks::{TrackStore, ValidationError};
use crate::visibility::{FrameRange, VisibilityController};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlayState {
    Idle,
    Playing,
}

/// Records of one track inside its current window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackChunk {
    pub track_id: i64,
    pub window: FrameRange,
    pub records: Vec<Localization>,
}

impl TrackChunk {
    /// x and y coordinates, ready for a line plot.
    pub fn xy(&self) -> (Vec<f64>, Vec<f64>) {
        self.records
            .iter()
            .map(|r| (r.position.x, r.position.y))
            .unzip()
    }
}

/// Everything the renderer needs for one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Chunk {
    /// Ticks since the last play or reset.
    pub tick: u64,
    /// Elapsed replay time in seconds, `tick * dt`.
    pub play_time: f64,
    pub tracks: BTreeMap<i64, TrackChunk>,
}

impl Chunk {
    pub fn track(&self, track_id: i64) -> Option<&TrackChunk> {
        self.tracks.get(&track_id)
    }

    pub fn n_localizations(&self) -> usize {
        self.tracks.values().map(|t| t.records.len()).sum()
    }
}

/// Playback state machine with per-track cursors.
#[derive(Debug, Clone)]
pub struct ChunkEngine {
    config: PlaybackConfig,
    state: PlayState,
    /// Frame offset already consumed per track (`current_chunk`).
    cursors: BTreeMap<i64, i64>,
    /// Window shared by all tracks in synchronized mode.
    shared_window: FrameRange,
    tick: u64,
    play_time: f64,
    snapshot: Chunk,
}

impl ChunkEngine {
    pub fn new(store: &TrackStore, config: PlaybackConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self {
            config,
            state: PlayState::Idle,
            cursors: store.track_ids().map(|id| (id, 0)).collect(),
            shared_window: FrameRange::new(0, 0),
            tick: 0,
            play_time: 0.0,
            snapshot: Chunk::default(),
        })
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayState::Playing
    }

    pub fn set_frames_per_update(&mut self, frames: i64) -> Result<(), ValidationError> {
        let config = PlaybackConfig {
            frames_per_update: frames,
            ..self.config
        };
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn set_max_localizations_per_track(&mut self, max: i64) -> Result<(), ValidationError> {
        let config = PlaybackConfig {
            max_localizations_per_track: max,
            ..self.config
        };
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Switching modes keeps cursors; the next tick simply uses the other
    /// windowing rule.
    pub fn set_synchronized(&mut self, synchronized: bool) {
        self.config.synchronized = synchronized;
    }

    /// Start playing from the beginning of every track.
    pub fn play(&mut self) {
        self.rewind();
        self.state = PlayState::Playing;
        log::debug!("Playback started");
    }

    /// Stop advancing. The last snapshot stays available.
    pub fn pause(&mut self) {
        self.state = PlayState::Idle;
        log::debug!("Playback paused at tick {}", self.tick);
    }

    /// Zero all cursors without touching the play state.
    pub fn reset(&mut self) {
        self.rewind();
    }

    fn rewind(&mut self) {
        for cursor in self.cursors.values_mut() {
            *cursor = 0;
        }
        self.shared_window = FrameRange::new(0, 0);
        self.tick = 0;
        self.play_time = 0.0;
    }

    pub fn cursor(&self, track_id: i64) -> Result<i64, ValidationError> {
        self.cursors
            .get(&track_id)
            .copied()
            .ok_or(ValidationError::UnknownTrack(track_id))
    }

    pub fn shared_window(&self) -> FrameRange {
        self.shared_window
    }

    /// Last computed chunk.
    pub fn snapshot(&self) -> &Chunk {
        &self.snapshot
    }

    /// Compute the chunk for the current tick.
    ///
    /// While playing, every call advances the windows by
    /// `frames_per_update`. While idle, only tracks edited since the previous
    /// query (or not present in the snapshot) are recomputed.
    pub fn query(
        &mut self,
        store: &TrackStore,
        controller: &mut VisibilityController,
    ) -> Result<&Chunk, ValidationError> {
        let dirty = controller.take_dirty();
        let visible: Vec<i64> = controller.visible_ids().collect();

        let tracks = match self.state {
            PlayState::Idle => {
                let mut previous = std::mem::take(&mut self.snapshot.tracks);
                let mut tracks = BTreeMap::new();
                for id in visible {
                    let range = controller.frame_range(id)?;
                    let reusable = previous
                        .remove(&id)
                        .filter(|c| !dirty.contains(&id) && c.window == range);
                    let chunk = match reusable {
                        Some(chunk) => chunk,
                        None => Self::window_chunk(store, id, range)?,
                    };
                    tracks.insert(id, chunk);
                }
                tracks
            }
            PlayState::Playing => {
                self.tick += 1;
                self.play_time += store.dt();
                if self.config.synchronized {
                    self.advance_synchronized(store, &visible)?
                } else {
                    self.advance_independent(store, controller, &visible)?
                }
            }
        };

        self.snapshot = Chunk {
            tick: self.tick,
            play_time: self.play_time,
            tracks,
        };
        Ok(&self.snapshot)
    }

    fn window_chunk(store: &TrackStore, track_id: i64, window: FrameRange) -> Result<TrackChunk, ValidationError> {
        Ok(TrackChunk {
            track_id,
            window,
            records: store.records_in(track_id, window.start, window.end)?.to_vec(),
        })
    }

    /// One window for every track. It grows by `frames_per_update` per tick,
    /// keeps at most `max_localizations_per_track` frames and loops back to
    /// the start once it has passed the last frame of the whole file.
    fn advance_synchronized(
        &mut self,
        store: &TrackStore,
        visible: &[i64],
    ) -> Result<BTreeMap<i64, TrackChunk>, ValidationError> {
        let f = self.config.frames_per_update;
        let m = self.config.max_localizations_per_track;

        if self.shared_window.end > store.max_frame() {
            self.shared_window = FrameRange::new(0, 0);
        }
        self.shared_window.end += f;
        self.shared_window.start = (self.shared_window.end - m).max(0);

        let mut tracks = BTreeMap::new();
        for &id in visible {
            tracks.insert(id, Self::window_chunk(store, id, self.shared_window)?);
        }
        Ok(tracks)
    }

    /// Per-track windows bounded by each track's own frame range. A cursor
    /// that reaches the end of its range loops back to 0 only if the range is
    /// wider than `max_localizations_per_track`; otherwise the track stays
    /// fully drawn.
    fn advance_independent(
        &mut self,
        store: &TrackStore,
        controller: &VisibilityController,
        visible: &[i64],
    ) -> Result<BTreeMap<i64, TrackChunk>, ValidationError> {
        let f = self.config.frames_per_update;
        let m = self.config.max_localizations_per_track;

        let mut tracks = BTreeMap::new();
        for &id in visible {
            let range = controller.frame_range(id)?;
            let cursor = self
                .cursors
                .get_mut(&id)
                .ok_or(ValidationError::UnknownTrack(id))?;

            let window = FrameRange::new(range.start.max(*cursor + f - m), (*cursor + f).min(range.end));

            if *cursor + f < range.end {
                *cursor += f;
            } else if range.span() > m {
                *cursor = 0;
            }

            tracks.insert(id, Self::window_chunk(store, id, window)?);
        }
        Ok(tracks)
    }
}
