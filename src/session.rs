use crate::config::PlaybackConfig;
use crate::playback::{Chunk, ChunkEngine};
use crate::reader::{self, ReadError};
use crate::tracks::models::RawDetections;
use crate::tracks::{StoreError, TrackStore, ValidationError};
use crate::visibility::VisibilityController;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Read error: {0}")]
    Read(#[from] ReadError),
    #[error("Load error: {0}")]
    Store(#[from] StoreError),
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// One loaded track file: the store plus the per-track display state built
/// on top of it. Opening another file means building a new session.
#[derive(Debug)]
pub struct Session {
    pub path: Option<PathBuf>,
    pub store: TrackStore,
    pub controller: VisibilityController,
    pub engine: ChunkEngine,
}

impl Session {
    pub fn open(path: &Path, config: PlaybackConfig) -> Result<Self, SessionError> {
        let raw = reader::read_tracks(path)?;
        let mut session = Self::from_raw(raw, config)?;
        session.path = Some(path.to_path_buf());
        Ok(session)
    }

    pub fn from_raw(raw: RawDetections, config: PlaybackConfig) -> Result<Self, SessionError> {
        let store = TrackStore::build(raw)?;
        let controller = VisibilityController::new(&store);
        let engine = ChunkEngine::new(&store, config)?;
        Ok(Self {
            path: None,
            store,
            controller,
            engine,
        })
    }

    /// Run one query: a tick while playing, a refresh while idle.
    pub fn tick(&mut self) -> Result<&Chunk, ValidationError> {
        self.engine.query(&self.store, &mut self.controller)
    }
}
