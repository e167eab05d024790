pub mod header;
pub mod json;
pub mod npy;

use crate::timestep::InputError;
use crate::tracks::models::RawDetections;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unsupported track file format: {0}")]
    UnsupportedFormat(String),
    #[error("Malformed {format} file: {message}")]
    Format { format: &'static str, message: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid input: {0}")]
    Input(#[from] InputError),
}

/// Read raw detections from a track file, picking the reader by extension.
pub fn read_tracks(path: &Path) -> Result<RawDetections, ReadError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if !crate::SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(ReadError::UnsupportedFormat(ext));
    }

    log::debug!(
        "Reading tracks: {}",
        path.file_name().and_then(|f| f.to_str()).unwrap_or("?")
    );

    let raw = match ext.as_str() {
        "npy" => npy::read_npy(path)?,
        _ => json::read_json(path)?,
    };

    if raw.is_empty() {
        return Err(InputError::Empty.into());
    }
    Ok(raw)
}
