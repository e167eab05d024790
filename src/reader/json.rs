use super::ReadError;
use crate::tracks::models::RawDetections;
use nalgebra::Vector3;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// One row of a JSON detection table. Field names follow the MINFLUX
/// export (`tim`, `tid`).
#[derive(Debug, Deserialize)]
struct Detection {
    tim: f64,
    tid: i64,
    x: f64,
    y: f64,
    #[serde(default)]
    z: f64,
}

pub fn read_json(path: &Path) -> Result<RawDetections, ReadError> {
    parse_detections(BufReader::new(File::open(path)?))
}

pub fn parse_detections<R: Read>(reader: R) -> Result<RawDetections, ReadError> {
    let rows: Vec<Detection> = serde_json::from_reader(reader)?;
    let mut raw = RawDetections::default();
    for row in rows {
        raw.push(row.tim, row.tid, Vector3::new(row.x, row.y, row.z));
    }
    Ok(raw)
}
