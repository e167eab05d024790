//! MINFLUX record arrays stored as NumPy `.npy` files.
//!
//! Each record carries the timestamp `tim`, the track id `tid` and an `itr`
//! sub-array with one entry per localization iteration; the final
//! iteration's `loc` is the position. Older exports keep `loc` at the top
//! level instead.

use super::header::{Dtype, Field, Header, Scalar};
use super::ReadError;
use crate::tracks::models::RawDetections;
use nalgebra::Vector3;
use std::path::Path;

const MAGIC: &[u8] = b"\x93NUMPY";

fn format_error(message: impl Into<String>) -> ReadError {
    ReadError::Format {
        format: "npy",
        message: message.into(),
    }
}

pub fn read_npy(path: &Path) -> Result<RawDetections, ReadError> {
    let bytes = std::fs::read(path)?;
    parse_minflux(&bytes)
}

/// Split a `.npy` buffer into its header and the offset of the data block.
pub fn parse_npy_header(bytes: &[u8]) -> Result<(Header, usize), ReadError> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(format_error("missing \\x93NUMPY magic"));
    }
    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(format_error("truncated header length"));
            }
            (
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                12,
            )
        }
        v => return Err(format_error(format!("unsupported format version {}.{}", v, bytes[7]))),
    };
    let data_start = header_start + header_len;
    if bytes.len() < data_start {
        return Err(format_error("truncated header"));
    }

    let text = String::from_utf8_lossy(&bytes[header_start..data_start]);
    let header = Header::parse(&text).map_err(format_error)?;
    log::debug!(
        "npy v{}.{}: shape {:?}, itemsize {}",
        major,
        bytes[7],
        header.shape,
        header.dtype.itemsize()
    );
    Ok((header, data_start))
}

/// Decode timestamps, track ids and final-iteration positions.
pub fn parse_minflux(bytes: &[u8]) -> Result<RawDetections, ReadError> {
    let (header, data_start) = parse_npy_header(bytes)?;
    if header.fortran_order {
        return Err(format_error("Fortran-ordered arrays are not supported"));
    }
    let n = match header.shape.as_slice() {
        [n] => *n,
        other => return Err(format_error(format!("expected a 1-D record array, got shape {:?}", other))),
    };

    let dtype = &header.dtype;
    let itemsize = dtype.itemsize();
    let data_len = n
        .checked_mul(itemsize)
        .filter(|len| data_start.checked_add(*len).is_some())
        .ok_or_else(|| format_error(format!("{} records of {} bytes overflow", n, itemsize)))?;
    if bytes.len() - data_start < data_len {
        return Err(format_error(format!(
            "data block holds {} bytes, {} records of {} bytes need {}",
            bytes.len() - data_start,
            n,
            itemsize,
            data_len
        )));
    }

    let tim = scalar_field(dtype, "tim")?;
    let tid = scalar_field(dtype, "tid")?;
    let loc_offset = position_offset(dtype)?;

    let mut raw = RawDetections::default();
    for i in 0..n {
        let record = &bytes[data_start + i * itemsize..data_start + (i + 1) * itemsize];
        let time = read_float(record, tim.0, tim.1)?;
        let track_id = read_int(record, tid.0, tid.1)?;
        let (offset, scalar) = loc_offset;
        let position = Vector3::new(
            read_float(record, offset, scalar)?,
            read_float(record, offset + scalar.size, scalar)?,
            read_float(record, offset + 2 * scalar.size, scalar)?,
        );
        raw.push(time, track_id, position);
    }

    log::info!("Read {} MINFLUX localizations", raw.len());
    Ok(raw)
}

fn scalar_field(dtype: &Dtype, name: &str) -> Result<(usize, Scalar), ReadError> {
    match dtype.field(name) {
        Some(Field {
            dtype: Dtype::Scalar(s),
            offset,
            ..
        }) => Ok((*offset, *s)),
        Some(_) => Err(format_error(format!("field '{}' is not a scalar", name))),
        None => Err(format_error(format!("record has no '{}' field", name))),
    }
}

/// Byte offset of `loc[0]` inside a record, taking the last `itr` entry when
/// iterations are present.
fn position_offset(dtype: &Dtype) -> Result<(usize, Scalar), ReadError> {
    let (base, container) = match dtype.field("itr") {
        Some(itr) => {
            let Some(last) = itr.count().checked_sub(1) else {
                return Err(format_error("field 'itr' holds no iterations"));
            };
            (itr.offset + last * itr.dtype.itemsize(), &itr.dtype)
        }
        None => (0, dtype),
    };
    match container.field("loc") {
        Some(Field {
            dtype: Dtype::Scalar(s),
            offset,
            shape,
            ..
        }) if shape.iter().product::<usize>() >= 3 => Ok((base + offset, *s)),
        Some(_) => Err(format_error("field 'loc' must hold at least 3 scalars")),
        None => Err(format_error("record has no 'loc' field")),
    }
}

fn check_endian(scalar: Scalar) -> Result<(), ReadError> {
    if scalar.big_endian && scalar.size > 1 {
        return Err(format_error("big-endian fields are not supported"));
    }
    Ok(())
}

/// The bytes of one scalar, or a format error if it lies outside the record.
fn scalar_bytes(record: &[u8], offset: usize, scalar: Scalar) -> Result<&[u8], ReadError> {
    offset
        .checked_add(scalar.size)
        .and_then(|end| record.get(offset..end))
        .ok_or_else(|| {
            format_error(format!(
                "field at byte {} overruns the {}-byte record",
                offset,
                record.len()
            ))
        })
}

fn read_float(record: &[u8], offset: usize, scalar: Scalar) -> Result<f64, ReadError> {
    check_endian(scalar)?;
    let b = scalar_bytes(record, offset, scalar)?;
    match (scalar.kind, scalar.size) {
        ('f', 8) => Ok(f64::from_le_bytes(b.try_into().map_err(|_| format_error("short f8"))?)),
        ('f', 4) => Ok(f32::from_le_bytes(b.try_into().map_err(|_| format_error("short f4"))?) as f64),
        ('i' | 'u', _) => read_int(record, offset, scalar).map(|v| v as f64),
        (kind, size) => Err(format_error(format!("cannot read {}{} as float", kind, size))),
    }
}

fn read_int(record: &[u8], offset: usize, scalar: Scalar) -> Result<i64, ReadError> {
    check_endian(scalar)?;
    let b = scalar_bytes(record, offset, scalar)?;
    let mut buf = [0u8; 8];
    match (scalar.kind, scalar.size) {
        ('i', 1 | 2 | 4 | 8) => {
            buf[..scalar.size].copy_from_slice(b);
            // sign-extend
            let shift = 64 - 8 * scalar.size as u32;
            Ok((i64::from_le_bytes(buf) << shift) >> shift)
        }
        ('u', 1 | 2 | 4) => {
            buf[..scalar.size].copy_from_slice(b);
            Ok(i64::from_le_bytes(buf))
        }
        ('u', 8) => {
            buf.copy_from_slice(b);
            i64::try_from(u64::from_le_bytes(buf)).map_err(|_| format_error("track id overflows i64"))
        }
        (kind, size) => Err(format_error(format!("cannot read {}{} as integer", kind, size))),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const MINFLUX_DESCR: &str = "[('vld', '|b1'), ('tim', '<f8'), ('tid', '<i4'), \
        ('itr', [('itr', '<i4'), ('loc', '<f8', (3,))], (2,))]";

    /// Serialize detections the way numpy.save lays out a MINFLUX array.
    /// The first iteration's position is filled with junk so tests notice if
    /// the wrong iteration is read.
    pub(crate) fn minflux_bytes(rows: &[(f64, i32, [f64; 3])]) -> Vec<u8> {
        let mut header = format!(
            "{{'descr': {}, 'fortran_order': False, 'shape': ({},), }}",
            MINFLUX_DESCR,
            rows.len()
        );
        // Pad so magic + header is a multiple of 64, ending with a newline
        while (10 + header.len() + 1) % 64 != 0 {
            header.push(' ');
        }
        header.push('\n');

        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());

        for &(tim, tid, loc) in rows {
            bytes.push(1);
            bytes.extend_from_slice(&tim.to_le_bytes());
            bytes.extend_from_slice(&tid.to_le_bytes());
            for (iteration, scale) in [(0i32, -1.0), (1, 1.0)] {
                bytes.extend_from_slice(&iteration.to_le_bytes());
                for v in loc {
                    bytes.extend_from_slice(&(scale * v + 1000.0 * (1.0 - scale)).to_le_bytes());
                }
            }
        }
        bytes
    }

    #[test]
    fn test_reads_last_iteration() {
        let bytes = minflux_bytes(&[
            (0.0, 3, [1.0, 2.0, 3.0]),
            (0.002, 3, [1.5, 2.5, 3.5]),
            (0.001, -7, [4.0, 5.0, 6.0]),
        ]);
        let raw = parse_minflux(&bytes).unwrap();

        assert_eq!(raw.len(), 3);
        assert_eq!(raw.time, vec![0.0, 0.002, 0.001]);
        assert_eq!(raw.track_id, vec![3, 3, -7]);
        assert_eq!(raw.position[1], Vector3::new(1.5, 2.5, 3.5));
        assert_eq!(raw.position[2], Vector3::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn test_top_level_loc() {
        let header = "{'descr': [('tim', '<f4'), ('tid', '<u2'), ('loc', '<f8', (3,))], \
                      'fortran_order': False, 'shape': (1,), }\n";
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[2, 0]);
        bytes.extend_from_slice(&(header.len() as u32).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&0.5f32.to_le_bytes());
        bytes.extend_from_slice(&65535u16.to_le_bytes());
        for v in [7.0f64, 8.0, 9.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }

        let raw = parse_minflux(&bytes).unwrap();
        assert_eq!(raw.time, vec![0.5]);
        assert_eq!(raw.track_id, vec![65535]);
        assert_eq!(raw.position[0], Vector3::new(7.0, 8.0, 9.0));
    }

    #[test]
    fn test_rejects_bad_files() {
        assert!(matches!(
            parse_minflux(b"not a numpy file"),
            Err(ReadError::Format { format: "npy", .. })
        ));

        let mut truncated = minflux_bytes(&[(0.0, 1, [0.0; 3]), (1.0, 1, [0.0; 3])]);
        truncated.truncate(truncated.len() - 5);
        assert!(parse_minflux(&truncated).is_err());
    }

    /// Wrap a header dict in a v1.0 container with `data` appended.
    fn npy_with_header(header: &str, data: &[u8]) -> Vec<u8> {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(data);
        bytes
    }

    #[test]
    fn test_oversized_shape_is_format_error() {
        let bytes = npy_with_header(
            "{'descr': [('tim', '<f8'), ('tid', '<i4'), ('loc', '<f8', (3,))], \
             'fortran_order': False, 'shape': (9223372036854775807,), }\n",
            &[0; 36],
        );
        assert!(matches!(
            parse_minflux(&bytes),
            Err(ReadError::Format { format: "npy", .. })
        ));
    }

    #[test]
    fn test_empty_iteration_array_is_format_error() {
        let bytes = npy_with_header(
            "{'descr': [('tim', '<f8'), ('tid', '<i4'), \
             ('itr', [('itr', '<i4'), ('loc', '<f8', (3,))], (0,))], \
             'fortran_order': False, 'shape': (1,), }\n",
            &[0; 12],
        );
        let err = parse_minflux(&bytes).unwrap_err();
        assert!(err.to_string().contains("itr"), "{}", err);
    }

    #[test]
    fn test_scalar_outside_record_is_format_error() {
        let s = Scalar::parse("<f8").unwrap();
        assert!(matches!(
            read_float(&[0; 4], 0, s),
            Err(ReadError::Format { .. })
        ));
        assert!(read_int(&[0; 8], usize::MAX, Scalar::parse("<i4").unwrap()).is_err());
    }

    #[test]
    fn test_missing_fields() {
        let header = "{'descr': [('tim', '<f8')], 'fortran_order': False, 'shape': (0,), }\n";
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        let err = parse_minflux(&bytes).unwrap_err();
        assert!(err.to_string().contains("tid"));
    }

    #[test]
    fn test_sign_extension() {
        let s = Scalar::parse("<i2").unwrap();
        let record = (-2i16).to_le_bytes();
        assert_eq!(read_int(&record, 0, s).unwrap(), -2);
    }
}
