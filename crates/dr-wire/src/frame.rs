use std::io::{Read, Write};

use bytes::Bytes;

use crate::command::PROTOCOL_VERSION;
use crate::error::{ProtocolError, WireResult};
use crate::MAX_FRAME_PAYLOAD_BYTES;

/// Reads the 4-byte host-endian protocol version that opens every new
/// connection and checks it against [`PROTOCOL_VERSION`].
pub fn read_protocol_version<R: Read>(r: &mut R) -> WireResult<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    let got = u32::from_ne_bytes(buf);
    if got != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            got,
        });
    }
    Ok(got)
}

pub fn write_protocol_version<W: Write>(w: &mut W) -> std::io::Result<()> {
    w.write_all(&PROTOCOL_VERSION.to_ne_bytes())
}

/// Reads a `u32 size` followed by exactly `size` bytes, rejecting `size`
/// values above `ceiling` before allocating (spec.md §4.1).
pub fn read_length_prefixed<R: Read>(r: &mut R, ceiling: u32) -> WireResult<Bytes> {
    let mut size_buf = [0u8; 4];
    r.read_exact(&mut size_buf)?;
    let size = u32::from_ne_bytes(size_buf);
    if size > ceiling {
        return Err(ProtocolError::SizeBudgetOverflow {
            declared: size,
            ceiling,
        });
    }
    let mut payload = vec![0u8; size as usize];
    r.read_exact(&mut payload)?;
    Ok(Bytes::from(payload))
}

pub fn write_length_prefixed<W: Write>(w: &mut W, payload: &[u8]) -> std::io::Result<()> {
    let size = payload.len() as u32;
    w.write_all(&size.to_ne_bytes())?;
    w.write_all(payload)
}

/// Decodes a byte blob as a sequence of host-endian `f32` values
/// (`TakeSampleData`, `TakeMoveEnergyData`, `TakeCoordinateData`).
pub fn decode_f32_blob(bytes: &[u8]) -> WireResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(ProtocolError::MisalignedFloatBlob(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes(c.try_into().expect("chunk is exactly 4 bytes")))
        .collect())
}

pub fn encode_f32_blob(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_ne_bytes());
    }
    out
}

/// Reads a `TakeThisFile` payload: `u32 total_size`, then a nul-terminated
/// filename, then `total_size - len(filename) - 1` bytes of content. Per
/// spec.md §4.1, `total_size` includes the filename and its nul.
///
/// Per DESIGN.md's open-question decision, the returned content is treated
/// as transient by every caller in this workspace: nothing here persists
/// it.
pub fn read_take_this_file<R: Read>(
    r: &mut R,
    max_filename_size: usize,
    ceiling: u32,
) -> WireResult<(String, Bytes)> {
    let mut size_buf = [0u8; 4];
    r.read_exact(&mut size_buf)?;
    let total_size = u32::from_ne_bytes(size_buf);
    if total_size > ceiling {
        return Err(ProtocolError::SizeBudgetOverflow {
            declared: total_size,
            ceiling,
        });
    }
    let mut blob = vec![0u8; total_size as usize];
    r.read_exact(&mut blob)?;

    let nul_pos = blob
        .iter()
        .position(|&b| b == 0)
        .filter(|&pos| pos <= max_filename_size)
        .ok_or(ProtocolError::MalformedFilename)?;
    let filename = String::from_utf8_lossy(&blob[..nul_pos]).into_owned();
    let content = Bytes::from(blob[nul_pos + 1..].to_vec());
    Ok((filename, content))
}

pub fn write_take_this_file<W: Write>(w: &mut W, filename: &str, content: &[u8]) -> std::io::Result<()> {
    let mut blob = Vec::with_capacity(filename.len() + 1 + content.len());
    blob.extend_from_slice(filename.as_bytes());
    blob.push(0);
    blob.extend_from_slice(content);
    let total_size = blob.len() as u32;
    w.write_all(&total_size.to_ne_bytes())?;
    w.write_all(&blob)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_prefixed_round_trips_at_boundary_sizes() {
        for size in [0usize, 1, 4096, 4097] {
            let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let mut buf = Vec::new();
            write_length_prefixed(&mut buf, &payload).unwrap();
            let decoded = read_length_prefixed(&mut &buf[..], MAX_FRAME_PAYLOAD_BYTES).unwrap();
            assert_eq!(decoded.as_ref(), payload.as_slice());
        }
    }

    #[test]
    fn oversized_prefix_is_rejected_before_allocating() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(u32::MAX).to_ne_bytes());
        let err = read_length_prefixed(&mut &buf[..], 1024).unwrap_err();
        assert!(matches!(err, ProtocolError::SizeBudgetOverflow { .. }));
    }

    #[test]
    fn f32_blob_round_trips() {
        let values = [0.0f32, -1.5, f32::MAX, 3.25];
        let bytes = encode_f32_blob(&values);
        let decoded = decode_f32_blob(&bytes).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn misaligned_f32_blob_rejected() {
        let bytes = [0u8, 1, 2];
        assert!(decode_f32_blob(&bytes).is_err());
    }

    #[test]
    fn take_this_file_round_trips() {
        let mut buf = Vec::new();
        write_take_this_file(&mut buf, "restart.log", b"hello").unwrap();
        let (name, content) = read_take_this_file(&mut &buf[..], 128, MAX_FRAME_PAYLOAD_BYTES).unwrap();
        assert_eq!(name, "restart.log");
        assert_eq!(content.as_ref(), b"hello");
    }

    #[test]
    fn protocol_version_mismatch_detected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&99u32.to_ne_bytes());
        let err = read_protocol_version(&mut &buf[..]).unwrap_err();
        assert!(matches!(err, ProtocolError::VersionMismatch { .. }));
    }
}
