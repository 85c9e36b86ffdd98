//! zlib sync-flush compression for restart-file payloads. The server
//! treats this blob as opaque (spec.md §1 non-goal); only clients that
//! choose to compress their restart files need this module.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

/// Compresses `payload` with a zlib sync flush, matching the historical
/// `do_compress2` framing: the receiver does not need a trailing
/// `Z_FINISH` because the server only ever forwards the bytes onward.
pub fn compress_sync_flush(payload: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload)?;
    encoder.flush()?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compresses_to_something_decodable() {
        let payload = b"restart file contents, repeated ".repeat(8);
        let compressed = compress_sync_flush(&payload).unwrap();
        assert_ne!(compressed, payload);

        let mut decoder = flate2::read::ZlibDecoder::new(&compressed[..]);
        let mut out = Vec::new();
        std::io::Read::read_to_end(&mut decoder, &mut out).unwrap();
        assert_eq!(out, payload);
    }
}
