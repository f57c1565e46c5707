//! zlib-framed deflate used by ARC directories and payloads, plus a raw
//! (no zlib header) deflate path used by multi-entry PATCH directories.

use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};

use crate::error::{CoreError, Result};

/// Compresses `data` with zlib at the default level.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len()), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| CoreError::CompressFailed(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CoreError::CompressFailed(e.to_string()))
}

/// Inflates a zlib-framed buffer to exactly `known_output_size` bytes.
pub fn decompress(src: &[u8], known_output_size: usize) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(src);
    let mut out = Vec::with_capacity(known_output_size);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CoreError::DecompressFailed(e.to_string()))?;
    if out.len() != known_output_size {
        return Err(CoreError::DecompressFailed(format!(
            "expected {known_output_size} bytes, got {}",
            out.len()
        )));
    }
    Ok(out)
}

/// Inflates a raw-deflate buffer (no zlib header), as emitted by
/// multi-entry PATCH directory producers. `hint_size` only pre-sizes the
/// output buffer.
pub fn decompress_raw(src: &[u8], hint_size: usize) -> Result<Vec<u8>> {
    let mut decoder = flate2::read::DeflateDecoder::new(src);
    let mut out = Vec::with_capacity(hint_size);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CoreError::DecompressFailed(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_zlib() {
        let data = b"hello hello hello world world world".to_vec();
        let compressed = compress(&data).unwrap();
        let restored = decompress(&compressed, data.len()).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn decompress_rejects_size_mismatch() {
        let data = b"some payload data".to_vec();
        let compressed = compress(&data).unwrap();
        assert!(decompress(&compressed, data.len() + 1).is_err());
    }
}
