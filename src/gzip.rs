//! Capped gzip decompression for buffered response bodies.

use std::io::Read;

use flate2::read::GzDecoder;

use crate::error::HttpError;

/// Inflate a gzip stream, refusing to produce more than `max_size` bytes.
pub fn inflate_gzip(data: &[u8], max_size: usize) -> Result<Vec<u8>, HttpError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = decoder
            .read(&mut chunk)
            .map_err(|e| HttpError::Inflate(e.to_string()))?;
        if n == 0 {
            return Ok(out);
        }
        if out.len() + n > max_size {
            return Err(HttpError::TooLarge);
        }
        out.extend_from_slice(&chunk[..n]);
    }
}
