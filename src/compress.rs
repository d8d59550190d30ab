//! zlib body compression
//!
//! Bodies are compressed as a single zlib stream (RFC 1950), the format a
//! `compress2()` call produces, so servers can inflate them in one call.

use crate::error::{Error, Result};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;

/// Compress `data` at `level` (1-9) into a new buffer
pub fn zlib_compress(data: &[u8], level: u32) -> Result<Vec<u8>> {
    if !(1..=9).contains(&level) {
        return Err(Error::Compression(format!(
            "invalid compress level {}",
            level
        )));
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    encoder
        .write_all(data)
        .map_err(|e| Error::Compression(e.to_string()))?;
    encoder.finish().map_err(|e| Error::Compression(e.to_string()))
}
