//! Message body compression using DEFLATE via `miniz_oxide`.
//!
//! When the `FLAG_COMPRESSED` bit is set in a message header, the
//! reassembled body is DEFLATE-compressed.
//!
//! Compression is applied selectively: only to bodies that reach the
//! configured threshold and where the compressed output is actually
//! smaller than the input (incompressible data is sent uncompressed).

use log::warn;
use miniz_oxide::deflate::compress_to_vec;
use miniz_oxide::inflate::decompress_to_vec_with_limit;

/// Default minimum body size worth compressing.
pub const DEFAULT_COMPRESS_THRESHOLD: usize = 1024;

/// DEFLATE compression level (1-10, higher = better ratio, slower).
const COMPRESSION_LEVEL: u8 = 6;

/// Upper bound on an inflated body.
pub const MAX_DECOMPRESSED_SIZE: usize = 8 * 1024 * 1024;

/// Compress a body using DEFLATE.
///
/// Returns `Some(compressed_bytes)` if compression is beneficial
/// (output < input), or `None` if compression should be skipped.
pub fn compress(input: &[u8], threshold: usize) -> Option<Vec<u8>> {
    if input.len() < threshold.max(1) {
        return None;
    }

    let compressed = compress_to_vec(input, COMPRESSION_LEVEL);

    if compressed.len() >= input.len() {
        return None;
    }

    Some(compressed)
}

/// Decompress a DEFLATE-compressed body.
///
/// Returns `None` on a corrupt stream or one that inflates past
/// [`MAX_DECOMPRESSED_SIZE`].
pub fn decompress(input: &[u8]) -> Option<Vec<u8>> {
    match decompress_to_vec_with_limit(input, MAX_DECOMPRESSED_SIZE) {
        Ok(data) => Some(data),
        Err(e) => {
            warn!("decompress: DEFLATE error: {:?}", e.status);
            None
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
