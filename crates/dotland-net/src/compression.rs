//! Optional LZ4 compression of frame payloads.
//!
//! Every payload starts with a flag byte saying whether the rest is raw or
//! LZ4 with a prepended `u32` size. Snapshots cross the threshold; commands
//! and most deltas do not.

use lz4_flex::block::{DecompressError, compress_prepend_size, decompress_size_prepended};

/// Flag: the remaining bytes are raw.
pub const FLAG_RAW: u8 = 0x00;

/// Flag: the remaining bytes are LZ4-compressed.
pub const FLAG_LZ4: u8 = 0x01;

/// When to compress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionConfig {
    /// Smallest payload worth compressing. Default: 512 bytes.
    pub threshold: usize,
    /// Master switch. Default: on.
    pub enabled: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            threshold: 512,
            enabled: true,
        }
    }
}

/// Errors raised while unpacking a payload.
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    /// No flag byte.
    #[error("payload has no compression flag")]
    Missing,

    /// Unknown flag byte.
    #[error("unknown compression flag 0x{0:02X}")]
    UnknownFlag(u8),

    /// The announced decompressed size is over the limit.
    #[error("decompressed size {size} exceeds limit {max}")]
    TooLarge {
        /// Announced size.
        size: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// The LZ4 block is corrupt.
    #[error("LZ4 decompression failed: {0}")]
    Lz4(#[from] DecompressError),
}

/// Prefixes `data` with a flag byte, compressing it if it is large enough.
pub fn pack(data: &[u8], config: &CompressionConfig) -> Vec<u8> {
    let compress = config.enabled && data.len() >= config.threshold;
    let (flag, body) = if compress {
        (FLAG_LZ4, compress_prepend_size(data))
    } else {
        (FLAG_RAW, data.to_vec())
    };
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(flag);
    out.extend_from_slice(&body);
    out
}

/// Strips the flag byte and decompresses if needed. Refuses to inflate
/// beyond `max_len` bytes.
pub fn unpack(payload: &[u8], max_len: usize) -> Result<Vec<u8>, CompressionError> {
    let (&flag, body) = payload.split_first().ok_or(CompressionError::Missing)?;
    match flag {
        FLAG_RAW => Ok(body.to_vec()),
        FLAG_LZ4 => {
            let announced = body
                .first_chunk::<4>()
                .map(|bytes| u32::from_le_bytes(*bytes) as usize)
                .ok_or(CompressionError::Lz4(DecompressError::ExpectedAnotherByte))?;
            if announced > max_len {
                return Err(CompressionError::TooLarge {
                    size: announced,
                    max: max_len,
                });
            }
            Ok(decompress_size_prepended(body)?)
        }
        other => Err(CompressionError::UnknownFlag(other)),
    }
}
