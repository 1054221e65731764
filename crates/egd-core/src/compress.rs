//! LZ4 pre-stir compression.
//!
//! Samples are compressed before stirring so that redundant source output
//! (HTML boilerplate, repeated log lines) spends less of the pool's bounded
//! capacity. Sources configured with `no_compress` skip this stage.
//! `decompress` is never on the deposit path; it exists for diagnostic
//! tooling that inspects what a source produced.

use crate::error::{codes, Component, EgdError};

/// Compress a byte buffer with the LZ4 block format. The uncompressed
/// length is prepended so [`decompress`] can recover the exact input.
pub fn compress(data: &[u8]) -> Vec<u8> {
    lz4_flex::block::compress_prepend_size(data)
}

/// Inverse of [`compress`]. Fails on truncated or corrupt buffers.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, EgdError> {
    lz4_flex::block::decompress_size_prepended(data).map_err(|e| {
        EgdError::permanent(
            Component::Source,
            codes::DECOMPRESS_FAILED,
            "lz4 decompression failed",
        )
        .with_cause(e)
    })
}
