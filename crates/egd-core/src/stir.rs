//! The stirring transform: a sliding-window SHA-256 XOR distiller.
//!
//! `stir` walks its input in 32-byte blocks. For each block it hashes the
//! window of up to 1024 input bytes ending at the block's last byte and
//! XORs the digest into the block. The output has exactly the input's
//! length, and equal inputs always produce equal outputs.
//!
//! # Window-edge convention
//!
//! Windows always read the *original, untransformed* input, never bytes
//! already stirred. Early blocks (and inputs shorter than the window) use a
//! shrinking prefix window: for the block ending at offset `e` the window
//! is `input[e.saturating_sub(1024)..e]`. Consequently a single-bit change
//! in the input alters exactly the blocks whose window covers that bit,
//! and every block can be computed independently.

use sha2::{Digest, Sha256};

/// Window size in bytes hashed for each block.
pub const WINDOW_SIZE: usize = 1024;

/// Block size in bytes. Equals the SHA-256 digest length.
pub const BLOCK_SIZE: usize = 32;

/// Distill a byte buffer into a same-length buffer.
///
/// A final block shorter than [`BLOCK_SIZE`] is XORed with only the first
/// `len(tail)` digest bytes.
pub fn stir(input: &[u8]) -> Vec<u8> {
    let mut output = input.to_vec();

    let mut offset = 0;
    while offset < input.len() {
        let end = (offset + BLOCK_SIZE).min(input.len());
        let window_start = end.saturating_sub(WINDOW_SIZE);

        let digest = Sha256::digest(&input[window_start..end]);
        for (out_byte, digest_byte) in output[offset..end].iter_mut().zip(digest.iter()) {
            *out_byte ^= digest_byte;
        }

        offset = end;
    }

    output
}
