//! Block decompression pipeline (SPEC_FULL §4.G′). Grounded on
//! `golioth_fw_block_processor.c` / `golioth_decompressor.c`: each received block is
//! sunk into the decoder and the plaintext it yields is pulled out before hashing
//! and flashing. Only the trait boundary and a passthrough implementation are in
//! scope here; a real streaming-window decoder (the original's heatshrink) is a
//! board-port concern, same as [`crate::bootloader::Bootloader`].

use orbit_core::error::Result;

/// Streaming decompressor driven one block at a time.
pub trait Decompressor: Send {
    /// Sinks `compressed` bytes and returns however much plaintext the decoder
    /// could produce from them. May return fewer bytes than went in, or more, than
    /// any single call's input depending on internal buffering.
    fn push(&mut self, compressed: &[u8]) -> Result<Vec<u8>>;
}

/// Used for components with `compressed: false`; forwards bytes unchanged.
#[derive(Debug, Default)]
pub struct PassthroughDecompressor;

impl Decompressor for PassthroughDecompressor {
    fn push(&mut self, compressed: &[u8]) -> Result<Vec<u8>> {
        Ok(compressed.to_vec())
    }
}
