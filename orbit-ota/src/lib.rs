//! Firmware-update state machine built on top of `orbit-core`'s request engine
//! (spec §4.G). Manifest polling, blockwise component download, SHA-256 streaming
//! verification, per-component backoff, and resilient status reporting all live
//! here; the bootloader and decompressor are trait seams a board port supplies.

pub mod backoff;
pub mod bootloader;
pub mod decompressor;
pub mod machine;
pub mod manifest;
pub mod report;

pub use backoff::{BackoffTable, ComponentBackoff};
pub use bootloader::Bootloader;
pub use decompressor::{Decompressor, PassthroughDecompressor};
pub use machine::OtaMachine;
pub use manifest::{decode_manifest, encode_manifest, Component, Manifest};
pub use report::{report_state_resilient, OtaReason, OtaState, StateReport};
