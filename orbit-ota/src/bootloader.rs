//! The flash/boot-image seam the OTA state machine drives but does not implement
//! (spec §1 Non-goals, "the bootloader and flash driver"; SPEC_FULL §3 "Bootloader
//! trait"). Grounded on `port/*/fw_update_*.c` and `include/golioth/ota.h` in
//! original_source.

use orbit_core::error::Result;

/// Flash-write and boot-switch operations a concrete board port supplies.
///
/// Implementations are expected to be cheap to call repeatedly (`is_pending_verify`,
/// `candidate_is_valid`) and to block only where the underlying flash driver does
/// (`write_block`, `switch_to`).
pub trait Bootloader: Send {
    /// Writes `bytes` at `offset` into the inactive flash slot.
    fn write_block(&mut self, offset: u64, bytes: &[u8]) -> Result<()>;

    /// Called once after the last block of a component has been written, before
    /// hash verification.
    fn post_download(&mut self) -> Result<()>;

    /// Marks the inactive slot as the boot candidate for `package`/`hash`.
    fn switch_to(&mut self, package: &str, hash: &[u8; 32]) -> Result<()>;

    /// True if the currently running image has not yet confirmed itself good.
    fn is_pending_verify(&self) -> bool;

    /// The version currently running for `package`, if the bootloader tracks one.
    /// Compared against each manifest's target version to decide whether a new
    /// download is needed (spec §4.G, "Steady loop").
    fn current_version(&self, package: &str) -> Option<String>;

    /// Confirms the running image is good; the bootloader will not roll back to
    /// the previous slot on the next boot.
    fn cancel_rollback(&mut self) -> Result<()>;

    /// Reverts to the previous known-good image and reboots. Never returns.
    fn rollback_and_reboot(&mut self) -> !;

    /// True if the inactive slot already holds a verified image matching `hash`,
    /// letting the OTA thread skip straight to the switch step (spec §4.G, "If the
    /// bootloader already reports the target hash as a valid candidate it skips
    /// directly to step 5").
    fn candidate_is_valid(&self, hash: &[u8; 32]) -> bool;

    /// Reboots the device. Never returns.
    fn reboot(&mut self) -> !;
}
