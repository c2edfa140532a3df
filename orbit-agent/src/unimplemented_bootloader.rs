//! Placeholder [`Bootloader`] for boards that haven't wired a flash driver yet.
//! Every mutating call fails loudly; `orbit-agent` exists to show how the pieces
//! wire together; a real board port supplies its own trait implementation before
//! OTA can actually flash anything (spec §1 Non-goals, "the bootloader and flash
//! driver").

use orbit_core::error::{Error, Result};
use orbit_ota::Bootloader;

#[derive(Default)]
pub struct UnimplementedBootloader;

impl Bootloader for UnimplementedBootloader {
    fn write_block(&mut self, _offset: u64, _bytes: &[u8]) -> Result<()> {
        Err(Error::NotImplemented)
    }

    fn post_download(&mut self) -> Result<()> {
        Err(Error::NotImplemented)
    }

    fn switch_to(&mut self, _package: &str, _hash: &[u8; 32]) -> Result<()> {
        Err(Error::NotImplemented)
    }

    fn is_pending_verify(&self) -> bool {
        false
    }

    fn current_version(&self, _package: &str) -> Option<String> {
        None
    }

    fn cancel_rollback(&mut self) -> Result<()> {
        Err(Error::NotImplemented)
    }

    fn rollback_and_reboot(&mut self) -> ! {
        panic!("rollback_and_reboot: no board port bootloader configured");
    }

    fn candidate_is_valid(&self, _hash: &[u8; 32]) -> bool {
        false
    }

    fn reboot(&mut self) -> ! {
        panic!("reboot: no board port bootloader configured");
    }
}
