//! The OTA firmware-update state machine (spec §4.G). Runs on its own thread so the
//! request engine stays responsive; grounded on `fw_update.c`'s `fw_update_thread`
//! in original_source, with Rust's ownership model replacing its global statics.

use crate::backoff::BackoffTable;
use crate::bootloader::Bootloader;
use crate::decompressor::{Decompressor, PassthroughDecompressor};
use crate::manifest::{decode_manifest, Component, Manifest};
use crate::report::{report_state_resilient, OtaReason, OtaState, StateReport};
use orbit_core::client::Client;
use orbit_core::coap::BlockEvent;
use orbit_core::config::ClientConfig;
use orbit_core::stats::BlockLatencyStats;
use sha2::{Digest, Sha256};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// A component download that failed this many times in a row is abandoned for the
/// current attempt (spec §4.G step 3, `MAX_BLOCK_RESUME_BEFORE_FAIL`).
const MAX_BLOCK_RESUME_BEFORE_FAIL: u32 = 15;
/// Delay before resuming a failed download (spec §4.G step 3, `RESUME_DELAY`).
const RESUME_DELAY: Duration = Duration::from_secs(15);
/// Countdown before rebooting into the new image (spec §4.G step 5).
const REBOOT_COUNTDOWN_S: u64 = 5;

const CONTENT_FORMAT_CBOR: u16 = 60;
const CONTENT_FORMAT_OCTET_STREAM: u16 = 42;

/// The engine's block-resume story does not give the OTA layer a cursor to resume
/// from (spec §9 Open Question 1): `Client::get_block` always walks a resource from
/// block 0. Each retry here therefore restarts the whole component from byte 0,
/// which is the documented fallback the open question calls for. See DESIGN.md.
enum DownloadOutcome {
    Downloaded([u8; 32]),
    Failed,
}

/// Drives manifest observation, component download, verification, and the boot
/// switch for a single managed component (spec simplifies to "main" in its seed
/// scenarios; multi-component devices run one `OtaMachine` per package -- see
/// DESIGN.md, "Single-component OTA machine").
pub struct OtaMachine<B: Bootloader> {
    client: Arc<Client>,
    bootloader: B,
    decompressor_factory: Box<dyn Fn() -> Box<dyn Decompressor> + Send>,
    primary_package: String,
    rollback_timer: Duration,
    observation_retry_max_delay: Duration,
    block_timeout: Duration,
    block_size: u16,
    backoff: BackoffTable,
}

impl<B: Bootloader> OtaMachine<B> {
    pub fn new(client: Arc<Client>, bootloader: B, primary_package: impl Into<String>, config: &ClientConfig) -> Self {
        OtaMachine {
            client,
            bootloader,
            decompressor_factory: Box::new(|| Box::new(PassthroughDecompressor)),
            primary_package: primary_package.into(),
            rollback_timer: Duration::from_secs(config.fw_update_rollback_timer_s),
            observation_retry_max_delay: Duration::from_secs(config.fw_update_observation_retry_max_delay_s),
            block_timeout: config.response_timeout(),
            block_size: config.blockwise_download_max_block_size,
            backoff: BackoffTable::new(),
        }
    }

    /// Overrides the default passthrough decompressor, e.g. with a board port's
    /// heatshrink-equivalent decoder.
    pub fn with_decompressor_factory(mut self, factory: Box<dyn Fn() -> Box<dyn Decompressor> + Send>) -> Self {
        self.decompressor_factory = factory;
        self
    }

    /// Runs the pending-verify boot check, then the steady manifest-observe loop,
    /// forever. Intended to be the body of the OTA thread.
    pub fn run(mut self) -> ! {
        self.run_pending_verify_check();
        let manifest_rx = self.start_manifest_observation();
        let mut pending_component: Option<Component> = None;

        loop {
            let current_version = self.bootloader.current_version(&self.primary_package);
            report_state_resilient(
                &self.client,
                &StateReport {
                    state: OtaState::Idle,
                    reason: OtaReason::Ready,
                    package: self.primary_package.clone(),
                    current_version: current_version.clone(),
                    target_version: None,
                },
            );

            let backoff_remaining = self.backoff.entry(&self.primary_package).remaining();
            let wait = if backoff_remaining > Duration::ZERO {
                backoff_remaining
            } else {
                // No failure is currently backing off: block until the next manifest.
                Duration::from_secs(u64::MAX / 2)
            };

            match manifest_rx.recv_timeout(wait) {
                Ok(manifest) => {
                    if let Some(component) = manifest.find_component(&self.primary_package) {
                        self.handle_new_manifest(component.clone(), current_version.as_deref(), &mut pending_component);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(component) = pending_component.clone() {
                        self.attempt_update(&component);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("ota manifest observation channel closed, pausing before re-arming");
                    thread::sleep(Duration::from_secs(1));
                }
            }
        }
    }

    /// Waits up to `rollback_timer` for the engine to connect; rolls back if it
    /// doesn't, confirms the image if it does (spec §4.G, "Pending-verify boot").
    fn run_pending_verify_check(&mut self) {
        if !self.bootloader.is_pending_verify() {
            return;
        }
        let deadline = Instant::now() + self.rollback_timer;
        loop {
            if self.client.is_connected() {
                if let Err(err) = self.bootloader.cancel_rollback() {
                    warn!(error = %err, "failed to cancel rollback after pending-verify image connected");
                }
                let current_version = self.bootloader.current_version(&self.primary_package);
                report_state_resilient(
                    &self.client,
                    &StateReport {
                        state: OtaState::Updating,
                        reason: OtaReason::FirmwareUpdatedSuccessfully,
                        package: self.primary_package.clone(),
                        current_version,
                        target_version: None,
                    },
                );
                return;
            }
            if Instant::now() >= deadline {
                warn!(package = %self.primary_package, "pending-verify image did not connect in time, rolling back");
                self.bootloader.rollback_and_reboot();
            }
            thread::sleep(Duration::from_millis(200));
        }
    }

    /// Registers the manifest observation, retrying registration with its own
    /// backoff (spec §4.G grounded on `fw_observe_manifest`'s 5s-growing retry).
    fn start_manifest_observation(&self) -> mpsc::Receiver<Manifest> {
        let (tx, rx) = mpsc::channel();
        let mut delay = Duration::from_secs(5);
        loop {
            let tx = tx.clone();
            let result = self.client.observe(
                ".u/",
                "desired",
                CONTENT_FORMAT_CBOR,
                Box::new(move |outcome| match outcome {
                    Ok(response) => match decode_manifest(&response.payload) {
                        Ok(manifest) => {
                            let _ = tx.send(manifest);
                        }
                        Err(err) => warn!(error = %err, "failed to decode ota manifest"),
                    },
                    Err(err) => warn!(error = %err, "ota manifest observation error"),
                }),
            );
            match result {
                Ok(()) => return rx,
                Err(err) => {
                    warn!(error = %err, delay = ?delay, "failed to register ota manifest observation, retrying");
                    thread::sleep(delay);
                    delay = (delay * 2).min(self.observation_retry_max_delay);
                }
            }
        }
    }

    /// Decides whether a freshly observed component is worth acting on: skip if it
    /// matches the running version, skip if it's the same target already backing
    /// off, otherwise reset backoff and start the download (spec §4.G, "Steady
    /// loop").
    fn handle_new_manifest(&mut self, component: Component, current_version: Option<&str>, pending: &mut Option<Component>) {
        if current_version == Some(component.version.as_str()) {
            return;
        }
        let backoff = self.backoff.entry(&component.package);
        if backoff.is_active() && backoff.is_same_target(&component.version) {
            info!(package = %component.package, version = %component.version, "update already in progress, ignoring duplicate manifest");
            return;
        }
        backoff.reset();
        *pending = Some(component.clone());
        self.attempt_update(&component);
    }

    fn attempt_update(&mut self, component: &Component) {
        report_state_resilient(
            &self.client,
            &StateReport {
                state: OtaState::Downloading,
                reason: OtaReason::Ready,
                package: component.package.clone(),
                current_version: self.bootloader.current_version(&component.package),
                target_version: Some(component.version.clone()),
            },
        );

        if self.bootloader.candidate_is_valid(&component.hash) {
            self.finish_update(component);
            return;
        }

        match self.download_with_retries(component) {
            DownloadOutcome::Downloaded(digest) => {
                if let Err(err) = self.bootloader.post_download() {
                    warn!(error = %err, package = %component.package, "post-download hook failed");
                    self.fail_update(component, OtaReason::FirmwareUpdateFailed);
                    return;
                }
                if digest != component.hash {
                    warn!(package = %component.package, "ota component hash mismatch");
                    self.fail_update(component, OtaReason::IntegrityCheckFailure);
                    return;
                }
                self.finish_update(component);
            }
            DownloadOutcome::Failed => {
                self.fail_update(component, OtaReason::FirmwareUpdateFailed);
            }
        }
    }

    fn fail_update(&mut self, component: &Component, reason: OtaReason) {
        report_state_resilient(
            &self.client,
            &StateReport {
                state: OtaState::Downloading,
                reason,
                package: component.package.clone(),
                current_version: self.bootloader.current_version(&component.package),
                target_version: Some(component.version.clone()),
            },
        );
        self.backoff.entry(&component.package).record_failure(&component.version);
    }

    fn finish_update(&mut self, component: &Component) {
        report_state_resilient(
            &self.client,
            &StateReport {
                state: OtaState::Downloaded,
                reason: OtaReason::Ready,
                package: component.package.clone(),
                current_version: self.bootloader.current_version(&component.package),
                target_version: Some(component.version.clone()),
            },
        );
        report_state_resilient(
            &self.client,
            &StateReport {
                state: OtaState::Updating,
                reason: OtaReason::Ready,
                package: component.package.clone(),
                current_version: self.bootloader.current_version(&component.package),
                target_version: Some(component.version.clone()),
            },
        );

        if let Err(err) = self.bootloader.switch_to(&component.package, &component.hash) {
            warn!(error = %err, package = %component.package, "failed to switch boot image");
            self.fail_update(component, OtaReason::FirmwareUpdateFailed);
            return;
        }

        for remaining in (1..=REBOOT_COUNTDOWN_S).rev() {
            info!(seconds_remaining = remaining, package = %component.package, "rebooting to apply firmware update");
            thread::sleep(Duration::from_secs(1));
        }
        self.bootloader.reboot();
    }

    /// Retries a full component download up to `MAX_BLOCK_RESUME_BEFORE_FAIL + 1`
    /// times, sleeping `RESUME_DELAY` between attempts (spec §4.G step 3).
    fn download_with_retries(&mut self, component: &Component) -> DownloadOutcome {
        for attempt in 1..=(MAX_BLOCK_RESUME_BEFORE_FAIL + 1) {
            match self.download_component(component) {
                Ok(digest) => return DownloadOutcome::Downloaded(digest),
                Err(err) => {
                    warn!(error = %err, package = %component.package, attempt, "ota component download attempt failed");
                    if attempt > MAX_BLOCK_RESUME_BEFORE_FAIL {
                        return DownloadOutcome::Failed;
                    }
                    thread::sleep(RESUME_DELAY);
                }
            }
        }
        DownloadOutcome::Failed
    }

    /// Blockwise-downloads `component.uri`, decompressing, hashing, and flashing
    /// each block as it arrives (SPEC_FULL §4.G′, the decompression pipeline).
    /// Returns the SHA-256 digest of the decompressed stream on success.
    fn download_component(&mut self, component: &Component) -> orbit_core::error::Result<[u8; 32]> {
        let (tx, rx) = mpsc::channel::<BlockEvent>();
        let on_block = Box::new(move |event: BlockEvent| {
            let _ = tx.send(event);
        });
        self.client.get_block(".u/", component.uri.clone(), CONTENT_FORMAT_OCTET_STREAM, self.block_size, on_block)?;

        let mut hasher = Sha256::new();
        let mut decompressor: Box<dyn Decompressor> =
            if component.compressed { (self.decompressor_factory)() } else { Box::new(PassthroughDecompressor) };
        let mut stats = BlockLatencyStats::new();
        let mut block_started = Instant::now();

        loop {
            let event = rx.recv_timeout(self.block_timeout).map_err(|_| orbit_core::error::Error::Timeout)?;
            stats.record(block_started.elapsed());
            block_started = Instant::now();

            let plaintext = decompressor.push(&event.data)?;
            hasher.update(&plaintext);
            self.bootloader.write_block(event.index as u64 * event.block_size as u64, &plaintext)?;

            if event.is_last {
                let digest = hasher.finalize();
                let mut out = [0u8; 32];
                out.copy_from_slice(&digest);
                info!(
                    package = %component.package,
                    min_ms = stats.min_ms(),
                    ema_ms = stats.ema_ms(),
                    max_ms = stats.max_ms(),
                    "ota component download complete"
                );
                return Ok(out);
            }
        }
    }
}
