//! Status reports the device posts to `.u/c/<package>` (spec §4.G, "Report payload").
//!
//! State and reason numbering follows `include/golioth/ota.h`'s enum declaration
//! order in original_source -- the wire format spec.md mandates is CBOR, not the C
//! enum's numeric layout, but there is no reason to diverge from a numbering the
//! cloud platform already expects.

use ciborium::value::Value;
use orbit_core::client::Client;
use orbit_core::error::{Error, Result};
use std::thread;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaState {
    Idle = 0,
    Downloading = 1,
    Downloaded = 2,
    Updating = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaReason {
    Ready = 0,
    FirmwareUpdatedSuccessfully = 1,
    NotEnoughFlashMemory = 2,
    OutOfRam = 3,
    ConnectionLost = 4,
    IntegrityCheckFailure = 5,
    UnsupportedPackageType = 6,
    InvalidUri = 7,
    FirmwareUpdateFailed = 8,
    UnsupportedProtocol = 9,
}

/// One status report for a single component (spec §4.G, "Report payload (CBOR)").
#[derive(Debug, Clone)]
pub struct StateReport {
    pub state: OtaState,
    pub reason: OtaReason,
    pub package: String,
    pub current_version: Option<String>,
    pub target_version: Option<String>,
}

impl StateReport {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut entries = vec![
            (Value::Text("s".into()), Value::Integer((self.state as i64).into())),
            (Value::Text("r".into()), Value::Integer((self.reason as i64).into())),
            (Value::Text("pkg".into()), Value::Text(self.package.clone())),
        ];
        if let Some(v) = &self.current_version {
            entries.push((Value::Text("v".into()), Value::Text(v.clone())));
        }
        if let Some(t) = &self.target_version {
            entries.push((Value::Text("t".into()), Value::Text(t.clone())));
        }
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&Value::Map(entries), &mut buf).map_err(|e| Error::Serialize(e.to_string()))?;
        Ok(buf)
    }
}

/// Posts `report` to `.u/c/<package>`, retrying on failure with its own backoff
/// (spec §4.G, "Report resilience": 5 attempts, 5 s initial delay doubling, capped
/// at 180 s). A report that never lands is logged and dropped; it never aborts the
/// surrounding OTA flow.
pub fn report_state_resilient(client: &Client, report: &StateReport) {
    const MAX_ATTEMPTS: u32 = 5;
    const INITIAL_DELAY_S: u64 = 5;
    const MAX_DELAY_S: u64 = 180;

    let payload = match report.encode() {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, package = %report.package, "failed to encode ota state report, dropping");
            return;
        }
    };

    let mut delay = Duration::from_secs(INITIAL_DELAY_S);
    for attempt in 1..=MAX_ATTEMPTS {
        let path = format!("c/{}", report.package);
        match client.post_sync(".u/", path, CONTENT_FORMAT_CBOR, payload.clone(), Duration::from_secs(10)) {
            Ok(response) if response.is_success() => return,
            Ok(response) => {
                warn!(code = ?response.code, package = %report.package, attempt, "ota state report rejected");
            }
            Err(err) => {
                warn!(error = %err, package = %report.package, attempt, "ota state report failed");
            }
        }
        if attempt == MAX_ATTEMPTS {
            warn!(package = %report.package, "ota state report exhausted retries, giving up");
            return;
        }
        thread::sleep(delay);
        delay = (delay * 2).min(Duration::from_secs(MAX_DELAY_S));
    }
}

const CONTENT_FORMAT_CBOR: u16 = 60;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_required_fields_and_omits_absent_optionals() {
        let report = StateReport {
            state: OtaState::Downloading,
            reason: OtaReason::Ready,
            package: "main".into(),
            current_version: None,
            target_version: Some("1.2.3".into()),
        };
        let encoded = report.encode().unwrap();
        let value: Value = ciborium::de::from_reader(encoded.as_slice()).unwrap();
        let map = value.as_map().unwrap();
        assert!(map.iter().any(|(k, _)| k.as_text() == Some("s")));
        assert!(map.iter().any(|(k, _)| k.as_text() == Some("t")));
        assert!(!map.iter().any(|(k, _)| k.as_text() == Some("v")));
    }
}
