//! Settings: server pushes persistent configuration to `.c/`; the device applies
//! each key through a registered callback and reports cumulative status to
//! `.c/status` (spec §4.H). Grounded on `golioth_settings.c`'s single
//! `settings_cb`/`send_status_report` flow -- one callback per process, one status
//! report per observation notification covering every key in it.

use ciborium::value::Value;
use hashbrown::HashMap;
use orbit_core::client::Client;
use orbit_core::error::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

const PREFIX: &str = ".c/";
const CONTENT_FORMAT_CBOR: u16 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingStatus {
    Success = 0,
    KeyNotRecognized = 1,
    KeyNotValid = 2,
    ValueFormatNotValid = 3,
    ValueOutsideRange = 4,
    ValueStringTooLong = 5,
    GeneralError = 6,
}

pub type SettingHandler = Box<dyn Fn(&Value) -> SettingStatus + Send + Sync>;

#[derive(Serialize)]
struct StatusReport {
    version: i64,
    error_code: i32,
}

/// A registry of per-key setting handlers, consulted once per `.c/` notification.
#[derive(Default)]
pub struct SettingsRegistry {
    handlers: HashMap<String, SettingHandler>,
}

impl SettingsRegistry {
    pub fn new() -> Self {
        SettingsRegistry { handlers: HashMap::new() }
    }

    pub fn register(&mut self, key: impl Into<String>, handler: SettingHandler) {
        self.handlers.insert(key.into(), handler);
    }

    pub fn start(self, client: Arc<Client>) -> Result<()> {
        let registry = Arc::new(self);
        let worker = Arc::clone(&registry);
        let client_for_callback = Arc::clone(&client);
        client.observe(
            PREFIX,
            "",
            CONTENT_FORMAT_CBOR,
            Box::new(move |outcome| match outcome {
                Ok(response) => worker.handle(&client_for_callback, &response.payload),
                Err(err) => warn!(error = %err, "settings observation error"),
            }),
        )
    }

    fn handle(&self, client: &Client, payload: &[u8]) {
        let value: Value = match ciborium::de::from_reader(payload) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "failed to decode settings payload");
                return;
            }
        };
        let Some(map) = value.as_map() else {
            warn!("settings payload was not a cbor map");
            return;
        };

        let version = map
            .iter()
            .find(|(k, _)| k.as_text() == Some("version"))
            .and_then(|(_, v)| v.as_integer())
            .and_then(|i| i64::try_from(i).ok())
            .unwrap_or(0);

        let mut cumulative = SettingStatus::Success;
        for (key, setting_value) in map {
            let Some(key) = key.as_text() else { continue };
            if key == "version" {
                continue;
            }
            let status = match self.handlers.get(key) {
                Some(handler) => handler(setting_value),
                None => SettingStatus::KeyNotRecognized,
            };
            if status != SettingStatus::Success && cumulative == SettingStatus::Success {
                cumulative = status;
            }
        }

        let report = StatusReport { version, error_code: cumulative as i32 };
        let mut buf = Vec::new();
        if let Err(err) = ciborium::ser::into_writer(&report, &mut buf) {
            warn!(error = %err, "failed to encode settings status report");
            return;
        }
        if let Err(err) = client.post(PREFIX, "status", CONTENT_FORMAT_CBOR, buf, orbit_core::client::discard_outcome()) {
            warn!(error = %err, "failed to enqueue settings status report");
        }
    }
}
