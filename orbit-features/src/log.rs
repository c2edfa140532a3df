//! Log: CBOR log records pushed to the logging pipeline, which rides the Stream
//! path prefix under a configured sub-path (spec §6, "Logs pipeline path
//! `.s/<configured name>` (CBOR)").

use orbit_core::client::Client;
use orbit_core::coap::Response;
use orbit_core::error::{Error, Result};
use serde::Serialize;
use std::time::Duration;

const PREFIX: &str = ".s/";
const CONTENT_FORMAT_CBOR: u16 = 60;

#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub module: String,
    pub msg: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

pub struct Logger<'a> {
    client: &'a Client,
    pipeline_path: String,
}

impl<'a> Logger<'a> {
    pub fn new(client: &'a Client, pipeline_name: impl Into<String>) -> Self {
        Logger { client, pipeline_path: pipeline_name.into() }
    }

    pub fn log_sync(&self, record: &LogRecord, timeout: Duration) -> Result<Response> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(record, &mut buf).map_err(|e| Error::Serialize(e.to_string()))?;
        self.client.post_sync(PREFIX, self.pipeline_path.clone(), CONTENT_FORMAT_CBOR, buf, timeout)
    }
}
