//! LightDB State: cloud-hosted key/value per-device document, path prefix `.d/`
//! (spec §4.H). JSON by default, CBOR accepted on request (spec §6).

use crate::wire::{CONTENT_FORMAT_CBOR, CONTENT_FORMAT_JSON};
use orbit_core::client::Client;
use orbit_core::coap::{Callback, Response};
use orbit_core::error::{Error, Result};
use std::time::Duration;

const PREFIX: &str = ".d/";

/// Thin encoder over [`Client`] for LightDB State reads, writes, and observations.
pub struct LightDb<'a> {
    client: &'a Client,
}

impl<'a> LightDb<'a> {
    pub fn new(client: &'a Client) -> Self {
        LightDb { client }
    }

    pub fn set_json_sync(&self, path: impl Into<String>, value: &serde_json::Value, timeout: Duration) -> Result<Response> {
        let payload = serde_json::to_vec(value).map_err(|e| Error::Serialize(e.to_string()))?;
        self.client.post_sync(PREFIX, path, CONTENT_FORMAT_JSON, payload, timeout)
    }

    pub fn set_json(&self, path: impl Into<String>, value: &serde_json::Value, callback: Callback) -> Result<()> {
        let payload = serde_json::to_vec(value).map_err(|e| Error::Serialize(e.to_string()))?;
        self.client.post(PREFIX, path, CONTENT_FORMAT_JSON, payload, callback)
    }

    pub fn set_cbor_sync<T: serde::Serialize>(&self, path: impl Into<String>, value: &T, timeout: Duration) -> Result<Response> {
        let payload = crate::wire::encode_cbor(value)?;
        self.client.post_sync(PREFIX, path, CONTENT_FORMAT_CBOR, payload, timeout)
    }

    pub fn get_sync(&self, path: impl Into<String>, timeout: Duration) -> Result<Response> {
        self.client.get_sync(PREFIX, path, CONTENT_FORMAT_JSON, timeout)
    }

    pub fn get(&self, path: impl Into<String>, callback: Callback) -> Result<()> {
        self.client.get(PREFIX, path, CONTENT_FORMAT_JSON, callback)
    }

    pub fn delete_sync(&self, path: impl Into<String>, timeout: Duration) -> Result<Response> {
        self.client.delete_sync(PREFIX, path, timeout)
    }

    pub fn delete(&self, path: impl Into<String>, callback: Callback) -> Result<()> {
        self.client.delete(PREFIX, path, callback)
    }

    pub fn observe(&self, path: impl Into<String>, callback: Callback) -> Result<()> {
        self.client.observe(PREFIX, path, CONTENT_FORMAT_JSON, callback)
    }

    pub fn observe_release(&self, path: impl Into<String>) -> Result<()> {
        self.client.observe_release(PREFIX, path)
    }

    /// `set(path, v)` for a single integer value (spec §8 seed scenario 3).
    pub fn set_int(&self, path: impl Into<String>, value: i64, timeout: Duration) -> Result<Response> {
        self.set_json_sync(path, &serde_json::Value::from(value), timeout)
    }

    /// `get(path) -> v` for a single integer value, treating a `"null"` literal or
    /// a missing payload as absent (spec §8, "NULL-payload ... treated as 'absent
    /// value' on reads").
    pub fn get_int_sync(&self, path: impl Into<String>, timeout: Duration) -> Result<Option<i64>> {
        let response = self.get_sync(path, timeout)?;
        parse_optional_int(&response.payload)
    }
}

fn parse_optional_int(payload: &[u8]) -> Result<Option<i64>> {
    if payload.is_empty() || payload == b"null" {
        return Ok(None);
    }
    let value: serde_json::Value = serde_json::from_slice(payload).map_err(|e| Error::Serialize(e.to_string()))?;
    Ok(value.as_i64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_value_reads_as_none() {
        assert_eq!(parse_optional_int(b"").unwrap(), None);
        assert_eq!(parse_optional_int(b"null").unwrap(), None);
    }

    #[test]
    fn present_value_reads_as_some() {
        assert_eq!(parse_optional_int(b"42").unwrap(), Some(42));
    }
}
