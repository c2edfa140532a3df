//! Stream: append-only telemetry channel, path prefix `.s/` (spec §4.H). Ack only --
//! there is no read side. Large payloads go through the blockwise upload path.

use crate::wire::{CONTENT_FORMAT_CBOR, CONTENT_FORMAT_JSON, CONTENT_FORMAT_OCTET_STREAM};
use orbit_core::client::Client;
use orbit_core::coap::{BlockWriteCallback, Response};
use orbit_core::error::{Error, Result};
use std::time::Duration;

const PREFIX: &str = ".s/";

pub struct Stream<'a> {
    client: &'a Client,
}

impl<'a> Stream<'a> {
    pub fn new(client: &'a Client) -> Self {
        Stream { client }
    }

    pub fn set_json_sync(&self, path: impl Into<String>, value: &serde_json::Value, timeout: Duration) -> Result<Response> {
        let payload = serde_json::to_vec(value).map_err(|e| Error::Serialize(e.to_string()))?;
        self.client.post_sync(PREFIX, path, CONTENT_FORMAT_JSON, payload, timeout)
    }

    pub fn set_cbor_sync<T: serde::Serialize>(&self, path: impl Into<String>, value: &T, timeout: Duration) -> Result<Response> {
        let payload = crate::wire::encode_cbor(value)?;
        self.client.post_sync(PREFIX, path, CONTENT_FORMAT_CBOR, payload, timeout)
    }

    pub fn set_bytes_sync(&self, path: impl Into<String>, bytes: Vec<u8>, timeout: Duration) -> Result<Response> {
        self.client.post_sync(PREFIX, path, CONTENT_FORMAT_OCTET_STREAM, bytes, timeout)
    }

    /// Uploads a payload too large for one datagram via Block1, driven by
    /// `on_block` (spec §4.H, "blockwise for large").
    pub fn set_blockwise(&self, path: impl Into<String>, block_size: u16, on_block: BlockWriteCallback) -> Result<()> {
        self.client.post_block(PREFIX, path, CONTENT_FORMAT_OCTET_STREAM, block_size, on_block)
    }
}
