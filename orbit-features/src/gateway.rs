//! Gateway uplink/downlink: blockwise POST to `.pouch`, with an optional blockwise
//! downlink response (spec §4.H).

use orbit_core::client::Client;
use orbit_core::coap::{BlockReadCallback, BlockWriteCallback};
use orbit_core::error::Result;

const PATH_PREFIX: &str = "";
const PATH: &str = ".pouch";
const CONTENT_FORMAT_OCTET_STREAM: u16 = 42;

pub struct Gateway<'a> {
    client: &'a Client,
}

impl<'a> Gateway<'a> {
    pub fn new(client: &'a Client) -> Self {
        Gateway { client }
    }

    pub fn uplink(&self, block_size: u16, on_block: BlockWriteCallback) -> Result<()> {
        self.client.post_block(PATH_PREFIX, PATH, CONTENT_FORMAT_OCTET_STREAM, block_size, on_block)
    }

    pub fn downlink(&self, block_size: u16, on_block: BlockReadCallback) -> Result<()> {
        self.client.get_block(PATH_PREFIX, PATH, CONTENT_FORMAT_OCTET_STREAM, block_size, on_block)
    }
}
