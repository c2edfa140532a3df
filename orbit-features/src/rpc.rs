//! RPC: server pushes a method invocation to `.rpc/`; the device replies on
//! `.rpc/status` (spec §4.H, §8 seed scenarios 1-2). CBOR both ways.

use ciborium::value::Value;
use hashbrown::HashMap;
use orbit_core::client::Client;
use orbit_core::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

const PREFIX: &str = ".rpc/";
const CONTENT_FORMAT_CBOR: u16 = 60;
/// CoAP-analogous status for an unregistered method (spec §8 scenario 2).
const STATUS_UNAVAILABLE: i32 = 14;
const STATUS_OK: i32 = 0;

pub type RpcHandler = Box<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    method: String,
    id: String,
    #[serde(default)]
    params: Vec<Value>,
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    id: String,
    #[serde(rename = "statusCode")]
    status_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<Value>,
}

/// A registry of CBOR-invocable methods, consulted from the `.rpc/` observation
/// callback (spec §4.H′, "for RPC/Settings, also runs the inbound side").
#[derive(Default)]
pub struct RpcRegistry {
    methods: HashMap<String, RpcHandler>,
}

impl RpcRegistry {
    pub fn new() -> Self {
        RpcRegistry { methods: HashMap::new() }
    }

    pub fn register(&mut self, name: impl Into<String>, handler: RpcHandler) {
        self.methods.insert(name.into(), handler);
    }

    /// Registers the `.rpc/` observation and starts answering invocations
    /// (spec §8 seed scenarios 1-2).
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
                Err(err) => warn!(error = %err, "rpc observation error"),
            }),
        )
    }

    fn handle(&self, client: &Client, payload: &[u8]) {
        let request: RpcRequest = match ciborium::de::from_reader(payload) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "failed to decode rpc request");
                return;
            }
        };

        let response = match self.methods.get(&request.method) {
            Some(handler) => match handler(&request.params) {
                Ok(value) => RpcResponse { id: request.id, status_code: STATUS_OK, detail: Some(value) },
                Err(err) => {
                    warn!(error = %err, method = %request.method, "rpc method handler failed");
                    RpcResponse { id: request.id, status_code: STATUS_UNAVAILABLE, detail: None }
                }
            },
            None => RpcResponse { id: request.id, status_code: STATUS_UNAVAILABLE, detail: None },
        };

        let mut buf = Vec::new();
        if let Err(err) = ciborium::ser::into_writer(&response, &mut buf) {
            warn!(error = %err, "failed to encode rpc response");
            return;
        }
        if let Err(err) = client.post(PREFIX, "status", CONTENT_FORMAT_CBOR, buf, orbit_core::client::discard_outcome()) {
            warn!(error = %err, "failed to enqueue rpc response");
        }
    }
}
