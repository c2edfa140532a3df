//! Device-side CoAP-over-DTLS client core: mailbox, token allocator, pending-request
//! tracker, observation registry, blockwise transfer, and the single-worker-thread
//! request engine built on top of them. Feature encoders (`orbit-features`) and the
//! OTA state machine (`orbit-ota`) are built on the [`Client`] this crate exports;
//! neither the wire codec nor the engine know anything about either.

pub mod blockwise;
pub mod client;
pub mod coap;
pub mod config;
pub mod credential;
pub mod engine;
pub mod error;
pub mod mailbox;
pub mod observation;
pub mod pending;
pub mod stats;
pub mod token;
pub mod transport;

pub use client::Client;
pub use config::ClientConfig;
pub use credential::{Credential, PskCredential, X509Credential};
pub use engine::ClientEvent;
pub use error::{CoapCode, Error, Result};
pub use stats::BlockLatencyStats;
pub use token::Token;
pub use transport::{DtlsTransport, LoopbackTransport};
