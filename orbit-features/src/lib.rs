//! Feature-API encoders for LightDB State, Stream, Log, RPC, Settings, Location, and
//! Gateway (spec §4.H / SPEC_FULL §4.H′). Each is a thin wrapper that builds a path,
//! serializes a payload, and calls into `orbit-core`'s [`orbit_core::client::Client`].
//! None of them know anything about the wire codec or the worker thread beneath it.

pub mod gateway;
pub mod lightdb;
pub mod location;
pub mod log;
pub mod rpc;
pub mod settings;
pub mod stream;
mod wire;

pub use gateway::Gateway;
pub use lightdb::LightDb;
pub use location::{CellularInfo, CellularType, Location, NetworkInfo, ResolvedLocation, WifiAccessPoint};
pub use log::{LogLevel, LogRecord, Logger};
pub use rpc::{RpcHandler, RpcRegistry};
pub use settings::{SettingHandler, SettingStatus, SettingsRegistry};
pub use stream::Stream;
