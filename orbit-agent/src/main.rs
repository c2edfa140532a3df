//! Thin binary wiring together the request engine, the OTA state machine, and the
//! feature APIs -- the device-side analogue of the pack's thin service `main`s
//! (`bouncer-observer`, `ferrex-server`). A real board port supplies its own
//! `DtlsTransport` and `Bootloader`; this binary logs clearly when it's running
//! without either so the gap is visible rather than silent (spec §1 Non-goals,
//! "transport-layer DTLS" and "the bootloader and flash driver" are both external
//! collaborators).

mod agent_config;
mod unimplemented_bootloader;

use agent_config::AgentConfig;
use orbit_core::client::Client;
use orbit_core::credential::Credential;
use orbit_core::transport::DtlsTransport;
use orbit_features::{RpcRegistry, SettingsRegistry};
use orbit_ota::OtaMachine;
use std::io;
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use unimplemented_bootloader::UnimplementedBootloader;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "orbit_agent=info,orbit_core=info,orbit_ota=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AgentConfig::load()?;
    let psk_secret = std::env::var("ORBIT_PSK_SECRET").unwrap_or_default().into_bytes();
    if psk_secret.is_empty() {
        warn!("ORBIT_PSK_SECRET is not set; the handshake will be rejected by any real server");
    }

    info!(psk_identity = %config.psk_identity, primary_package = %config.primary_package, "starting orbit-agent");

    let credential = Credential::psk(config.psk_identity.clone(), psk_secret);
    let mut client = Client::create(config.engine.clone(), credential)?;

    client.start(unimplemented_transport_factory, |event| {
        info!(?event, "client connection event");
    })?;
    let client = Arc::new(client);

    let mut rpc = RpcRegistry::new();
    rpc.register(
        "double",
        Box::new(|params| {
            let n = params.first().and_then(ciborium::value::Value::as_integer).and_then(|i| i64::try_from(i).ok()).unwrap_or(0);
            Ok(ciborium::value::Value::Map(vec![(
                ciborium::value::Value::Text("value".into()),
                ciborium::value::Value::Integer((n * 2).into()),
            )]))
        }),
    );
    if let Err(err) = rpc.start(Arc::clone(&client)) {
        warn!(error = %err, "failed to register rpc observation");
    }

    let settings = SettingsRegistry::new();
    if let Err(err) = settings.start(Arc::clone(&client)) {
        warn!(error = %err, "failed to register settings observation");
    }

    let ota_client = Arc::clone(&client);
    let primary_package = config.primary_package.clone();
    let engine_config = config.engine.clone();
    let ota_thread = thread::Builder::new()
        .name("orbit-ota".into())
        .spawn(move || {
            let machine = OtaMachine::new(ota_client, UnimplementedBootloader, primary_package, &engine_config);
            machine.run();
        })
        .expect("failed to spawn ota thread");

    ota_thread.join().expect("ota thread panicked");
    Ok(())
}

/// Stands in for a board port's real DTLS transport. Always fails, so `Client`'s
/// worker thread stays in `Connecting` and retries on its normal backoff -- visible
/// in the logs -- until a real transport is wired in.
fn unimplemented_transport_factory() -> io::Result<Box<dyn DtlsTransport>> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "no DtlsTransport configured for this board port"))
}
