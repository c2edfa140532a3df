//! Device-identity and engine overlay configuration, loaded the way
//! `bouncer-observer`'s `ObserverConfig` and the authenticator service's
//! `serdeconv`-loaded config load theirs: compiled-in defaults overridden by an
//! optional file, read through the `config` crate.

use orbit_core::config::ClientConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// `device-id@project-id`, per spec §6 "Transport" (PSK identity convention).
    pub psk_identity: String,
    /// Name of the component this device's bootloader tracks (spec simplifies to
    /// one managed component per agent -- see DESIGN.md).
    pub primary_package: String,
    pub engine: ClientConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            psk_identity: String::new(),
            primary_package: "main".into(),
            engine: ClientConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Loads `orbit-agent.toml` from the current directory if present, layered over
    /// the compiled-in defaults; environment variables prefixed `ORBIT_` override
    /// both (e.g. `ORBIT_PSK_IDENTITY`).
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("orbit-agent").required(false))
            .add_source(config::Environment::with_prefix("ORBIT").separator("__"))
            .build()?;
        Ok(settings.try_deserialize::<AgentConfig>()?)
    }
}
