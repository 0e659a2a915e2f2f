//! Service configuration: endpoint ports, beacon port, save-file path.
//!
//! Defaults match the well-known dsv ports; every field can be overridden
//! from the environment (`DSV_REQUEST_PORT`, `DSV_FANOUT_PORT`,
//! `DSV_INGEST_PORT`, `DSV_BEACON_PORT`, `DSV_SAVE_FILE`).

use std::path::PathBuf;

use serde::Deserialize;

/// Env var read by the binaries for the tracing filter.
pub const LOG_ENV_VAR: &str = "DSV_LOG";

const DEFAULT_REQUEST_PORT: u16 = 56787;
const DEFAULT_FANOUT_PORT: u16 = 56788;
const DEFAULT_INGEST_PORT: u16 = 56789;
const DEFAULT_BEACON_PORT: u16 = 9999;
const DEFAULT_SAVE_FILE: &str = "/var/run/dsv.save";

/// Configuration shared by the broker and the client library.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DsvConfig {
    /// Port of the request (REP) endpoint.
    pub request_port: u16,
    /// Port of the fan-out (XPUB) endpoint.
    pub fanout_port: u16,
    /// Port of the ingest (SUB) endpoint.
    pub ingest_port: u16,
    /// UDP port for the discovery beacon.
    pub beacon_port: u16,
    /// Save-file location on the broker host.
    pub save_path: PathBuf,
    /// Whether the broker speaks (and checks for) the beacon. Disabled in
    /// tests that pin the broker address instead.
    pub beacon_enabled: bool,
}

impl Default for DsvConfig {
    fn default() -> Self {
        Self {
            request_port: DEFAULT_REQUEST_PORT,
            fanout_port: DEFAULT_FANOUT_PORT,
            ingest_port: DEFAULT_INGEST_PORT,
            beacon_port: DEFAULT_BEACON_PORT,
            save_path: PathBuf::from(DEFAULT_SAVE_FILE),
            beacon_enabled: true,
        }
    }
}

impl DsvConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(port) = env_port("DSV_REQUEST_PORT") {
            config.request_port = port;
        }
        if let Some(port) = env_port("DSV_FANOUT_PORT") {
            config.fanout_port = port;
        }
        if let Some(port) = env_port("DSV_INGEST_PORT") {
            config.ingest_port = port;
        }
        if let Some(port) = env_port("DSV_BEACON_PORT") {
            config.beacon_port = port;
        }
        if let Ok(path) = std::env::var("DSV_SAVE_FILE") {
            config.save_path = PathBuf::from(path);
        }
        config
    }

    /// Endpoint for binding a broker socket on all interfaces.
    pub fn bind_endpoint(port: u16) -> String {
        format!("tcp://*:{port}")
    }

    /// Endpoint for connecting a client socket to a broker host.
    pub fn connect_endpoint(host: &str, port: u16) -> String {
        format!("tcp://{host}:{port}")
    }
}

fn env_port(var: &str) -> Option<u16> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_well_known_ports() {
        let config = DsvConfig::default();
        assert_eq!(config.request_port, 56787);
        assert_eq!(config.fanout_port, 56788);
        assert_eq!(config.ingest_port, 56789);
        assert_eq!(config.beacon_port, 9999);
        assert_eq!(config.save_path, PathBuf::from("/var/run/dsv.save"));
        assert!(config.beacon_enabled);
    }

    #[test]
    fn endpoints() {
        assert_eq!(DsvConfig::bind_endpoint(56789), "tcp://*:56789");
        assert_eq!(
            DsvConfig::connect_endpoint("10.0.0.5", 56787),
            "tcp://10.0.0.5:56787"
        );
    }

    #[test]
    fn deserializes_partial_config() {
        let config: DsvConfig =
            serde_json::from_str(r#"{"request_port": 1111, "beacon_enabled": false}"#).unwrap();
        assert_eq!(config.request_port, 1111);
        assert!(!config.beacon_enabled);
        assert_eq!(config.ingest_port, 56789);
    }
}
