// Server configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, environment-driven with sensible defaults.
///
/// Recognized variables: `PULSEBOARD_HOST`, `PULSEBOARD_PORT`,
/// `PULSEBOARD_UPSTREAM_TCP`, `PULSEBOARD_UPSTREAM_HTTP`,
/// `PULSEBOARD_DATA_DIR`, `PULSEBOARD_LIBRARY_DIR`,
/// `PULSEBOARD_SYNC_INTERVAL_SECS`.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Realtime measurement subscription address.
    pub upstream_tcp_address: String,
    /// Optional HTTP endpoint for the startup measurement snapshot.
    pub upstream_http_address: Option<String>,
    pub data_dir: PathBuf,
    /// Optional directory of shared `*.rhai` scripts.
    pub library_dir: Option<PathBuf>,
    /// How far durability may lag live state.
    pub sync_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            upstream_tcp_address: "localhost:6667".to_string(),
            upstream_http_address: Some("http://localhost:6666".to_string()),
            data_dir: PathBuf::from("data"),
            library_dir: None,
            sync_interval: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            host: std::env::var("PULSEBOARD_HOST").unwrap_or(default.host),
            port: std::env::var("PULSEBOARD_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.port),
            upstream_tcp_address: std::env::var("PULSEBOARD_UPSTREAM_TCP")
                .unwrap_or(default.upstream_tcp_address),
            upstream_http_address: std::env::var("PULSEBOARD_UPSTREAM_HTTP")
                .ok()
                .filter(|s| !s.is_empty())
                .or(default.upstream_http_address),
            data_dir: std::env::var("PULSEBOARD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.data_dir),
            library_dir: std::env::var("PULSEBOARD_LIBRARY_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            sync_interval: std::env::var("PULSEBOARD_SYNC_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.sync_interval),
        }
    }
}
