//! Configuration management for Remote Torrent Server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::session::SessionParams;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub download_directory: PathBuf,
    pub incoming_port: i64,
    pub enable_upload: bool,
    pub enable_seeding: bool,
    pub auto_start: bool,
    /// Where descriptor artifacts are kept
    pub descriptor_directory: PathBuf,
    /// Wait after closing a session before binding a new one
    pub grace_period_ms: u64,
    /// 0 disables the periodic refresh
    pub refresh_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            engine: EngineConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            download_directory: PathBuf::from("./downloads"),
            incoming_port: 50007,
            enable_upload: true,
            enable_seeding: false,
            auto_start: true,
            descriptor_directory: PathBuf::from("./torrents"),
            grace_period_ms: 1000,
            refresh_interval_secs: 1,
        }
    }
}

impl EngineConfig {
    /// Operating parameters for the initial session
    pub fn session_params(&self) -> SessionParams {
        SessionParams {
            download_directory: self.download_directory.clone(),
            incoming_port: self.incoming_port,
            enable_upload: self.enable_upload,
            enable_seeding: self.enable_seeding,
            auto_start: self.auto_start,
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = EngineConfig::default();
        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("SERVER_PORT", 3000),
            },
            engine: EngineConfig {
                download_directory: env::var("DOWNLOAD_DIRECTORY")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.download_directory),
                incoming_port: parse_var("INCOMING_PORT", defaults.incoming_port),
                enable_upload: parse_var("ENABLE_UPLOAD", defaults.enable_upload),
                enable_seeding: parse_var("ENABLE_SEEDING", defaults.enable_seeding),
                auto_start: parse_var("AUTO_START", defaults.auto_start),
                descriptor_directory: env::var("DESCRIPTOR_DIRECTORY")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.descriptor_directory),
                grace_period_ms: parse_var("SESSION_GRACE_MS", defaults.grace_period_ms),
                refresh_interval_secs: parse_var(
                    "REFRESH_INTERVAL_SECS",
                    defaults.refresh_interval_secs,
                ),
            },
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        let params = config.engine.session_params();
        assert_eq!(params.incoming_port, 50007);
        assert!(params.auto_start);
        assert_eq!(config.engine.grace_period(), Duration::from_secs(1));
    }

    #[test]
    fn test_unparseable_var_falls_back() {
        // Names are unique to this test
        env::set_var("RT_TEST_BOGUS_PORT", "not-a-number");
        assert_eq!(parse_var("RT_TEST_BOGUS_PORT", 42u16), 42);
        env::set_var("RT_TEST_GOOD_FLAG", " true ");
        assert!(parse_var("RT_TEST_GOOD_FLAG", false));
        assert_eq!(parse_var("RT_TEST_UNSET_VALUE", 7u64), 7);
    }
}
