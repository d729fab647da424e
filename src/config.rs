//! config.rs
//! Coordinator settings: constant defaults, overridable through `EV_SYSTEMS_*` variables.

use std::{
    env,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::controller::base::DEFAULT_REFRESH_PERIOD;
use crate::dispatch::dispatcher::DEFAULT_POLL_INTERVAL;
use crate::error::ConfigError;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:4000";
pub const DEFAULT_FIXTURE_DIR: &str = "data/fixtures";
pub const DEFAULT_DATA_DIR: &str = "data/logs";

pub const ENV_LISTEN: &str = "EV_SYSTEMS_LISTEN";
pub const ENV_REFRESH_US: &str = "EV_SYSTEMS_REFRESH_US";
pub const ENV_FIXTURES: &str = "EV_SYSTEMS_FIXTURES";
pub const ENV_DATA_DIR: &str = "EV_SYSTEMS_DATA_DIR";
pub const ENV_REQUEST_LOG: &str = "EV_SYSTEMS_REQUEST_LOG";

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    pub listen_addr: SocketAddr,
    pub refresh_period: Duration,
    pub fixture_dir: PathBuf,
    /// Where the request log and metrics summary go. `None` writes nothing.
    pub data_dir: Option<PathBuf>,
    pub request_log: bool,
    pub poll_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 4000)),
            refresh_period: DEFAULT_REFRESH_PERIOD,
            fixture_dir: PathBuf::from(DEFAULT_FIXTURE_DIR),
            data_dir: Some(PathBuf::from(DEFAULT_DATA_DIR)),
            request_log: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Applies overrides from `lookup` on top of the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(raw) = lookup(ENV_LISTEN) {
            cfg.listen_addr = raw.trim().parse().map_err(|e: std::net::AddrParseError| {
                invalid(ENV_LISTEN, &raw, e.to_string())
            })?;
        }

        if let Some(raw) = lookup(ENV_REFRESH_US) {
            let us: u64 = raw
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| invalid(ENV_REFRESH_US, &raw, e.to_string()))?;
            if us == 0 {
                return Err(invalid(ENV_REFRESH_US, &raw, "period must be positive".into()));
            }
            cfg.refresh_period = Duration::from_micros(us);
        }

        if let Some(raw) = lookup(ENV_FIXTURES) {
            cfg.fixture_dir = PathBuf::from(raw);
        }

        if let Some(raw) = lookup(ENV_DATA_DIR) {
            cfg.data_dir = if raw.is_empty() { None } else { Some(PathBuf::from(raw)) };
        }

        if let Some(raw) = lookup(ENV_REQUEST_LOG) {
            cfg.request_log = match raw.trim() {
                "0" | "false" | "off" => false,
                "1" | "true" | "on" => true,
                _ => return Err(invalid(ENV_REQUEST_LOG, &raw, "expected 0 or 1".into())),
            };
        }

        Ok(cfg)
    }

    /// Settings for tests and benches: no files written, fast shutdown polling.
    pub fn ephemeral() -> Self {
        Self {
            data_dir: None,
            request_log: false,
            poll_interval: Duration::from_millis(5),
            ..Self::default()
        }
    }

    pub fn fixture_path(&self, file: &str) -> PathBuf {
        self.fixture_dir.join(file)
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }
}

fn invalid(key: &'static str, value: &str, reason: String) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason,
    }
}
