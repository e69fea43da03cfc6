//! Monitor configuration.
//!
//! The deployment contract supplies the two network endpoints through the
//! environment (`MLLP_ADDRESS`, `PAGER_ADDRESS`, both `host:port`); paths and
//! the metrics port come from CLI flags. Missing or malformed values are
//! unrecoverable configuration errors: the caller logs and exits non-zero.

use std::path::PathBuf;

/// A `host:port` pair. The host may be a name, not just an IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub mllp: Endpoint,
    pub pager: Endpoint,
    pub history_path: PathBuf,
    pub model_path: PathBuf,
    pub state_dir: PathBuf,
    pub metrics_port: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),
    #[error("{var} must be host:port, got {value:?}")]
    InvalidAddress { var: &'static str, value: String },
}

impl MonitorConfig {
    /// Assemble the config from the environment plus CLI-provided values.
    pub fn from_env(
        history_path: PathBuf,
        model_path: PathBuf,
        state_dir: PathBuf,
        metrics_port: u16,
    ) -> Result<MonitorConfig, ConfigError> {
        Ok(MonitorConfig {
            mllp: required_endpoint("MLLP_ADDRESS")?,
            pager: required_endpoint("PAGER_ADDRESS")?,
            history_path,
            model_path,
            state_dir,
            metrics_port,
        })
    }
}

fn required_endpoint(var: &'static str) -> Result<Endpoint, ConfigError> {
    let value = std::env::var(var).map_err(|_| ConfigError::MissingEnv(var))?;
    parse_endpoint(var, &value)
}

/// Split on the last colon so bare IPv4 addresses and hostnames both work.
pub fn parse_endpoint(var: &'static str, value: &str) -> Result<Endpoint, ConfigError> {
    let invalid = || ConfigError::InvalidAddress {
        var,
        value: value.to_owned(),
    };
    let (host, port) = value.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok(Endpoint {
        host: host.to_owned(),
        port,
    })
}
