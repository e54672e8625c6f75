use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScopeError};
use crate::transport::TransportKind;

/// What to do when one source of a multi-source acquisition fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionPolicy {
    /// Abort on the first error.
    #[default]
    FailFast,
    /// Skip sources that fail with a protocol or decode error and report them in
    /// [`WaveformSet::skipped`](crate::WaveformSet::skipped). Connection errors still abort.
    BestEffort,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ScopeConfig {
    /// Host name / IP for network and socket links, device path for serial links
    pub address: String,
    pub transport: TransportKind,
    pub print_idn: bool,
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub socket_port: u16,
    /// Port of the scope's web server, used by the `http` transport
    pub http_port: u16,
    pub baud_rate: u32,
    pub policy: AcquisitionPolicy,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            transport: TransportKind::Network,
            print_idn: false,
            timeout_ms: 5000,
            connect_timeout_ms: 5000,
            socket_port: 4000,
            http_port: 80,
            baud_rate: 9600,
            policy: AcquisitionPolicy::FailFast,
        }
    }
}

impl ScopeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

pub const DEFAULT_CONFIG_FILE: &str = "tekscope.toml";

/// Load configuration with layered fallbacks: defaults, then the TOML file, then
/// `TEKSCOPE_*` environment variables.
pub fn load_config(config_path: Option<&Path>) -> Result<ScopeConfig> {
    let mut builder = Config::builder().add_source(Config::try_from(&ScopeConfig::default())?);

    match config_path {
        Some(path) if path.exists() => {
            builder = builder.add_source(File::from(path));
        }
        Some(path) => {
            return Err(ScopeError::Config(config::ConfigError::Message(format!(
                "Config file not found: {}",
                path.display()
            ))));
        }
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                builder = builder.add_source(File::with_name(DEFAULT_CONFIG_FILE));
            }
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("TEKSCOPE")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    Ok(config.try_deserialize::<ScopeConfig>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults() {
        let config = ScopeConfig::default();
        assert_eq!(config.transport, TransportKind::Network);
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.policy, AcquisitionPolicy::FailFast);
    }

    #[test]
    fn file_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("tekscope-config-{}.toml", std::process::id()));
        fs::write(
            &path,
            "address = \"192.168.3.83\"\ntransport = \"socket\"\ntimeout_ms = 1500\npolicy = \"best_effort\"\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(config.address, "192.168.3.83");
        assert_eq!(config.transport, TransportKind::Socket);
        assert_eq!(config.timeout_ms, 1500);
        assert_eq!(config.policy, AcquisitionPolicy::BestEffort);
        assert_eq!(config.socket_port, 4000);
        assert_eq!(config.http_port, 80);
    }

    #[test]
    fn missing_file_is_an_error() {
        let path = std::env::temp_dir().join("tekscope-does-not-exist.toml");
        assert!(matches!(load_config(Some(&path)), Err(ScopeError::Config(_))));
    }
}
