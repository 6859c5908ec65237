use std::time::Duration;

use config::{Config, ConfigError, Environment};
use log::debug;
use serde::Deserialize;

use crate::facade::FacadeConfig;

/// Process-wide settings, read once by the binary and handed to the facade.
///
/// `NET_IFACE`, `SAMPLE_WINDOW_SECS` and `CONNECT_TIMEOUT_SECS` map onto the
/// fields below; a `.env` file in the working directory is honoured.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    pub net_iface: Option<String>,
    pub sample_window_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let s = Config::builder()
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Self = s.try_deserialize()?;
        debug!("Parsed settings: {:?}", settings);
        Ok(settings)
    }

    pub fn to_facade_config(&self) -> FacadeConfig {
        FacadeConfig {
            default_interface: self
                .net_iface
                .clone()
                .filter(|iface| !iface.trim().is_empty()),
            default_window_secs: self.sample_window_secs,
            connect_timeout: self
                .connect_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_load_settings() {
        unsafe {
            std::env::set_var("NET_IFACE", "enp3s0");
            std::env::set_var("CONNECT_TIMEOUT_SECS", "15");
        }

        let settings = Settings::new().expect("Failed to load settings");

        assert_eq!(settings.net_iface.as_deref(), Some("enp3s0"));
        assert_eq!(settings.connect_timeout_secs, Some(15));

        unsafe {
            std::env::remove_var("NET_IFACE");
            std::env::remove_var("CONNECT_TIMEOUT_SECS");
        }
    }

    #[test]
    fn test_to_facade_config() {
        let settings = Settings {
            net_iface: Some("eth0".into()),
            sample_window_secs: Some(10),
            connect_timeout_secs: Some(0),
        };

        let config = settings.to_facade_config();

        assert_eq!(config.default_interface.as_deref(), Some("eth0"));
        assert_eq!(config.default_window_secs, Some(10));
        assert_eq!(config.connect_timeout, None);
    }

    #[test]
    fn test_blank_interface_is_no_default() {
        let settings = Settings {
            net_iface: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(settings.to_facade_config().default_interface, None);
    }
}
