//! Host configuration
//!
//! The configuration comes from the environment of the process. Every value has a default so an
//! empty environment is a valid configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Adapter index the socket is bound to
pub const ADAPTER_ID_VAR: &str = "ABLE_HCI_DEVICE_ID";

/// Advertising interval in milliseconds
pub const ADVERTISING_INTERVAL_VAR: &str = "ABLE_ADVERTISING_INTERVAL";

/// Raise a discovery for every advertising report
pub const REPORT_ALL_HCI_EVENTS_VAR: &str = "ABLE_REPORT_ALL_HCI_EVENTS";

const LEGACY_ADVERTISING_INTERVAL_VAR: &str = "BLENO_ADVERTISING_INTERVAL";
const LEGACY_REPORT_ALL_HCI_EVENTS_VAR: &str = "NOBLE_REPORT_ALL_HCI_EVENTS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue { var: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::InvalidValue { var, value } => write!(f, "invalid value '{}' for {}", value, var),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The HCI adapter index, `None` uses the first adapter
    pub adapter_id: Option<u16>,
    pub advertising_interval_ms: u16,
    pub report_all_hci_events: bool,
    /// The ATT MTU requested when the local device is the central of a connection
    pub preferred_mtu: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            adapter_id: None,
            advertising_interval_ms: 20,
            report_all_hci_events: false,
            preferred_mtu: 256,
        }
    }
}

impl Config {
    /// Read the configuration from the environment of this process
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read the configuration through a lookup function
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        let lookup = |var: &'static str, legacy: Option<&'static str>| {
            lookup(var)
                .map(|value| (var, value))
                .or_else(|| legacy.and_then(|legacy| lookup(legacy).map(|value| (legacy, value))))
                .filter(|(_, value)| !value.is_empty())
        };

        if let Some((var, value)) = lookup(ADAPTER_ID_VAR, None) {
            config.adapter_id = Some(parse(var, &value)?);
        }

        if let Some((var, value)) = lookup(ADVERTISING_INTERVAL_VAR, Some(LEGACY_ADVERTISING_INTERVAL_VAR)) {
            config.advertising_interval_ms = parse(var, &value)?;
        }

        if let Some((_, value)) = lookup(REPORT_ALL_HCI_EVENTS_VAR, Some(LEGACY_REPORT_ALL_HCI_EVENTS_VAR)) {
            config.report_all_hci_events = !matches!(value.trim(), "0" | "false");
        }

        log::debug!("{:?}", config);

        Ok(config)
    }

    pub fn adapter_id(&self) -> u16 {
        self.adapter_id.unwrap_or_default()
    }
}

fn parse<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();

        move |var| map.get(var).cloned()
    }

    #[test]
    fn empty_environment_is_default() {
        assert_eq!(Ok(Config::default()), Config::from_lookup(lookup(&[])));
    }

    #[test]
    fn values_are_read() {
        let config = Config::from_lookup(lookup(&[
            (ADAPTER_ID_VAR, "1"),
            (ADVERTISING_INTERVAL_VAR, "100"),
            (REPORT_ALL_HCI_EVENTS_VAR, "yes"),
        ]))
        .unwrap();

        assert_eq!(Some(1), config.adapter_id);
        assert_eq!(100, config.advertising_interval_ms);
        assert!(config.report_all_hci_events);
    }

    #[test]
    fn legacy_names_are_fallbacks() {
        let config = Config::from_lookup(lookup(&[
            (LEGACY_ADVERTISING_INTERVAL_VAR, "50"),
            (LEGACY_REPORT_ALL_HCI_EVENTS_VAR, "1"),
        ]))
        .unwrap();

        assert_eq!(50, config.advertising_interval_ms);
        assert!(config.report_all_hci_events);

        let config = Config::from_lookup(lookup(&[
            (ADVERTISING_INTERVAL_VAR, "30"),
            (LEGACY_ADVERTISING_INTERVAL_VAR, "50"),
            (REPORT_ALL_HCI_EVENTS_VAR, "false"),
        ]))
        .unwrap();

        assert_eq!(30, config.advertising_interval_ms);
        assert!(!config.report_all_hci_events);
    }

    #[test]
    fn invalid_values() {
        assert_eq!(
            Err(ConfigError::InvalidValue {
                var: ADAPTER_ID_VAR,
                value: "hci0".to_string()
            }),
            Config::from_lookup(lookup(&[(ADAPTER_ID_VAR, "hci0")]))
        );
    }
}
