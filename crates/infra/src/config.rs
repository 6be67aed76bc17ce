//! Engine configuration loaded from environment variables.

use std::time::Duration;

use thiserror::Error;

use shopledger_accounting::AccountId;
use shopledger_core::BusinessCalendar;

pub const TIMEZONE_VAR: &str = "SHOPLEDGER_TIMEZONE";
pub const DEFAULT_ACCOUNT_VAR: &str = "SHOPLEDGER_DEFAULT_ACCOUNT";
pub const CACHE_TTL_VAR: &str = "SHOPLEDGER_CACHE_TTL_SECS";

const DEFAULT_CACHE_TTL_SECS: u64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: unknown timezone '{value}'")]
    Timezone { var: &'static str, value: String },

    #[error("{var}: '{value}' is not an account id")]
    Account { var: &'static str, value: String },

    #[error("{var}: '{value}' is not a number of seconds")]
    CacheTtl { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Canonical business timezone; decides which calendar day a timestamp
    /// belongs to.
    pub calendar: BusinessCalendar,
    /// Account that legacy single-amount payments are recorded against.
    pub default_account: Option<AccountId>,
    pub cache_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            calendar: BusinessCalendar::utc(),
            default_account: None,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset or blank variables keep their
    /// defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(value) = get(TIMEZONE_VAR) {
            config.calendar = BusinessCalendar::from_name(&value).map_err(|_| ConfigError::Timezone {
                var: TIMEZONE_VAR,
                value,
            })?;
        }

        if let Some(value) = get(DEFAULT_ACCOUNT_VAR) {
            let account = value.parse::<AccountId>().map_err(|_| ConfigError::Account {
                var: DEFAULT_ACCOUNT_VAR,
                value,
            })?;
            config.default_account = Some(account);
        }

        if let Some(value) = get(CACHE_TTL_VAR) {
            let secs = value.parse::<u64>().map_err(|_| ConfigError::CacheTtl {
                var: CACHE_TTL_VAR,
                value,
            })?;
            config.cache_ttl = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
    }

    #[test]
    fn reads_all_variables() {
        let account = AccountId::generate();
        let account_str = account.to_string();
        let config = EngineConfig::from_lookup(lookup(&[
            (TIMEZONE_VAR, "Asia/Dhaka"),
            (DEFAULT_ACCOUNT_VAR, account_str.as_str()),
            (CACHE_TTL_VAR, " 30 "),
        ]))
        .unwrap();
        assert_eq!(config.calendar.timezone(), chrono_tz::Asia::Dhaka);
        assert_eq!(config.default_account, Some(account));
        assert_eq!(config.cache_ttl, Duration::from_secs(30));
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = EngineConfig::from_lookup(lookup(&[(TIMEZONE_VAR, "Moon/Base")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Timezone {
                var: TIMEZONE_VAR,
                value: "Moon/Base".to_string()
            }
        );
        let err = EngineConfig::from_lookup(lookup(&[(CACHE_TTL_VAR, "soon")])).unwrap_err();
        assert!(err.to_string().contains(CACHE_TTL_VAR));
    }
}
