//! Runtime configuration loaded via OrthoConfig.
//!
//! Values come from CLI flags, `PINLEDGER_*` environment variables, or a
//! configuration file. Limits carry defaults; connection strings and price
//! overrides stay optional. Accessors assemble the plain policy structs the
//! domain services take.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use url::Url;

use crate::domain::{
    CompensationPolicy, Credits, DEFAULT_MAX_HOLD_MONTHS_PER_REQUEST, DEFAULT_MAX_LIFETIME_MONTHS,
    DEFAULT_MAX_UPLOAD_BYTES, PinPolicy, PriceTable, ReconcilerConfig, RetentionPolicy,
};

const DEFAULT_IPFS_API_URL: &str = "http://127.0.0.1:5001";
const DEFAULT_MAX_DELIVERIES: u32 = 5;
const DEFAULT_MAX_IN_FLIGHT: usize = 32;
const DEFAULT_COMPENSATION_ATTEMPTS: u32 = 3;
const DEFAULT_COMPENSATION_DELAY_MS: u64 = 100;
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1_000;
const DEFAULT_MAX_BACKOFF_MS: u64 = 60_000;
const DEFAULT_POOL_MAX_SIZE: u32 = 10;

/// Configuration for the pin ledger services and worker.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "PINLEDGER")]
pub struct PinLedgerSettings {
    /// PostgreSQL connection string.
    pub database_url: Option<String>,
    /// Maximum pooled database connections.
    #[ortho_config(default = DEFAULT_POOL_MAX_SIZE)]
    pub pool_max_size: u32,
    /// Base URL of the IPFS HTTP API.
    pub ipfs_api_url: Option<String>,
    /// Longest hold a single request may ask for, in months.
    #[ortho_config(default = DEFAULT_MAX_HOLD_MONTHS_PER_REQUEST)]
    pub max_hold_months_per_request: u32,
    /// Longest total custody per (hash, network, user), in months.
    #[ortho_config(default = DEFAULT_MAX_LIFETIME_MONTHS)]
    pub max_lifetime_months: u32,
    /// Largest accepted file upload, in bytes.
    #[ortho_config(default = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: u64,
    /// Deliveries allowed before a failing pin message is dead-lettered.
    #[ortho_config(default = DEFAULT_MAX_DELIVERIES)]
    pub max_deliveries: u32,
    /// Pin messages processed concurrently.
    #[ortho_config(default = DEFAULT_MAX_IN_FLIGHT)]
    pub max_in_flight: usize,
    /// Attempts per compensation step.
    #[ortho_config(default = DEFAULT_COMPENSATION_ATTEMPTS)]
    pub compensation_attempts: u32,
    /// Pause between compensation attempts, in milliseconds.
    #[ortho_config(default = DEFAULT_COMPENSATION_DELAY_MS)]
    pub compensation_delay_ms: u64,
    /// Idle pause between queue polls, in milliseconds.
    #[ortho_config(default = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,
    /// Redelivery delay after a pin message first fails, in milliseconds.
    #[ortho_config(default = DEFAULT_INITIAL_BACKOFF_MS)]
    pub initial_backoff_ms: u64,
    /// Longest redelivery delay, in milliseconds.
    #[ortho_config(default = DEFAULT_MAX_BACKOFF_MS)]
    pub max_backoff_ms: u64,
    /// Free tier price in micro-credits per GiB-month.
    pub price_free_micros: Option<u32>,
    /// Partner tier price in micro-credits per GiB-month.
    pub price_partner_micros: Option<u32>,
    /// Light tier price in micro-credits per GiB-month.
    pub price_light_micros: Option<u32>,
    /// Plus tier price in micro-credits per GiB-month.
    pub price_plus_micros: Option<u32>,
}

impl PinLedgerSettings {
    pub fn database_url(&self) -> Option<&str> {
        self.database_url.as_deref()
    }

    pub fn pool_max_size(&self) -> u32 {
        self.pool_max_size
    }

    /// Parsed IPFS API base URL.
    pub fn ipfs_api_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(self.ipfs_api_url.as_deref().unwrap_or(DEFAULT_IPFS_API_URL))
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_hold_months_per_request: self.max_hold_months_per_request,
            max_lifetime_months: self.max_lifetime_months,
        }
    }

    pub fn pin_policy(&self) -> PinPolicy {
        PinPolicy {
            retention: self.retention_policy(),
            max_upload_bytes: self.max_upload_bytes,
        }
    }

    /// Tier prices, falling back per tier to the built-in table.
    pub fn price_table(&self) -> PriceTable {
        let defaults = PriceTable::default();
        let pick = |value: Option<u32>, fallback: Credits| {
            value.map_or(fallback, Credits::from_small_micros)
        };
        PriceTable {
            free: pick(self.price_free_micros, defaults.free),
            partner: pick(self.price_partner_micros, defaults.partner),
            light: pick(self.price_light_micros, defaults.light),
            plus: pick(self.price_plus_micros, defaults.plus),
        }
    }

    pub fn compensation_policy(&self) -> CompensationPolicy {
        CompensationPolicy {
            max_attempts: self.compensation_attempts,
            retry_delay: Duration::from_millis(self.compensation_delay_ms),
        }
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            max_deliveries: self.max_deliveries,
            max_in_flight: self.max_in_flight,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for configuration parsing.

    use super::*;
    use std::ffi::OsString;

    use env_lock::lock_env;
    use rstest::rstest;

    const VARS: [&str; 7] = [
        "PINLEDGER_DATABASE_URL",
        "PINLEDGER_IPFS_API_URL",
        "PINLEDGER_MAX_LIFETIME_MONTHS",
        "PINLEDGER_MAX_DELIVERIES",
        "PINLEDGER_POLL_INTERVAL_MS",
        "PINLEDGER_PRICE_PLUS_MICROS",
        "PINLEDGER_INITIAL_BACKOFF_MS",
    ];

    fn load_from_empty_args() -> PinLedgerSettings {
        PinLedgerSettings::load_from_iter([OsString::from("pinledger")])
            .expect("config should load")
    }

    #[rstest]
    fn default_values_are_used_when_missing() {
        let _guard = lock_env(VARS.map(|name| (name, None::<String>)));

        let settings = load_from_empty_args();

        assert!(settings.database_url().is_none());
        assert_eq!(settings.pool_max_size(), DEFAULT_POOL_MAX_SIZE);
        assert_eq!(settings.max_deliveries, DEFAULT_MAX_DELIVERIES);
        assert_eq!(
            settings.ipfs_api_url().expect("default url parses").as_str(),
            "http://127.0.0.1:5001/"
        );
        assert_eq!(settings.retention_policy(), RetentionPolicy::default());
        assert_eq!(settings.pin_policy(), PinPolicy::default());
        assert_eq!(settings.price_table(), PriceTable::default());
        assert_eq!(settings.reconciler_config(), ReconcilerConfig::default());
        assert_eq!(settings.compensation_policy(), CompensationPolicy::default());
    }

    #[rstest]
    fn environment_overrides_are_respected() {
        let _guard = lock_env([
            ("PINLEDGER_DATABASE_URL", Some("postgres://localhost/pins".to_owned())),
            ("PINLEDGER_IPFS_API_URL", Some("http://ipfs.internal:5001".to_owned())),
            ("PINLEDGER_MAX_LIFETIME_MONTHS", Some("12".to_owned())),
            ("PINLEDGER_MAX_DELIVERIES", Some("9".to_owned())),
            ("PINLEDGER_POLL_INTERVAL_MS", Some("50".to_owned())),
            ("PINLEDGER_PRICE_PLUS_MICROS", Some("60000".to_owned())),
            ("PINLEDGER_INITIAL_BACKOFF_MS", Some("250".to_owned())),
        ]);

        let settings = load_from_empty_args();

        assert_eq!(settings.database_url(), Some("postgres://localhost/pins"));
        assert_eq!(
            settings.ipfs_api_url().expect("url parses").host_str(),
            Some("ipfs.internal")
        );
        assert_eq!(settings.retention_policy().max_lifetime_months, 12);
        let reconciler = settings.reconciler_config();
        assert_eq!(reconciler.max_deliveries, 9);
        assert_eq!(reconciler.poll_interval, Duration::from_millis(50));
        assert_eq!(reconciler.initial_backoff, Duration::from_millis(250));
        assert_eq!(reconciler.max_backoff, Duration::from_millis(DEFAULT_MAX_BACKOFF_MS));
        let prices = settings.price_table();
        assert_eq!(prices.plus.as_micros(), 60_000);
        assert_eq!(prices.free, PriceTable::default().free);
    }
}
