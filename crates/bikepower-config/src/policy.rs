//! Validated policy structures

use crate::schema::{RawConfig, RawServiceConfig};
use bikepower_util::default_data_dir;
use std::path::PathBuf;
use std::time::Duration;

/// One payment buys this much power by default
pub const DEFAULT_GRANT_SECONDS: u64 = 24 * 60 * 60;

/// Lapsed records are swept this often by default
pub const DEFAULT_SWEEP_SECONDS: u64 = 60;

/// Upper bound on a single grant
pub const MAX_GRANT_SECONDS: u64 = 366 * 24 * 60 * 60;

/// Validated policy ready for use by the core engine
#[derive(Debug, Clone, Default)]
pub struct Policy {
    /// Service configuration
    pub service: ServiceConfig,

    /// Access window timing
    pub access: AccessPolicy,
}

impl Policy {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            access: AccessPolicy {
                grant_duration: Duration::from_secs(
                    raw.access
                        .grant_duration_seconds
                        .unwrap_or(DEFAULT_GRANT_SECONDS),
                ),
                sweep_interval: Duration::from_secs(
                    raw.access
                        .sweep_interval_seconds
                        .unwrap_or(DEFAULT_SWEEP_SECONDS),
                ),
            },
        }
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            data_dir: raw.data_dir.unwrap_or_else(default_data_dir),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Timing rules for access windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPolicy {
    /// Length of the window a single payment opens
    pub grant_duration: Duration,

    /// Cadence of the background expiry sweep
    pub sweep_interval: Duration,
}

impl AccessPolicy {
    /// Grant duration as a calendar offset
    pub fn grant_window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.grant_duration)
            .unwrap_or_else(|_| chrono::Duration::seconds(MAX_GRANT_SECONDS as i64))
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            grant_duration: Duration::from_secs(DEFAULT_GRANT_SECONDS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_SECONDS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_grant_is_one_day() {
        let policy = AccessPolicy::default();
        assert_eq!(policy.grant_window(), chrono::Duration::hours(24));
        assert_eq!(policy.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn explicit_data_dir_is_kept() {
        let raw: RawConfig = toml::from_str(
            r#"
            config_version = 1
            [service]
            data_dir = "/srv/bikepower"
            "#,
        )
        .unwrap();

        let policy = Policy::from_raw(raw);
        assert_eq!(policy.service.data_dir, PathBuf::from("/srv/bikepower"));
    }
}
