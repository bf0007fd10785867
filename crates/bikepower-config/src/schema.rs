//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Service-level settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Access window settings
    #[serde(default)]
    pub access: RawAccessConfig,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// Data directory for the record store
    pub data_dir: Option<PathBuf>,
}

/// Access window settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawAccessConfig {
    /// How long one payment keeps the power on (default: 24h)
    pub grant_duration_seconds: Option<u64>,

    /// How often lapsed records are swept (default: 60s)
    pub sweep_interval_seconds: Option<u64>,
}
