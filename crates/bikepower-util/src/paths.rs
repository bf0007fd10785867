//! Default paths for bikepower components
//!
//! Paths are user-writable by default (no root required):
//! - Config: `$XDG_CONFIG_HOME/bikepower/config.toml` or `~/.config/bikepower/config.toml`
//! - Data: `$XDG_DATA_HOME/bikepower` or `~/.local/share/bikepower`

use std::path::PathBuf;

/// Environment variable for overriding the config file path
pub const BIKEPOWER_CONFIG_ENV: &str = "BIKEPOWER_CONFIG";

/// Environment variable for overriding the data directory
pub const BIKEPOWER_DATA_DIR_ENV: &str = "BIKEPOWER_DATA_DIR";

/// Database filename within the data directory
pub const DATABASE_FILENAME: &str = "bikepower.db";

/// Application subdirectory name
const APP_DIR: &str = "bikepower";

/// Config filename within the config directory
const CONFIG_FILENAME: &str = "config.toml";

/// Get the default config file path.
///
/// Order of precedence:
/// 1. `$XDG_CONFIG_HOME/bikepower/config.toml` (if XDG_CONFIG_HOME is set)
/// 2. `~/.config/bikepower/config.toml` (fallback)
///
/// `$BIKEPOWER_CONFIG` is handled by the CLI layer.
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILENAME);
    }

    PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILENAME)
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$BIKEPOWER_DATA_DIR` environment variable (if set)
/// 2. `$XDG_DATA_HOME/bikepower` (if XDG_DATA_HOME is set)
/// 3. `~/.local/share/bikepower` (fallback)
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(BIKEPOWER_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking BIKEPOWER_DATA_DIR env var.
/// Used for default values in configs where the env var is checked separately.
fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    // Last resort
    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_contains_bikepower() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("bikepower"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn data_dir_contains_bikepower() {
        let path = data_dir_without_env();
        assert!(path.to_string_lossy().contains("bikepower"));
    }
}
