//! Check a bikepower config file before deploying it.
//!
//! With no argument, checks the file `bikepowerd` would load by default.
//! Exits 0 when the file is valid, 1 otherwise.

use bikepower_config::{load_config, ConfigError, Policy, CURRENT_CONFIG_VERSION};
use bikepower_util::{default_config_path, format_duration};
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);

    match load_config(&path) {
        Ok(policy) => {
            println!("{}: ok", path.display());
            for line in summary(&policy) {
                println!("  {}", line);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: invalid", path.display());
            for line in problems(&e) {
                eprintln!("  {}", line);
            }
            ExitCode::FAILURE
        }
    }
}

fn summary(policy: &Policy) -> Vec<String> {
    vec![
        format!("data dir        {}", policy.service.data_dir.display()),
        format!("grant duration  {}", format_duration(policy.access.grant_duration)),
        format!("sweep interval  {}", format_duration(policy.access.sweep_interval)),
    ]
}

fn problems(err: &ConfigError) -> Vec<String> {
    match err {
        ConfigError::ValidationFailed { errors } => errors.iter().map(|e| e.to_string()).collect(),
        ConfigError::UnsupportedVersion(found) => vec![format!(
            "config_version {} is not supported, use {}",
            found, CURRENT_CONFIG_VERSION
        )],
        other => vec![other.to_string()],
    }
}
