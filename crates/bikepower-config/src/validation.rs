//! Configuration validation

use crate::policy::{DEFAULT_GRANT_SECONDS, DEFAULT_SWEEP_SECONDS, MAX_GRANT_SECONDS};
use crate::schema::RawConfig;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("grant_duration_seconds {seconds}s exceeds the maximum of {max}s")]
    GrantTooLong { seconds: u64, max: u64 },

    #[error("sweep_interval_seconds {sweep}s is longer than grant_duration_seconds {grant}s")]
    SweepLongerThanGrant { sweep: u64, grant: u64 },
}

/// Validate a raw configuration, collecting every problem found
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let grant = config
        .access
        .grant_duration_seconds
        .unwrap_or(DEFAULT_GRANT_SECONDS);
    let sweep = config
        .access
        .sweep_interval_seconds
        .unwrap_or(DEFAULT_SWEEP_SECONDS);

    if grant == 0 {
        errors.push(ValidationError::ZeroDuration {
            field: "grant_duration_seconds",
        });
    } else if grant > MAX_GRANT_SECONDS {
        errors.push(ValidationError::GrantTooLong {
            seconds: grant,
            max: MAX_GRANT_SECONDS,
        });
    }

    if sweep == 0 {
        errors.push(ValidationError::ZeroDuration {
            field: "sweep_interval_seconds",
        });
    }

    // A sweep slower than the grant lets whole windows pass unenforced
    if grant > 0 && sweep > grant {
        errors.push(ValidationError::SweepLongerThanGrant { sweep, grant });
    }

    errors
}
