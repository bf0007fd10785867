//! Engine error taxonomy

use bikepower_store::StoreError;
use bikepower_util::Plate;
use thiserror::Error;

/// Errors surfaced to callers of the access engine
#[derive(Debug, Error)]
pub enum AccessError {
    /// No record exists for this plate
    #[error("No vehicle registered with plate {0}")]
    NotFound(Plate),

    /// Registration attempted for a plate that already exists
    #[error("Vehicle {0} is already registered")]
    Conflict(Plate),

    /// Persistence failed; the caller may retry
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl AccessError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AccessError::NotFound(_))
    }
}

impl From<StoreError> for AccessError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(plate) => AccessError::NotFound(Plate::new(plate)),
            StoreError::Conflict(plate) => AccessError::Conflict(Plate::new(plate)),
            other => AccessError::StoreUnavailable(other.to_string()),
        }
    }
}

pub type AccessResult<T> = Result<T, AccessError>;
