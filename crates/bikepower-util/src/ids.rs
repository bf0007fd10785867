//! Strongly-typed identifiers for bikepower

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Number plate of a registered vehicle.
///
/// Plates are compared exactly as given: `KAA123A` and `kaa123a` are
/// different vehicles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plate(String);

impl Plate {
    pub fn new(plate: impl Into<String>) -> Self {
        Self(plate.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Plate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Plate {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Plate {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for an accepted payment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentId(Uuid);

impl PaymentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plate_is_case_sensitive() {
        let upper = Plate::new("KAA123A");
        let same = Plate::from("KAA123A");
        let lower = Plate::new("kaa123a");

        assert_eq!(upper, same);
        assert_ne!(upper, lower);
    }

    #[test]
    fn payment_id_uniqueness() {
        let p1 = PaymentId::new();
        let p2 = PaymentId::new();
        assert_ne!(p1, p2);
    }

    #[test]
    fn ids_serialize_deserialize() {
        let plate = Plate::new("KAA123A");
        let json = serde_json::to_string(&plate).unwrap();
        assert_eq!(json, "\"KAA123A\"");
        let parsed: Plate = serde_json::from_str(&json).unwrap();
        assert_eq!(plate, parsed);

        let payment_id = PaymentId::new();
        let json = serde_json::to_string(&payment_id).unwrap();
        let parsed: PaymentId = serde_json::from_str(&json).unwrap();
        assert_eq!(payment_id, parsed);
    }
}
