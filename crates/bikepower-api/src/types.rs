//! Access record types

use bikepower_util::Plate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether the vehicle's power line is energized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PowerState {
    On,
    #[default]
    Off,
}

impl PowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::On => "ON",
            PowerState::Off => "OFF",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ON" => Some(PowerState::On),
            "OFF" => Some(PowerState::Off),
            _ => None,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner and vehicle details captured at registration.
///
/// Stored and returned as-is; nothing in the access logic reads these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleProfile {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub id_number: Option<String>,
    #[serde(default)]
    pub vehicle_model: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
}

/// One vehicle's access state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRecord {
    /// Unique key, never changes after registration
    pub plate: Plate,

    #[serde(default)]
    pub profile: VehicleProfile,

    /// Most recent accepted payment
    pub last_payment_at: Option<DateTime<Utc>>,

    /// When the current access window lapses
    pub expires_at: Option<DateTime<Utc>>,

    pub power_state: PowerState,

    /// Write counter maintained by the store for compare-and-write
    #[serde(default)]
    pub revision: u64,
}

impl AccessRecord {
    /// A freshly registered vehicle: unpowered, never paid
    pub fn new(plate: Plate, profile: VehicleProfile) -> Self {
        Self {
            plate,
            profile,
            last_payment_at: None,
            expires_at: None,
            power_state: PowerState::Off,
            revision: 0,
        }
    }

    pub fn is_on(&self) -> bool {
        self.power_state == PowerState::On
    }

    /// Caller-facing view of this record
    pub fn status(&self) -> AccessStatus {
        AccessStatus {
            plate: self.plate.clone(),
            power_state: self.power_state,
            expires_at: self.expires_at,
        }
    }
}

/// Result of a status query or payment for a registered vehicle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessStatus {
    pub plate: Plate,
    pub power_state: PowerState,
    pub expires_at: Option<DateTime<Utc>>,
}

/// What caused a vehicle to lose power
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerOffTrigger {
    /// Noticed while answering a status query
    StatusQuery,
    /// Noticed by the periodic sweep
    Sweep,
}

impl fmt::Display for PowerOffTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerOffTrigger::StatusQuery => f.write_str("status_query"),
            PowerOffTrigger::Sweep => f.write_str("sweep"),
        }
    }
}
