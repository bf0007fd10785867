//! Audit event types

use bikepower_api::PowerOffTrigger;
use bikepower_util::{PaymentId, Plate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Types of audit events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Service started
    ServiceStarted,

    /// Service stopped
    ServiceStopped,

    /// Configuration loaded
    ConfigLoaded {
        grant_duration_secs: u64,
        sweep_interval_secs: u64,
    },

    /// Vehicle registered
    VehicleRegistered { plate: Plate },

    /// Payment accepted, power on
    PaymentRecorded {
        plate: Plate,
        payment_id: PaymentId,
        expires_at: DateTime<Utc>,
    },

    /// Access window lapsed, power off
    PowerCut {
        plate: Plate,
        trigger: PowerOffTrigger,
        expired_at: Option<DateTime<Utc>>,
    },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self::at(event, bikepower_util::now())
    }

    /// Event stamped with an explicit time
    pub fn at(event: AuditEventType, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp,
            event,
        }
    }
}
