//! Store trait definitions

use bikepower_api::AccessRecord;
use bikepower_util::Plate;
use chrono::{DateTime, Utc};

use crate::{AuditEvent, StoreResult};

/// Main store trait
pub trait Store: Send + Sync {
    // Access records

    /// Look up a record by plate
    fn find_by_plate(&self, plate: &Plate) -> StoreResult<Option<AccessRecord>>;

    /// Create a new record.
    ///
    /// Fails with `StoreError::Conflict` if the plate is already registered.
    /// Returns the record as stored (revision 0).
    fn insert_record(&self, record: &AccessRecord) -> StoreResult<AccessRecord>;

    /// Persist the full state of an existing record in one atomic write.
    ///
    /// The write only applies if the stored revision still equals
    /// `record.revision`; otherwise `StoreError::Stale` is returned and
    /// nothing changes. Fails with `StoreError::NotFound` if the record is
    /// gone. Returns the record with its new revision.
    fn save_record(&self, record: &AccessRecord) -> StoreResult<AccessRecord>;

    /// Every record that is ON with an expiry strictly before `now`.
    ///
    /// Returns a snapshot taken at call time; call again for a fresh one.
    fn find_expired_active(&self, now: DateTime<Utc>) -> StoreResult<Vec<AccessRecord>>;

    /// Number of registered records
    fn record_count(&self) -> StoreResult<usize>;

    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
