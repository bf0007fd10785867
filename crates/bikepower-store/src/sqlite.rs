//! SQLite-based store implementation

use bikepower_api::{AccessRecord, PowerState, VehicleProfile};
use bikepower_util::Plate;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{AuditEvent, Store, StoreError, StoreResult};

const RECORD_COLUMNS: &str = "plate, full_name, id_number, vehicle_model, phone, photo_url, \
     last_payment_at_ms, expires_at_ms, power_state, revision";

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("store lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- One row per vehicle
            CREATE TABLE IF NOT EXISTS access_records (
                plate TEXT PRIMARY KEY NOT NULL,
                full_name TEXT,
                id_number TEXT,
                vehicle_model TEXT,
                phone TEXT,
                photo_url TEXT,
                last_payment_at_ms INTEGER,
                expires_at_ms INTEGER,
                power_state TEXT NOT NULL DEFAULT 'OFF'
                    CHECK (power_state IN ('ON', 'OFF')),
                revision INTEGER NOT NULL DEFAULT 0
            );

            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_records_expiry
                ON access_records(power_state, expires_at_ms);
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

/// Row as read from SQLite, before domain conversion
struct RecordRow {
    plate: String,
    full_name: Option<String>,
    id_number: Option<String>,
    vehicle_model: Option<String>,
    phone: Option<String>,
    photo_url: Option<String>,
    last_payment_at_ms: Option<i64>,
    expires_at_ms: Option<i64>,
    power_state: String,
    revision: i64,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            plate: row.get(0)?,
            full_name: row.get(1)?,
            id_number: row.get(2)?,
            vehicle_model: row.get(3)?,
            phone: row.get(4)?,
            photo_url: row.get(5)?,
            last_payment_at_ms: row.get(6)?,
            expires_at_ms: row.get(7)?,
            power_state: row.get(8)?,
            revision: row.get(9)?,
        })
    }

    fn into_record(self) -> StoreResult<AccessRecord> {
        let power_state = PowerState::parse(&self.power_state).ok_or_else(|| {
            StoreError::Serialization(format!(
                "invalid power_state '{}' for {}",
                self.power_state, self.plate
            ))
        })?;

        Ok(AccessRecord {
            last_payment_at: millis_to_datetime(self.last_payment_at_ms, &self.plate)?,
            expires_at: millis_to_datetime(self.expires_at_ms, &self.plate)?,
            plate: Plate::new(self.plate),
            profile: VehicleProfile {
                full_name: self.full_name,
                id_number: self.id_number,
                vehicle_model: self.vehicle_model,
                phone: self.phone,
                photo_url: self.photo_url,
            },
            power_state,
            revision: self.revision.max(0) as u64,
        })
    }
}

fn millis_to_datetime(ms: Option<i64>, plate: &str) -> StoreResult<Option<DateTime<Utc>>> {
    match ms {
        None => Ok(None),
        Some(ms) => DateTime::<Utc>::from_timestamp_millis(ms)
            .map(Some)
            .ok_or_else(|| {
                StoreError::Serialization(format!("timestamp {} out of range for {}", ms, plate))
            }),
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

impl Store for SqliteStore {
    fn find_by_plate(&self, plate: &Plate) -> StoreResult<Option<AccessRecord>> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                &format!("SELECT {} FROM access_records WHERE plate = ?1", RECORD_COLUMNS),
                [plate.as_str()],
                RecordRow::from_row,
            )
            .optional()?;

        row.map(RecordRow::into_record).transpose()
    }

    fn insert_record(&self, record: &AccessRecord) -> StoreResult<AccessRecord> {
        let conn = self.conn()?;

        let result = conn.execute(
            &format!(
                "INSERT INTO access_records ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0)",
                RECORD_COLUMNS
            ),
            params![
                record.plate.as_str(),
                record.profile.full_name,
                record.profile.id_number,
                record.profile.vehicle_model,
                record.profile.phone,
                record.profile.photo_url,
                record.last_payment_at.map(|t| t.timestamp_millis()),
                record.expires_at.map(|t| t.timestamp_millis()),
                record.power_state.as_str(),
            ],
        );

        match result {
            Ok(_) => {
                debug!(plate = %record.plate, "Record inserted");
                Ok(AccessRecord {
                    revision: 0,
                    ..record.clone()
                })
            }
            Err(e) if is_constraint_violation(&e) => {
                Err(StoreError::Conflict(record.plate.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn save_record(&self, record: &AccessRecord) -> StoreResult<AccessRecord> {
        let conn = self.conn()?;

        let changed = conn.execute(
            r#"
            UPDATE access_records
            SET full_name = ?2,
                id_number = ?3,
                vehicle_model = ?4,
                phone = ?5,
                photo_url = ?6,
                last_payment_at_ms = ?7,
                expires_at_ms = ?8,
                power_state = ?9,
                revision = revision + 1
            WHERE plate = ?1 AND revision = ?10
            "#,
            params![
                record.plate.as_str(),
                record.profile.full_name,
                record.profile.id_number,
                record.profile.vehicle_model,
                record.profile.phone,
                record.profile.photo_url,
                record.last_payment_at.map(|t| t.timestamp_millis()),
                record.expires_at.map(|t| t.timestamp_millis()),
                record.power_state.as_str(),
                record.revision as i64,
            ],
        )?;

        if changed == 1 {
            debug!(
                plate = %record.plate,
                power_state = %record.power_state,
                revision = record.revision + 1,
                "Record saved"
            );
            return Ok(AccessRecord {
                revision: record.revision + 1,
                ..record.clone()
            });
        }

        // Nothing matched: either the row is gone or someone else wrote first
        let current: Option<i64> = conn
            .query_row(
                "SELECT revision FROM access_records WHERE plate = ?1",
                [record.plate.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match current {
            None => Err(StoreError::NotFound(record.plate.to_string())),
            Some(found) => Err(StoreError::Stale {
                plate: record.plate.to_string(),
                expected: record.revision,
                found: found.max(0) as u64,
            }),
        }
    }

    fn find_expired_active(&self, now: DateTime<Utc>) -> StoreResult<Vec<AccessRecord>> {
        let conn = self.conn()?;

        // An ON record without an expiry has no valid window either
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM access_records \
             WHERE power_state = 'ON' AND (expires_at_ms IS NULL OR expires_at_ms < ?1) \
             ORDER BY expires_at_ms",
            RECORD_COLUMNS
        ))?;

        let rows = stmt.query_map([now.timestamp_millis()], RecordRow::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }

        Ok(records)
    }

    fn record_count(&self) -> StoreResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM access_records", [], |row| {
            row.get(0)
        })?;
        Ok(count.max(0) as usize)
    }

    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            let event: crate::AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
