//! Access state engine

use bikepower_api::{AccessRecord, AccessStatus, PowerOffTrigger, VehicleProfile};
use bikepower_config::AccessPolicy;
use bikepower_store::{AuditEvent, AuditEventType, Store, StoreError};
use bikepower_util::{PaymentId, Plate};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{compute_effective_state, grant_window, revoke_access, AccessError, AccessResult};

/// Read-modify-write attempts before a contended write gives up
pub const MAX_WRITE_ATTEMPTS: usize = 3;

/// Outcome of one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Lapsed active records returned by the scan
    pub scanned: usize,
    /// Records turned off by this pass
    pub deactivated: usize,
    /// Records another writer changed first
    pub skipped: usize,
    /// Records whose write failed; retried next pass
    pub failed: usize,
}

impl SweepReport {
    pub fn changed_anything(&self) -> bool {
        self.deactivated > 0
    }
}

/// The access state engine.
///
/// The only component that changes a record's power state. All methods take
/// `&self`, so one engine can be shared between request handlers and the
/// sweeper.
pub struct AccessEngine {
    policy: AccessPolicy,
    store: Arc<dyn Store>,
}

impl AccessEngine {
    pub fn new(policy: AccessPolicy, store: Arc<dyn Store>) -> Self {
        debug!(
            grant_secs = policy.grant_duration.as_secs(),
            sweep_secs = policy.sweep_interval.as_secs(),
            "Access engine initialized"
        );

        Self { policy, store }
    }

    /// Create an unpowered record for a new vehicle
    pub fn register_vehicle(
        &self,
        plate: Plate,
        profile: VehicleProfile,
        now: DateTime<Utc>,
    ) -> AccessResult<AccessRecord> {
        let record = self.store.insert_record(&AccessRecord::new(plate, profile))?;

        info!(plate = %record.plate, "Vehicle registered");
        self.audit(
            AuditEventType::VehicleRegistered {
                plate: record.plate.clone(),
            },
            now,
        );

        Ok(record)
    }

    /// Accept a payment: power on with a fresh window starting at `now`.
    ///
    /// Unregistered plates fail with [`AccessError::NotFound`] and nothing is
    /// created.
    pub fn record_payment(&self, plate: &Plate, now: DateTime<Utc>) -> AccessResult<AccessRecord> {
        let grant = self.policy.grant_window();

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self
                .store
                .find_by_plate(plate)?
                .ok_or_else(|| AccessError::NotFound(plate.clone()))?;

            let updated = grant_window(&current, now, grant);

            match self.store.save_record(&updated) {
                Ok(saved) => {
                    let payment_id = PaymentId::new();
                    info!(
                        plate = %plate,
                        payment_id = %payment_id,
                        expires_at = ?saved.expires_at,
                        was_on = current.is_on(),
                        "Payment recorded, power on"
                    );

                    if let Some(expires_at) = saved.expires_at {
                        self.audit(
                            AuditEventType::PaymentRecorded {
                                plate: plate.clone(),
                                payment_id,
                                expires_at,
                            },
                            now,
                        );
                    }

                    return Ok(saved);
                }
                Err(StoreError::Stale { found, .. }) => {
                    debug!(plate = %plate, attempt, found, "Payment lost a write race, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(contended(plate))
    }

    /// Current state of a vehicle, applying lazy expiry.
    ///
    /// Returns `Ok(None)` for a plate that was never registered. A lapsed
    /// window is persisted as OFF before the status is returned.
    pub fn query_status(
        &self,
        plate: &Plate,
        now: DateTime<Utc>,
    ) -> AccessResult<Option<AccessStatus>> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let Some(current) = self.store.find_by_plate(plate)? else {
                return Ok(None);
            };

            let effective = compute_effective_state(&current, now);
            if !effective.transitioned {
                return Ok(Some(current.status()));
            }

            match self.store.save_record(&revoke_access(&current)) {
                Ok(saved) => {
                    self.power_cut(&saved, PowerOffTrigger::StatusQuery, now);
                    return Ok(Some(saved.status()));
                }
                Err(StoreError::Stale { found, .. }) => {
                    debug!(plate = %plate, attempt, found, "Expiry lost a write race, re-reading");
                }
                Err(StoreError::NotFound(_)) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }

        Err(contended(plate))
    }

    /// One expiry pass over every lapsed active record.
    ///
    /// A failed write on one record never stops the pass; the record stays
    /// lapsed and is picked up again next time. Only a failed scan is
    /// returned as an error.
    pub fn sweep(&self, now: DateTime<Utc>) -> AccessResult<SweepReport> {
        let candidates = self.store.find_expired_active(now)?;

        let mut report = SweepReport {
            scanned: candidates.len(),
            ..Default::default()
        };

        for record in candidates {
            if !compute_effective_state(&record, now).transitioned {
                report.skipped += 1;
                continue;
            }

            match self.store.save_record(&revoke_access(&record)) {
                Ok(saved) => {
                    self.power_cut(&saved, PowerOffTrigger::Sweep, now);
                    report.deactivated += 1;
                }
                Err(StoreError::Stale { .. }) | Err(StoreError::NotFound(_)) => {
                    debug!(plate = %record.plate, "Record changed during sweep, skipping");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(plate = %record.plate, error = %e, "Failed to deactivate lapsed record");
                    report.failed += 1;
                }
            }
        }

        if report.changed_anything() || report.failed > 0 {
            info!(
                scanned = report.scanned,
                deactivated = report.deactivated,
                skipped = report.skipped,
                failed = report.failed,
                "Sweep pass complete"
            );
        } else {
            debug!(scanned = report.scanned, "Sweep pass complete, nothing to do");
        }

        Ok(report)
    }

    fn power_cut(&self, record: &AccessRecord, trigger: PowerOffTrigger, now: DateTime<Utc>) {
        info!(
            plate = %record.plate,
            %trigger,
            expired_at = ?record.expires_at,
            "Access lapsed, power off"
        );

        self.audit(
            AuditEventType::PowerCut {
                plate: record.plate.clone(),
                trigger,
                expired_at: record.expires_at,
            },
            now,
        );
    }

    fn audit(&self, event: AuditEventType, now: DateTime<Utc>) {
        if let Err(e) = self.store.append_audit(AuditEvent::at(event, now)) {
            warn!(error = %e, "Failed to append audit event");
        }
    }
}

fn contended(plate: &Plate) -> AccessError {
    warn!(plate = %plate, attempts = MAX_WRITE_ATTEMPTS, "Giving up on contended record");
    AccessError::StoreUnavailable(format!(
        "record {} kept changing across {} attempts",
        plate, MAX_WRITE_ATTEMPTS
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bikepower_api::PowerState;
    use bikepower_store::{SqliteStore, StoreResult};
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
    }

    fn make_engine() -> (AccessEngine, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let engine = AccessEngine::new(AccessPolicy::default(), store.clone());
        (engine, store)
    }

    fn plate(s: &str) -> Plate {
        Plate::new(s)
    }

    #[test]
    fn test_registered_vehicle_starts_off() {
        let (engine, _store) = make_engine();
        engine
            .register_vehicle(plate("KAA123A"), VehicleProfile::default(), t(0))
            .unwrap();

        let status = engine.query_status(&plate("KAA123A"), t(0)).unwrap().unwrap();
        assert_eq!(status.power_state, PowerState::Off);
        assert!(status.expires_at.is_none());
    }

    #[test]
    fn test_duplicate_registration() {
        let (engine, _store) = make_engine();
        engine
            .register_vehicle(plate("KAA123A"), VehicleProfile::default(), t(0))
            .unwrap();

        let err = engine
            .register_vehicle(plate("KAA123A"), VehicleProfile::default(), t(1))
            .unwrap_err();
        assert!(matches!(err, AccessError::Conflict(p) if p == plate("KAA123A")));
    }

    #[test]
    fn test_payment_opens_window() {
        let (engine, _store) = make_engine();
        engine
            .register_vehicle(plate("KAA123A"), VehicleProfile::default(), t(0))
            .unwrap();

        let record = engine.record_payment(&plate("KAA123A"), t(0)).unwrap();
        assert_eq!(record.power_state, PowerState::On);
        assert_eq!(record.last_payment_at, Some(t(0)));
        assert_eq!(record.expires_at, Some(t(24)));
    }

    #[test]
    fn test_payment_uses_configured_grant() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let policy = AccessPolicy {
            grant_duration: std::time::Duration::from_secs(2 * 60 * 60),
            ..Default::default()
        };
        let engine = AccessEngine::new(policy, store);
        engine
            .register_vehicle(plate("KAA123A"), VehicleProfile::default(), t(0))
            .unwrap();

        let record = engine.record_payment(&plate("KAA123A"), t(0)).unwrap();
        assert_eq!(record.expires_at, Some(t(2)));
    }

    #[test]
    fn test_repeat_payment_restarts_window() {
        let (engine, _store) = make_engine();
        engine
            .register_vehicle(plate("KAA123A"), VehicleProfile::default(), t(0))
            .unwrap();

        engine.record_payment(&plate("KAA123A"), t(0)).unwrap();
        let second = engine.record_payment(&plate("KAA123A"), t(20)).unwrap();

        // 4 hours were left on the first window; they are not carried over
        assert_eq!(second.expires_at, Some(t(44)));
    }

    #[test]
    fn test_payment_for_unknown_plate_creates_nothing() {
        let (engine, store) = make_engine();

        let err = engine.record_payment(&plate("XYZ999"), t(0)).unwrap_err();
        assert!(err.is_not_found());
        assert!(store.find_by_plate(&plate("XYZ999")).unwrap().is_none());
        assert_eq!(store.record_count().unwrap(), 0);
    }

    #[test]
    fn test_unknown_plate_differs_from_off() {
        let (engine, _store) = make_engine();
        engine
            .register_vehicle(plate("KAA123A"), VehicleProfile::default(), t(0))
            .unwrap();

        assert!(engine.query_status(&plate("XYZ999"), t(0)).unwrap().is_none());
        assert!(engine.query_status(&plate("KAA123A"), t(0)).unwrap().is_some());
    }

    #[test]
    fn test_lazy_expiry_persists_off() {
        let (engine, store) = make_engine();
        engine
            .register_vehicle(plate("KAA123A"), VehicleProfile::default(), t(0))
            .unwrap();
        engine.record_payment(&plate("KAA123A"), t(0)).unwrap();

        let status = engine.query_status(&plate("KAA123A"), t(24)).unwrap().unwrap();
        assert_eq!(status.power_state, PowerState::Off);
        assert_eq!(status.expires_at, Some(t(24)));

        let stored = store.find_by_plate(&plate("KAA123A")).unwrap().unwrap();
        assert_eq!(stored.power_state, PowerState::Off);

        let audits = store.get_recent_audits(1).unwrap();
        assert!(matches!(
            audits[0].event,
            AuditEventType::PowerCut {
                trigger: PowerOffTrigger::StatusQuery,
                ..
            }
        ));
    }

    #[test]
    fn test_sweep_deactivates_only_lapsed() {
        let (engine, store) = make_engine();
        for p in ["LAPSED", "ACTIVE", "NEVERPAID"] {
            engine
                .register_vehicle(plate(p), VehicleProfile::default(), t(0))
                .unwrap();
        }
        engine.record_payment(&plate("LAPSED"), t(0)).unwrap();
        engine.record_payment(&plate("ACTIVE"), t(10)).unwrap();

        let report = engine.sweep(t(25)).unwrap();
        assert_eq!(
            report,
            SweepReport {
                scanned: 1,
                deactivated: 1,
                skipped: 0,
                failed: 0,
            }
        );

        let lapsed = store.find_by_plate(&plate("LAPSED")).unwrap().unwrap();
        let active = store.find_by_plate(&plate("ACTIVE")).unwrap().unwrap();
        assert_eq!(lapsed.power_state, PowerState::Off);
        assert_eq!(active.power_state, PowerState::On);
    }

    #[test]
    fn test_sweep_twice_is_same_as_once() {
        let (engine, store) = make_engine();
        engine
            .register_vehicle(plate("KAA123A"), VehicleProfile::default(), t(0))
            .unwrap();
        engine.record_payment(&plate("KAA123A"), t(0)).unwrap();

        engine.sweep(t(25)).unwrap();
        let after_first = store.find_by_plate(&plate("KAA123A")).unwrap().unwrap();

        let second = engine.sweep(t(25)).unwrap();
        let after_second = store.find_by_plate(&plate("KAA123A")).unwrap().unwrap();

        assert_eq!(second.scanned, 0);
        assert_eq!(after_first, after_second);
    }

    /// Wraps a real store and fails saves for chosen plates
    struct FlakyStore {
        inner: SqliteStore,
        failing: Vec<Plate>,
        /// Saves writing this state fail for plates in `failing`
        failing_state: PowerState,
        stale_once: Option<Plate>,
        saves: AtomicUsize,
    }

    impl FlakyStore {
        fn new(failing: Vec<Plate>) -> Self {
            Self {
                inner: SqliteStore::in_memory().unwrap(),
                failing,
                failing_state: PowerState::Off,
                stale_once: None,
                saves: AtomicUsize::new(0),
            }
        }
    }

    impl Store for FlakyStore {
        fn find_by_plate(&self, plate: &Plate) -> StoreResult<Option<AccessRecord>> {
            self.inner.find_by_plate(plate)
        }

        fn insert_record(&self, record: &AccessRecord) -> StoreResult<AccessRecord> {
            self.inner.insert_record(record)
        }

        fn save_record(&self, record: &AccessRecord) -> StoreResult<AccessRecord> {
            let n = self.saves.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(&record.plate) && record.power_state == self.failing_state {
                return Err(StoreError::Database("disk I/O error".into()));
            }
            if self.stale_once.as_ref() == Some(&record.plate) && n == 0 {
                return Err(StoreError::Stale {
                    plate: record.plate.to_string(),
                    expected: record.revision,
                    found: record.revision + 1,
                });
            }
            self.inner.save_record(record)
        }

        fn find_expired_active(&self, now: DateTime<Utc>) -> StoreResult<Vec<AccessRecord>> {
            self.inner.find_expired_active(now)
        }

        fn record_count(&self) -> StoreResult<usize> {
            self.inner.record_count()
        }

        fn append_audit(&self, event: AuditEvent) -> StoreResult<()> {
            self.inner.append_audit(event)
        }

        fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
            self.inner.get_recent_audits(limit)
        }

        fn is_healthy(&self) -> bool {
            self.inner.is_healthy()
        }
    }

    #[test]
    fn test_sweep_continues_past_failed_record() {
        let store = Arc::new(FlakyStore::new(vec![plate("BROKEN")]));
        let engine = AccessEngine::new(AccessPolicy::default(), store.clone());
        for p in ["BROKEN", "FINE1", "FINE2"] {
            engine
                .register_vehicle(plate(p), VehicleProfile::default(), t(0))
                .unwrap();
            engine.record_payment(&plate(p), t(0)).unwrap();
        }

        let report = engine.sweep(t(25)).unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.deactivated, 2);
        assert_eq!(report.failed, 1);

        let broken = store.find_by_plate(&plate("BROKEN")).unwrap().unwrap();
        assert_eq!(broken.power_state, PowerState::On);
        for p in ["FINE1", "FINE2"] {
            let record = store.find_by_plate(&plate(p)).unwrap().unwrap();
            assert_eq!(record.power_state, PowerState::Off);
        }
    }

    #[test]
    fn test_failed_lazy_expiry_surfaces_and_leaves_state() {
        let store = Arc::new(FlakyStore::new(vec![plate("BROKEN")]));
        let engine = AccessEngine::new(AccessPolicy::default(), store.clone());
        engine
            .register_vehicle(plate("BROKEN"), VehicleProfile::default(), t(0))
            .unwrap();
        engine.record_payment(&plate("BROKEN"), t(0)).unwrap();

        let err = engine.query_status(&plate("BROKEN"), t(30)).unwrap_err();
        assert!(matches!(err, AccessError::StoreUnavailable(_)));

        let stored = store.find_by_plate(&plate("BROKEN")).unwrap().unwrap();
        assert_eq!(stored.power_state, PowerState::On);
        assert_eq!(stored.expires_at, Some(t(24)));
    }

    #[test]
    fn test_failed_payment_surfaces_and_leaves_state() {
        let mut flaky = FlakyStore::new(vec![plate("PAID"), plate("UNPAID")]);
        flaky.failing_state = PowerState::On;
        let store = Arc::new(flaky);
        let engine = AccessEngine::new(AccessPolicy::default(), store.clone());

        // Seed one vehicle with an open window, bypassing the failing writes
        let paid = store
            .inner
            .insert_record(&AccessRecord::new(plate("PAID"), VehicleProfile::default()))
            .unwrap();
        store
            .inner
            .save_record(&grant_window(&paid, t(0), Duration::hours(24)))
            .unwrap();
        store
            .insert_record(&AccessRecord::new(plate("UNPAID"), VehicleProfile::default()))
            .unwrap();

        let err = engine.record_payment(&plate("PAID"), t(10)).unwrap_err();
        assert!(matches!(err, AccessError::StoreUnavailable(_)));
        let stored = store.find_by_plate(&plate("PAID")).unwrap().unwrap();
        assert_eq!(stored.power_state, PowerState::On);
        assert_eq!(stored.last_payment_at, Some(t(0)));
        assert_eq!(stored.expires_at, Some(t(24)));

        let err = engine.record_payment(&plate("UNPAID"), t(10)).unwrap_err();
        assert!(matches!(err, AccessError::StoreUnavailable(_)));
        let stored = store.find_by_plate(&plate("UNPAID")).unwrap().unwrap();
        assert_eq!(stored.power_state, PowerState::Off);
        assert!(stored.last_payment_at.is_none());
        assert!(stored.expires_at.is_none());

        // No payment event for a write that never landed
        let audits = store.get_recent_audits(10).unwrap();
        assert!(!audits
            .iter()
            .any(|e| matches!(e.event, AuditEventType::PaymentRecorded { .. })));
    }

    #[test]
    fn test_payment_retries_after_stale_write() {
        let mut flaky = FlakyStore::new(vec![]);
        flaky.stale_once = Some(plate("KAA123A"));
        let store = Arc::new(flaky);
        store
            .insert_record(&AccessRecord::new(plate("KAA123A"), VehicleProfile::default()))
            .unwrap();
        let engine = AccessEngine::new(AccessPolicy::default(), store.clone());

        let record = engine.record_payment(&plate("KAA123A"), t(0)).unwrap();
        assert_eq!(record.power_state, PowerState::On);
        assert_eq!(store.saves.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_payment_and_sweep_never_tear() {
        let (engine, store) = make_engine();
        let engine = Arc::new(engine);
        engine
            .register_vehicle(plate("KAA123A"), VehicleProfile::default(), t(0))
            .unwrap();
        engine.record_payment(&plate("KAA123A"), t(0)).unwrap();

        let payer = {
            let engine = engine.clone();
            std::thread::spawn(move || engine.record_payment(&plate("KAA123A"), t(25)))
        };
        let sweeper = {
            let engine = engine.clone();
            std::thread::spawn(move || engine.sweep(t(25)))
        };

        payer.join().unwrap().unwrap();
        sweeper.join().unwrap().unwrap();

        // Either order is a valid serialization, but the three fields agree
        let record = store.find_by_plate(&plate("KAA123A")).unwrap().unwrap();
        assert_eq!(record.last_payment_at, Some(t(25)));
        assert_eq!(record.expires_at, Some(t(49)));
        match record.power_state {
            PowerState::On => {}
            PowerState::Off => panic!("payment at t=25 was undone by the sweep"),
        }
    }
}
