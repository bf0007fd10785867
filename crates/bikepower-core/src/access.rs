//! Pure access-window rules shared by every path that touches power state

use bikepower_api::{AccessRecord, PowerState};
use chrono::{DateTime, Duration, Utc};

/// Power state a record should have at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveState {
    pub state: PowerState,
    /// True when `state` differs from what is stored and must be persisted
    pub transitioned: bool,
}

/// Decide the power state of `record` at `now`.
///
/// An ON record whose window has closed (`now >= expires_at`) is OFF.
/// An ON record with no expiry at all has no valid window and is also OFF.
/// Everything else keeps its stored state.
pub fn compute_effective_state(record: &AccessRecord, now: DateTime<Utc>) -> EffectiveState {
    let lapsed = match (record.power_state, record.expires_at) {
        (PowerState::On, Some(expires_at)) => now >= expires_at,
        (PowerState::On, None) => true,
        (PowerState::Off, _) => false,
    };

    if lapsed {
        EffectiveState {
            state: PowerState::Off,
            transitioned: true,
        }
    } else {
        EffectiveState {
            state: record.power_state,
            transitioned: false,
        }
    }
}

/// Payment transition: a fresh window of `grant` starting at `now`.
///
/// Any time left on a previous window is discarded.
pub fn grant_window(record: &AccessRecord, now: DateTime<Utc>, grant: Duration) -> AccessRecord {
    AccessRecord {
        last_payment_at: Some(now),
        expires_at: Some(now + grant),
        power_state: PowerState::On,
        ..record.clone()
    }
}

/// Expiry transition. Keeps `expires_at` so the lapsed window stays visible.
pub fn revoke_access(record: &AccessRecord) -> AccessRecord {
    AccessRecord {
        power_state: PowerState::Off,
        ..record.clone()
    }
}
