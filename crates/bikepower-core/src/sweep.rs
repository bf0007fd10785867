//! Background expiry sweep

use bikepower_util::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::{AccessEngine, SweepReport};

/// Periodically turns off records whose window has lapsed.
///
/// Reads time from the injected [`Clock`] so tests can drive it without
/// waiting on the wall clock.
pub struct Sweeper {
    engine: Arc<AccessEngine>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(engine: Arc<AccessEngine>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            engine,
            clock,
            interval,
        }
    }

    /// Run a single pass at the clock's current time.
    ///
    /// A failed scan is logged and reported as `None`.
    pub fn run_once(&self) -> Option<SweepReport> {
        let now = self.clock.now();
        match self.engine.sweep(now) {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "Sweep pass failed, will retry next tick");
                None
            }
        }
    }

    /// Spawn the sweep loop on the current tokio runtime.
    ///
    /// The first pass runs immediately, then once per interval. A pass that
    /// overruns its slot causes the missed ticks to be dropped, not queued.
    pub fn start(self) -> SweepHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let interval = self.interval;

        info!(interval_secs = interval.as_secs(), "Sweep task starting");

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once();
                    }
                    changed = shutdown_rx.changed() => {
                        // Sender dropped counts as a stop request too
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("Sweep task exited");
        });

        SweepHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Owner of a running sweep task
pub struct SweepHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signal the task to stop and wait for it to exit
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Sweep task ended abnormally");
        }
        info!("Sweep task stopped");
    }
}
