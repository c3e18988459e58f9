use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::engine::ReservationEngine;
use crate::models::SweepReport;

/// Shortest period the scheduler accepts; anything lower is clamped.
const MIN_PERIOD: Duration = Duration::from_millis(10);

/// Background task that periodically reverts elapsed holds.
///
/// The sweep goes through the engine like any other mutation, so it takes
/// each trip's lock in turn and never races a hold or purchase on the same
/// seat.
pub struct ExpiryScheduler {
    engine: Arc<ReservationEngine>,
    period: Duration,
}

impl ExpiryScheduler {
    pub fn new(engine: Arc<ReservationEngine>, period: Duration) -> Self {
        Self {
            engine,
            period: period.max(MIN_PERIOD),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// One sweep over every trip.
    pub async fn tick(&self) -> SweepReport {
        self.engine.sweep_expired().await
    }

    /// Sweep every period until `shutdown` turns true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(period_ms = self.period.as_millis() as u64, "Expiry scheduler started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("Expiry scheduler stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
