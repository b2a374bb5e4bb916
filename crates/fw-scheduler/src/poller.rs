//! Due-trip poller.
//!
//! One tick: select due trips, fan them out over the bounded worker pool,
//! wait for all workers (ticks never overlap), and recompute
//! `next_check_at` per trip from the cycle report.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use fw_common::Trip;
use fw_engine::NotificationsEngine;
use fw_store::{TripPatch, TripStore};

use crate::intervals;
use crate::{SchedulerError, SchedulerSettings};

pub struct DueTripPoller {
    settings: SchedulerSettings,
    store: Arc<dyn TripStore>,
    engine: Arc<NotificationsEngine>,
    /// Consecutive ticks over the saturation threshold.
    saturated_ticks: AtomicU32,
    /// Tick-interval doubling exponent while saturated.
    slowdown_exponent: AtomicU32,
}

impl DueTripPoller {
    pub fn new(
        settings: SchedulerSettings,
        store: Arc<dyn TripStore>,
        engine: Arc<NotificationsEngine>,
    ) -> Self {
        Self {
            settings,
            store,
            engine,
            saturated_ticks: AtomicU32::new(0),
            slowdown_exponent: AtomicU32::new(0),
        }
    }

    /// Tick interval with the saturation slowdown applied.
    pub fn effective_tick(&self) -> StdDuration {
        let exponent = self.slowdown_exponent.load(Ordering::Relaxed);
        self.settings.tick * 2u32.saturating_pow(exponent)
    }

    pub async fn run_tick(&self) -> Result<(), SchedulerError> {
        let now = Utc::now();
        let due = self.store.trips_due(now).await?;
        if due.is_empty() {
            debug!("no due trips this tick");
            self.note_queue_depth(0);
            return Ok(());
        }

        info!(count = due.len(), "processing due trips");
        metrics::gauge!("scheduler.due_trips").set(due.len() as f64);
        self.note_queue_depth(due.len());

        let semaphore = Arc::new(Semaphore::new(self.settings.workers));
        let mut workers = JoinSet::new();

        for trip in due {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let engine = self.engine.clone();
            let store = self.store.clone();
            let cycle_timeout = self.settings.cycle_timeout;
            workers.spawn(async move {
                let _permit = permit;
                process_one(engine, store, trip, cycle_timeout).await;
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "trip worker panicked");
            }
        }
        Ok(())
    }

    /// Saturation back-pressure: two consecutive ticks with the due queue
    /// above `saturation_factor * workers` double the tick interval; a
    /// drained queue restores it.
    fn note_queue_depth(&self, depth: usize) {
        let threshold = self.settings.saturation_factor * self.settings.workers;
        if depth > threshold {
            let streak = self.saturated_ticks.fetch_add(1, Ordering::Relaxed) + 1;
            if streak >= 2 {
                self.slowdown_exponent
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |e| {
                        Some((e + 1).min(MAX_SLOWDOWN_EXPONENT))
                    })
                    .ok();
                warn!(
                    depth,
                    threshold,
                    tick_s = self.effective_tick().as_secs(),
                    "due queue saturated, slowing tick"
                );
                metrics::counter!("scheduler.saturation_events_total").increment(1);
            }
        } else {
            self.saturated_ticks.store(0, Ordering::Relaxed);
            if self.slowdown_exponent.swap(0, Ordering::Relaxed) > 0 {
                info!("due queue drained, tick interval restored");
            }
        }
    }
}

const MAX_SLOWDOWN_EXPONENT: u32 = 5;

/// Drive one trip through the engine and reschedule it. A cycle that
/// exceeds the timeout is abandoned; partial state stays as written and
/// the trip is rescheduled by the normal formula.
async fn process_one(
    engine: Arc<NotificationsEngine>,
    store: Arc<dyn TripStore>,
    trip: Trip,
    cycle_timeout: StdDuration,
) {
    let started = Utc::now();
    let outcome = tokio::time::timeout(cycle_timeout, engine.process_due_trip(&trip, started)).await;

    let (status, arrival_estimate) = match outcome {
        Ok(Ok(report)) => {
            metrics::counter!("scheduler.cycles_total").increment(1);
            (report.status, report.arrival_estimate)
        }
        Ok(Err(e)) => {
            error!(trip_id = %trip.id, error = %e, "trip cycle failed");
            metrics::counter!("scheduler.cycle_errors_total").increment(1);
            (trip.status, None)
        }
        Err(_) => {
            warn!(
                trip_id = %trip.id,
                timeout_s = cycle_timeout.as_secs(),
                "trip cycle exceeded timeout, abandoned"
            );
            metrics::counter!("scheduler.cycle_timeouts_total").increment(1);
            (trip.status, None)
        }
    };

    let next = intervals::next_check(trip.departure_utc, Utc::now(), status, arrival_estimate);
    if let Err(e) = store
        .update_trip(trip.id, TripPatch::default().next_check_at(next))
        .await
    {
        error!(trip_id = %trip.id, error = %e, "failed to reschedule trip");
    } else {
        debug!(trip_id = %trip.id, next_check = ?next, "trip rescheduled");
    }
}
