//! Flight polling scheduler.
//!
//! A single wall-clock ticker drives the due-trip poller; workers process
//! trips in parallel, serially per trip. Leadership (exactly one running
//! instance) is the deployment environment's job, not ours.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use fw_engine::NotificationsEngine;
use fw_store::TripStore;

pub mod intervals;
pub mod poller;

pub use intervals::{initial_next_check, next_check};
pub use poller::DueTripPoller;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Store error: {0}")]
    Store(#[from] fw_store::StoreError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Runtime settings for the scheduler loop.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub tick: Duration,
    pub workers: usize,
    pub cycle_timeout: Duration,
    pub saturation_factor: usize,
}

impl From<&fw_config::SchedulerConfig> for SchedulerSettings {
    fn from(config: &fw_config::SchedulerConfig) -> Self {
        Self {
            enabled: config.enabled,
            tick: Duration::from_secs(config.tick_seconds),
            workers: config.workers,
            cycle_timeout: Duration::from_secs(config.cycle_timeout_seconds),
            saturation_factor: config.saturation_factor,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tick: Duration::from_secs(30),
            workers: 8,
            cycle_timeout: Duration::from_secs(90),
            saturation_factor: 10,
        }
    }
}

/// The scheduler instance. Ticks never overlap: a tick runs to completion
/// (all workers joined) before the next sleep begins.
pub struct FlightScheduler {
    settings: SchedulerSettings,
    poller: Arc<DueTripPoller>,
    running: Arc<RwLock<bool>>,
}

impl FlightScheduler {
    pub fn new(
        settings: SchedulerSettings,
        store: Arc<dyn TripStore>,
        engine: Arc<NotificationsEngine>,
    ) -> Self {
        let poller = Arc::new(DueTripPoller::new(settings.clone(), store, engine));
        Self {
            settings,
            poller,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn start(&self) {
        if !self.settings.enabled {
            info!("flight scheduler is disabled");
            return;
        }

        let mut running = self.running.write().await;
        if *running {
            warn!("scheduler already running");
            return;
        }
        *running = true;
        drop(running);

        info!(
            tick_s = self.settings.tick.as_secs(),
            workers = self.settings.workers,
            "starting flight scheduler"
        );

        let poller = self.poller.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            loop {
                if !*running.read().await {
                    break;
                }
                if let Err(e) = poller.run_tick().await {
                    error!(error = %e, "scheduler tick failed");
                }
                tokio::time::sleep(poller.effective_tick()).await;
            }
            info!("scheduler loop exited");
        });
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("flight scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
