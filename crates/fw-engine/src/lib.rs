//! Notifications engine.
//!
//! Orchestrates one polling cycle per due trip: fetch → detect →
//! consolidate → persist → dispatch, and the dispatch pipeline itself
//! (quiet hours → gate enrichment → delay dedup → idempotency → template
//! → retry-wrapped send → log).

use chrono::Duration;

mod dedup;
mod engine;

pub use dedup::{delay_verdict, DelayVerdict};
pub use engine::{CycleReport, DispatchOutcome, NotificationsEngine};

/// Policy knobs consumed by the engine, derived from
/// [`fw_config::NotificationsConfig`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub delay_cooldown: Duration,
    pub delay_same_eta_window: Duration,
    pub quiet_start_hour: u32,
    pub quiet_end_hour: u32,
    pub reminder_lead: Duration,
    pub boarding_lead: Duration,
    /// BOARDING stays suppressed this long after a CANCELLED was sent.
    pub cancelled_boarding_suppress: Duration,
}

impl EngineConfig {
    pub fn from_notifications(
        config: &fw_config::NotificationsConfig,
    ) -> Result<Self, fw_config::ConfigError> {
        let (quiet_start_hour, quiet_end_hour) = config.quiet_hours()?;
        Ok(Self {
            delay_cooldown: Duration::minutes(config.delay_cooldown_minutes as i64),
            delay_same_eta_window: Duration::hours(config.delay_same_eta_window_hours as i64),
            quiet_start_hour,
            quiet_end_hour,
            reminder_lead: Duration::hours(config.reminder_lead_hours as i64),
            boarding_lead: Duration::minutes(config.boarding_lead_minutes as i64),
            cancelled_boarding_suppress: Duration::minutes(2),
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            delay_cooldown: Duration::minutes(15),
            delay_same_eta_window: Duration::hours(2),
            quiet_start_hour: 20,
            quiet_end_hour: 9,
            reminder_lead: Duration::hours(24),
            boarding_lead: Duration::minutes(35),
            cancelled_boarding_suppress: Duration::minutes(2),
        }
    }
}
