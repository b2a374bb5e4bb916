//! Configuration loader with file and environment variable support.

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths.
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "flightwatch.toml",
    "./config/config.toml",
    "./config/flightwatch.toml",
    "/etc/flightwatch/config.toml",
];

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with env overrides applied
    /// last.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("FLIGHTWATCH_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        // HTTP
        if let Ok(val) = env::var("FLIGHTWATCH_HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http.port = port;
            }
        }
        if let Ok(val) = env::var("FLIGHTWATCH_HTTP_HOST") {
            config.http.host = val;
        }

        // Database
        if let Ok(val) = env::var("FLIGHTWATCH_DATABASE_URL").or_else(|_| env::var("DATABASE_URL"))
        {
            config.database.url = val;
        }
        if let Ok(val) = env::var("FLIGHTWATCH_DATABASE_MAX_CONNECTIONS") {
            if let Ok(n) = val.parse() {
                config.database.max_connections = n;
            }
        }

        // Flight-data provider
        if let Ok(val) = env::var("FLIGHTWATCH_FLIGHT_DATA_BASE_URL") {
            config.flight_data.base_url = val;
        }
        if let Ok(val) = env::var("FLIGHTWATCH_FLIGHT_DATA_API_KEY") {
            config.flight_data.api_key = val;
        }
        if let Ok(val) = env::var("FLIGHT_CACHE_TTL_SECONDS") {
            if let Ok(ttl) = val.parse() {
                config.flight_data.cache_ttl_seconds = ttl;
            }
        }

        // Messaging gateway
        if let Ok(val) = env::var("FLIGHTWATCH_MESSAGING_BASE_URL") {
            config.messaging.base_url = val;
        }
        if let Ok(val) = env::var("FLIGHTWATCH_MESSAGING_ACCOUNT_SID") {
            config.messaging.account_sid = val;
        }
        if let Ok(val) = env::var("FLIGHTWATCH_MESSAGING_AUTH_TOKEN") {
            config.messaging.auth_token = val;
        }
        if let Ok(val) = env::var("FLIGHTWATCH_MESSAGING_SERVICE_SID") {
            config.messaging.messaging_service_sid = val;
        }

        // Scheduler
        if let Ok(val) = env::var("FLIGHTWATCH_SCHEDULER_ENABLED") {
            config.scheduler.enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = env::var("SCHEDULER_TICK_SECONDS") {
            if let Ok(secs) = val.parse() {
                config.scheduler.tick_seconds = secs;
            }
        }
        if let Ok(val) = env::var("SCHEDULER_WORKERS") {
            if let Ok(workers) = val.parse() {
                config.scheduler.workers = workers;
            }
        }
        if let Ok(val) = env::var("FLIGHTWATCH_CYCLE_TIMEOUT_SECONDS") {
            if let Ok(secs) = val.parse() {
                config.scheduler.cycle_timeout_seconds = secs;
            }
        }

        // Notification policy
        if let Ok(val) = env::var("DELAY_COOLDOWN_MINUTES") {
            if let Ok(mins) = val.parse() {
                config.notifications.delay_cooldown_minutes = mins;
            }
        }
        if let Ok(val) = env::var("DELAY_SAME_ETA_WINDOW_HOURS") {
            if let Ok(hours) = val.parse() {
                config.notifications.delay_same_eta_window_hours = hours;
            }
        }
        if let Ok(val) = env::var("QUIET_HOURS_LOCAL") {
            config.notifications.quiet_hours_local = val;
        }
        if let Ok(val) = env::var("REMINDER_LEAD_HOURS") {
            if let Ok(hours) = val.parse() {
                config.notifications.reminder_lead_hours = hours;
            }
        }
        if let Ok(val) = env::var("BOARDING_LEAD_MINUTES") {
            if let Ok(mins) = val.parse() {
                config.notifications.boarding_lead_minutes = mins;
            }
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
