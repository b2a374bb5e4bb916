//! Flightwatch configuration system.
//!
//! TOML-based configuration with environment variable override support.
//! The deployment-facing option names from the ops runbook
//! (`SCHEDULER_TICK_SECONDS`, `QUIET_HOURS_LOCAL`, ...) are recognized
//! verbatim next to the `FLIGHTWATCH_*` prefixed ones.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub flight_data: FlightDataConfig,
    pub messaging: MessagingConfig,
    pub scheduler: SchedulerConfig,
    pub notifications: NotificationsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            database: DatabaseConfig::default(),
            flight_data: FlightDataConfig::default(),
            messaging: MessagingConfig::default(),
            scheduler: SchedulerConfig::default(),
            notifications: NotificationsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load using the standard search paths and env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.workers == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler.workers must be at least 1".to_string(),
            ));
        }
        if self.scheduler.tick_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler.tick_seconds must be at least 1".to_string(),
            ));
        }
        self.notifications.quiet_hours()?;
        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Postgres configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/flightwatch".to_string(),
            max_connections: 10,
        }
    }
}

/// Flight-data provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlightDataConfig {
    pub base_url: String,
    pub api_key: String,
    pub cache_ttl_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl Default for FlightDataConfig {
    fn default() -> Self {
        Self {
            base_url: "https://aeroapi.flightaware.com/aeroapi".to_string(),
            api_key: String::new(),
            cache_ttl_seconds: 300,
            request_timeout_seconds: 20,
        }
    }
}

/// One WhatsApp template binding: provider content id plus our name for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateBinding {
    pub id: String,
    pub name: String,
}

/// Messaging gateway configuration. The template catalogue is
/// configuration, not code: each notification kind maps to a provider
/// content template id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    pub base_url: String,
    pub account_sid: String,
    pub auth_token: String,
    pub messaging_service_sid: String,
    /// kind name (e.g. "DELAYED") → template binding.
    pub templates: std::collections::BTreeMap<String, TemplateBinding>,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        let mut templates = std::collections::BTreeMap::new();
        let defaults = [
            (
                "RESERVATION_CONFIRMATION",
                "HXb777321419cee086713f1cb529d7fe51",
                "copy_confirmacion_reserva",
            ),
            (
                "REMINDER_24H",
                "HXf79f6f380e09de4f1b953f7045c6aa19",
                "recordatorio_24h",
            ),
            ("DELAYED", "HXd5b757e51d032582949292a65a5afee1", "demorado"),
            (
                "GATE_CHANGE",
                "HXd38d96ab6414b96fe214b132253c364e",
                "cambio_gate",
            ),
            ("CANCELLED", "HX1672fabd1ce98f5b7d06f1306ba3afcc", "cancelado"),
            ("BOARDING", "HX3571933547ed2f3b6e4c6dc64a84f3b7", "embarcando"),
            (
                "ITINERARY_READY",
                "HXa031416ae1602595485bfda7df043545",
                "itinerario",
            ),
            (
                "LANDING_WELCOME",
                "HXb9775d224136e998bca4772d854b7169",
                "landing_welcome_es",
            ),
        ];
        for (kind, id, name) in defaults {
            templates.insert(
                kind.to_string(),
                TemplateBinding {
                    id: id.to_string(),
                    name: name.to_string(),
                },
            );
        }
        Self {
            base_url: "https://api.twilio.com/2010-04-01".to_string(),
            account_sid: String::new(),
            auth_token: String::new(),
            messaging_service_sid: String::new(),
            templates,
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub tick_seconds: u64,
    pub workers: usize,
    pub cycle_timeout_seconds: u64,
    /// Due-queue length above `saturation_factor * workers` for two
    /// consecutive ticks doubles the tick interval until drained.
    pub saturation_factor: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_seconds: 30,
            workers: 8,
            cycle_timeout_seconds: 90,
            saturation_factor: 10,
        }
    }
}

/// Notification policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub delay_cooldown_minutes: u64,
    pub delay_same_eta_window_hours: u64,
    /// "20-09" — local quiet window at the origin airport.
    pub quiet_hours_local: String,
    pub reminder_lead_hours: u64,
    pub boarding_lead_minutes: u64,
    /// Default texts filling template slots when no value is available.
    pub messages: MessageDefaults,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            delay_cooldown_minutes: 15,
            delay_same_eta_window_hours: 2,
            quiet_hours_local: "20-09".to_string(),
            reminder_lead_hours: 24,
            boarding_lead_minutes: 35,
            messages: MessageDefaults::default(),
        }
    }
}

impl NotificationsConfig {
    /// Parse `quiet_hours_local` into `(start_hour, end_hour)`.
    pub fn quiet_hours(&self) -> Result<(u32, u32), ConfigError> {
        parse_quiet_hours(&self.quiet_hours_local)
    }
}

/// User-facing Spanish default texts. Centralized so white-label agencies
/// can override copy without a code change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageDefaults {
    pub weather_text: String,
    pub closing_text: String,
    pub gate_placeholder: String,
    pub eta_unknown_text: String,
    pub stay_placeholder: String,
    pub city_fallback: String,
}

impl Default for MessageDefaults {
    fn default() -> Self {
        Self {
            weather_text: "buen clima para volar".to_string(),
            closing_text: "¡Buen viaje!".to_string(),
            gate_placeholder: "Ver pantallas".to_string(),
            eta_unknown_text: "Por confirmar".to_string(),
            stay_placeholder: "tu alojamiento reservado".to_string(),
            city_fallback: "tu destino".to_string(),
        }
    }
}

fn parse_quiet_hours(s: &str) -> Result<(u32, u32), ConfigError> {
    let parts: Vec<&str> = s.split('-').collect();
    if parts.len() != 2 {
        return Err(ConfigError::ValidationError(format!(
            "quiet_hours_local must look like \"20-09\", got {s:?}"
        )));
    }
    let start: u32 = parts[0].trim().parse().map_err(|_| {
        ConfigError::ValidationError(format!("invalid quiet hours start in {s:?}"))
    })?;
    let end: u32 = parts[1].trim().parse().map_err(|_| {
        ConfigError::ValidationError(format!("invalid quiet hours end in {s:?}"))
    })?;
    if start > 23 || end > 23 {
        return Err(ConfigError::ValidationError(format!(
            "quiet hours out of range in {s:?}"
        )));
    }
    Ok((start, end))
}
