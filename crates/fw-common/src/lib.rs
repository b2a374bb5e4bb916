use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod canonical;
pub mod logging;
pub mod retry;

// ============================================================================
// Trip
// ============================================================================

/// Normalized trip lifecycle status.
///
/// The raw provider string is preserved on every [`FlightStatusSnapshot`];
/// this enum is what the scheduler predicates and the state machine run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    Scheduled,
    Delayed,
    Boarding,
    InFlight,
    Cancelled,
    Landed,
}

impl TripStatus {
    /// Terminal trips are never polled or notified again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Cancelled | TripStatus::Landed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Scheduled => "SCHEDULED",
            TripStatus::Delayed => "DELAYED",
            TripStatus::Boarding => "BOARDING",
            TripStatus::InFlight => "IN_FLIGHT",
            TripStatus::Cancelled => "CANCELLED",
            TripStatus::Landed => "LANDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "SCHEDULED" => Some(TripStatus::Scheduled),
            "DELAYED" => Some(TripStatus::Delayed),
            "BOARDING" => Some(TripStatus::Boarding),
            "IN_FLIGHT" => Some(TripStatus::InFlight),
            "CANCELLED" => Some(TripStatus::Cancelled),
            "LANDED" => Some(TripStatus::Landed),
            _ => None,
        }
    }
}

impl Default for TripStatus {
    fn default() -> Self {
        TripStatus::Scheduled
    }
}

impl std::fmt::Display for TripStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single passenger-flight subscription.
///
/// `departure_utc` is always stored in UTC; local-time input is converted at
/// ingress. Only the scheduler/engine mutate `status`, `gate` and
/// `next_check_at` after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: Uuid,
    pub client_name: String,
    pub whatsapp: String,
    pub flight_number: String,
    pub origin_iata: String,
    pub destination_iata: String,
    pub departure_utc: DateTime<Utc>,
    pub status: TripStatus,
    #[serde(default)]
    pub gate: Option<String>,
    /// Free-form metadata (stay address, agency extras, ...).
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub client_description: Option<String>,
    #[serde(default)]
    pub agency_id: Option<Uuid>,
    /// None once the trip is terminal.
    #[serde(default)]
    pub next_check_at: Option<DateTime<Utc>>,
    pub inserted_at: DateTime<Utc>,
}

impl Trip {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// String-valued metadata lookup, ignoring empty values.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }

}

// ============================================================================
// Flight status snapshots
// ============================================================================

/// One observation of a flight from the external provider. Append-only; the
/// latest row per trip is the engine's "known" state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightStatusSnapshot {
    pub trip_id: Uuid,
    pub flight_number: String,
    /// Raw provider status string, untouched.
    pub status: String,
    pub gate_origin: Option<String>,
    pub gate_destination: Option<String>,
    pub estimated_out: Option<DateTime<Utc>>,
    pub actual_out: Option<DateTime<Utc>>,
    pub estimated_in: Option<DateTime<Utc>>,
    pub actual_in: Option<DateTime<Utc>>,
    #[serde(default)]
    pub raw: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
    pub source: String,
}

impl FlightStatusSnapshot {
    /// Best available arrival estimate (actual wins over estimated).
    pub fn arrival_estimate(&self) -> Option<DateTime<Utc>> {
        self.actual_in.or(self.estimated_in)
    }
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    ReservationConfirmation,
    Reminder24h,
    Delayed,
    GateChange,
    Cancelled,
    Boarding,
    LandingWelcome,
    ItineraryReady,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ReservationConfirmation => "RESERVATION_CONFIRMATION",
            NotificationKind::Reminder24h => "REMINDER_24H",
            NotificationKind::Delayed => "DELAYED",
            NotificationKind::GateChange => "GATE_CHANGE",
            NotificationKind::Cancelled => "CANCELLED",
            NotificationKind::Boarding => "BOARDING",
            NotificationKind::LandingWelcome => "LANDING_WELCOME",
            NotificationKind::ItineraryReady => "ITINERARY_READY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "RESERVATION_CONFIRMATION" => Some(Self::ReservationConfirmation),
            "REMINDER_24H" => Some(Self::Reminder24h),
            "DELAYED" => Some(Self::Delayed),
            "GATE_CHANGE" => Some(Self::GateChange),
            "CANCELLED" => Some(Self::Cancelled),
            "BOARDING" => Some(Self::Boarding),
            "LANDING_WELCOME" => Some(Self::LandingWelcome),
            "ITINERARY_READY" => Some(Self::ItineraryReady),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Suppressed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "SENT",
            DeliveryStatus::Failed => "FAILED",
            DeliveryStatus::Suppressed => "SUPPRESSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "SENT" => Some(Self::Sent),
            "FAILED" => Some(Self::Failed),
            "SUPPRESSED" => Some(Self::Suppressed),
            _ => None,
        }
    }
}

/// One send attempt, success or not. At most one SENT row may exist per
/// `(trip_id, kind, idempotency_hash)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationLogEntry {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub kind: NotificationKind,
    pub template_name: String,
    pub delivery_status: DeliveryStatus,
    pub provider_message_id: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub idempotency_hash: String,
    /// Rounded ETA (UTC ISO-8601) carried only by DELAYED rows, for dedup.
    pub eta_round: Option<String>,
}

// ============================================================================
// Detected changes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    StatusChange,
    GateChange,
    DepartureTimeChange,
    Cancellation,
    Boarding,
    Landing,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::StatusChange => "status_change",
            ChangeKind::GateChange => "gate_change",
            ChangeKind::DepartureTimeChange => "departure_time_change",
            ChangeKind::Cancellation => "cancellation",
            ChangeKind::Boarding => "boarding",
            ChangeKind::Landing => "landing",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transient value produced by the change detector, consumed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub kind: ChangeKind,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub notification: NotificationKind,
}

// ============================================================================
// Shared error type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum FlightwatchError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Flight data error: {0}")]
    Provider(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, FlightwatchError>;
