//! Trip state store.
//!
//! The persistence contract consumed by the scheduler and the engine:
//! trips, the append-only flight-status history, and the notification log
//! with its idempotency lookups. Backed by Postgres in production and by
//! an in-memory implementation for tests and local development.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

use fw_common::{
    FlightStatusSnapshot, NotificationKind, NotificationLogEntry, Trip, TripStatus,
};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryTripStore;
pub use postgres::PgTripStore;

/// How far past departure a trip stays in the polling window.
pub const POLL_WINDOW_AFTER_DEPARTURE_HOURS: i64 = 8;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Trip attributes known at creation time; id and `inserted_at` are
/// assigned by the store.
#[derive(Debug, Clone)]
pub struct NewTrip {
    pub client_name: String,
    pub whatsapp: String,
    pub flight_number: String,
    pub origin_iata: String,
    pub destination_iata: String,
    pub departure_utc: DateTime<Utc>,
    pub status: TripStatus,
    pub metadata: serde_json::Value,
    pub client_description: Option<String>,
    pub agency_id: Option<Uuid>,
    pub next_check_at: Option<DateTime<Utc>>,
}

/// Field-wise trip update. `None` leaves a field untouched; only
/// `next_check_at` can be explicitly set to null (terminal trips).
#[derive(Debug, Clone, Default)]
pub struct TripPatch {
    pub status: Option<TripStatus>,
    pub gate: Option<String>,
    pub next_check_at: Option<Option<DateTime<Utc>>>,
}

impl TripPatch {
    pub fn status(mut self, status: TripStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn gate(mut self, gate: impl Into<String>) -> Self {
        self.gate = Some(gate.into());
        self
    }

    pub fn next_check_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.next_check_at = Some(at);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.gate.is_none() && self.next_check_at.is_none()
    }
}

#[async_trait]
pub trait TripStore: Send + Sync {
    // ------------------------------------------------------------------
    // Trips
    // ------------------------------------------------------------------

    async fn create_trip(&self, new_trip: NewTrip) -> Result<Trip, StoreError>;

    /// Trips whose `next_check_at` has come due: non-terminal, inside the
    /// bounded polling window (`departure_utc > now - 8 h`).
    async fn trips_due(&self, now: DateTime<Utc>) -> Result<Vec<Trip>, StoreError>;

    async fn trip_by_id(&self, id: Uuid) -> Result<Option<Trip>, StoreError>;

    /// Duplicate probe on `(whatsapp, flight_number, departure day)`.
    async fn find_duplicate_trip(
        &self,
        whatsapp: &str,
        flight_number: &str,
        departure_day: NaiveDate,
    ) -> Result<Option<Trip>, StoreError>;

    async fn update_trip(&self, id: Uuid, patch: TripPatch) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Flight-status history (append-only)
    // ------------------------------------------------------------------

    async fn append_status(&self, snapshot: FlightStatusSnapshot) -> Result<(), StoreError>;

    /// Latest history row for the trip: greatest `recorded_at`, ties
    /// broken by insertion order.
    async fn latest_status(
        &self,
        trip_id: Uuid,
    ) -> Result<Option<FlightStatusSnapshot>, StoreError>;

    // ------------------------------------------------------------------
    // Notification log
    // ------------------------------------------------------------------

    /// Record a send attempt. A second SENT row for the same
    /// `(trip_id, kind, idempotency_hash)` is rejected as a duplicate.
    async fn append_notification(&self, entry: NotificationLogEntry) -> Result<(), StoreError>;

    async fn notifications_where(
        &self,
        trip_id: Uuid,
        kind: Option<NotificationKind>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<NotificationLogEntry>, StoreError>;

    /// Idempotency probe: does a SENT row already exist for this triple?
    async fn find_sent(
        &self,
        trip_id: Uuid,
        kind: NotificationKind,
        idempotency_hash: &str,
    ) -> Result<bool, StoreError>;

    /// SENT DELAYED rows within the window, newest first, for dedup.
    async fn recent_delay_sends(
        &self,
        trip_id: Uuid,
        within: Duration,
    ) -> Result<Vec<NotificationLogEntry>, StoreError>;
}
