//! In-memory trip store for tests and local development.
//!
//! Mirrors the Postgres implementation's semantics, including the
//! filtered-unique behavior of the SENT idempotency index.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use fw_common::{
    DeliveryStatus, FlightStatusSnapshot, NotificationKind, NotificationLogEntry, Trip,
};

use crate::{NewTrip, StoreError, TripPatch, TripStore, POLL_WINDOW_AFTER_DEPARTURE_HOURS};

#[derive(Default)]
struct Inner {
    trips: Vec<Trip>,
    statuses: Vec<FlightStatusSnapshot>,
    notifications: Vec<NotificationLogEntry>,
}

#[derive(Default)]
pub struct InMemoryTripStore {
    inner: RwLock<Inner>,
}

impl InMemoryTripStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: all notification rows for a trip, insertion order.
    pub fn notification_rows(&self, trip_id: Uuid) -> Vec<NotificationLogEntry> {
        self.inner
            .read()
            .notifications
            .iter()
            .filter(|entry| entry.trip_id == trip_id)
            .cloned()
            .collect()
    }

    /// Test helper: number of stored history rows for a trip.
    pub fn status_row_count(&self, trip_id: Uuid) -> usize {
        self.inner
            .read()
            .statuses
            .iter()
            .filter(|s| s.trip_id == trip_id)
            .count()
    }
}

#[async_trait]
impl TripStore for InMemoryTripStore {
    async fn create_trip(&self, new_trip: NewTrip) -> Result<Trip, StoreError> {
        let mut inner = self.inner.write();
        let departure_day = new_trip.departure_utc.date_naive();
        let duplicate = inner.trips.iter().any(|t| {
            t.whatsapp == new_trip.whatsapp
                && t.flight_number == new_trip.flight_number
                && t.departure_utc.date_naive() == departure_day
        });
        if duplicate {
            return Err(StoreError::Duplicate(format!(
                "trip for {} on {} already exists",
                new_trip.flight_number, departure_day
            )));
        }

        let trip = Trip {
            id: Uuid::new_v4(),
            client_name: new_trip.client_name,
            whatsapp: new_trip.whatsapp,
            flight_number: new_trip.flight_number,
            origin_iata: new_trip.origin_iata,
            destination_iata: new_trip.destination_iata,
            departure_utc: new_trip.departure_utc,
            status: new_trip.status,
            gate: None,
            metadata: new_trip.metadata,
            client_description: new_trip.client_description,
            agency_id: new_trip.agency_id,
            next_check_at: new_trip.next_check_at,
            inserted_at: Utc::now(),
        };
        inner.trips.push(trip.clone());
        Ok(trip)
    }

    async fn trips_due(&self, now: DateTime<Utc>) -> Result<Vec<Trip>, StoreError> {
        let window_start = now - Duration::hours(POLL_WINDOW_AFTER_DEPARTURE_HOURS);
        Ok(self
            .inner
            .read()
            .trips
            .iter()
            .filter(|t| {
                t.next_check_at.is_some_and(|at| at <= now)
                    && !t.status.is_terminal()
                    && t.departure_utc > window_start
            })
            .cloned()
            .collect())
    }

    async fn trip_by_id(&self, id: Uuid) -> Result<Option<Trip>, StoreError> {
        Ok(self.inner.read().trips.iter().find(|t| t.id == id).cloned())
    }

    async fn find_duplicate_trip(
        &self,
        whatsapp: &str,
        flight_number: &str,
        departure_day: NaiveDate,
    ) -> Result<Option<Trip>, StoreError> {
        Ok(self
            .inner
            .read()
            .trips
            .iter()
            .find(|t| {
                t.whatsapp == whatsapp
                    && t.flight_number == flight_number
                    && t.departure_utc.date_naive() == departure_day
            })
            .cloned())
    }

    async fn update_trip(&self, id: Uuid, patch: TripPatch) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let trip = inner
            .trips
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("trip {id}")))?;

        if let Some(status) = patch.status {
            trip.status = status;
        }
        if let Some(gate) = patch.gate {
            trip.gate = Some(gate);
        }
        if let Some(next_check_at) = patch.next_check_at {
            trip.next_check_at = next_check_at;
        }
        Ok(())
    }

    async fn append_status(&self, snapshot: FlightStatusSnapshot) -> Result<(), StoreError> {
        self.inner.write().statuses.push(snapshot);
        Ok(())
    }

    async fn latest_status(
        &self,
        trip_id: Uuid,
    ) -> Result<Option<FlightStatusSnapshot>, StoreError> {
        let inner = self.inner.read();
        // Insertion order breaks recorded_at ties: scan keeps the last
        // row at equal timestamps.
        let mut latest: Option<&FlightStatusSnapshot> = None;
        for snapshot in inner.statuses.iter().filter(|s| s.trip_id == trip_id) {
            if latest.is_none_or(|l| snapshot.recorded_at >= l.recorded_at) {
                latest = Some(snapshot);
            }
        }
        Ok(latest.cloned())
    }

    async fn append_notification(&self, entry: NotificationLogEntry) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if entry.delivery_status == DeliveryStatus::Sent {
            let clash = inner.notifications.iter().any(|e| {
                e.trip_id == entry.trip_id
                    && e.kind == entry.kind
                    && e.idempotency_hash == entry.idempotency_hash
                    && e.delivery_status == DeliveryStatus::Sent
            });
            if clash {
                return Err(StoreError::Duplicate(format!(
                    "SENT {} already logged with hash {}",
                    entry.kind, entry.idempotency_hash
                )));
            }
        }
        inner.notifications.push(entry);
        Ok(())
    }

    async fn notifications_where(
        &self,
        trip_id: Uuid,
        kind: Option<NotificationKind>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<NotificationLogEntry>, StoreError> {
        Ok(self
            .inner
            .read()
            .notifications
            .iter()
            .filter(|e| e.trip_id == trip_id)
            .filter(|e| kind.is_none_or(|k| e.kind == k))
            .filter(|e| since.is_none_or(|s| e.sent_at > s))
            .cloned()
            .collect())
    }

    async fn find_sent(
        &self,
        trip_id: Uuid,
        kind: NotificationKind,
        idempotency_hash: &str,
    ) -> Result<bool, StoreError> {
        Ok(self.inner.read().notifications.iter().any(|e| {
            e.trip_id == trip_id
                && e.kind == kind
                && e.idempotency_hash == idempotency_hash
                && e.delivery_status == DeliveryStatus::Sent
        }))
    }

    async fn recent_delay_sends(
        &self,
        trip_id: Uuid,
        within: Duration,
    ) -> Result<Vec<NotificationLogEntry>, StoreError> {
        let cutoff = Utc::now() - within;
        let mut rows: Vec<NotificationLogEntry> = self
            .inner
            .read()
            .notifications
            .iter()
            .filter(|e| {
                e.trip_id == trip_id
                    && e.kind == NotificationKind::Delayed
                    && e.delivery_status == DeliveryStatus::Sent
                    && e.sent_at > cutoff
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        Ok(rows)
    }
}
