//! Postgres trip store.
//!
//! Schema is code-driven (`init_schema`): three relations plus the
//! filtered unique index that enforces SENT idempotency at the database
//! level.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use fw_common::{
    DeliveryStatus, FlightStatusSnapshot, NotificationKind, NotificationLogEntry, Trip,
    TripStatus,
};

use crate::{NewTrip, StoreError, TripPatch, TripStore, POLL_WINDOW_AFTER_DEPARTURE_HOURS};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS trips (
        id UUID PRIMARY KEY,
        client_name TEXT NOT NULL,
        whatsapp TEXT NOT NULL,
        flight_number TEXT NOT NULL,
        origin_iata TEXT NOT NULL,
        destination_iata TEXT NOT NULL,
        departure_utc TIMESTAMPTZ NOT NULL,
        status TEXT NOT NULL DEFAULT 'SCHEDULED',
        gate TEXT,
        metadata JSONB NOT NULL DEFAULT 'null'::jsonb,
        client_description TEXT,
        agency_id UUID,
        next_check_at TIMESTAMPTZ,
        inserted_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS ux_trips_contact_flight_day
        ON trips (whatsapp, flight_number, ((timezone('UTC', departure_utc))::date))
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS ix_trips_next_check_at
        ON trips (next_check_at)
        WHERE next_check_at IS NOT NULL
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS flight_status_history (
        id BIGSERIAL PRIMARY KEY,
        trip_id UUID NOT NULL,
        flight_number TEXT NOT NULL,
        status TEXT NOT NULL,
        gate_origin TEXT,
        gate_destination TEXT,
        estimated_out TIMESTAMPTZ,
        actual_out TIMESTAMPTZ,
        estimated_in TIMESTAMPTZ,
        actual_in TIMESTAMPTZ,
        raw JSONB,
        recorded_at TIMESTAMPTZ NOT NULL,
        source TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS ix_flight_status_trip_recorded
        ON flight_status_history (trip_id, recorded_at DESC, id DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS notifications_log (
        id UUID PRIMARY KEY,
        trip_id UUID NOT NULL,
        notification_type TEXT NOT NULL,
        template_name TEXT NOT NULL,
        delivery_status TEXT NOT NULL,
        provider_message_id TEXT,
        sent_at TIMESTAMPTZ NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        error_message TEXT,
        idempotency_hash TEXT NOT NULL,
        eta_round TEXT
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS ux_notifications_sent_once
        ON notifications_log (trip_id, notification_type, idempotency_hash)
        WHERE delivery_status = 'SENT'
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS ix_notifications_trip_kind_sent
        ON notifications_log (trip_id, notification_type, sent_at DESC)
    "#,
];

pub struct PgTripStore {
    pool: PgPool,
}

impl PgTripStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("trip store schema initialized");
        Ok(())
    }

    fn trip_from_row(row: &PgRow) -> Result<Trip, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Trip {
            id: row.try_get("id")?,
            client_name: row.try_get("client_name")?,
            whatsapp: row.try_get("whatsapp")?,
            flight_number: row.try_get("flight_number")?,
            origin_iata: row.try_get("origin_iata")?,
            destination_iata: row.try_get("destination_iata")?,
            departure_utc: row.try_get("departure_utc")?,
            status: TripStatus::parse(&status).unwrap_or_default(),
            gate: row.try_get("gate")?,
            metadata: row.try_get("metadata")?,
            client_description: row.try_get("client_description")?,
            agency_id: row.try_get("agency_id")?,
            next_check_at: row.try_get("next_check_at")?,
            inserted_at: row.try_get("inserted_at")?,
        })
    }

    fn snapshot_from_row(row: &PgRow) -> Result<FlightStatusSnapshot, sqlx::Error> {
        Ok(FlightStatusSnapshot {
            trip_id: row.try_get("trip_id")?,
            flight_number: row.try_get("flight_number")?,
            status: row.try_get("status")?,
            gate_origin: row.try_get("gate_origin")?,
            gate_destination: row.try_get("gate_destination")?,
            estimated_out: row.try_get("estimated_out")?,
            actual_out: row.try_get("actual_out")?,
            estimated_in: row.try_get("estimated_in")?,
            actual_in: row.try_get("actual_in")?,
            raw: row
                .try_get::<Option<serde_json::Value>, _>("raw")?
                .unwrap_or(serde_json::Value::Null),
            recorded_at: row.try_get("recorded_at")?,
            source: row.try_get("source")?,
        })
    }

    fn entry_from_row(row: &PgRow) -> Result<NotificationLogEntry, sqlx::Error> {
        let kind: String = row.try_get("notification_type")?;
        let delivery_status: String = row.try_get("delivery_status")?;
        Ok(NotificationLogEntry {
            id: row.try_get("id")?,
            trip_id: row.try_get("trip_id")?,
            kind: NotificationKind::parse(&kind).unwrap_or(NotificationKind::Delayed),
            template_name: row.try_get("template_name")?,
            delivery_status: DeliveryStatus::parse(&delivery_status)
                .unwrap_or(DeliveryStatus::Failed),
            provider_message_id: row.try_get("provider_message_id")?,
            sent_at: row.try_get("sent_at")?,
            retry_count: row.try_get("retry_count")?,
            error_message: row.try_get("error_message")?,
            idempotency_hash: row.try_get("idempotency_hash")?,
            eta_round: row.try_get("eta_round")?,
        })
    }
}

fn map_unique_violation(err: sqlx::Error, what: &str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::Duplicate(what.to_string());
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl TripStore for PgTripStore {
    async fn create_trip(&self, new_trip: NewTrip) -> Result<Trip, StoreError> {
        let id = Uuid::new_v4();
        let inserted_at = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO trips (
                id, client_name, whatsapp, flight_number, origin_iata,
                destination_iata, departure_utc, status, metadata,
                client_description, agency_id, next_check_at, inserted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&new_trip.client_name)
        .bind(&new_trip.whatsapp)
        .bind(&new_trip.flight_number)
        .bind(&new_trip.origin_iata)
        .bind(&new_trip.destination_iata)
        .bind(new_trip.departure_utc)
        .bind(new_trip.status.as_str())
        .bind(&new_trip.metadata)
        .bind(&new_trip.client_description)
        .bind(new_trip.agency_id)
        .bind(new_trip.next_check_at)
        .bind(inserted_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "trip already exists for this contact/flight/day"))?;

        Ok(Self::trip_from_row(&row)?)
    }

    async fn trips_due(&self, now: DateTime<Utc>) -> Result<Vec<Trip>, StoreError> {
        let window_start = now - Duration::hours(POLL_WINDOW_AFTER_DEPARTURE_HOURS);
        let rows = sqlx::query(
            r#"
            SELECT * FROM trips
            WHERE next_check_at IS NOT NULL
              AND next_check_at <= $1
              AND status NOT IN ('CANCELLED', 'LANDED')
              AND departure_utc > $2
            ORDER BY next_check_at ASC
            "#,
        )
        .bind(now)
        .bind(window_start)
        .fetch_all(&self.pool)
        .await?;

        let mut trips = Vec::with_capacity(rows.len());
        for row in &rows {
            trips.push(Self::trip_from_row(row)?);
        }
        debug!(count = trips.len(), "fetched due trips");
        Ok(trips)
    }

    async fn trip_by_id(&self, id: Uuid) -> Result<Option<Trip>, StoreError> {
        let row = sqlx::query("SELECT * FROM trips WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::trip_from_row).transpose()?)
    }

    async fn find_duplicate_trip(
        &self,
        whatsapp: &str,
        flight_number: &str,
        departure_day: NaiveDate,
    ) -> Result<Option<Trip>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM trips
            WHERE whatsapp = $1
              AND flight_number = $2
              AND (timezone('UTC', departure_utc))::date = $3
            LIMIT 1
            "#,
        )
        .bind(whatsapp)
        .bind(flight_number)
        .bind(departure_day)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::trip_from_row).transpose()?)
    }

    async fn update_trip(&self, id: Uuid, patch: TripPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }
        // COALESCE keeps unpatched fields; only next_check_at may be
        // explicitly nulled.
        let set_next_check = patch.next_check_at.is_some();
        let next_check_value = patch.next_check_at.flatten();
        let result = sqlx::query(
            r#"
            UPDATE trips SET
                status = COALESCE($2, status),
                gate = COALESCE($3, gate),
                next_check_at = CASE WHEN $4 THEN $5 ELSE next_check_at END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(&patch.gate)
        .bind(set_next_check)
        .bind(next_check_value)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("trip {id}")));
        }
        Ok(())
    }

    async fn append_status(&self, snapshot: FlightStatusSnapshot) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO flight_status_history (
                trip_id, flight_number, status, gate_origin, gate_destination,
                estimated_out, actual_out, estimated_in, actual_in,
                raw, recorded_at, source
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(snapshot.trip_id)
        .bind(&snapshot.flight_number)
        .bind(&snapshot.status)
        .bind(&snapshot.gate_origin)
        .bind(&snapshot.gate_destination)
        .bind(snapshot.estimated_out)
        .bind(snapshot.actual_out)
        .bind(snapshot.estimated_in)
        .bind(snapshot.actual_in)
        .bind(&snapshot.raw)
        .bind(snapshot.recorded_at)
        .bind(&snapshot.source)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_status(
        &self,
        trip_id: Uuid,
    ) -> Result<Option<FlightStatusSnapshot>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM flight_status_history
            WHERE trip_id = $1
            ORDER BY recorded_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(trip_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::snapshot_from_row).transpose()?)
    }

    async fn append_notification(&self, entry: NotificationLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notifications_log (
                id, trip_id, notification_type, template_name, delivery_status,
                provider_message_id, sent_at, retry_count, error_message,
                idempotency_hash, eta_round
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(entry.id)
        .bind(entry.trip_id)
        .bind(entry.kind.as_str())
        .bind(&entry.template_name)
        .bind(entry.delivery_status.as_str())
        .bind(&entry.provider_message_id)
        .bind(entry.sent_at)
        .bind(entry.retry_count)
        .bind(&entry.error_message)
        .bind(&entry.idempotency_hash)
        .bind(&entry.eta_round)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "SENT notification already logged for this hash"))?;
        Ok(())
    }

    async fn notifications_where(
        &self,
        trip_id: Uuid,
        kind: Option<NotificationKind>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<NotificationLogEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM notifications_log
            WHERE trip_id = $1
              AND ($2::text IS NULL OR notification_type = $2)
              AND ($3::timestamptz IS NULL OR sent_at > $3)
            ORDER BY sent_at DESC
            "#,
        )
        .bind(trip_id)
        .bind(kind.map(|k| k.as_str()))
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(Self::entry_from_row(row)?);
        }
        Ok(entries)
    }

    async fn find_sent(
        &self,
        trip_id: Uuid,
        kind: NotificationKind,
        idempotency_hash: &str,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT 1 AS present FROM notifications_log
            WHERE trip_id = $1
              AND notification_type = $2
              AND idempotency_hash = $3
              AND delivery_status = 'SENT'
            LIMIT 1
            "#,
        )
        .bind(trip_id)
        .bind(kind.as_str())
        .bind(idempotency_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn recent_delay_sends(
        &self,
        trip_id: Uuid,
        within: Duration,
    ) -> Result<Vec<NotificationLogEntry>, StoreError> {
        let cutoff = Utc::now() - within;
        let rows = sqlx::query(
            r#"
            SELECT * FROM notifications_log
            WHERE trip_id = $1
              AND notification_type = 'DELAYED'
              AND delivery_status = 'SENT'
              AND sent_at > $2
            ORDER BY sent_at DESC
            "#,
        )
        .bind(trip_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(Self::entry_from_row(row)?);
        }
        Ok(entries)
    }
}
