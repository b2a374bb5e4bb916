//! Flight-data provider client.
//!
//! Wraps the external flight-status API behind [`FlightDataSource`], caches
//! responses for five minutes, and owns the change-detection contract
//! (per-field diffs plus intra-cycle ping-pong consolidation).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fw_common::retry::OpError;
use fw_common::FlightStatusSnapshot;

pub mod cache;
pub mod changes;
mod client;

pub use cache::{CacheCounters, FlightStatusCache};
pub use changes::{classify_status, consolidate, detect_changes, StatusClass};
pub use client::{FlightDataClient, FlightDataClientConfig};

/// One provider observation of a flight, before it is tied to a trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightObservation {
    pub ident: String,
    pub status: String,
    pub gate_origin: Option<String>,
    pub gate_destination: Option<String>,
    pub estimated_out: Option<DateTime<Utc>>,
    pub actual_out: Option<DateTime<Utc>>,
    pub estimated_in: Option<DateTime<Utc>>,
    pub actual_in: Option<DateTime<Utc>>,
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl FlightObservation {
    /// Attach the observation to a trip as an append-only history row.
    pub fn into_snapshot(
        self,
        trip_id: Uuid,
        recorded_at: DateTime<Utc>,
        source: &str,
    ) -> FlightStatusSnapshot {
        FlightStatusSnapshot {
            trip_id,
            flight_number: self.ident,
            status: self.status,
            gate_origin: self.gate_origin,
            gate_destination: self.gate_destination,
            estimated_out: self.estimated_out,
            actual_out: self.actual_out,
            estimated_in: self.estimated_in,
            actual_in: self.actual_in,
            raw: self.raw,
            recorded_at,
            source: source.to_string(),
        }
    }

    /// Rebuild an observation view from a stored snapshot, for diffing.
    pub fn from_snapshot(snapshot: &FlightStatusSnapshot) -> Self {
        Self {
            ident: snapshot.flight_number.clone(),
            status: snapshot.status.clone(),
            gate_origin: snapshot.gate_origin.clone(),
            gate_destination: snapshot.gate_destination.clone(),
            estimated_out: snapshot.estimated_out,
            actual_out: snapshot.actual_out,
            estimated_in: snapshot.estimated_in,
            actual_in: snapshot.actual_in,
            raw: snapshot.raw.clone(),
        }
    }
}

/// The seam the engine polls through. Errors are pre-classified for the
/// retry executor; a flight the provider does not know yet is `Ok(None)`.
#[async_trait]
pub trait FlightDataSource: Send + Sync {
    async fn get_flight_status(
        &self,
        flight_number: &str,
        local_date: NaiveDate,
    ) -> Result<Option<FlightObservation>, OpError>;
}
