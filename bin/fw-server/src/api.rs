//! Trip ingress API.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use fw_common::{NotificationKind, TripStatus};
use fw_engine::{DispatchOutcome, NotificationsEngine};
use fw_messaging::TemplateExtras;
use fw_store::{NewTrip, StoreError, TripStore};

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn TripStore>,
    pub engine: Arc<NotificationsEngine>,
    pub reminder_lead: chrono::Duration,
}

#[derive(Debug, Deserialize)]
pub struct CreateTripRequest {
    pub client_name: String,
    pub whatsapp: String,
    pub flight_number: String,
    pub origin_iata: String,
    pub destination_iata: String,
    /// Local wall-clock at the origin airport, or UTC with an offset.
    pub departure_date: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub client_description: Option<String>,
    #[serde(default)]
    pub agency_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CreateTripResponse {
    pub trip_id: Uuid,
    pub departure_utc: DateTime<Utc>,
    pub next_check_at: DateTime<Utc>,
    pub confirmation: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiError {
            error: message.into(),
        }),
    )
}

/// `POST /trips` — persist the trip (departure normalized to UTC), arm
/// the scheduler, and fire the reservation confirmation immediately.
pub async fn create_trip(
    State(state): State<ApiState>,
    Json(request): Json<CreateTripRequest>,
) -> Result<(StatusCode, Json<CreateTripResponse>), (StatusCode, Json<ApiError>)> {
    let origin = request.origin_iata.trim().to_uppercase();
    let destination = request.destination_iata.trim().to_uppercase();
    if origin.len() != 3 || destination.len() != 3 {
        return Err(bad_request("origin_iata and destination_iata must be 3-letter codes"));
    }
    let flight_number = request.flight_number.trim().to_uppercase();
    let whatsapp = request.whatsapp.trim().to_string();
    if whatsapp.is_empty() || request.client_name.trim().is_empty() {
        return Err(bad_request("client_name and whatsapp are required"));
    }
    if flight_number.is_empty() {
        return Err(bad_request("flight_number is required"));
    }

    let departure_utc = parse_departure(&request.departure_date, &origin)
        .map_err(|e| bad_request(format!("invalid departure_date: {e}")))?;

    let now = Utc::now();
    let departure_day = departure_utc.date_naive();
    match state
        .store
        .find_duplicate_trip(&whatsapp, &flight_number, departure_day)
        .await
    {
        Ok(Some(existing)) => {
            warn!(trip_id = %existing.id, flight = %existing.flight_number, "duplicate trip creation rejected");
            return Err((
                StatusCode::CONFLICT,
                Json(ApiError {
                    error: format!("trip already exists with id {}", existing.id),
                }),
            ));
        }
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "duplicate check failed");
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError {
                    error: "store unavailable".to_string(),
                }),
            ));
        }
    }

    let status = request
        .status
        .as_deref()
        .and_then(TripStatus::parse)
        .unwrap_or(TripStatus::Scheduled);
    let next_check_at = fw_scheduler::initial_next_check(departure_utc, now, state.reminder_lead);

    let trip = state
        .store
        .create_trip(NewTrip {
            client_name: request.client_name.trim().to_string(),
            whatsapp,
            flight_number,
            origin_iata: origin,
            destination_iata: destination,
            departure_utc,
            status,
            metadata: request.metadata.unwrap_or(serde_json::Value::Null),
            client_description: request.client_description,
            agency_id: request.agency_id,
            next_check_at: Some(next_check_at),
        })
        .await
        .map_err(|e| match e {
            StoreError::Duplicate(message) => (StatusCode::CONFLICT, Json(ApiError { error: message })),
            other => {
                error!(error = %other, "trip creation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiError {
                        error: "store unavailable".to_string(),
                    }),
                )
            }
        })?;

    info!(trip_id = %trip.id, flight = %trip.flight_number, %departure_utc, "trip created");

    let confirmation = match state
        .engine
        .send_single(
            trip.id,
            NotificationKind::ReservationConfirmation,
            TemplateExtras::default(),
        )
        .await
    {
        Ok(DispatchOutcome::Sent { .. }) => "SENT",
        Ok(DispatchOutcome::AlreadySent) => "ALREADY_SENT",
        Ok(DispatchOutcome::Suppressed { reason }) => reason,
        Ok(DispatchOutcome::Failed { .. }) => "FAILED",
        Err(e) => {
            error!(trip_id = %trip.id, error = %e, "confirmation dispatch failed");
            "FAILED"
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(CreateTripResponse {
            trip_id: trip.id,
            departure_utc,
            next_check_at,
            confirmation: confirmation.to_string(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct SendNotificationRequest {
    pub kind: String,
}

#[derive(Debug, Serialize)]
pub struct SendNotificationResponse {
    pub trip_id: Uuid,
    pub kind: String,
    pub outcome: String,
}

/// `POST /trips/:id/notifications` — the `send_single` entry point for
/// external subsystems (itinerary generator, ops tooling). The engine's
/// pipeline still applies every policy and dedup gate.
pub async fn send_notification(
    State(state): State<ApiState>,
    axum::extract::Path(trip_id): axum::extract::Path<Uuid>,
    Json(request): Json<SendNotificationRequest>,
) -> Result<Json<SendNotificationResponse>, (StatusCode, Json<ApiError>)> {
    let Some(kind) = NotificationKind::parse(&request.kind) else {
        return Err(bad_request(format!("unknown notification kind {:?}", request.kind)));
    };

    let outcome = state
        .engine
        .send_single(trip_id, kind, TemplateExtras::default())
        .await
        .map_err(|e| {
            error!(%trip_id, error = %e, "single notification failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError {
                    error: e.to_string(),
                }),
            )
        })?;

    let outcome = match outcome {
        DispatchOutcome::Sent { .. } => "SENT".to_string(),
        DispatchOutcome::AlreadySent => "ALREADY_SENT".to_string(),
        DispatchOutcome::Suppressed { reason } => format!("SUPPRESSED:{reason}"),
        DispatchOutcome::Failed { .. } => "FAILED".to_string(),
    };

    Ok(Json(SendNotificationResponse {
        trip_id,
        kind: kind.as_str().to_string(),
        outcome,
    }))
}

/// Accepts RFC 3339 with an offset, or a naive wall-clock time read in
/// the origin airport's timezone.
fn parse_departure(input: &str, origin_iata: &str) -> Result<DateTime<Utc>, String> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(fw_time::local_input_to_utc(naive, origin_iata));
        }
    }
    Err(format!("unrecognized datetime {input:?}"))
}
