//! The per-trip cycle and the dispatch pipeline.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use fw_common::canonical::idempotency_hash;
use fw_common::retry::{run_with_retry, OpError, RetryPolicy};
use fw_common::{
    Change, ChangeKind, DeliveryStatus, FlightwatchError, NotificationKind,
    NotificationLogEntry, Trip, TripStatus,
};
use fw_flightdata::{
    classify_status, consolidate, detect_changes, FlightDataSource, FlightObservation,
    StatusClass,
};
use fw_messaging::{DeliveryReceipt, MessageSender, TemplateExtras, TemplateRegistry};
use fw_store::{StoreError, TripPatch, TripStore};

use crate::dedup::{delay_verdict, DelayVerdict};
use crate::EngineConfig;

const STATUS_SOURCE: &str = "flightdata";

/// Metadata keys probed, in order, when enriching a boarding message with
/// a gate.
const GATE_METADATA_KEYS: &[&str] = &[
    "gate_origin",
    "gate",
    "departure_gate",
    "terminal_gate",
    "boarding_gate",
];

/// Result of running one `(trip, kind, payload)` through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent {
        provider_id: Option<String>,
        retries: u32,
    },
    /// A SENT row with the same idempotency hash already exists.
    AlreadySent,
    Suppressed {
        reason: &'static str,
    },
    Failed {
        error: String,
    },
}

/// What one trip cycle did; the scheduler uses `status` and
/// `arrival_estimate` to recompute `next_check_at`.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub status: TripStatus,
    pub arrival_estimate: Option<DateTime<Utc>>,
    pub provider_unavailable: bool,
    pub changes_detected: usize,
    pub sent: usize,
    pub suppressed: usize,
}

impl CycleReport {
    fn quiet(status: TripStatus, provider_unavailable: bool) -> Self {
        Self {
            status,
            arrival_estimate: None,
            provider_unavailable,
            changes_detected: 0,
            sent: 0,
            suppressed: 0,
        }
    }
}

pub struct NotificationsEngine {
    store: Arc<dyn TripStore>,
    flight_data: Arc<dyn FlightDataSource>,
    sender: Arc<dyn MessageSender>,
    registry: TemplateRegistry,
    config: EngineConfig,
}

impl NotificationsEngine {
    pub fn new(
        store: Arc<dyn TripStore>,
        flight_data: Arc<dyn FlightDataSource>,
        sender: Arc<dyn MessageSender>,
        registry: TemplateRegistry,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            flight_data,
            sender,
            registry,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn TripStore> {
        &self.store
    }

    /// Process one due trip end-to-end: fetch, diff, persist, dispatch.
    /// Never propagates provider failures; `next_check_at` stays owned by
    /// the scheduler, which recomputes it from the report.
    pub async fn process_due_trip(
        &self,
        trip: &Trip,
        now: DateTime<Utc>,
    ) -> Result<CycleReport, FlightwatchError> {
        if trip.is_terminal() {
            warn!(trip_id = %trip.id, status = %trip.status, "terminal trip picked up for polling, fixing next_check_at");
            self.with_db_retry("clear_next_check", || {
                self.store
                    .update_trip(trip.id, TripPatch::default().next_check_at(None))
            })
            .await?;
            return Ok(CycleReport::quiet(trip.status, false));
        }

        let previous = match self.store.latest_status(trip.id).await.map_err(store_err)? {
            Some(snapshot) => FlightObservation::from_snapshot(&snapshot),
            None => synthesized_previous(trip),
        };

        let local_date = fw_time::local_flight_date(trip.departure_utc, &trip.origin_iata);
        let fetched = run_with_retry(RetryPolicy::flight_data(), "flight_status_fetch", || {
            self.flight_data
                .get_flight_status(&trip.flight_number, local_date)
        })
        .await;

        let current = match fetched {
            Ok(outcome) => outcome.value,
            Err(e) => {
                warn!(trip_id = %trip.id, flight = %trip.flight_number, error = %e, "flight data unavailable this cycle");
                metrics::counter!("engine.provider_failures_total").increment(1);
                return Ok(CycleReport::quiet(trip.status, true));
            }
        };
        let Some(current) = current else {
            debug!(trip_id = %trip.id, flight = %trip.flight_number, "no flight status available yet");
            return Ok(CycleReport::quiet(trip.status, true));
        };

        let changes = consolidate(detect_changes(&current, &previous));

        let snapshot = current
            .clone()
            .into_snapshot(trip.id, now, STATUS_SOURCE);
        self.with_db_retry("append_status", || self.store.append_status(snapshot.clone()))
            .await?;

        // Fresh status always wins; a known gate is never overwritten by
        // null.
        let new_status = normalized_status(&current);
        let mut patch = TripPatch::default().status(new_status);
        if let Some(gate) = &current.gate_origin {
            patch = patch.gate(gate.clone());
        }
        self.with_db_retry("update_trip", || {
            self.store.update_trip(trip.id, patch.clone())
        })
        .await?;

        let mut fresh_trip = trip.clone();
        fresh_trip.status = new_status;
        if let Some(gate) = &current.gate_origin {
            fresh_trip.gate = Some(gate.clone());
        }

        let mut sent = 0;
        let mut suppressed = 0;
        for change in &changes {
            match self.dispatch_change(&fresh_trip, change, &current, now).await {
                Ok(DispatchOutcome::Sent { .. }) => sent += 1,
                Ok(DispatchOutcome::Suppressed { .. }) => suppressed += 1,
                Ok(_) => {}
                Err(e) => {
                    error!(trip_id = %trip.id, change = %change.kind, error = %e, "change dispatch failed");
                }
            }
        }

        if !fresh_trip.is_terminal() {
            match self.maybe_send_reminder(&fresh_trip, now).await {
                Ok(Some(DispatchOutcome::Sent { .. })) => sent += 1,
                Ok(Some(DispatchOutcome::Suppressed { .. })) => suppressed += 1,
                Ok(_) => {}
                Err(e) => error!(trip_id = %trip.id, error = %e, "reminder dispatch failed"),
            }
            match self.catch_up_boarding(&fresh_trip, &current, now).await {
                Ok(Some(DispatchOutcome::Sent { .. })) => sent += 1,
                Ok(_) => {}
                Err(e) => error!(trip_id = %trip.id, error = %e, "boarding catch-up failed"),
            }
        }

        info!(
            trip_id = %trip.id,
            flight = %trip.flight_number,
            status = %new_status,
            changes = changes.len(),
            sent,
            suppressed,
            "trip cycle completed"
        );

        Ok(CycleReport {
            status: new_status,
            arrival_estimate: current.actual_in.or(current.estimated_in),
            provider_unavailable: false,
            changes_detected: changes.len(),
            sent,
            suppressed,
        })
    }

    /// Immediate single send, used by trip creation (confirmation) and
    /// external callers (itinerary ready). This is the only entry point
    /// the outside world gets; the engine never calls back out.
    pub async fn send_single(
        &self,
        trip_id: Uuid,
        kind: NotificationKind,
        extras: TemplateExtras,
    ) -> Result<DispatchOutcome, FlightwatchError> {
        let trip = self
            .store
            .trip_by_id(trip_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| FlightwatchError::Store(format!("trip {trip_id} not found")))?;

        let payload = match kind {
            NotificationKind::ReservationConfirmation => json!({
                "departure_utc": iso_utc(trip.departure_utc),
            }),
            _ => json!({ "trigger": "manual" }),
        };
        self.dispatch(&trip, kind, payload, extras, None, Utc::now())
            .await
    }

    /// Free-text passthrough for external callers; retried like any other
    /// gateway send but not part of the notification log.
    pub async fn send_free_text(
        &self,
        to: &str,
        body: &str,
    ) -> Result<DeliveryReceipt, FlightwatchError> {
        run_with_retry(RetryPolicy::messaging(), "free_text_send", || {
            let to = to.to_string();
            let body = body.to_string();
            async move { self.sender.send_text(&to, &body).await.into_result() }
        })
        .await
        .map(|outcome| outcome.value)
        .map_err(|e| FlightwatchError::Delivery(e.to_string()))
    }

    /// Media passthrough with the longer gateway timeout.
    pub async fn send_media(
        &self,
        to: &str,
        media_url: &str,
        caption: Option<&str>,
    ) -> Result<DeliveryReceipt, FlightwatchError> {
        run_with_retry(RetryPolicy::messaging(), "media_send", || {
            let to = to.to_string();
            let media_url = media_url.to_string();
            let caption = caption.map(String::from);
            async move {
                self.sender
                    .send_media(&to, &media_url, caption.as_deref())
                    .await
                    .into_result()
            }
        })
        .await
        .map(|outcome| outcome.value)
        .map_err(|e| FlightwatchError::Delivery(e.to_string()))
    }

    async fn dispatch_change(
        &self,
        trip: &Trip,
        change: &Change,
        current: &FlightObservation,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, FlightwatchError> {
        match change.notification {
            NotificationKind::Delayed => {
                let eta = match change.kind {
                    ChangeKind::DepartureTimeChange => change
                        .new_value
                        .as_deref()
                        .and_then(|s| s.parse::<DateTime<Utc>>().ok()),
                    _ => current.estimated_out,
                };
                let eta_round = eta.map(|dt| iso_utc(fw_time::round_down_5min(dt)));
                let payload = json!({ "eta_round": eta_round });
                let extras = TemplateExtras {
                    new_eta_human: eta.map(|dt| fw_time::format_human(dt, &trip.origin_iata)),
                    ..Default::default()
                };
                self.dispatch(trip, NotificationKind::Delayed, payload, extras, eta_round, now)
                    .await
            }
            NotificationKind::GateChange => {
                let payload = change_payload(change);
                let extras = TemplateExtras {
                    new_gate: change.new_value.clone(),
                    ..Default::default()
                };
                self.dispatch(trip, NotificationKind::GateChange, payload, extras, None, now)
                    .await
            }
            kind => {
                self.dispatch(trip, kind, change_payload(change), TemplateExtras::default(), None, now)
                    .await
            }
        }
    }

    /// The dispatch pipeline: policy gates, idempotency, template, send,
    /// log. Every exit leaves a row in the notification log except the
    /// already-sent short circuit.
    async fn dispatch(
        &self,
        trip: &Trip,
        kind: NotificationKind,
        payload: serde_json::Value,
        mut extras: TemplateExtras,
        eta_round: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, FlightwatchError> {
        let hash = idempotency_hash(&json!({
            "trip_id": trip.id.to_string(),
            "kind": kind.as_str(),
            "payload": payload,
        }));

        // Quiet hours bind only the 24h reminder; operational events send
        // around the clock.
        if kind == NotificationKind::Reminder24h
            && fw_time::is_quiet_hours_local_with(
                now,
                &trip.origin_iata,
                self.config.quiet_start_hour,
                self.config.quiet_end_hour,
            )
        {
            self.log_suppressed(trip, kind, &hash, "quiet_hours", eta_round, now)
                .await?;
            return Ok(DispatchOutcome::Suppressed {
                reason: "quiet_hours",
            });
        }

        if kind == NotificationKind::Boarding {
            if self.recently_cancelled(trip, now).await? {
                self.log_suppressed(trip, kind, &hash, "cancelled_recently", eta_round, now)
                    .await?;
                return Ok(DispatchOutcome::Suppressed {
                    reason: "cancelled_recently",
                });
            }
            extras.boarding_gate = self.resolve_boarding_gate(trip).await;
        }

        if kind == NotificationKind::Delayed {
            let verdict = delay_verdict(
                self.store.as_ref(),
                trip.id,
                eta_round.as_deref(),
                self.config.delay_cooldown,
                self.config.delay_same_eta_window,
            )
            .await
            .map_err(store_err)?;
            match verdict {
                DelayVerdict::Cooldown => {
                    self.log_suppressed(trip, kind, &hash, "delay_cooldown", eta_round, now)
                        .await?;
                    return Ok(DispatchOutcome::Suppressed {
                        reason: "delay_cooldown",
                    });
                }
                DelayVerdict::SameEta => {
                    self.log_suppressed(trip, kind, &hash, "delay_same_eta", eta_round, now)
                        .await?;
                    return Ok(DispatchOutcome::Suppressed {
                        reason: "delay_same_eta",
                    });
                }
                DelayVerdict::Proceed => {}
            }
        }

        if self
            .store
            .find_sent(trip.id, kind, &hash)
            .await
            .map_err(store_err)?
        {
            debug!(trip_id = %trip.id, kind = %kind, hash = %hash, "notification already sent");
            return Ok(DispatchOutcome::AlreadySent);
        }

        let content = self.registry.format(kind, trip, &extras);

        let send_result = run_with_retry(RetryPolicy::messaging(), "notification_send", || {
            let to = trip.whatsapp.clone();
            let template_id = content.template_id.clone();
            let variables = content.variables.clone();
            async move {
                self.sender
                    .send_template(&to, &template_id, &variables)
                    .await
                    .into_result()
            }
        })
        .await;

        match send_result {
            Ok(outcome) => {
                let retry_count = outcome.retries() as i32;
                let retries = outcome.retries();
                let receipt = outcome.value;
                let entry = NotificationLogEntry {
                    id: Uuid::new_v4(),
                    trip_id: trip.id,
                    kind,
                    template_name: content.template_name.clone(),
                    delivery_status: DeliveryStatus::Sent,
                    provider_message_id: receipt.provider_id.clone(),
                    sent_at: now,
                    retry_count,
                    error_message: None,
                    idempotency_hash: hash,
                    eta_round,
                };
                match self.store.append_notification(entry).await {
                    Ok(()) => {}
                    Err(StoreError::Duplicate(_)) => {
                        warn!(trip_id = %trip.id, kind = %kind, "concurrent send already logged this hash");
                    }
                    // A duplicate message is worse than a missing log row:
                    // never resend because logging failed.
                    Err(e) => {
                        warn!(trip_id = %trip.id, kind = %kind, error = %e, "notification sent but logging failed");
                    }
                }
                info!(trip_id = %trip.id, kind = %kind, provider_id = ?receipt.provider_id, "notification sent");
                metrics::counter!("engine.notifications_sent_total").increment(1);
                Ok(DispatchOutcome::Sent {
                    provider_id: receipt.provider_id,
                    retries,
                })
            }
            Err(e) => {
                let retries = match &e {
                    OpError::Retryable(_) => RetryPolicy::messaging().max_attempts - 1,
                    OpError::Terminal(_) => 0,
                };
                let entry = NotificationLogEntry {
                    id: Uuid::new_v4(),
                    trip_id: trip.id,
                    kind,
                    template_name: content.template_name.clone(),
                    delivery_status: DeliveryStatus::Failed,
                    provider_message_id: None,
                    sent_at: now,
                    retry_count: retries as i32,
                    error_message: Some(e.to_string()),
                    idempotency_hash: hash,
                    eta_round,
                };
                if let Err(log_err) = self.store.append_notification(entry).await {
                    warn!(trip_id = %trip.id, kind = %kind, error = %log_err, "failed to log failed send");
                }
                error!(trip_id = %trip.id, kind = %kind, error = %e, "notification delivery failed");
                metrics::counter!("engine.notifications_failed_total").increment(1);
                Ok(DispatchOutcome::Failed {
                    error: e.to_string(),
                })
            }
        }
    }

    /// Dispatch the 24h reminder once the lead window opens. The quiet
    /// hours gate inside the pipeline defers it to 09:00 local.
    async fn maybe_send_reminder(
        &self,
        trip: &Trip,
        now: DateTime<Utc>,
    ) -> Result<Option<DispatchOutcome>, FlightwatchError> {
        let window_start = trip.departure_utc - self.config.reminder_lead;
        if now < window_start || now >= trip.departure_utc {
            return Ok(None);
        }
        let payload = json!({ "departure_utc": iso_utc(trip.departure_utc) });
        let outcome = self
            .dispatch(
                trip,
                NotificationKind::Reminder24h,
                payload,
                TemplateExtras::default(),
                None,
                now,
            )
            .await?;
        Ok(Some(outcome))
    }

    /// Boarding verification: if the trip is boarding but no boarding
    /// message ever went out (the transition fired during a failed
    /// cycle), send it now.
    async fn catch_up_boarding(
        &self,
        trip: &Trip,
        current: &FlightObservation,
        now: DateTime<Utc>,
    ) -> Result<Option<DispatchOutcome>, FlightwatchError> {
        if trip.status != TripStatus::Boarding {
            return Ok(None);
        }
        let rows = self
            .store
            .notifications_where(trip.id, Some(NotificationKind::Boarding), None)
            .await
            .map_err(store_err)?;
        let already_sent = rows
            .iter()
            .any(|r| r.delivery_status == DeliveryStatus::Sent);
        let attempted_this_cycle = rows
            .iter()
            .any(|r| r.sent_at > now - chrono::Duration::seconds(60));
        if already_sent || attempted_this_cycle {
            return Ok(None);
        }

        debug!(trip_id = %trip.id, "boarding in progress with no boarding message, catching up");
        let payload = json!({
            "change": ChangeKind::Boarding.as_str(),
            "old": serde_json::Value::Null,
            "new": current.status,
        });
        let outcome = self
            .dispatch(
                trip,
                NotificationKind::Boarding,
                payload,
                TemplateExtras::default(),
                None,
                now,
            )
            .await?;
        Ok(Some(outcome))
    }

    /// Was a CANCELLED sent for this trip moments ago? Boarding calls
    /// after a cancellation are provider flapping, not news.
    async fn recently_cancelled(
        &self,
        trip: &Trip,
        now: DateTime<Utc>,
    ) -> Result<bool, FlightwatchError> {
        let since = now - self.config.cancelled_boarding_suppress;
        let rows = self
            .store
            .notifications_where(trip.id, Some(NotificationKind::Cancelled), Some(since))
            .await
            .map_err(store_err)?;
        Ok(rows
            .iter()
            .any(|r| r.delivery_status == DeliveryStatus::Sent))
    }

    /// Gate resolution order for boarding: trip column → metadata keys →
    /// a fresh provider call (which also updates the trip) → none, which
    /// the registry renders as the placeholder.
    async fn resolve_boarding_gate(&self, trip: &Trip) -> Option<String> {
        if let Some(gate) = &trip.gate {
            return Some(gate.clone());
        }
        for key in GATE_METADATA_KEYS {
            if let Some(value) = trip.metadata_str(key) {
                return Some(value.to_string());
            }
        }

        let local_date = fw_time::local_flight_date(trip.departure_utc, &trip.origin_iata);
        let fetched = run_with_retry(RetryPolicy::flight_data(), "boarding_gate_fetch", || {
            self.flight_data
                .get_flight_status(&trip.flight_number, local_date)
        })
        .await;
        if let Ok(outcome) = fetched {
            if let Some(gate) = outcome.value.and_then(|obs| obs.gate_origin) {
                if let Err(e) = self
                    .store
                    .update_trip(trip.id, TripPatch::default().gate(gate.clone()))
                    .await
                {
                    warn!(trip_id = %trip.id, error = %e, "failed to persist freshly resolved gate");
                }
                return Some(gate);
            }
        }
        None
    }

    /// Write a SUPPRESSED row once per `(hash, reason)`.
    async fn log_suppressed(
        &self,
        trip: &Trip,
        kind: NotificationKind,
        hash: &str,
        reason: &'static str,
        eta_round: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), FlightwatchError> {
        let rows = self
            .store
            .notifications_where(trip.id, Some(kind), None)
            .await
            .map_err(store_err)?;
        let already_logged = rows.iter().any(|r| {
            r.idempotency_hash == hash
                && r.delivery_status == DeliveryStatus::Suppressed
                && r.error_message.as_deref() == Some(reason)
        });
        if already_logged {
            return Ok(());
        }

        info!(trip_id = %trip.id, kind = %kind, reason, "notification suppressed");
        metrics::counter!("engine.notifications_suppressed_total").increment(1);
        let entry = NotificationLogEntry {
            id: Uuid::new_v4(),
            trip_id: trip.id,
            kind,
            template_name: self.registry.template_name(kind),
            delivery_status: DeliveryStatus::Suppressed,
            provider_message_id: None,
            sent_at: now,
            retry_count: 0,
            error_message: Some(reason.to_string()),
            idempotency_hash: hash.to_string(),
            eta_round,
        };
        self.store
            .append_notification(entry)
            .await
            .map_err(store_err)
    }

    async fn with_db_retry<T, F, Fut>(
        &self,
        context: &str,
        mut op: F,
    ) -> Result<T, FlightwatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        run_with_retry(RetryPolicy::database(), context, || {
            let fut = op();
            async move { fut.await.map_err(|e| OpError::retryable(anyhow::anyhow!(e))) }
        })
        .await
        .map(|outcome| outcome.value)
        .map_err(|e| FlightwatchError::Store(e.to_string()))
    }
}

fn store_err(e: StoreError) -> FlightwatchError {
    FlightwatchError::Store(e.to_string())
}

fn iso_utc(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn change_payload(change: &Change) -> serde_json::Value {
    json!({
        "change": change.kind.as_str(),
        "old": change.old_value,
        "new": change.new_value,
    })
}

/// First cycle for a trip has no history row yet; diff against what the
/// trip record already knows.
fn synthesized_previous(trip: &Trip) -> FlightObservation {
    FlightObservation {
        ident: trip.flight_number.clone(),
        status: trip.status.as_str().to_string(),
        gate_origin: trip.gate.clone(),
        gate_destination: None,
        estimated_out: Some(trip.departure_utc),
        actual_out: None,
        estimated_in: None,
        actual_in: None,
        raw: serde_json::Value::Null,
    }
}

/// Map the raw provider status onto the trip lifecycle.
fn normalized_status(current: &FlightObservation) -> TripStatus {
    match classify_status(&current.status) {
        StatusClass::Cancelled => TripStatus::Cancelled,
        StatusClass::Delayed => TripStatus::Delayed,
        StatusClass::Boarding => TripStatus::Boarding,
        StatusClass::Landing => TripStatus::Landed,
        StatusClass::Other => {
            if current.actual_out.is_some() {
                TripStatus::InFlight
            } else {
                TripStatus::Scheduled
            }
        }
    }
}
