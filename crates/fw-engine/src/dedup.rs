//! Delay-notification dedup.
//!
//! Two gates protect the passenger from delay spam: a cooldown after any
//! SENT DELAYED, and a wider window in which a repeated rounded ETA is
//! rejected even after the cooldown has passed.

use chrono::Duration;
use uuid::Uuid;

use fw_store::{StoreError, TripStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelayVerdict {
    Proceed,
    /// A SENT DELAYED exists inside the cooldown window.
    Cooldown,
    /// The same rounded ETA was already announced inside the wide window.
    SameEta,
}

pub async fn delay_verdict(
    store: &dyn TripStore,
    trip_id: Uuid,
    eta_round: Option<&str>,
    cooldown: Duration,
    same_eta_window: Duration,
) -> Result<DelayVerdict, StoreError> {
    if !store.recent_delay_sends(trip_id, cooldown).await?.is_empty() {
        return Ok(DelayVerdict::Cooldown);
    }

    if let Some(eta_round) = eta_round {
        let window_rows = store.recent_delay_sends(trip_id, same_eta_window).await?;
        if window_rows
            .iter()
            .any(|row| row.eta_round.as_deref() == Some(eta_round))
        {
            return Ok(DelayVerdict::SameEta);
        }
    }

    Ok(DelayVerdict::Proceed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fw_common::{DeliveryStatus, NotificationKind, NotificationLogEntry};
    use fw_store::InMemoryTripStore;

    fn delayed_row(trip_id: Uuid, minutes_ago: i64, eta_round: &str) -> NotificationLogEntry {
        NotificationLogEntry {
            id: Uuid::new_v4(),
            trip_id,
            kind: NotificationKind::Delayed,
            template_name: "demorado".to_string(),
            delivery_status: DeliveryStatus::Sent,
            provider_message_id: Some("SM1".to_string()),
            sent_at: Utc::now() - Duration::minutes(minutes_ago),
            retry_count: 0,
            error_message: None,
            idempotency_hash: format!("hash-{eta_round}"),
            eta_round: Some(eta_round.to_string()),
        }
    }

    #[tokio::test]
    async fn first_delay_proceeds() {
        let store = InMemoryTripStore::new();
        let verdict = delay_verdict(
            &store,
            Uuid::new_v4(),
            Some("2025-07-09T03:00:00Z"),
            Duration::minutes(15),
            Duration::hours(2),
        )
        .await
        .unwrap();
        assert_eq!(verdict, DelayVerdict::Proceed);
    }

    #[tokio::test]
    async fn recent_send_triggers_cooldown() {
        let store = InMemoryTripStore::new();
        let trip_id = Uuid::new_v4();
        store
            .append_notification(delayed_row(trip_id, 5, "2025-07-09T03:00:00Z"))
            .await
            .unwrap();

        let verdict = delay_verdict(
            &store,
            trip_id,
            Some("2025-07-09T02:45:00Z"),
            Duration::minutes(15),
            Duration::hours(2),
        )
        .await
        .unwrap();
        assert_eq!(verdict, DelayVerdict::Cooldown);
    }

    #[tokio::test]
    async fn repeated_eta_outside_cooldown_is_rejected() {
        let store = InMemoryTripStore::new();
        let trip_id = Uuid::new_v4();
        store
            .append_notification(delayed_row(trip_id, 45, "2025-07-09T03:00:00Z"))
            .await
            .unwrap();

        let verdict = delay_verdict(
            &store,
            trip_id,
            Some("2025-07-09T03:00:00Z"),
            Duration::minutes(15),
            Duration::hours(2),
        )
        .await
        .unwrap();
        assert_eq!(verdict, DelayVerdict::SameEta);
    }

    #[tokio::test]
    async fn new_eta_outside_cooldown_proceeds() {
        let store = InMemoryTripStore::new();
        let trip_id = Uuid::new_v4();
        store
            .append_notification(delayed_row(trip_id, 45, "2025-07-09T03:00:00Z"))
            .await
            .unwrap();

        let verdict = delay_verdict(
            &store,
            trip_id,
            Some("2025-07-09T02:45:00Z"),
            Duration::minutes(15),
            Duration::hours(2),
        )
        .await
        .unwrap();
        assert_eq!(verdict, DelayVerdict::Proceed);
    }

    #[tokio::test]
    async fn stale_eta_beyond_window_does_not_block() {
        let store = InMemoryTripStore::new();
        let trip_id = Uuid::new_v4();
        store
            .append_notification(delayed_row(trip_id, 130, "2025-07-09T03:00:00Z"))
            .await
            .unwrap();

        let verdict = delay_verdict(
            &store,
            trip_id,
            Some("2025-07-09T03:00:00Z"),
            Duration::minutes(15),
            Duration::hours(2),
        )
        .await
        .unwrap();
        assert_eq!(verdict, DelayVerdict::Proceed);
    }
}
