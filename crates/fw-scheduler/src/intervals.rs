//! Polling interval policy.
//!
//! Pre-departure the cadence tightens as departure approaches; in flight
//! it tightens around the expected landing. Terminal trips stop polling
//! entirely (`None`).

use chrono::{DateTime, Duration, Utc};

use fw_common::TripStatus;

/// When to poll this trip next. `None` means never again.
pub fn next_check(
    departure_utc: DateTime<Utc>,
    now: DateTime<Utc>,
    status: TripStatus,
    est_arrival: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    if status.is_terminal() {
        return None;
    }

    let until_departure = departure_utc - now;

    if until_departure > Duration::hours(24) {
        return Some(now + Duration::hours(6));
    }
    if until_departure > Duration::hours(4) {
        return Some(now + Duration::hours(1));
    }
    if until_departure > Duration::zero() {
        return Some(now + Duration::minutes(15));
    }

    // Post-departure.
    match est_arrival {
        Some(arrival) => {
            let until_arrival = arrival - now;
            if until_arrival > Duration::hours(1) {
                Some(now + Duration::minutes(30))
            } else if until_arrival > Duration::minutes(-30) {
                // Landing window; precision matters here.
                Some(now + Duration::minutes(10))
            } else {
                // Well past the expected arrival: hunt for a late landing.
                Some(now + Duration::hours(1))
            }
        }
        None => Some(now + Duration::minutes(30)),
    }
}

/// First check for a freshly created trip: the reminder lead before
/// departure, or right now when the trip is already inside that window.
pub fn initial_next_check(
    departure_utc: DateTime<Utc>,
    now: DateTime<Utc>,
    reminder_lead: Duration,
) -> DateTime<Utc> {
    let lead_start = departure_utc - reminder_lead;
    if lead_start <= now {
        now
    } else {
        lead_start
    }
}
