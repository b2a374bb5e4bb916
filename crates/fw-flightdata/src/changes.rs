//! Flight change detection.
//!
//! Diffs two observations field by field and maps each difference to the
//! notification that should go out. Status strings are free-form provider
//! text; classification is a case-insensitive keyword match on a fixed
//! set.

use fw_common::{Change, ChangeKind, NotificationKind};

use crate::FlightObservation;

/// Normalized status classes derived from the raw provider string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Cancelled,
    Delayed,
    Boarding,
    Landing,
    Other,
}

/// Keyword classification: `cancel` → Cancelled, `delay|late` → Delayed,
/// `board` → Boarding, `landed|arrived|completed` → Landing.
pub fn classify_status(raw: &str) -> StatusClass {
    let s = raw.to_lowercase();
    if s.contains("cancel") {
        StatusClass::Cancelled
    } else if s.contains("delay") || s.contains("late") {
        StatusClass::Delayed
    } else if s.contains("board") {
        StatusClass::Boarding
    } else if s.contains("landed") || s.contains("arrived") || s.contains("completed") {
        StatusClass::Landing
    } else {
        StatusClass::Other
    }
}

/// Compare the current observation against the previous one, emitting one
/// [`Change`] per differing field.
///
/// A null gate or estimated-out on the current side never produces a
/// change: the provider dropping a field is not news.
pub fn detect_changes(current: &FlightObservation, previous: &FlightObservation) -> Vec<Change> {
    let mut changes = Vec::new();

    let old_class = classify_status(&previous.status);
    let new_class = classify_status(&current.status);
    if new_class != old_class {
        let mapped = match new_class {
            StatusClass::Cancelled => Some((ChangeKind::Cancellation, NotificationKind::Cancelled)),
            StatusClass::Boarding => Some((ChangeKind::Boarding, NotificationKind::Boarding)),
            StatusClass::Landing => Some((ChangeKind::Landing, NotificationKind::LandingWelcome)),
            StatusClass::Delayed => Some((ChangeKind::StatusChange, NotificationKind::Delayed)),
            // Back to a plain scheduled-like status: nothing to tell the
            // passenger.
            StatusClass::Other => None,
        };
        if let Some((kind, notification)) = mapped {
            changes.push(Change {
                kind,
                old_value: Some(previous.status.clone()),
                new_value: Some(current.status.clone()),
                notification,
            });
        }
    }

    if let Some(new_gate) = &current.gate_origin {
        if previous.gate_origin.as_deref() != Some(new_gate.as_str()) {
            changes.push(Change {
                kind: ChangeKind::GateChange,
                old_value: previous.gate_origin.clone(),
                new_value: Some(new_gate.clone()),
                notification: NotificationKind::GateChange,
            });
        }
    }

    if let Some(new_out) = current.estimated_out {
        if previous.estimated_out != Some(new_out) {
            changes.push(Change {
                kind: ChangeKind::DepartureTimeChange,
                old_value: previous
                    .estimated_out
                    .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
                new_value: Some(new_out.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
                notification: NotificationKind::Delayed,
            });
        }
    }

    changes
}

/// Collapse the changes of one polling cycle per kind.
///
/// A group whose first old value equals its last new value is a ping-pong
/// (A→B→A) and is dropped entirely; otherwise the group collapses to a
/// single change spanning first-old → last-new.
pub fn consolidate(changes: Vec<Change>) -> Vec<Change> {
    let mut order: Vec<ChangeKind> = Vec::new();
    let mut groups: std::collections::HashMap<ChangeKind, Vec<Change>> =
        std::collections::HashMap::new();

    for change in changes {
        if !groups.contains_key(&change.kind) {
            order.push(change.kind);
        }
        groups.entry(change.kind).or_default().push(change);
    }

    let mut out = Vec::new();
    for kind in order {
        let group = &groups[&kind];
        let first = &group[0];
        let last = &group[group.len() - 1];
        if first.old_value == last.new_value {
            tracing::debug!(kind = %kind, "dropping ping-pong change group");
            continue;
        }
        out.push(Change {
            kind,
            old_value: first.old_value.clone(),
            new_value: last.new_value.clone(),
            notification: last.notification,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn observation(status: &str, gate: Option<&str>, estimated_out: Option<&str>) -> FlightObservation {
        FlightObservation {
            ident: "BA820".to_string(),
            status: status.to_string(),
            gate_origin: gate.map(String::from),
            gate_destination: None,
            estimated_out: estimated_out.map(|s| s.parse::<DateTime<Utc>>().unwrap()),
            actual_out: None,
            estimated_in: None,
            actual_in: None,
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn keyword_classification() {
        assert_eq!(classify_status("Cancelled"), StatusClass::Cancelled);
        assert_eq!(classify_status("CANCELED"), StatusClass::Cancelled);
        assert_eq!(classify_status("Delayed 45m"), StatusClass::Delayed);
        assert_eq!(classify_status("Running Late"), StatusClass::Delayed);
        assert_eq!(classify_status("Now Boarding"), StatusClass::Boarding);
        assert_eq!(classify_status("Landed"), StatusClass::Landing);
        assert_eq!(classify_status("Arrived At Gate"), StatusClass::Landing);
        assert_eq!(classify_status("Flight Completed"), StatusClass::Landing);
        assert_eq!(classify_status("Scheduled"), StatusClass::Other);
        assert_eq!(classify_status("En Route"), StatusClass::Other);
    }

    #[test]
    fn status_transition_maps_to_notification() {
        let prev = observation("Scheduled", None, None);
        let cur = observation("Cancelled", None, None);
        let changes = detect_changes(&cur, &prev);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Cancellation);
        assert_eq!(changes[0].notification, NotificationKind::Cancelled);
        assert_eq!(changes[0].old_value.as_deref(), Some("Scheduled"));
        assert_eq!(changes[0].new_value.as_deref(), Some("Cancelled"));
    }

    #[test]
    fn same_class_raw_change_is_silent() {
        let prev = observation("Delayed 30m", None, None);
        let cur = observation("Delayed 60m", None, None);
        assert!(detect_changes(&cur, &prev).is_empty());
    }

    #[test]
    fn return_to_plain_schedule_is_silent() {
        let prev = observation("Delayed", None, None);
        let cur = observation("Scheduled", None, None);
        assert!(detect_changes(&cur, &prev).is_empty());
    }

    #[test]
    fn gate_change_detected_but_null_gate_ignored() {
        let prev = observation("Scheduled", Some("A12"), None);
        let cur = observation("Scheduled", Some("B7"), None);
        let changes = detect_changes(&cur, &prev);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::GateChange);
        assert_eq!(changes[0].new_value.as_deref(), Some("B7"));

        let dropped = observation("Scheduled", None, None);
        assert!(detect_changes(&dropped, &prev).is_empty());
    }

    #[test]
    fn estimated_out_shift_maps_to_delayed() {
        let prev = observation("Scheduled", None, Some("2025-07-09T02:30:00Z"));
        let cur = observation("Scheduled", None, Some("2025-07-09T03:00:00Z"));
        let changes = detect_changes(&cur, &prev);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::DepartureTimeChange);
        assert_eq!(changes[0].notification, NotificationKind::Delayed);
        assert_eq!(
            changes[0].new_value.as_deref(),
            Some("2025-07-09T03:00:00Z")
        );
    }

    #[test]
    fn boarding_and_landing_transitions() {
        let prev = observation("Scheduled", None, None);
        let boarding = observation("Boarding", None, None);
        let changes = detect_changes(&boarding, &prev);
        assert_eq!(changes[0].notification, NotificationKind::Boarding);

        let landed = observation("Landed", None, None);
        let changes = detect_changes(&landed, &boarding);
        assert_eq!(changes[0].notification, NotificationKind::LandingWelcome);
    }

    #[test]
    fn ping_pong_group_is_dropped() {
        let a_to_b = Change {
            kind: ChangeKind::GateChange,
            old_value: Some("A12".to_string()),
            new_value: Some("B7".to_string()),
            notification: NotificationKind::GateChange,
        };
        let b_to_a = Change {
            kind: ChangeKind::GateChange,
            old_value: Some("B7".to_string()),
            new_value: Some("A12".to_string()),
            notification: NotificationKind::GateChange,
        };
        assert!(consolidate(vec![a_to_b, b_to_a]).is_empty());
    }

    #[test]
    fn multi_step_group_collapses_to_endpoints() {
        let a_to_b = Change {
            kind: ChangeKind::GateChange,
            old_value: Some("A12".to_string()),
            new_value: Some("B7".to_string()),
            notification: NotificationKind::GateChange,
        };
        let b_to_c = Change {
            kind: ChangeKind::GateChange,
            old_value: Some("B7".to_string()),
            new_value: Some("C3".to_string()),
            notification: NotificationKind::GateChange,
        };
        let consolidated = consolidate(vec![a_to_b, b_to_c]);
        assert_eq!(consolidated.len(), 1);
        assert_eq!(consolidated[0].old_value.as_deref(), Some("A12"));
        assert_eq!(consolidated[0].new_value.as_deref(), Some("C3"));
    }

    #[test]
    fn independent_kinds_pass_through() {
        let gate = Change {
            kind: ChangeKind::GateChange,
            old_value: Some("A12".to_string()),
            new_value: Some("B7".to_string()),
            notification: NotificationKind::GateChange,
        };
        let delay = Change {
            kind: ChangeKind::DepartureTimeChange,
            old_value: Some("2025-07-09T02:30:00Z".to_string()),
            new_value: Some("2025-07-09T03:00:00Z".to_string()),
            notification: NotificationKind::Delayed,
        };
        let consolidated = consolidate(vec![gate.clone(), delay.clone()]);
        assert_eq!(consolidated, vec![gate, delay]);
    }
}
