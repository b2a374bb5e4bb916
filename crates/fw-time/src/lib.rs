//! Time and timezone service.
//!
//! Pure functions over `(UTC instant, IATA code)`. The airport table is a
//! closed in-memory map; unknown codes degrade to UTC and never trigger
//! quiet hours.

use chrono::{DateTime, Datelike, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Quiet hours default: 20:00–09:00 local at the origin airport.
pub const QUIET_START_HOUR: u32 = 20;
pub const QUIET_END_HOUR: u32 = 9;

const SPANISH_DAYS: [&str; 7] = ["Dom", "Lun", "Mar", "Mié", "Jue", "Vie", "Sáb"];
const SPANISH_MONTHS: [&str; 12] = [
    "Ene", "Feb", "Mar", "Abr", "May", "Jun", "Jul", "Ago", "Sep", "Oct", "Nov", "Dic",
];

/// Airport IATA code → timezone. Major Latin American airports plus the
/// North American and European connection hubs the agencies book through.
const AIRPORT_TIMEZONES: &[(&str, Tz)] = &[
    // Argentina
    ("EZE", chrono_tz::America::Argentina::Buenos_Aires),
    ("AEP", chrono_tz::America::Argentina::Buenos_Aires),
    ("COR", chrono_tz::America::Argentina::Cordoba),
    ("MDZ", chrono_tz::America::Argentina::Mendoza),
    ("ROS", chrono_tz::America::Argentina::Cordoba),
    // Brazil
    ("GRU", chrono_tz::America::Sao_Paulo),
    ("GIG", chrono_tz::America::Sao_Paulo),
    ("BSB", chrono_tz::America::Sao_Paulo),
    ("CGH", chrono_tz::America::Sao_Paulo),
    // Mexico
    ("MEX", chrono_tz::America::Mexico_City),
    ("CUN", chrono_tz::America::Cancun),
    ("GDL", chrono_tz::America::Mexico_City),
    ("TIJ", chrono_tz::America::Tijuana),
    // USA
    ("MIA", chrono_tz::America::New_York),
    ("LAX", chrono_tz::America::Los_Angeles),
    ("JFK", chrono_tz::America::New_York),
    ("ORD", chrono_tz::America::Chicago),
    ("DFW", chrono_tz::America::Chicago),
    // Panama
    ("PTY", chrono_tz::America::Panama),
    // Chile
    ("SCL", chrono_tz::America::Santiago),
    // Colombia
    ("BOG", chrono_tz::America::Bogota),
    // Peru
    ("LIM", chrono_tz::America::Lima),
    // Uruguay
    ("MVD", chrono_tz::America::Montevideo),
    // Costa Rica
    ("SJO", chrono_tz::America::Costa_Rica),
    // Spain
    ("MAD", chrono_tz::Europe::Madrid),
    ("BCN", chrono_tz::Europe::Madrid),
    // Turkey
    ("IST", chrono_tz::Europe::Istanbul),
    // UK
    ("LHR", chrono_tz::Europe::London),
    ("LGW", chrono_tz::Europe::London),
];

/// IATA code → city name, for the landing welcome message.
const AIRPORT_CITIES: &[(&str, &str)] = &[
    ("EZE", "Buenos Aires"),
    ("AEP", "Buenos Aires"),
    ("COR", "Córdoba"),
    ("MDZ", "Mendoza"),
    ("ROS", "Rosario"),
    ("GRU", "São Paulo"),
    ("GIG", "Río de Janeiro"),
    ("BSB", "Brasilia"),
    ("CGH", "São Paulo"),
    ("MEX", "Ciudad de México"),
    ("CUN", "Cancún"),
    ("GDL", "Guadalajara"),
    ("TIJ", "Tijuana"),
    ("MIA", "Miami"),
    ("LAX", "Los Ángeles"),
    ("JFK", "Nueva York"),
    ("ORD", "Chicago"),
    ("DFW", "Dallas"),
    ("PTY", "Ciudad de Panamá"),
    ("SCL", "Santiago"),
    ("BOG", "Bogotá"),
    ("LIM", "Lima"),
    ("MVD", "Montevideo"),
    ("SJO", "San José"),
    ("MAD", "Madrid"),
    ("BCN", "Barcelona"),
    ("IST", "Estambul"),
    ("LHR", "Londres"),
    ("LGW", "Londres"),
];

/// Timezone for an airport, if known.
pub fn airport_timezone(iata: &str) -> Option<Tz> {
    let code = iata.trim().to_uppercase();
    AIRPORT_TIMEZONES
        .iter()
        .find(|(k, _)| *k == code)
        .map(|(_, tz)| *tz)
}

/// City name for an airport, if known.
pub fn city_from_iata(iata: &str) -> Option<&'static str> {
    let code = iata.trim().to_uppercase();
    AIRPORT_CITIES
        .iter()
        .find(|(k, _)| *k == code)
        .map(|(_, city)| *city)
}

/// Convert a UTC instant to local time at the airport. Unknown airports
/// fall back to UTC.
pub fn to_local(instant: DateTime<Utc>, iata: &str) -> DateTime<Tz> {
    let tz = airport_timezone(iata).unwrap_or(chrono_tz::UTC);
    instant.with_timezone(&tz)
}

/// Interpret a naive wall-clock time as local time at the airport and
/// return the UTC instant. Ambiguous local times (DST fold) take the
/// earlier offset; nonexistent local times (DST gap) are read as UTC.
pub fn local_input_to_utc(local: NaiveDateTime, iata: &str) -> DateTime<Utc> {
    let tz = airport_timezone(iata).unwrap_or(chrono_tz::UTC);
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => Utc.from_utc_datetime(&local),
    }
}

/// The local calendar date of an instant at the airport, which is how the
/// flight-data provider keys flights.
pub fn local_flight_date(instant: DateTime<Utc>, iata: &str) -> NaiveDate {
    to_local(instant, iata).date_naive()
}

/// `"Mar 8 Jul 22:05 hs (LHR)"` — Spanish weekday and month abbreviations,
/// no leading zero on the day.
pub fn format_human(instant: DateTime<Utc>, iata: &str) -> String {
    let local = to_local(instant, iata);
    format!(
        "{} {} {} {:02}:{:02} hs ({})",
        SPANISH_DAYS[local.weekday().num_days_from_sunday() as usize],
        local.day(),
        SPANISH_MONTHS[local.month0() as usize],
        local.hour(),
        local.minute(),
        iata.trim().to_uppercase(),
    )
}

/// `"8 Jul 22:05 hs"` — the weekday-free variant the 24h reminder uses.
pub fn format_local_clean(instant: DateTime<Utc>, iata: &str) -> String {
    let local = to_local(instant, iata);
    format!(
        "{} {} {:02}:{:02} hs",
        local.day(),
        SPANISH_MONTHS[local.month0() as usize],
        local.hour(),
        local.minute(),
    )
}

/// Quiet-hours predicate with the default 20:00–09:00 window.
pub fn is_quiet_hours_local(instant: DateTime<Utc>, iata: &str) -> bool {
    is_quiet_hours_local_with(instant, iata, QUIET_START_HOUR, QUIET_END_HOUR)
}

/// Quiet-hours predicate with a configurable window. A wrapping window
/// (`start > end`, e.g. 20–09) covers the overnight span; unknown airports
/// always return false.
pub fn is_quiet_hours_local_with(
    instant: DateTime<Utc>,
    iata: &str,
    start_hour: u32,
    end_hour: u32,
) -> bool {
    let Some(tz) = airport_timezone(iata) else {
        return false;
    };
    let hour = instant.with_timezone(&tz).hour();
    if start_hour > end_hour {
        hour >= start_hour || hour < end_hour
    } else {
        hour >= start_hour && hour < end_hour
    }
}

/// Round an instant down to the nearest 5 minutes (seconds dropped), used
/// to bucket delay ETAs for dedup.
pub fn round_down_5min(instant: DateTime<Utc>) -> DateTime<Utc> {
    let trimmed = instant
        .with_second(0)
        .and_then(|dt| dt.with_nanosecond(0))
        .unwrap_or(instant);
    let excess = trimmed.minute() % 5;
    trimmed - chrono::Duration::minutes(excess as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn lhr_late_evening_creation_formats_with_weekday() {
        // 2025-07-08T22:05 local London (BST) is 21:05Z, a Tuesday.
        let stored = utc("2025-07-08T21:05:00Z");
        assert_eq!(format_human(stored, "LHR"), "Mar 8 Jul 22:05 hs (LHR)");
    }

    #[test]
    fn local_input_converts_to_utc_at_ingress() {
        let naive =
            NaiveDateTime::parse_from_str("2025-07-08T22:05", "%Y-%m-%dT%H:%M").unwrap();
        let stored = local_input_to_utc(naive, "LHR");
        assert_eq!(stored, utc("2025-07-08T21:05:00Z"));
    }

    #[test]
    fn format_round_trips_local_wall_clock() {
        let naive =
            NaiveDateTime::parse_from_str("2025-12-03T07:45", "%Y-%m-%dT%H:%M").unwrap();
        let stored = local_input_to_utc(naive, "EZE");
        let human = format_human(stored, "EZE");
        assert!(human.contains("07:45"), "lost local wall clock: {human}");
        assert!(human.contains("3 Dic"), "lost local day: {human}");
    }

    #[test]
    fn clean_format_drops_weekday_and_iata() {
        let stored = utc("2025-07-08T21:05:00Z");
        assert_eq!(format_local_clean(stored, "LHR"), "8 Jul 22:05 hs");
    }

    #[test]
    fn unknown_iata_falls_back_to_utc() {
        let stored = utc("2025-07-08T21:05:00Z");
        assert_eq!(format_human(stored, "XXX"), "Mar 8 Jul 21:05 hs (XXX)");
        assert!(!is_quiet_hours_local(utc("2025-07-08T23:00:00Z"), "XXX"));
    }

    #[test]
    fn quiet_hours_overnight_window() {
        // 05:00Z in EZE (UTC-3) is 02:00 local.
        assert!(is_quiet_hours_local(utc("2025-07-08T05:00:00Z"), "EZE"));
        // 15:00Z is 12:00 local.
        assert!(!is_quiet_hours_local(utc("2025-07-08T15:00:00Z"), "EZE"));
    }

    #[test]
    fn quiet_hours_boundaries_are_exact() {
        // 12:00Z = 09:00 local EZE: reminders become eligible.
        assert!(!is_quiet_hours_local(utc("2025-07-08T12:00:00Z"), "EZE"));
        // 11:59Z = 08:59 local: still quiet.
        assert!(is_quiet_hours_local(utc("2025-07-08T11:59:00Z"), "EZE"));
        // 23:00Z = 20:00 local: quiet again.
        assert!(is_quiet_hours_local(utc("2025-07-08T23:00:00Z"), "EZE"));
        // 22:59Z = 19:59 local.
        assert!(!is_quiet_hours_local(utc("2025-07-08T22:59:00Z"), "EZE"));
    }

    #[test]
    fn non_wrapping_quiet_window_is_supported() {
        // 13:00Z = 10:00 local EZE, inside a 9–20 daytime window.
        assert!(is_quiet_hours_local_with(
            utc("2025-07-08T13:00:00Z"),
            "EZE",
            9,
            20
        ));
        assert!(!is_quiet_hours_local_with(
            utc("2025-07-08T05:00:00Z"),
            "EZE",
            9,
            20
        ));
    }

    #[test]
    fn eta_rounds_down_to_five_minutes() {
        assert_eq!(
            round_down_5min(utc("2025-07-09T03:04:59Z")),
            utc("2025-07-09T03:00:00Z")
        );
        assert_eq!(
            round_down_5min(utc("2025-07-09T02:45:00Z")),
            utc("2025-07-09T02:45:00Z")
        );
        assert_eq!(
            round_down_5min(utc("2025-07-09T02:47:31Z")),
            utc("2025-07-09T02:45:00Z")
        );
    }

    #[test]
    fn city_lookup_covers_the_airport_table() {
        assert_eq!(city_from_iata("eze"), Some("Buenos Aires"));
        assert_eq!(city_from_iata("LHR"), Some("Londres"));
        assert_eq!(city_from_iata("ZZZ"), None);
    }
}
