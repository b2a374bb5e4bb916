//! Template registry.
//!
//! Maps each [`NotificationKind`] to its provider template and builds the
//! positional variable map ("1".."N"). Missing values fall back to the
//! configured Spanish defaults; a slot is never left empty.

use indexmap::IndexMap;

use fw_common::{NotificationKind, Trip};
use fw_config::{MessageDefaults, MessagingConfig, TemplateBinding};

use crate::MessagingError;

/// Metadata keys checked, in order, for the landing stay address.
const STAY_METADATA_KEYS: &[&str] = &[
    "stay",
    "hotel_address",
    "accommodation_address",
    "hotel_name",
];

/// Rendered message ready for the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContent {
    pub template_id: String,
    pub template_name: String,
    /// Positional slots, in order: key "1" first.
    pub variables: IndexMap<String, String>,
}

/// Optional per-send values resolved upstream (detected changes, gate
/// enrichment, future weather source).
#[derive(Debug, Clone, Default)]
pub struct TemplateExtras {
    pub new_eta_human: Option<String>,
    pub new_gate: Option<String>,
    pub boarding_gate: Option<String>,
    pub weather: Option<String>,
    pub closing: Option<String>,
    pub stay_address: Option<String>,
}

/// Required slot names per kind, as documented in the template catalogue.
pub fn required_slots(kind: NotificationKind) -> &'static [&'static str] {
    match kind {
        NotificationKind::ReservationConfirmation => {
            &["name", "flight", "origin", "destination", "local_departure_human"]
        }
        NotificationKind::Reminder24h => {
            &["name", "origin", "local_departure_clean", "weather", "destination", "closing"]
        }
        NotificationKind::Delayed => &["name", "flight", "new_eta_human"],
        NotificationKind::GateChange => &["name", "flight", "new_gate"],
        NotificationKind::Cancelled => &["name", "flight"],
        NotificationKind::Boarding => &["flight", "gate"],
        NotificationKind::ItineraryReady => &["name"],
        NotificationKind::LandingWelcome => &["destination_city", "stay_address"],
    }
}

#[derive(Debug)]
pub struct TemplateRegistry {
    bindings: std::collections::BTreeMap<String, TemplateBinding>,
    defaults: MessageDefaults,
}

impl TemplateRegistry {
    /// Build the registry from configuration, requiring a binding for
    /// every notification kind.
    pub fn from_config(config: &MessagingConfig, defaults: MessageDefaults) -> Result<Self, MessagingError> {
        for kind in ALL_KINDS {
            if !config.templates.contains_key(kind.as_str()) {
                return Err(MessagingError::MissingTemplate(kind.as_str().to_string()));
            }
        }
        Ok(Self {
            bindings: config.templates.clone(),
            defaults,
        })
    }

    pub fn defaults(&self) -> &MessageDefaults {
        &self.defaults
    }

    /// Configured template name for a kind, for logging.
    pub fn template_name(&self, kind: NotificationKind) -> String {
        self.binding(kind).name.clone()
    }

    fn binding(&self, kind: NotificationKind) -> &TemplateBinding {
        // from_config guarantees every kind is present.
        &self.bindings[kind.as_str()]
    }

    /// Render the template for `kind`, filling positional slots from the
    /// trip, the extras, and the configured defaults, in that order.
    pub fn format(
        &self,
        kind: NotificationKind,
        trip: &Trip,
        extra: &TemplateExtras,
    ) -> MessageContent {
        let slots: Vec<String> = match kind {
            NotificationKind::ReservationConfirmation => vec![
                trip.client_name.clone(),
                trip.flight_number.clone(),
                trip.origin_iata.clone(),
                trip.destination_iata.clone(),
                fw_time::format_human(trip.departure_utc, &trip.origin_iata),
            ],
            NotificationKind::Reminder24h => vec![
                trip.client_name.clone(),
                trip.origin_iata.clone(),
                fw_time::format_local_clean(trip.departure_utc, &trip.origin_iata),
                extra
                    .weather
                    .clone()
                    .unwrap_or_else(|| self.defaults.weather_text.clone()),
                trip.destination_iata.clone(),
                extra
                    .closing
                    .clone()
                    .unwrap_or_else(|| self.defaults.closing_text.clone()),
            ],
            NotificationKind::Delayed => vec![
                trip.client_name.clone(),
                trip.flight_number.clone(),
                extra
                    .new_eta_human
                    .clone()
                    .unwrap_or_else(|| self.defaults.eta_unknown_text.clone()),
            ],
            NotificationKind::GateChange => vec![
                trip.client_name.clone(),
                trip.flight_number.clone(),
                extra
                    .new_gate
                    .clone()
                    .unwrap_or_else(|| self.defaults.gate_placeholder.clone()),
            ],
            NotificationKind::Cancelled => {
                vec![trip.client_name.clone(), trip.flight_number.clone()]
            }
            NotificationKind::Boarding => vec![
                trip.flight_number.clone(),
                extra
                    .boarding_gate
                    .clone()
                    .unwrap_or_else(|| self.defaults.gate_placeholder.clone()),
            ],
            NotificationKind::ItineraryReady => vec![trip.client_name.clone()],
            NotificationKind::LandingWelcome => vec![
                fw_time::city_from_iata(&trip.destination_iata)
                    .map(String::from)
                    .unwrap_or_else(|| self.defaults.city_fallback.clone()),
                self.resolve_stay(trip, extra),
            ],
        };

        let binding = self.binding(kind);
        let variables: IndexMap<String, String> = slots
            .into_iter()
            .enumerate()
            .map(|(i, value)| ((i + 1).to_string(), value))
            .collect();

        MessageContent {
            template_id: binding.id.clone(),
            template_name: binding.name.clone(),
            variables,
        }
    }

    fn resolve_stay(&self, trip: &Trip, extra: &TemplateExtras) -> String {
        if let Some(stay) = &extra.stay_address {
            return stay.clone();
        }
        for key in STAY_METADATA_KEYS {
            if let Some(value) = trip.metadata_str(key) {
                return value.to_string();
            }
        }
        self.defaults.stay_placeholder.clone()
    }
}

const ALL_KINDS: [NotificationKind; 8] = [
    NotificationKind::ReservationConfirmation,
    NotificationKind::Reminder24h,
    NotificationKind::Delayed,
    NotificationKind::GateChange,
    NotificationKind::Cancelled,
    NotificationKind::Boarding,
    NotificationKind::LandingWelcome,
    NotificationKind::ItineraryReady,
];
