//! HTTP client for the external flight-status provider.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use fw_common::retry::OpError;

use crate::cache::{CacheCounters, FlightStatusCache};
use crate::{FlightDataSource, FlightObservation};

#[derive(Debug, Clone)]
pub struct FlightDataClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub cache_ttl: Duration,
    pub request_timeout: Duration,
}

impl Default for FlightDataClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://aeroapi.flightaware.com/aeroapi".to_string(),
            api_key: String::new(),
            cache_ttl: Duration::from_secs(300),
            request_timeout: Duration::from_secs(20),
        }
    }
}

/// Wire format of one flight entry in the provider response. Unknown
/// fields stay in the raw payload.
#[derive(Debug, Deserialize)]
struct ProviderFlight {
    ident: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    gate_origin: Option<String>,
    #[serde(default)]
    gate_destination: Option<String>,
    #[serde(default)]
    estimated_out: Option<DateTime<Utc>>,
    #[serde(default)]
    actual_out: Option<DateTime<Utc>>,
    #[serde(default)]
    estimated_in: Option<DateTime<Utc>>,
    #[serde(default)]
    actual_in: Option<DateTime<Utc>>,
}

pub struct FlightDataClient {
    config: FlightDataClientConfig,
    client: reqwest::Client,
    cache: FlightStatusCache,
}

impl FlightDataClient {
    pub fn new(config: FlightDataClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let cache = FlightStatusCache::new(config.cache_ttl);
        Ok(Self {
            config,
            client,
            cache,
        })
    }

    pub fn cache_counters(&self) -> CacheCounters {
        self.cache.counters()
    }

    pub fn purge_expired_cache(&self) -> usize {
        self.cache.purge_expired()
    }

    async fn fetch_from_provider(
        &self,
        flight_number: &str,
        local_date: NaiveDate,
    ) -> Result<Option<FlightObservation>, OpError> {
        let url = format!(
            "{}/flights/{}",
            self.config.base_url.trim_end_matches('/'),
            flight_number
        );
        let end = local_date + chrono::Duration::days(1);

        let response = self
            .client
            .get(&url)
            .header("x-apikey", &self.config.api_key)
            .query(&[
                ("start", local_date.to_string()),
                ("end", end.to_string()),
            ])
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status.as_u16() == 404 {
            debug!(flight = flight_number, %local_date, "provider does not know this flight yet");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(flight = flight_number, status = status.as_u16(), "provider request failed");
            return Err(OpError::from_http_status(status.as_u16(), body));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| OpError::retryable(anyhow::anyhow!("provider payload unreadable: {e}")))?;

        let Some(entry) = payload
            .get("flights")
            .and_then(|f| f.as_array())
            .and_then(|flights| flights.first())
            .cloned()
        else {
            debug!(flight = flight_number, %local_date, "provider returned no flights");
            return Ok(None);
        };

        let flight: ProviderFlight = serde_json::from_value(entry.clone())
            .map_err(|e| OpError::retryable(anyhow::anyhow!("provider flight entry unreadable: {e}")))?;

        Ok(Some(FlightObservation {
            ident: flight.ident,
            status: flight.status.unwrap_or_else(|| "Scheduled".to_string()),
            gate_origin: non_empty(flight.gate_origin),
            gate_destination: non_empty(flight.gate_destination),
            estimated_out: flight.estimated_out,
            actual_out: flight.actual_out,
            estimated_in: flight.estimated_in,
            actual_in: flight.actual_in,
            raw: entry,
        }))
    }
}

#[async_trait]
impl FlightDataSource for FlightDataClient {
    async fn get_flight_status(
        &self,
        flight_number: &str,
        local_date: NaiveDate,
    ) -> Result<Option<FlightObservation>, OpError> {
        if let Some(cached) = self.cache.get(flight_number, local_date) {
            return Ok(cached);
        }

        let observation = self.fetch_from_provider(flight_number, local_date).await?;
        self.cache
            .insert(flight_number, local_date, observation.clone());
        metrics::counter!("flightdata.provider_calls_total").increment(1);
        Ok(observation)
    }
}

fn classify_transport_error(err: reqwest::Error) -> OpError {
    // Timeouts and connection failures retry; anything else on the
    // transport is treated the same way.
    OpError::retryable(anyhow::anyhow!("provider transport error: {err}"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
