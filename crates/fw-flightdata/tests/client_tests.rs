//! FlightDataClient tests against a mock provider.

use std::time::Duration;

use chrono::NaiveDate;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fw_flightdata::{FlightDataClient, FlightDataClientConfig, FlightDataSource};

fn client_for(server: &MockServer) -> FlightDataClient {
    FlightDataClient::new(FlightDataClientConfig {
        base_url: server.uri(),
        api_key: "test-key".to_string(),
        cache_ttl: Duration::from_secs(300),
        request_timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 7, 8).unwrap()
}

fn flight_body() -> serde_json::Value {
    serde_json::json!({
        "flights": [{
            "ident": "BA820",
            "status": "Delayed",
            "gate_origin": "B7",
            "gate_destination": null,
            "estimated_out": "2025-07-08T22:45:00Z",
            "actual_out": null,
            "estimated_in": "2025-07-09T02:30:00Z",
            "actual_in": null,
            "aircraft_type": "A320"
        }]
    })
}

#[tokio::test]
async fn parses_flight_and_keeps_raw_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flights/BA820"))
        .and(header("x-apikey", "test-key"))
        .and(query_param("start", "2025-07-08"))
        .and(query_param("end", "2025-07-09"))
        .respond_with(ResponseTemplate::new(200).set_body_json(flight_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let observation = client
        .get_flight_status("BA820", date())
        .await
        .unwrap()
        .expect("flight present");

    assert_eq!(observation.ident, "BA820");
    assert_eq!(observation.status, "Delayed");
    assert_eq!(observation.gate_origin.as_deref(), Some("B7"));
    assert_eq!(observation.gate_destination, None);
    assert!(observation.estimated_out.is_some());
    assert_eq!(observation.raw["aircraft_type"], "A320");
}

#[tokio::test]
async fn second_call_within_ttl_is_served_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flights/BA820"))
        .respond_with(ResponseTemplate::new(200).set_body_json(flight_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.get_flight_status("BA820", date()).await.unwrap();
    client.get_flight_status("BA820", date()).await.unwrap();

    let counters = client.cache_counters();
    assert_eq!(counters.misses, 1);
    assert_eq!(counters.hits, 1);
    assert_eq!(counters.saved_calls, 1);
}

#[tokio::test]
async fn empty_flight_list_is_none_and_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flights/ZZ999"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"flights": []})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.get_flight_status("ZZ999", date()).await.unwrap().is_none());
    // Served from cache, no second provider call.
    assert!(client.get_flight_status("ZZ999", date()).await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_flight_404_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flights/XX000"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.get_flight_status("XX000", date()).await.unwrap().is_none());
}

#[tokio::test]
async fn client_errors_are_terminal_and_server_errors_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flights/BAD"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad ident"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flights/DOWN"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flights/LIMIT"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let client = client_for(&server);

    let err = client.get_flight_status("BAD", date()).await.unwrap_err();
    assert!(!err.is_retryable(), "4xx must be terminal");

    let err = client.get_flight_status("DOWN", date()).await.unwrap_err();
    assert!(err.is_retryable(), "5xx must be retryable");

    let err = client.get_flight_status("LIMIT", date()).await.unwrap_err();
    assert!(err.is_retryable(), "429 must be retryable");
}
