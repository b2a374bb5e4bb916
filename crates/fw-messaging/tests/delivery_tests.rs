//! WhatsAppClient tests against a mock gateway.

use indexmap::IndexMap;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fw_messaging::{MessageSender, WhatsAppClient, WhatsAppClientConfig};

fn client_for(server: &MockServer) -> WhatsAppClient {
    WhatsAppClient::new(WhatsAppClientConfig {
        base_url: server.uri(),
        account_sid: "AC0000".to_string(),
        auth_token: "secret".to_string(),
        messaging_service_sid: "MG1111".to_string(),
    })
    .unwrap()
}

fn variables() -> IndexMap<String, String> {
    let mut vars = IndexMap::new();
    vars.insert("1".to_string(), "Valentina".to_string());
    vars.insert("2".to_string(), "BA820".to_string());
    vars.insert("3".to_string(), "Mié 9 Jul 03:00 hs (LHR)".to_string());
    vars
}

#[tokio::test]
async fn template_send_parses_provider_id_and_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/Accounts/AC0000/Messages.json"))
        .and(body_string_contains("ContentSid=HXd5b757e51d032582949292a65a5afee1"))
        .and(body_string_contains("whatsapp%3A%2B5491122334455"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "sid": "SM900",
            "status": "queued"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let receipt = client_for(&server)
        .send_template(
            "+5491122334455",
            "HXd5b757e51d032582949292a65a5afee1",
            &variables(),
        )
        .await;

    assert!(receipt.is_success());
    assert_eq!(receipt.provider_id.as_deref(), Some("SM900"));
    assert_eq!(receipt.status, "queued");
}

#[tokio::test]
async fn gateway_rejection_maps_to_error_fields() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/Accounts/AC0000/Messages.json"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "code": 21211,
            "message": "The 'To' number is not a valid phone number."
        })))
        .mount(&server)
        .await;

    let receipt = client_for(&server)
        .send_template("+000", "HX123", &variables())
        .await;

    assert!(!receipt.is_success());
    assert_eq!(receipt.http_status, Some(400));
    assert_eq!(receipt.error_code.as_deref(), Some("21211"));
    assert!(receipt
        .error_message
        .as_deref()
        .unwrap()
        .contains("not a valid phone number"));
    assert!(receipt.into_result().is_err());
}

#[tokio::test]
async fn free_text_send_uses_body_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/Accounts/AC0000/Messages.json"))
        .and(body_string_contains("Body=Hola"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "sid": "SM901",
            "status": "accepted"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let receipt = client_for(&server).send_text("+5491122334455", "Hola").await;
    assert!(receipt.is_success());
}

#[tokio::test]
async fn media_send_includes_url_and_caption() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/Accounts/AC0000/Messages.json"))
        .and(body_string_contains("MediaUrl="))
        .and(body_string_contains("Body=Tu+itinerario"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "sid": "SM902",
            "status": "queued"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let receipt = client_for(&server)
        .send_media(
            "+5491122334455",
            "https://files.example.com/itinerary.pdf",
            Some("Tu itinerario"),
        )
        .await;
    assert!(receipt.is_success());
}

#[tokio::test]
async fn server_error_with_unparseable_body_still_produces_receipt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/Accounts/AC0000/Messages.json"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let receipt = client_for(&server)
        .send_template("+5491122334455", "HX123", &variables())
        .await;

    assert!(!receipt.is_success());
    assert_eq!(receipt.http_status, Some(503));
    // 5xx keeps the retry path open.
    assert!(receipt.into_result().unwrap_err().is_retryable());
}
