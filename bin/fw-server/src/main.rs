//! Flightwatch server.
//!
//! Hosts the trip ingress API and runs the polling scheduler in the same
//! process. Exactly one instance should run; leadership is handled by
//! the deployment environment.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use fw_config::AppConfig;
use fw_engine::{EngineConfig, NotificationsEngine};
use fw_flightdata::{FlightDataClient, FlightDataClientConfig, FlightDataSource};
use fw_messaging::{MessageSender, TemplateRegistry, WhatsAppClient, WhatsAppClientConfig};
use fw_scheduler::{FlightScheduler, SchedulerSettings};
use fw_store::{PgTripStore, TripStore};

mod api;

use api::ApiState;

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    scheduler_running: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fw_common::logging::init_logging("fw-server");

    info!("Starting Flightwatch server");

    let config = AppConfig::load()?;
    info!(
        tick_s = config.scheduler.tick_seconds,
        workers = config.scheduler.workers,
        "configuration loaded"
    );

    let prometheus = PrometheusBuilder::new().install_recorder()?;

    let store = PgTripStore::connect(&config.database.url, config.database.max_connections).await?;
    store.init_schema().await?;
    let store: Arc<dyn TripStore> = Arc::new(store);
    info!("connected to database");

    let flight_client = Arc::new(FlightDataClient::new(FlightDataClientConfig {
        base_url: config.flight_data.base_url.clone(),
        api_key: config.flight_data.api_key.clone(),
        cache_ttl: Duration::from_secs(config.flight_data.cache_ttl_seconds),
        request_timeout: Duration::from_secs(config.flight_data.request_timeout_seconds),
    })?);
    let flight_data: Arc<dyn FlightDataSource> = flight_client.clone();

    let sender: Arc<dyn MessageSender> = Arc::new(WhatsAppClient::new(WhatsAppClientConfig {
        base_url: config.messaging.base_url.clone(),
        account_sid: config.messaging.account_sid.clone(),
        auth_token: config.messaging.auth_token.clone(),
        messaging_service_sid: config.messaging.messaging_service_sid.clone(),
    })?);

    let registry = TemplateRegistry::from_config(
        &config.messaging,
        config.notifications.messages.clone(),
    )?;
    let engine_config = EngineConfig::from_notifications(&config.notifications)?;
    let engine = Arc::new(NotificationsEngine::new(
        store.clone(),
        flight_data,
        sender,
        registry,
        engine_config,
    ));

    let scheduler = Arc::new(FlightScheduler::new(
        SchedulerSettings::from(&config.scheduler),
        store.clone(),
        engine.clone(),
    ));
    scheduler.start().await;

    spawn_cache_reporter(flight_client, Duration::from_secs(config.flight_data.cache_ttl_seconds));

    let api_state = ApiState {
        store,
        engine,
        reminder_lead: chrono::Duration::hours(config.notifications.reminder_lead_hours as i64),
    };

    let scheduler_for_health = scheduler.clone();
    let app = Router::new()
        .route("/trips", post(api::create_trip))
        .route("/trips/:id/notifications", post(api::send_notification))
        .with_state(api_state)
        .route(
            "/q/health",
            get(move || {
                let scheduler = scheduler_for_health.clone();
                async move {
                    let running = scheduler.is_running().await;
                    Json(HealthResponse {
                        status: if running { "UP" } else { "DOWN" }.to_string(),
                        scheduler_running: running,
                    })
                }
            }),
        )
        .route("/q/health/live", get(|| async { Json(serde_json::json!({"status": "UP"})) }))
        .route("/q/health/ready", get(|| async { Json(serde_json::json!({"status": "UP"})) }))
        .route(
            "/metrics",
            get(move || {
                let prometheus = prometheus.clone();
                async move { prometheus.render() }
            }),
        )
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::new(config.http.host.parse()?, config.http.port);
    info!(?addr, "HTTP server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(scheduler))
        .await?;

    info!("Flightwatch server stopped");
    Ok(())
}

/// Periodic provider-usage report from the flight-data cache.
fn spawn_cache_reporter(client: Arc<FlightDataClient>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let evicted = client.purge_expired_cache();
            let counters = client.cache_counters();
            info!(
                hits = counters.hits,
                misses = counters.misses,
                saved_calls = counters.saved_calls,
                evicted,
                "flight-data cache report"
            );
        }
    });
}

async fn shutdown_signal(scheduler: Arc<FlightScheduler>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install CTRL+C handler");
        return;
    }
    info!("shutdown signal received");
    scheduler.stop().await;
}
