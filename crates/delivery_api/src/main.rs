mod connectors;
mod dispatch;
mod ingest;
mod maps;
mod notify;
mod payments;
mod routes;
mod state;

use std::sync::Arc;

use axum::{routing::get, Router};
use storage::SmartStorage;

use crate::dispatch::{DeliveryOptimizer, DriverLocationRegistry};
use crate::maps::MapsService;
use crate::notify::{NoopNotifier, Notifier, TwilioWhatsAppNotifier};
use crate::state::{AppState, WebhookSecrets};

#[tokio::main]
async fn main() {
    // Load .env from workspace root (when running from project root)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let storage = match std::env::var("DATABASE_URL") {
        Ok(database_url) => match storage::connect(&database_url).await {
            Ok(pool) => {
                if let Err(e) = storage::run_migrations(&pool).await {
                    tracing::error!("migrations failed: {}", e);
                    return;
                }
                tracing::info!("database connected, migrations applied");
                SmartStorage::with_database(pool)
            }
            Err(e) => {
                tracing::warn!(
                    "database not available ({}), serving from memory storage; DATABASE_URL (redacted): {}",
                    e,
                    redact_password(&database_url)
                );
                SmartStorage::memory_only()
            }
        },
        Err(_) => {
            tracing::warn!("DATABASE_URL not set, serving from memory storage");
            SmartStorage::memory_only()
        }
    };
    let storage = Arc::new(storage);

    let notifier: Arc<dyn Notifier> = match TwilioWhatsAppNotifier::from_env() {
        Some(twilio) => {
            tracing::info!("WhatsApp notifications enabled");
            Arc::new(twilio)
        }
        None => {
            tracing::info!("WhatsApp credentials not configured, notifications are logged only");
            Arc::new(NoopNotifier)
        }
    };

    let maps = MapsService::from_env();
    if maps.is_none() {
        tracing::info!("no routing provider configured, using geometric fallbacks");
    }

    let locations = Arc::new(DriverLocationRegistry::new());
    let optimizer = Arc::new(DeliveryOptimizer::new(
        storage.clone(),
        maps,
        locations.clone(),
    ));

    let state = AppState {
        storage,
        optimizer,
        locations,
        notifier,
        secrets: Arc::new(WebhookSecrets::from_env()),
        http: reqwest::Client::new(),
    };

    let app = Router::new()
        .route("/health", get(health))
        .with_state(state.clone())
        .merge(routes::router(state));

    let addr = "0.0.0.0:8080";
    tracing::info!("listening on http://{}", addr);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("failed to bind {}: {}", addr, e);
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {}", e);
    }
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<serde_json::Value> {
    let storage_mode = if state.storage.is_degraded() {
        "memory"
    } else {
        "database"
    };
    axum::Json(serde_json::json!({ "ok": true, "storage": storage_mode }))
}

/// Redact password in DATABASE_URL for safe logging.
fn redact_password(url: &str) -> String {
    if let Some(at) = url.find('@') {
        if let Some(colon) = url.find("://").map(|i| i + 3).filter(|&i| i < at) {
            if let Some(pw_start) = url[colon..].find(':').map(|j| colon + j + 1) {
                if pw_start < at {
                    return format!("{}***{}", &url[..pw_start], &url[at..]);
                }
            }
        }
    }
    url.to_string()
}
