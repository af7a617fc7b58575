//! Inbound order webhooks from the delivery marketplaces. The route
//! layer only parses the path, picks the platform signature header and
//! translates the typed ingestion outcome into an HTTP status: 2xx for
//! anything the sender should not retry as-is, 4xx only for signature
//! and validation failures.

use axum::body::Bytes;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use uuid::Uuid;

use domain::ExternalPlatform;

use crate::ingest::{self, WebhookOutcome};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/:platform/:tenant_id", post(handle_platform_webhook))
        .with_state(state)
}

/// Header each platform signs with.
fn signature_header(platform: ExternalPlatform) -> &'static str {
    match platform {
        ExternalPlatform::Ifood => "x-ifood-signature",
        ExternalPlatform::UberEats => "x-uber-signature",
        ExternalPlatform::QueroDelivery => "x-quero-signature",
        ExternalPlatform::Generic => "x-webhook-signature",
    }
}

async fn handle_platform_webhook(
    State(state): State<AppState>,
    Path((platform, tenant_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let Ok(platform) = platform.parse::<ExternalPlatform>() else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "message": "unknown platform" })),
        );
    };
    let Ok(tenant_id) = Uuid::parse_str(&tenant_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "message": "invalid tenant id" })),
        );
    };

    let signature = headers
        .get(signature_header(platform))
        .and_then(|v| v.to_str().ok());

    let outcome = ingest::process_platform_webhook(
        state.storage.as_ref(),
        state.notifier.as_ref(),
        platform,
        tenant_id,
        &body,
        signature,
        state.secrets.for_platform(platform),
    )
    .await;

    let status = match &outcome {
        WebhookOutcome::Created { .. }
        | WebhookOutcome::StatusUpdated { .. }
        | WebhookOutcome::Unchanged { .. }
        | WebhookOutcome::UnknownEvent { .. } => StatusCode::OK,
        WebhookOutcome::InvalidSignature => StatusCode::UNAUTHORIZED,
        WebhookOutcome::InvalidPayload { .. } => StatusCode::BAD_REQUEST,
        WebhookOutcome::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = json!({
        "success": outcome.success(),
        "message": outcome.message(),
        "orderId": outcome.order_id(),
    });
    (status, Json(body))
}
