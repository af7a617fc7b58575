//! Stripe endpoints: checkout intent creation and the reconciliation
//! webhook. Signature verification happens before any state change;
//! events the platform does not consume are acknowledged with 200 so
//! Stripe stops redelivering them.

use axum::body::Bytes;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use storage::Storage;

use crate::payments::{self, StripeEventOutcome};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/payments/create-intent", post(create_intent))
        .route("/payments/webhook", post(stripe_webhook))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CreateIntentRequest {
    order_id: Uuid,
    amount: Decimal,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    customer_email: Option<String>,
}

async fn create_intent(
    State(state): State<AppState>,
    Json(body): Json<CreateIntentRequest>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let secret_key = std::env::var("STRIPE_SECRET_KEY")
        .map_err(|_| (StatusCode::SERVICE_UNAVAILABLE, "payment service not configured".to_string()))?;

    let payment = state
        .storage
        .get_payment_by_order(body.order_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or((StatusCode::NOT_FOUND, "payment not found for order".to_string()))?;

    let currency = body.currency.as_deref().unwrap_or("brl");
    let intent = payments::create_payment_intent(
        &state.http,
        &secret_key,
        body.amount,
        currency,
        body.order_id,
        body.customer_email.as_deref(),
    )
    .await
    .map_err(|e| (StatusCode::BAD_GATEWAY, e))?;

    state
        .storage
        .set_payment_intent_id(payment.id, &intent.intent_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(json!({
        "paymentIntentId": intent.intent_id,
        "clientSecret": intent.client_secret,
    })))
}

async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), (StatusCode, String)> {
    let secret = state
        .secrets
        .stripe
        .as_deref()
        .ok_or((
            StatusCode::SERVICE_UNAVAILABLE,
            "Stripe webhook secret not configured".to_string(),
        ))?;

    let sig_header = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or((StatusCode::BAD_REQUEST, "missing Stripe-Signature header".to_string()))?;

    if !payments::verify_stripe_signature(sig_header, secret, &body) {
        return Err((StatusCode::UNAUTHORIZED, "invalid Stripe signature".to_string()));
    }

    let event: Value = serde_json::from_slice(&body)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid JSON: {e}")))?;

    let outcome = payments::apply_stripe_event(state.storage.as_ref(), &event).await;
    match outcome {
        StripeEventOutcome::Applied { order_id, .. } => Ok((
            StatusCode::OK,
            Json(json!({ "received": true, "orderId": order_id })),
        )),
        StripeEventOutcome::Ignored { .. } => {
            Ok((StatusCode::OK, Json(json!({ "received": true }))))
        }
        StripeEventOutcome::OrderUnknown { message } => {
            // Acknowledged: redelivery cannot make an unknown order appear.
            tracing::warn!(detail = %message, "stripe event for unknown order");
            Ok((StatusCode::OK, Json(json!({ "received": true, "message": message }))))
        }
        StripeEventOutcome::Failed { message } => {
            Err((StatusCode::INTERNAL_SERVER_ERROR, message))
        }
    }
}
