//! Order reads and the status-transition endpoint used by the kitchen
//! and driver dashboards. Transitions run through the order state
//! machine; an invalid move is a conflict, not a write.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use domain::{Order, OrderStatus};
use storage::{Storage, StorageError};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", patch(update_status))
        .route("/tenants/:id/orders", get(tenant_orders))
        .route("/tenants/:id/orders/pending", get(tenant_pending_orders))
        .with_state(state)
}

fn order_json(order: &Order) -> Value {
    json!({
        "id": order.id,
        "tenantId": order.tenant_id,
        "customerName": order.customer_name,
        "status": order.status,
        "subtotal": order.subtotal,
        "deliveryFee": order.delivery_fee,
        "total": order.total,
        "driverId": order.driver_id,
        "externalPlatform": order.external_platform,
        "externalOrderId": order.external_order_id,
        "createdAt": order.created_at,
        "updatedAt": order.updated_at,
    })
}

fn internal(err: StorageError) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let order = state
        .storage
        .get_order(id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "order not found".to_string()))?;
    Ok(Json(order_json(&order)))
}

#[derive(Debug, Deserialize)]
struct StatusUpdateRequest {
    status: OrderStatus,
}

async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<StatusUpdateRequest>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let order = state
        .storage
        .get_order(id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "order not found".to_string()))?;

    if !order.status.can_transition_to(body.status) {
        return Err((
            StatusCode::CONFLICT,
            format!("cannot move order from {} to {}", order.status, body.status),
        ));
    }

    let previous = order.status;
    let updated = state
        .storage
        .update_order_status(id, body.status)
        .await
        .map_err(internal)?;

    // Status changes reach the customer except for cancellations;
    // notification failures never undo the write.
    if body.status != OrderStatus::Cancelled && !updated.customer_phone.is_empty() {
        let tenant_name = state
            .storage
            .get_tenant(updated.tenant_id)
            .await
            .ok()
            .flatten()
            .map(|t| t.name)
            .unwrap_or_default();
        let result = state
            .notifier
            .send_order_status_notification(
                &updated.customer_phone,
                updated.id,
                Some(previous),
                body.status,
                &tenant_name,
            )
            .await;
        if !result.success {
            tracing::warn!(order_id = %updated.id, "customer notification failed");
        }
    }

    Ok(Json(order_json(&updated)))
}

async fn tenant_orders(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let orders = state
        .storage
        .list_orders_by_tenant(id)
        .await
        .map_err(internal)?;
    Ok(Json(json!({
        "orders": orders.iter().map(order_json).collect::<Vec<_>>()
    })))
}

async fn tenant_pending_orders(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let orders = state
        .storage
        .list_pending_orders_by_tenant(id)
        .await
        .map_err(internal)?;
    Ok(Json(json!({
        "orders": orders.iter().map(order_json).collect::<Vec<_>>()
    })))
}
