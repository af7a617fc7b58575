//! Driver GPS ingestion and dispatch queries: live locations, nearest
//! drivers, auto-assignment, batch ETAs and fee estimates.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use domain::{geo, AssignmentStatus, DriverStatus, NewDriverAssignment};

use storage::Storage;

use crate::dispatch::{DispatchError, EtaOrder};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/driver/location", post(update_location))
        .route("/driver/:driver_id/location", get(get_location))
        .route("/dispatch/active-drivers", get(active_drivers))
        .route("/dispatch/nearest", get(nearest_drivers))
        .route("/dispatch/auto-assign", post(auto_assign))
        .route("/dispatch/etas", post(batch_etas))
        .route("/dispatch/fee-estimate", get(fee_estimate))
        .route("/assignments/:id/respond", post(respond_to_assignment))
        .with_state(state)
}

fn dispatch_error(err: DispatchError) -> (StatusCode, String) {
    match err {
        DispatchError::InvalidCoordinates => (StatusCode::BAD_REQUEST, err.to_string()),
        DispatchError::Storage(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct LocationPing {
    driver_id: Uuid,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    accuracy: Option<f64>,
}

async fn update_location(
    State(state): State<AppState>,
    Json(ping): Json<LocationPing>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let location = state
        .locations
        .record_ping(ping.driver_id, ping.latitude, ping.longitude, ping.accuracy)
        .map_err(dispatch_error)?;

    // Persisted fix is best effort; the live registry is what dispatch reads.
    if let Err(err) = state
        .storage
        .update_driver_location(ping.driver_id, ping.latitude, ping.longitude)
        .await
    {
        tracing::debug!(driver_id = %ping.driver_id, error = %err, "driver fix not persisted");
    }

    Ok(Json(json!({
        "success": true,
        "location": {
            "driverId": location.driver_id,
            "latitude": location.latitude,
            "longitude": location.longitude,
            "recordedAt": location.recorded_at,
        }
    })))
}

async fn get_location(
    State(state): State<AppState>,
    Path(driver_id): Path<Uuid>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let location = state
        .locations
        .get(driver_id)
        .ok_or((StatusCode::NOT_FOUND, "driver location not found".to_string()))?;
    Ok(Json(json!({
        "driverId": location.driver_id,
        "latitude": location.latitude,
        "longitude": location.longitude,
        "accuracy": location.accuracy_m,
        "recordedAt": location.recorded_at,
    })))
}

async fn active_drivers(State(state): State<AppState>) -> Json<Value> {
    let drivers: Vec<Value> = state
        .locations
        .snapshot()
        .into_iter()
        .map(|l| {
            json!({
                "driverId": l.driver_id,
                "latitude": l.latitude,
                "longitude": l.longitude,
                "recordedAt": l.recorded_at,
            })
        })
        .collect();
    Json(json!({ "drivers": drivers }))
}

#[derive(Debug, Deserialize)]
struct NearestQuery {
    latitude: f64,
    longitude: f64,
    tenant_id: Uuid,
    #[serde(default)]
    limit: Option<usize>,
}

async fn nearest_drivers(
    State(state): State<AppState>,
    Query(query): Query<NearestQuery>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let nearest = state
        .optimizer
        .find_nearest_drivers(
            query.latitude,
            query.longitude,
            query.tenant_id,
            query.limit.unwrap_or(5),
        )
        .await
        .map_err(dispatch_error)?;
    let drivers: Vec<Value> = nearest
        .into_iter()
        .map(|d| {
            json!({
                "driverId": d.driver_id,
                "distanceMeters": d.distance_m,
                "etaMinutes": d.eta_minutes,
            })
        })
        .collect();
    Ok(Json(json!({ "drivers": drivers })))
}

#[derive(Debug, Deserialize)]
struct AutoAssignRequest {
    order_id: Uuid,
    latitude: f64,
    longitude: f64,
}

async fn auto_assign(
    State(state): State<AppState>,
    Json(body): Json<AutoAssignRequest>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let candidate = state
        .optimizer
        .auto_assign_candidate(body.latitude, body.longitude)
        .map_err(dispatch_error)?
        .ok_or((StatusCode::NOT_FOUND, "no drivers available".to_string()))?;

    // The candidate gets a pending assignment row (the audit trail);
    // the order is only bound to a driver once someone accepts.
    let assignment = state
        .storage
        .create_driver_assignment(NewDriverAssignment {
            order_id: body.order_id,
            driver_id: candidate.driver_id,
        })
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(json!({
        "success": true,
        "assignmentId": assignment.id,
        "driverId": candidate.driver_id,
        "distanceMeters": candidate.distance_m,
    })))
}

#[derive(Debug, Deserialize)]
struct EtaRequestOrder {
    order_id: Uuid,
    restaurant_lat: f64,
    restaurant_lng: f64,
    customer_lat: f64,
    customer_lng: f64,
    #[serde(default)]
    prep_minutes: Option<u32>,
}

async fn batch_etas(
    State(state): State<AppState>,
    Json(orders): Json<Vec<EtaRequestOrder>>,
) -> Json<Value> {
    let etas = state
        .optimizer
        .calculate_multiple_etas(
            orders
                .into_iter()
                .map(|o| EtaOrder {
                    order_id: o.order_id,
                    restaurant_lat: o.restaurant_lat,
                    restaurant_lng: o.restaurant_lng,
                    customer_lat: o.customer_lat,
                    customer_lng: o.customer_lng,
                    prep_minutes: o.prep_minutes.unwrap_or(15),
                })
                .collect(),
        )
        .await;
    let body: Value = etas
        .into_iter()
        .map(|(order_id, eta)| {
            (
                order_id.to_string(),
                json!({ "eta": eta.eta, "minutes": eta.minutes }),
            )
        })
        .collect::<serde_json::Map<String, Value>>()
        .into();
    Json(json!({ "etas": body }))
}

#[derive(Debug, Deserialize)]
struct FeeQuery {
    distance_meters: f64,
    #[serde(default)]
    base_rate: Option<Decimal>,
}

async fn fee_estimate(
    State(state): State<AppState>,
    Query(query): Query<FeeQuery>,
) -> Json<Value> {
    let fee = state
        .optimizer
        .delivery_fee_estimate(query.distance_meters, query.base_rate);
    Json(json!({
        "distanceMeters": query.distance_meters,
        "fee": fee,
        "baseRate": query.base_rate.unwrap_or_else(geo::default_base_rate),
    }))
}

#[derive(Debug, Deserialize)]
struct RespondRequest {
    status: AssignmentStatus,
}

async fn respond_to_assignment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RespondRequest>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let assignment = state
        .storage
        .respond_to_assignment(id, body.status)
        .await
        .map_err(|e| match e {
            storage::StorageError::NotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
            storage::StorageError::Conflict(_) => (StatusCode::CONFLICT, e.to_string()),
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        })?;

    // An accepted assignment binds the driver to the order and takes
    // the driver out of the available pool.
    if assignment.status == AssignmentStatus::Accepted {
        state
            .storage
            .assign_driver(assignment.order_id, assignment.driver_id)
            .await
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        if let Err(err) = state
            .storage
            .update_driver_status(assignment.driver_id, DriverStatus::Busy)
            .await
        {
            tracing::warn!(driver_id = %assignment.driver_id, error = %err, "driver status not updated");
        }
    }

    Ok(Json(json!({
        "assignmentId": assignment.id,
        "status": assignment.status,
        "respondedAt": assignment.responded_at,
    })))
}
