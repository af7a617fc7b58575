use axum::Router;

use crate::state::AppState;

pub mod billing;
pub mod dispatch;
pub mod orders;
pub mod webhooks;

/// Build the application router (webhooks, billing, dispatch, orders).
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(webhooks::router(state.clone()))
        .merge(billing::router(state.clone()))
        .merge(dispatch::router(state.clone()))
        .merge(orders::router(state))
}
