//! HTTP shell: event intake and health.
//!
//! Two routes, both thin wrappers over the engine:
//!
//! - `POST /events` accepts an already-verified inbound delivery (signature
//!   checking happens upstream of this service) and enqueues it pending.
//! - `GET /health` returns the queue health counts as JSON.
//!
//! rusqlite is synchronous, so handlers hop onto the blocking pool before
//! touching the store.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{debug, warn};

use crate::health::{self, QueueHealth};
use crate::store::queue::{enqueue, InboundEvent};
use crate::store::{Store, StoreError};

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
}

/// Builds the service router.
pub fn router(store: Store) -> Router {
    let state = Arc::new(AppState { store });
    Router::new()
        .route("/events", post(intake_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Accepts one inbound delivery and enqueues it.
///
/// - `202 Accepted` - enqueued, will be applied by a later batch tick
/// - `409 Conflict` - duplicate delivery id (GitHub redelivery); safe to drop
/// - `500` - store unavailable
async fn intake_handler(
    State(state): State<Arc<AppState>>,
    Json(event): Json<InboundEvent>,
) -> StatusCode {
    let store = state.store.clone();
    let delivery = event.delivery_id.clone();

    let result =
        tokio::task::spawn_blocking(move || store.transact(|tx| enqueue(tx, &event))).await;

    match result {
        Ok(Ok(_)) => {
            debug!(delivery = %delivery, "delivery enqueued");
            StatusCode::ACCEPTED
        }
        Ok(Err(StoreError::DuplicateDelivery(_))) => {
            debug!(delivery = %delivery, "duplicate delivery dropped");
            StatusCode::CONFLICT
        }
        Ok(Err(error)) => {
            warn!(delivery = %delivery, %error, "failed to enqueue delivery");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        Err(join_error) => {
            warn!(delivery = %delivery, error = %join_error, "intake task panicked");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Returns queue health counts.
async fn health_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<QueueHealth>, StatusCode> {
    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || health::report(&store)).await;

    match result {
        Ok(Ok(health)) => Ok(Json(health)),
        Ok(Err(error)) => {
            warn!(%error, "health report failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(join_error) => {
            warn!(error = %join_error, "health task panicked");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
