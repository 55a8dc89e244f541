//! HTTP surface of the recalibration service.
//!
//! - `POST /bakes/{id}/recalibrate`: recalibrate and return the updated bake
//! - `GET /healthz`: liveness

mod error;

pub use error::{ApiError, ProblemDetails};

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::bake::Bake;
use crate::error::StorageError;
use crate::recalibration::RecalibrationService;

#[derive(Clone)]
pub struct ApiState {
    pub service: RecalibrationService,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
}

/// Build the router with tracing middleware.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/bakes/{id}/recalibrate", post(recalibrate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "levain".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn recalibrate(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Bake>, ApiError> {
    match state.service.recalibrate_bake(&id).await {
        Ok(bake) => Ok(Json(bake)),
        Err(e) => {
            if let StorageError::Backend(detail) = &e {
                warn!(bake_id = %id, error = %detail, "recalibration storage failure");
            }
            Err(e.into())
        }
    }
}
