use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use cuwhapp_proto::http_status;
use tower_http::trace::TraceLayer;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

use crate::features::command_routing::controller::CommandRouterController;
use crate::features::observability::controller::ObservabilityController;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<CommandRouterController>,
    pub observability: Arc<ObservabilityController>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/actions", post(handle_action))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_action(State(state): State<AppState>, body: Bytes) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!("action", %request_id);

    let action_response = state.controller.handle_raw(&body).instrument(span).await;
    let status = StatusCode::from_u16(http_status(&action_response))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut response = (status, Json(action_response)).into_response();
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.observability.render_metrics() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(error) => {
            warn!(error = %error, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, error).into_response()
        }
    }
}
