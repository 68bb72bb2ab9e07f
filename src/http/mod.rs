//! Protocol adapters. Both surfaces call the same [`Gateway`] pipeline; the
//! REST module frames it as one operation per route, the agent-protocol
//! module as JSON-RPC tool calls.

pub mod mcp;
pub mod rest;
pub mod webhook;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::json;

use crate::GatewayError;
use crate::gateway::Gateway;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/health", get(rest::health))
        .route("/v1/generate/:slug", post(rest::generate))
        .route("/v1/credits", get(rest::credits))
        .route("/v1/services", get(rest::services))
        .route("/v1/usage", get(rest::usage))
        .route("/mcp", get(mcp::discovery).post(mcp::rpc))
        .route("/webhooks/payment", post(webhook::payment))
        .with_state(AppState { gateway })
}

/// Wrapper so handlers can end with `?` and still emit the REST envelope.
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        if err.status_code() == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %err, "request failed");
        }
        let body = json!({
            "success": false,
            "error": {
                "code": err.code(),
                "message": err.public_message(),
            },
        });
        (err.status_code(), axum::Json(body)).into_response()
    }
}

pub(crate) fn bearer_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

pub(crate) fn channel_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-channel")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// First hop of `X-Forwarded-For`, for the usage log. This service is meant
/// to sit behind a proxy; without one the field is recorded as unknown.
pub(crate) fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.split(',').next())
        .map(|ip| ip.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
