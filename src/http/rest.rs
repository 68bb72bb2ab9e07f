//! The REST surface: one route per concern, uniform success envelope.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ApiError, AppState, bearer_header, channel_header, client_ip};
use crate::account::Channel;
use crate::gateway::ExecuteRequest;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

pub async fn generate(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state
        .gateway
        .execute(ExecuteRequest {
            authorization: bearer_header(&headers),
            channel_override: channel_header(&headers),
            default_channel: Channel::Api,
            slug,
            payload,
            client_ip: client_ip(&headers),
        })
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": outcome.data,
        "operation": outcome.operation,
        "credits_used": outcome.credits_used,
        "credits_remaining": outcome.credits_remaining,
        "request_id": outcome.request_id,
    })))
}

pub async fn credits(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let (account, _) = state
        .gateway
        .resolver()
        .resolve(
            bearer_header(&headers).as_deref(),
            channel_header(&headers).as_deref(),
            Channel::Api,
        )
        .await?;
    let limits = account.plan.limits();

    Ok(Json(json!({
        "success": true,
        "data": {
            "credits_balance": account.credits_balance,
            "plan": account.plan.as_str(),
            "limits": {
                "requests_per_min": limits.requests_per_min,
                "requests_per_day": limits.requests_per_day,
                "credits_per_month": limits.credits_per_month,
            },
        },
    })))
}

/// Public service directory. No credential required.
pub async fn services(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": { "services": state.gateway.registry().catalog() },
    }))
}

#[derive(Deserialize)]
pub struct UsageQuery {
    #[serde(default = "default_usage_limit")]
    limit: u32,
}

fn default_usage_limit() -> u32 {
    50
}

const MAX_USAGE_LIMIT: u32 = 200;

pub async fn usage(
    State(state): State<AppState>,
    Query(query): Query<UsageQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let (account, _) = state
        .gateway
        .resolver()
        .resolve(
            bearer_header(&headers).as_deref(),
            channel_header(&headers).as_deref(),
            Channel::Api,
        )
        .await?;

    let limit = query.limit.min(MAX_USAGE_LIMIT);
    let entries = state
        .gateway
        .store()
        .recent_usage(&account.id, limit)
        .await
        .map_err(crate::GatewayError::from)?;

    let rows: Vec<Value> = entries
        .iter()
        .map(|entry| {
            json!({
                "request_id": entry.request_id,
                "operation": entry.operation,
                "credits_used": entry.credits_used,
                "status": entry.status.as_str(),
                "channel": entry.channel.as_str(),
                "latency_ms": entry.latency_ms,
                "tokens": entry.tokens,
                "created_at_ms": entry.created_at_ms,
            })
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "data": { "usage": rows },
    })))
}
