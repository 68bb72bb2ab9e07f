//! The agent-protocol surface: JSON-RPC 2.0 over a single POST route, with
//! every catalogued operation exposed as a tool. Transport framing errors map
//! to JSON-RPC error objects; pipeline refusals come back as tool results
//! with `isError`, the way agent clients expect.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use futures_util::future::join_all;
use serde_json::{Value, json};

use super::{AppState, bearer_header, channel_header, client_ip};
use crate::GatewayError;
use crate::account::{Account, Channel};

const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const AUTH_ERROR: i64 = -32001;

/// Endpoint discovery. Without a bearer token this is a static document and
/// never touches the store; with one it also reports the account's plan and
/// balance.
pub async fn discovery(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    let mut body = json!({
        "name": "tollgate",
        "version": env!("CARGO_PKG_VERSION"),
        "protocolVersion": PROTOCOL_VERSION,
        "transport": "http",
        "authentication": { "type": "bearer", "header": "Authorization" },
    });

    if let Some(authorization) = bearer_header(&headers) {
        if let Ok((account, _)) = state
            .gateway
            .resolver()
            .resolve(Some(&authorization), None, Channel::Mcp)
            .await
        {
            body["account"] = json!({
                "credits_balance": account.credits_balance,
                "plan": account.plan.as_str(),
            });
        }
    }
    Json(body)
}

pub async fn rpc(State(state): State<AppState>, headers: HeaderMap, body: String) -> Json<Value> {
    let parsed: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(_) => return Json(error_response(Value::Null, PARSE_ERROR, "Parse error")),
    };

    // The credential is resolved once per POST; batch items share it.
    let auth = state
        .gateway
        .resolver()
        .resolve(
            bearer_header(&headers).as_deref(),
            channel_header(&headers).as_deref(),
            Channel::Mcp,
        )
        .await;
    let ip = client_ip(&headers);

    match parsed {
        Value::Array(items) => {
            if items.is_empty() {
                return Json(error_response(Value::Null, INVALID_REQUEST, "Invalid Request"));
            }
            let futures = items
                .into_iter()
                .map(|item| handle_one(&state, &auth, &ip, item));
            Json(Value::Array(join_all(futures).await))
        }
        item => Json(handle_one(&state, &auth, &ip, item).await),
    }
}

async fn handle_one(
    state: &AppState,
    auth: &Result<(Account, Channel), GatewayError>,
    client_ip: &str,
    item: Value,
) -> Value {
    let id = item.get("id").cloned().unwrap_or(Value::Null);
    let Some(method) = item.get("method").and_then(Value::as_str) else {
        return error_response(id, INVALID_REQUEST, "Invalid Request");
    };

    match method {
        "initialize" => result_response(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": "tollgate",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        ),
        "notifications/initialized" | "ping" => result_response(id, json!({})),
        "tools/list" => result_response(id, json!({ "tools": tool_listing(state) })),
        "tools/call" => {
            let params = item.get("params").cloned().unwrap_or(Value::Null);
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return error_response(id, INVALID_PARAMS, "Missing tool name");
            };
            let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
            call_tool(state, auth, client_ip, id, name, arguments).await
        }
        _ => error_response(id, METHOD_NOT_FOUND, &format!("Method not found: {method}")),
    }
}

fn tool_listing(state: &AppState) -> Vec<Value> {
    let mut tools = vec![
        json!({
            "name": "tollgate_list_services",
            "description": "List all available AI services with their credit costs.",
            "inputSchema": { "type": "object", "properties": {} },
        }),
        json!({
            "name": "tollgate_check_credits",
            "description": "Check the authenticated account's credit balance and plan limits.",
            "inputSchema": { "type": "object", "properties": {} },
        }),
    ];
    tools.extend(state.gateway.registry().iter().map(|entry| {
        json!({
            "name": entry.spec.tool_name,
            "description": entry.spec.description,
            "inputSchema": entry.input_schema,
        })
    }));
    tools
}

async fn call_tool(
    state: &AppState,
    auth: &Result<(Account, Channel), GatewayError>,
    client_ip: &str,
    id: Value,
    name: &str,
    arguments: Value,
) -> Value {
    if name == "tollgate_list_services" {
        return tool_result(
            id,
            &json!({ "services": state.gateway.registry().catalog() }),
        );
    }

    let (account, channel) = match auth {
        Ok(resolved) => resolved,
        Err(err) => return error_response(id, AUTH_ERROR, &err.public_message()),
    };

    if name == "tollgate_check_credits" {
        // Re-read so repeated checks inside one batch see settled balances.
        let refreshed = match state.gateway.store().find_account(&account.id).await {
            Ok(Some(account)) => account,
            Ok(None) => return error_response(id, AUTH_ERROR, "Invalid API key"),
            Err(err) => {
                tracing::error!(error = %err, "credit lookup failed");
                return error_response(id, -32603, "Internal error");
            }
        };
        let limits = refreshed.plan.limits();
        return tool_result(
            id,
            &json!({
                "credits_balance": refreshed.credits_balance,
                "plan": refreshed.plan.as_str(),
                "requests_per_min": limits.requests_per_min,
                "requests_per_day": limits.requests_per_day,
            }),
        );
    }

    let Some(entry) = state.gateway.registry().get_by_tool(name) else {
        return error_response(id, INVALID_PARAMS, &format!("Unknown tool: {name}"));
    };
    let slug = entry.spec.slug;

    match state
        .gateway
        .execute_for_account(account, *channel, slug, &arguments, client_ip)
        .await
    {
        Ok(outcome) => tool_result(
            id,
            &json!({
                "success": true,
                "data": outcome.data,
                "credits_used": outcome.credits_used,
                "credits_remaining": outcome.credits_remaining,
                "request_id": outcome.request_id,
            }),
        ),
        Err(err) => tool_error(id, &err),
    }
}

fn result_response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}

fn tool_result(id: Value, payload: &Value) -> Value {
    let text = serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
    result_response(
        id,
        json!({ "content": [{ "type": "text", "text": text }] }),
    )
}

/// Pipeline refusals surface as tool results so the agent can read and react
/// to them, rather than as transport errors.
fn tool_error(id: Value, err: &GatewayError) -> Value {
    result_response(
        id,
        json!({
            "content": [{ "type": "text", "text": format!("Error: {}", err.public_message()) }],
            "isError": true,
        }),
    )
}
