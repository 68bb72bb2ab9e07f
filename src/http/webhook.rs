//! Payment-provider webhook intake. Signature first, then an idempotent
//! balance application keyed on the provider's order id; replays and unknown
//! events are acknowledged without effect so the provider stops retrying.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;

use super::{ApiError, AppState};
use crate::GatewayError;
use crate::store::{PaymentApplication, PaymentOutcome, TransactionKind};

type HmacSha256 = Hmac<Sha256>;

pub async fn payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let secret = state
        .gateway
        .config()
        .webhook_secret
        .as_deref()
        .ok_or(GatewayError::WebhookAuthFailure)?;
    let signature = headers
        .get("x-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or(GatewayError::WebhookAuthFailure)?;
    verify_signature(secret, signature, &body)?;

    let event: Value = serde_json::from_slice(&body).map_err(|err| GatewayError::InvalidInput {
        field: "body".to_string(),
        reason: format!("invalid JSON: {err}"),
    })?;
    let event_name = event
        .pointer("/meta/event_name")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let order_id = stringify(event.pointer("/data/id"));

    let applied = match event_name.as_str() {
        "order_created" => apply_order(&state, &event, &order_id).await?,
        "subscription_created" | "subscription_payment_success" => {
            apply_subscription(&state, &event, &order_id).await?
        }
        "order_refunded" => {
            let refunded = state
                .gateway
                .store()
                .mark_refunded(&order_id)
                .await
                .map_err(GatewayError::from)?;
            if !refunded {
                tracing::warn!(order_id, "refund for unknown order");
            }
            refunded
        }
        other => {
            tracing::debug!(event = other, "ignoring webhook event");
            false
        }
    };

    Ok(Json(json!({ "received": true, "applied": applied })))
}

/// Hex HMAC-SHA256 over the raw body. `verify_slice` is constant time.
fn verify_signature(secret: &str, signature: &str, body: &[u8]) -> Result<(), GatewayError> {
    let provided = decode_hex(signature).ok_or(GatewayError::WebhookAuthFailure)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| GatewayError::WebhookAuthFailure)?;
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| GatewayError::WebhookAuthFailure)
}

async fn apply_order(
    state: &AppState,
    event: &Value,
    order_id: &str,
) -> Result<bool, GatewayError> {
    let Some(account_id) = custom_account_id(event) else {
        tracing::warn!(order_id, "order event without account id");
        return Ok(false);
    };
    let variant_id = stringify(
        event
            .pointer("/data/attributes/first_order_item/variant_id")
            .or_else(|| event.pointer("/data/attributes/variant_id")),
    );
    let Some(pack) = state.gateway.config().pack_for_variant(&variant_id) else {
        tracing::warn!(order_id, variant_id, "order for unknown credit pack variant");
        return Ok(false);
    };

    settle(
        state,
        PaymentApplication {
            order_id: order_id.to_string(),
            account_id,
            kind: TransactionKind::Purchase,
            amount_usd_cents: pack.price_usd_cents,
            credits: pack.credits,
            new_plan: None,
            at_ms: state.gateway.clock().now_epoch_millis(),
        },
    )
    .await
}

async fn apply_subscription(
    state: &AppState,
    event: &Value,
    order_id: &str,
) -> Result<bool, GatewayError> {
    let Some(account_id) = custom_account_id(event) else {
        tracing::warn!(order_id, "subscription event without account id");
        return Ok(false);
    };
    let variant_id = stringify(
        event
            .pointer("/data/attributes/variant_id")
            .or_else(|| event.pointer("/data/attributes/first_order_item/variant_id")),
    );
    let Some(plan) = state.gateway.config().plan_for_variant(&variant_id) else {
        tracing::warn!(order_id, variant_id, "subscription for unknown plan variant");
        return Ok(false);
    };
    let credits = plan.limits().credits_per_month;
    let amount = stringify(event.pointer("/data/attributes/total"))
        .parse::<u32>()
        .unwrap_or(0);

    settle(
        state,
        PaymentApplication {
            order_id: order_id.to_string(),
            account_id,
            kind: TransactionKind::Subscription,
            amount_usd_cents: amount,
            credits,
            new_plan: Some(plan),
            at_ms: state.gateway.clock().now_epoch_millis(),
        },
    )
    .await
}

async fn settle(state: &AppState, payment: PaymentApplication) -> Result<bool, GatewayError> {
    match state.gateway.store().apply_payment(&payment).await? {
        PaymentOutcome::Applied { new_balance } => {
            tracing::info!(
                order_id = %payment.order_id,
                account_id = %payment.account_id,
                credits = payment.credits,
                new_balance,
                "payment applied"
            );
            state.gateway.ledger().announce(&payment.account_id, new_balance);
            Ok(true)
        }
        PaymentOutcome::Duplicate => {
            tracing::info!(order_id = %payment.order_id, "replayed payment ignored");
            Ok(false)
        }
    }
}

fn decode_hex(raw: &str) -> Option<Vec<u8>> {
    if raw.len() % 2 != 0 {
        return None;
    }
    (0..raw.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(raw.get(i..i + 2)?, 16).ok())
        .collect()
}

fn custom_account_id(event: &Value) -> Option<String> {
    event
        .pointer("/meta/custom_data/account_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Provider payloads carry ids sometimes as strings, sometimes as numbers.
fn stringify(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        _ => String::new(),
    }
}
