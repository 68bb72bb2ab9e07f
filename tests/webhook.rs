mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;

use common::{EchoUpstream, harness, harness_with, send, sign, test_config};
use tollgate::PlanTier;
use tollgate::store::TransactionStatus;

fn webhook_request(body: &str, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhooks/payment")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("x-signature", signature);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn order_created(order_id: &str, variant_id: &str) -> String {
    json!({
        "meta": {
            "event_name": "order_created",
            "custom_data": { "account_id": "acct_test" },
        },
        "data": {
            "id": order_id,
            "attributes": {
                "total": 800,
                "first_order_item": { "variant_id": variant_id },
            },
        },
    })
    .to_string()
}

#[tokio::test]
async fn valid_order_credits_the_account_once() {
    let h = harness().await;
    let body = order_created("ord_1", "v_pack_100");

    let (status, response) = send(&h.app, webhook_request(&body, Some(&sign(&body)))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["received"], true);
    assert_eq!(response["applied"], true);

    let account = h
        .gateway
        .store()
        .find_account("acct_test")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.credits_balance, 150);

    // Provider retry with the same order id: acknowledged, not re-applied.
    let (status, response) = send(&h.app, webhook_request(&body, Some(&sign(&body)))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["applied"], false);
    let account = h
        .gateway
        .store()
        .find_account("acct_test")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.credits_balance, 150);
}

#[tokio::test]
async fn bad_or_missing_signatures_are_401() {
    let h = harness().await;
    let body = order_created("ord_2", "v_pack_100");

    let (status, _) = send(&h.app, webhook_request(&body, Some("deadbeef"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&h.app, webhook_request(&body, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // A signature over different bytes does not transfer.
    let other = order_created("ord_3", "v_pack_100");
    let (status, _) = send(&h.app, webhook_request(&body, Some(&sign(&other)))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let account = h
        .gateway
        .store()
        .find_account("acct_test")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.credits_balance, 50);
}

#[tokio::test]
async fn webhooks_are_rejected_when_no_secret_is_configured() {
    let mut config = test_config();
    config.webhook_secret = None;
    let h = harness_with(config, Arc::new(EchoUpstream::default())).await;

    let body = order_created("ord_4", "v_pack_100");
    let (status, _) = send(&h.app, webhook_request(&body, Some(&sign(&body)))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn subscription_upgrades_the_plan_and_grants_monthly_credits() {
    let h = harness().await;
    let body = json!({
        "meta": {
            "event_name": "subscription_created",
            "custom_data": { "account_id": "acct_test" },
        },
        "data": {
            "id": "sub_1",
            "attributes": { "variant_id": "v_plan_pro", "total": 2900 },
        },
    })
    .to_string();

    let (status, response) = send(&h.app, webhook_request(&body, Some(&sign(&body)))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["applied"], true);

    let account = h
        .gateway
        .store()
        .find_account("acct_test")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.plan, PlanTier::Pro);
    // 50 starting + 1500 monthly allotment.
    assert_eq!(account.credits_balance, 1550);
}

#[tokio::test]
async fn refund_flips_the_transaction_status() {
    let h = harness().await;
    let order = order_created("ord_5", "v_pack_100");
    send(&h.app, webhook_request(&order, Some(&sign(&order)))).await;

    let refund = json!({
        "meta": { "event_name": "order_refunded" },
        "data": { "id": "ord_5" },
    })
    .to_string();
    let (status, response) = send(&h.app, webhook_request(&refund, Some(&sign(&refund)))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["applied"], true);

    let transaction = h
        .gateway
        .store()
        .find_transaction("ord_5")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transaction.status, TransactionStatus::Refunded);
}

#[tokio::test]
async fn unknown_events_and_variants_are_acknowledged_without_effect() {
    let h = harness().await;

    let unknown_event = json!({
        "meta": { "event_name": "license_key_created" },
        "data": { "id": "lk_1" },
    })
    .to_string();
    let (status, response) = send(
        &h.app,
        webhook_request(&unknown_event, Some(&sign(&unknown_event))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["applied"], false);

    let unknown_variant = order_created("ord_6", "v_pack_unmapped");
    let (status, response) = send(
        &h.app,
        webhook_request(&unknown_variant, Some(&sign(&unknown_variant))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["applied"], false);

    let account = h
        .gateway
        .store()
        .find_account("acct_test")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.credits_balance, 50);
}

#[tokio::test]
async fn numeric_provider_ids_are_accepted() {
    let h = harness().await;
    let body = json!({
        "meta": {
            "event_name": "order_created",
            "custom_data": { "account_id": "acct_test" },
        },
        "data": {
            "id": 987654,
            "attributes": {
                "total": 800,
                "first_order_item": { "variant_id": 42 },
            },
        },
    })
    .to_string();

    // Variant 42 is not mapped; the event is acknowledged and ignored.
    let (status, response) = send(&h.app, webhook_request(&body, Some(&sign(&body)))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["applied"], false);
}
