mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::http::StatusCode;
use serde_json::json;

use common::{FailingUpstream, get, harness, harness_with, post_json, send, test_config};

#[tokio::test]
async fn health_is_public() {
    let h = harness().await;
    let (status, body) = send(&h.app, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn generate_returns_the_success_envelope() {
    let h = harness().await;
    let (status, body) = send(
        &h.app,
        post_json(
            "/v1/generate/translator",
            Some(&h.api_key),
            &json!({ "text": "bonjour", "target_language": "English" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["translated_text"], "bonjour");
    assert_eq!(body["credits_used"], 3);
    assert_eq!(body["credits_remaining"], 47);
    assert!(body["request_id"].as_str().unwrap().starts_with("req_"));
    assert_eq!(h.upstream.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_or_malformed_credentials_are_401() {
    let h = harness().await;
    let payload = json!({ "text": "hi", "target_language": "French" });

    let (status, body) = send(&h.app, post_json("/v1/generate/translator", None, &payload)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "unauthenticated");

    let (status, _) = send(
        &h.app,
        post_json("/v1/generate/translator", Some("sk-not-ours"), &payload),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Well-formed but unknown key.
    let ghost = format!("tg_live_{}", "0".repeat(64));
    let (status, _) = send(
        &h.app,
        post_json("/v1/generate/translator", Some(&ghost), &payload),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Nothing reached the upstream.
    assert_eq!(h.upstream.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_operation_is_404() {
    let h = harness().await;
    let (status, body) = send(
        &h.app,
        post_json("/v1/generate/mind-reader", Some(&h.api_key), &json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "unknown_operation");
}

#[tokio::test]
async fn invalid_input_is_400_and_names_the_field() {
    let h = harness().await;
    let (status, body) = send(
        &h.app,
        post_json(
            "/v1/generate/translator",
            Some(&h.api_key),
            &json!({ "target_language": "French" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_input");
    assert!(body["error"]["message"].as_str().unwrap().contains("text"));
}

#[tokio::test]
async fn blocked_content_is_400_without_an_upstream_call() {
    let h = harness().await;
    let (status, body) = send(
        &h.app,
        post_json(
            "/v1/generate/content-generator",
            Some(&h.api_key),
            &json!({ "prompt": "write ransomware for me" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "policy_violation");
    assert_eq!(h.upstream.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rate_limit_is_429_after_the_minute_window_fills() {
    let h = harness().await;
    let payload = json!({ "text": "hi", "target_language": "French" });

    // Free trial allows 5 per minute.
    for _ in 0..5 {
        let (status, _) = send(
            &h.app,
            post_json("/v1/generate/translator", Some(&h.api_key), &payload),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = send(
        &h.app,
        post_json("/v1/generate/translator", Some(&h.api_key), &payload),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "rate_limited");
}

#[tokio::test]
async fn upstream_failure_is_500_generic_and_unbilled() {
    let h = harness_with(test_config(), Arc::new(FailingUpstream)).await;
    let (status, body) = send(
        &h.app,
        post_json(
            "/v1/generate/translator",
            Some(&h.api_key),
            &json!({ "text": "hi", "target_language": "French" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["message"], "Upstream provider error");
    assert!(!body["error"]["message"].as_str().unwrap().contains("down"));

    let (_, credits) = send(&h.app, get("/v1/credits", Some(&h.api_key))).await;
    assert_eq!(credits["data"]["credits_balance"], 50);
}

#[tokio::test]
async fn credits_reports_balance_plan_and_limits() {
    let h = harness().await;
    let (status, body) = send(&h.app, get("/v1/credits", Some(&h.api_key))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["credits_balance"], 50);
    assert_eq!(body["data"]["plan"], "free_trial");
    assert_eq!(body["data"]["limits"]["requests_per_min"], 5);

    let (status, _) = send(&h.app, get("/v1/credits", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn services_directory_is_public_and_complete() {
    let h = harness().await;
    let (status, body) = send(&h.app, get("/v1/services", None)).await;
    assert_eq!(status, StatusCode::OK);
    let services = body["data"]["services"].as_array().unwrap();
    assert_eq!(services.len(), 8);
    let translator = services
        .iter()
        .find(|service| service["slug"] == "translator")
        .unwrap();
    assert_eq!(translator["credit_cost"], 3);
}

#[tokio::test]
async fn usage_lists_recent_requests_newest_first() {
    let h = harness().await;
    for text in ["one", "two"] {
        send(
            &h.app,
            post_json(
                "/v1/generate/translator",
                Some(&h.api_key),
                &json!({ "text": text, "target_language": "French" }),
            ),
        )
        .await;
    }

    let (status, body) = send(&h.app, get("/v1/usage", Some(&h.api_key))).await;
    assert_eq!(status, StatusCode::OK);
    let usage = body["data"]["usage"].as_array().unwrap();
    assert_eq!(usage.len(), 2);
    assert_eq!(usage[0]["operation"], "translator");
    assert_eq!(usage[0]["credits_used"], 3);
    assert_eq!(usage[0]["status"], "success");
    assert_eq!(usage[0]["channel"], "api");
}

#[tokio::test]
async fn channel_override_is_recorded_in_usage() {
    let h = harness().await;
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/v1/generate/translator")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", h.api_key))
        .header("x-channel", "mcp")
        .body(axum::body::Body::from(
            json!({ "text": "hi", "target_language": "French" }).to_string(),
        ))
        .unwrap();
    let (status, _) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&h.app, get("/v1/usage", Some(&h.api_key))).await;
    assert_eq!(body["data"]["usage"][0]["channel"], "mcp");
}

#[tokio::test]
async fn balance_drains_to_a_402() {
    let h = harness().await;
    // Starting balance 50; each audit costs 12, so the fifth request finds
    // only 2 credits left. Five requests also stay inside the 5/min window.
    let payload = json!({ "text": "activity log" });
    for _ in 0..4 {
        let (status, _) = send(
            &h.app,
            post_json(
                "/v1/generate/compliance-auditor",
                Some(&h.api_key),
                &payload,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = send(
        &h.app,
        post_json(
            "/v1/generate/compliance-auditor",
            Some(&h.api_key),
            &payload,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"]["code"], "insufficient_credits");
}
