#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::util::ServiceExt;

use tollgate::config::GatewayConfig;
use tollgate::gateway::Gateway;
use tollgate::operations::standard_registry;
use tollgate::store::{MemoryStore, Store};
use tollgate::upstream::{ChatOutput, ChatRequest, ImageOutput, ImageRequest, Upstream};
use tollgate::{GatewayError, http};

pub const WEBHOOK_SECRET: &str = "whsec_test";

/// Echoes the user prompt back and counts invocations, so tests can assert
/// whether the upstream was reached at all.
#[derive(Default)]
pub struct EchoUpstream {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Upstream for EchoUpstream {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatOutput, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ChatOutput {
            text: request.user.clone(),
            total_tokens: 20,
        })
    }

    async fn image(&self, _request: &ImageRequest) -> Result<ImageOutput, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ImageOutput {
            url: "https://img.example/out.png".to_string(),
        })
    }
}

pub struct FailingUpstream;

#[async_trait]
impl Upstream for FailingUpstream {
    async fn chat(&self, _request: &ChatRequest) -> Result<ChatOutput, GatewayError> {
        Err(GatewayError::UpstreamFailure {
            message: "provider down".to_string(),
        })
    }

    async fn image(&self, _request: &ImageRequest) -> Result<ImageOutput, GatewayError> {
        Err(GatewayError::UpstreamFailure {
            message: "provider down".to_string(),
        })
    }
}

pub struct Harness {
    pub app: Router,
    pub gateway: Arc<Gateway>,
    pub upstream: Arc<EchoUpstream>,
    pub api_key: String,
}

pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.webhook_secret = Some(WEBHOOK_SECRET.to_string());
    // Wire the default packs and one plan to provider variant ids.
    config.credit_packs[0].variant_id = "v_pack_100".to_string();
    config.credit_packs[1].variant_id = "v_pack_500".to_string();
    config
        .plan_variants
        .insert("v_plan_pro".to_string(), tollgate::PlanTier::Pro);
    config
}

pub async fn harness() -> Harness {
    let upstream = Arc::new(EchoUpstream::default());
    let harness = harness_with(test_config(), Arc::clone(&upstream) as Arc<dyn Upstream>).await;
    Harness { upstream, ..harness }
}

pub async fn harness_with(config: GatewayConfig, upstream: Arc<dyn Upstream>) -> Harness {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let registry = standard_registry(upstream, &config.upstream);
    let gateway = Arc::new(Gateway::new(config, store, registry));
    let account = gateway.resolver().provision("acct_test").await.unwrap();
    Harness {
        app: http::router(Arc::clone(&gateway)),
        gateway,
        upstream: Arc::new(EchoUpstream::default()),
        api_key: account.api_key,
    }
}

pub fn get(uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(key) = bearer {
        builder = builder.header("authorization", format!("Bearer {key}"));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, bearer: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(key) = bearer {
        builder = builder.header("authorization", format!("Bearer {key}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

pub fn sign(body: &str) -> String {
    use hmac::{Hmac, Mac};
    let mut mac =
        Hmac::<sha2::Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(body.as_bytes());
    tollgate::account::hex_encode(&mac.finalize().into_bytes())
}
