use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::account::PlanTier;

/// Process configuration, loaded from a TOML file with environment-variable
/// overrides for the secrets.
#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub sqlite_path: Option<PathBuf>,
    /// Shared secret for payment webhook signatures. Webhooks are rejected
    /// when unset.
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default = "default_starting_balance")]
    pub starting_balance: u32,
    #[serde(default = "default_plan")]
    pub default_plan: PlanTier,
    #[serde(default = "default_credit_packs")]
    pub credit_packs: Vec<CreditPack>,
    /// Payment-provider variant id → plan tier, for subscription events.
    #[serde(default)]
    pub plan_variants: BTreeMap<String, PlanTier>,
    #[serde(default)]
    pub json_logs: bool,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("listen", &self.listen)
            .field("sqlite_path", &self.sqlite_path)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<redacted>"))
            .field("upstream", &self.upstream)
            .field("starting_balance", &self.starting_balance)
            .field("default_plan", &self.default_plan)
            .field("credit_packs", &self.credit_packs)
            .field("plan_variants", &self.plan_variants)
            .field("json_logs", &self.json_logs)
            .finish()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            sqlite_path: None,
            webhook_secret: None,
            upstream: UpstreamConfig::default(),
            starting_balance: default_starting_balance(),
            default_plan: default_plan(),
            credit_packs: default_credit_packs(),
            plan_variants: BTreeMap::new(),
            json_logs: false,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
}

impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("image_model", &self.image_model)
            .finish()
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_base_url(),
            api_key: None,
            model: default_model(),
            image_model: default_image_model(),
        }
    }
}

/// One purchasable credit bundle, keyed to a payment-provider variant id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreditPack {
    pub id: String,
    pub name: String,
    pub credits: u32,
    pub price_usd_cents: u32,
    #[serde(default)]
    pub variant_id: String,
}

impl GatewayConfig {
    pub fn load(path: &Path) -> Result<Self, crate::GatewayError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            crate::GatewayError::internal(format!("read config {}: {err}", path.display()))
        })?;
        let mut config: Self = toml::from_str(&raw).map_err(|err| {
            crate::GatewayError::internal(format!("parse config {}: {err}", path.display()))
        })?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("TOLLGATE_WEBHOOK_SECRET") {
            if !secret.is_empty() {
                self.webhook_secret = Some(secret);
            }
        }
        if let Ok(key) = std::env::var("TOLLGATE_UPSTREAM_API_KEY") {
            if !key.is_empty() {
                self.upstream.api_key = Some(key);
            }
        }
    }

    pub fn pack_for_variant(&self, variant_id: &str) -> Option<&CreditPack> {
        if variant_id.is_empty() {
            return None;
        }
        self.credit_packs
            .iter()
            .find(|pack| pack.variant_id == variant_id)
    }

    pub fn plan_for_variant(&self, variant_id: &str) -> Option<PlanTier> {
        self.plan_variants.get(variant_id).copied()
    }
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_starting_balance() -> u32 {
    50
}

fn default_plan() -> PlanTier {
    PlanTier::FreeTrial
}

fn default_upstream_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_image_model() -> String {
    "dall-e-3".to_string()
}

fn default_credit_packs() -> Vec<CreditPack> {
    vec![
        CreditPack {
            id: "starter_pack".to_string(),
            name: "Starter Pack".to_string(),
            credits: 100,
            price_usd_cents: 800,
            variant_id: String::new(),
        },
        CreditPack {
            id: "growth_pack".to_string(),
            name: "Growth Pack".to_string(),
            credits: 500,
            price_usd_cents: 3_500,
            variant_id: String::new(),
        },
        CreditPack {
            id: "pro_pack".to_string(),
            name: "Pro Pack".to_string(),
            credits: 1_000,
            price_usd_cents: 6_000,
            variant_id: String::new(),
        },
        CreditPack {
            id: "mega_pack".to_string(),
            name: "Mega Pack".to_string(),
            credits: 2_000,
            price_usd_cents: 10_000,
            variant_id: String::new(),
        },
    ]
}
