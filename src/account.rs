use serde::{Deserialize, Serialize};

pub const API_KEY_LIVE_PREFIX: &str = "tg_live_";
pub const API_KEY_TEST_PREFIX: &str = "tg_test_";
const API_KEY_HEX_LEN: usize = 64;

/// The billable identity: balance, plan tier and the bearer credential.
///
/// Rate limits are derived from the plan, never stored on the account.
#[derive(Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub credits_balance: u32,
    pub plan: PlanTier,
    pub api_key: String,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("credits_balance", &self.credits_balance)
            .field("plan", &self.plan)
            .field("api_key", &"<redacted>")
            .field("created_at_ms", &self.created_at_ms)
            .field("updated_at_ms", &self.updated_at_ms)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    FreeTrial,
    Starter,
    Pro,
    Enterprise,
    PayAsYouGo,
}

/// Plan-derived limits. One row per tier, fixed at compile time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlanLimits {
    pub requests_per_min: u32,
    pub requests_per_day: u32,
    pub credits_per_month: u32,
}

impl PlanTier {
    pub fn limits(self) -> PlanLimits {
        match self {
            Self::FreeTrial => PlanLimits {
                requests_per_min: 5,
                requests_per_day: 50,
                credits_per_month: 50,
            },
            Self::Starter => PlanLimits {
                requests_per_min: 30,
                requests_per_day: 1_000,
                credits_per_month: 500,
            },
            Self::Pro => PlanLimits {
                requests_per_min: 60,
                requests_per_day: 5_000,
                credits_per_month: 1_500,
            },
            Self::Enterprise => PlanLimits {
                requests_per_min: 120,
                requests_per_day: 20_000,
                credits_per_month: 5_000,
            },
            Self::PayAsYouGo => PlanLimits {
                requests_per_min: 30,
                requests_per_day: 1_000,
                credits_per_month: 0,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FreeTrial => "free_trial",
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
            Self::PayAsYouGo => "pay_as_you_go",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "free_trial" => Some(Self::FreeTrial),
            "starter" => Some(Self::Starter),
            "pro" => Some(Self::Pro),
            "enterprise" => Some(Self::Enterprise),
            "pay_as_you_go" => Some(Self::PayAsYouGo),
            _ => None,
        }
    }
}

/// The calling surface a request is attributed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Web,
    Api,
    Mcp,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Api => "api",
            Self::Mcp => "mcp",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "web" => Some(Self::Web),
            "api" => Some(Self::Api),
            "mcp" => Some(Self::Mcp),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiKeyMode {
    Live,
    Test,
}

/// `tg_live_` / `tg_test_` + 64 hex characters.
pub fn generate_api_key(mode: ApiKeyMode) -> Result<String, crate::GatewayError> {
    let prefix = match mode {
        ApiKeyMode::Live => API_KEY_LIVE_PREFIX,
        ApiKeyMode::Test => API_KEY_TEST_PREFIX,
    };
    let mut bytes = [0u8; 32];
    getrandom::fill(&mut bytes)
        .map_err(|err| crate::GatewayError::internal(format!("entropy source failed: {err}")))?;
    Ok(format!("{prefix}{}", hex_encode(&bytes)))
}

pub fn generate_request_id() -> String {
    let mut bytes = [0u8; 8];
    if getrandom::fill(&mut bytes).is_err() {
        // Entropy failure here must not fail the billed request; fall back to
        // a timestamp-derived id.
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|duration| duration.as_nanos())
            .unwrap_or(0);
        return format!("req_{ts:016x}");
    }
    format!("req_{}", hex_encode(&bytes))
}

/// Checks the bearer credential shape before any store lookup.
pub fn api_key_format_is_valid(key: &str) -> bool {
    let hex = if let Some(rest) = key.strip_prefix(API_KEY_LIVE_PREFIX) {
        rest
    } else if let Some(rest) = key.strip_prefix(API_KEY_TEST_PREFIX) {
        rest
    } else {
        return false;
    };
    hex.len() == API_KEY_HEX_LEN && hex.bytes().all(|b| b.is_ascii_hexdigit())
}

pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_have_the_documented_shape() {
        let live = generate_api_key(ApiKeyMode::Live).unwrap();
        assert!(live.starts_with(API_KEY_LIVE_PREFIX));
        assert!(api_key_format_is_valid(&live));

        let test = generate_api_key(ApiKeyMode::Test).unwrap();
        assert!(test.starts_with(API_KEY_TEST_PREFIX));
        assert!(api_key_format_is_valid(&test));

        assert_ne!(live, test);
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!(!api_key_format_is_valid(""));
        assert!(!api_key_format_is_valid("sk_live_0123"));
        assert!(!api_key_format_is_valid("tg_live_short"));
        let bad_hex = format!("{}{}", API_KEY_LIVE_PREFIX, "z".repeat(64));
        assert!(!api_key_format_is_valid(&bad_hex));
    }

    #[test]
    fn request_ids_are_prefixed_and_unique() {
        let a = generate_request_id();
        let b = generate_request_id();
        assert!(a.starts_with("req_"));
        assert_ne!(a, b);
    }

    #[test]
    fn plan_tier_round_trips_through_strings() {
        for tier in [
            PlanTier::FreeTrial,
            PlanTier::Starter,
            PlanTier::Pro,
            PlanTier::Enterprise,
            PlanTier::PayAsYouGo,
        ] {
            assert_eq!(PlanTier::parse(tier.as_str()), Some(tier));
        }
        assert_eq!(PlanTier::parse("platinum"), None);
    }

    #[test]
    fn free_trial_limits_match_the_plan_table() {
        let limits = PlanTier::FreeTrial.limits();
        assert_eq!(limits.requests_per_min, 5);
        assert_eq!(limits.requests_per_day, 50);
    }
}
