use std::sync::Arc;

use crate::GatewayError;
use crate::account::{
    Account, ApiKeyMode, Channel, PlanTier, api_key_format_is_valid, generate_api_key,
};
use crate::clock::Clock;
use crate::store::Store;

/// Maps a bearer credential to an account and resolves the effective channel.
///
/// Provisioning is an explicit, idempotent operation (CLI-driven), never a
/// side effect of a lookup: an unknown token is always `Unauthenticated`.
pub struct CredentialResolver {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    starting_balance: u32,
    default_plan: PlanTier,
}

impl CredentialResolver {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        starting_balance: u32,
        default_plan: PlanTier,
    ) -> Self {
        Self {
            store,
            clock,
            starting_balance,
            default_plan,
        }
    }

    /// Resolves `Authorization: Bearer …` plus an optional `X-Channel`
    /// override into the account and the channel usage is attributed to.
    pub async fn resolve(
        &self,
        authorization: Option<&str>,
        channel_override: Option<&str>,
        default_channel: Channel,
    ) -> Result<(Account, Channel), GatewayError> {
        let header = authorization.ok_or_else(|| {
            GatewayError::unauthenticated(
                "Missing or invalid Authorization header. Use: Bearer tg_live_...",
            )
        })?;
        let api_key = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                GatewayError::unauthenticated(
                    "Missing or invalid Authorization header. Use: Bearer tg_live_...",
                )
            })?;

        if !api_key_format_is_valid(api_key) {
            return Err(GatewayError::unauthenticated(
                "Invalid API key format. Keys start with tg_live_ or tg_test_",
            ));
        }

        let account = self
            .store
            .find_account_by_api_key(api_key)
            .await?
            .ok_or_else(|| GatewayError::unauthenticated("Invalid API key"))?;

        // Unknown override values fall back to the adapter default rather
        // than failing the request.
        let channel = channel_override
            .and_then(Channel::parse)
            .unwrap_or(default_channel);

        Ok((account, channel))
    }

    /// Idempotent provisioning: creates the account with a fresh credential,
    /// the starting balance and the default plan. Racing callers are settled
    /// by the store's unique-constraint insert; the loser gets the winner's
    /// record.
    pub async fn provision(&self, account_id: &str) -> Result<Account, GatewayError> {
        if account_id.trim().is_empty() {
            return Err(GatewayError::InvalidInput {
                field: "account_id".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        let now = self.clock.now_epoch_millis();
        let account = Account {
            id: account_id.to_string(),
            credits_balance: self.starting_balance,
            plan: self.default_plan,
            api_key: generate_api_key(ApiKeyMode::Live)?,
            created_at_ms: now,
            updated_at_ms: now,
        };
        if self.store.insert_account(&account).await? {
            tracing::info!(account_id, "provisioned account");
            return Ok(account);
        }
        self.store
            .find_account(account_id)
            .await?
            .ok_or_else(|| GatewayError::internal("account vanished during provisioning"))
    }

    /// Replaces the bearer credential; the old one stops resolving at once.
    pub async fn rotate_key(&self, account_id: &str) -> Result<String, GatewayError> {
        let account = self
            .store
            .find_account(account_id)
            .await?
            .ok_or_else(|| GatewayError::unauthenticated("Unknown account"))?;
        let new_key = generate_api_key(ApiKeyMode::Live)?;
        self.store
            .set_api_key(&account.id, &new_key, self.clock.now_epoch_millis())
            .await?;
        tracing::info!(account_id, "rotated api key");
        Ok(new_key)
    }
}
