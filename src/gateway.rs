//! The protocol-independent pipeline. Both the REST surface and the agent
//! protocol funnel into [`Gateway::execute`]; they differ only in how they
//! frame the request and the response.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::GatewayError;
use crate::account::{Account, Channel, generate_request_id};
use crate::clock::{Clock, SystemClock};
use crate::config::GatewayConfig;
use crate::ledger::{LedgerWriter, UsageRecord};
use crate::notify::{BalanceNotifier, BroadcastNotifier};
use crate::policy::PolicyGuard;
use crate::policy::safety::{PatternSafetyPolicy, SafetyPolicy};
use crate::registry::OperationRegistry;
use crate::resolver::CredentialResolver;
use crate::store::Store;

/// One billable invocation, as framed by a protocol adapter.
#[derive(Clone, Debug)]
pub struct ExecuteRequest {
    pub authorization: Option<String>,
    pub channel_override: Option<String>,
    pub default_channel: Channel,
    pub slug: String,
    pub payload: Value,
    pub client_ip: String,
}

#[derive(Clone, Debug)]
pub struct ExecuteOutcome {
    pub request_id: String,
    pub operation: String,
    pub data: Value,
    pub credits_used: u32,
    pub credits_remaining: u32,
}

pub struct Gateway {
    config: GatewayConfig,
    store: Arc<dyn Store>,
    registry: OperationRegistry,
    guard: PolicyGuard,
    ledger: LedgerWriter,
    resolver: CredentialResolver,
    clock: Arc<dyn Clock>,
    safety: Arc<dyn SafetyPolicy>,
    notifier: Arc<dyn BalanceNotifier>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, store: Arc<dyn Store>, registry: OperationRegistry) -> Self {
        Self::assemble(
            config,
            store,
            registry,
            Arc::new(SystemClock),
            Arc::new(PatternSafetyPolicy),
            Arc::new(BroadcastNotifier::default()),
        )
    }

    fn assemble(
        config: GatewayConfig,
        store: Arc<dyn Store>,
        registry: OperationRegistry,
        clock: Arc<dyn Clock>,
        safety: Arc<dyn SafetyPolicy>,
        notifier: Arc<dyn BalanceNotifier>,
    ) -> Self {
        let resolver = CredentialResolver::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.starting_balance,
            config.default_plan,
        );
        let ledger = LedgerWriter::new(Arc::clone(&store), Arc::clone(&notifier));
        Self {
            config,
            store,
            registry,
            guard: PolicyGuard::new(Arc::clone(&safety)),
            ledger,
            resolver,
            clock,
            safety,
            notifier,
        }
    }

    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self::assemble(
            self.config,
            self.store,
            self.registry,
            clock,
            self.safety,
            self.notifier,
        )
    }

    pub fn with_safety_policy(self, safety: Arc<dyn SafetyPolicy>) -> Self {
        Self::assemble(
            self.config,
            self.store,
            self.registry,
            self.clock,
            safety,
            self.notifier,
        )
    }

    pub fn with_notifier(self, notifier: Arc<dyn BalanceNotifier>) -> Self {
        Self::assemble(
            self.config,
            self.store,
            self.registry,
            self.clock,
            self.safety,
            notifier,
        )
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &CredentialResolver {
        &self.resolver
    }

    pub fn ledger(&self) -> &LedgerWriter {
        &self.ledger
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn sweep_rate_windows(&self) {
        self.guard.sweep_rate_windows(self.clock.now_epoch_millis());
    }

    /// Resolves the credential, then runs the metered pipeline.
    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteOutcome, GatewayError> {
        let (account, channel) = self
            .resolver
            .resolve(
                request.authorization.as_deref(),
                request.channel_override.as_deref(),
                request.default_channel,
            )
            .await?;
        self.execute_for_account(
            &account,
            channel,
            &request.slug,
            &request.payload,
            &request.client_ip,
        )
        .await
    }

    /// The pipeline after authentication: catalog lookup, policy gate,
    /// upstream dispatch, ledger settlement. Batch adapters resolve the
    /// credential once and call this per item.
    pub async fn execute_for_account(
        &self,
        account: &Account,
        channel: Channel,
        slug: &str,
        payload: &Value,
        client_ip: &str,
    ) -> Result<ExecuteOutcome, GatewayError> {
        let entry = self.registry.get(slug)?;
        let spec = entry.spec;
        let now = self.clock.now_epoch_millis();
        self.guard.check(account, &spec, payload, now)?;

        let request_id = generate_request_id();
        let started = Instant::now();
        let completion = match entry.handler.execute(payload).await {
            Ok(completion) => completion,
            Err(err) => {
                tracing::warn!(
                    request_id = %request_id,
                    account_id = %account.id,
                    operation = slug,
                    error = %err,
                    "operation failed before settlement"
                );
                self.ledger
                    .record_failure(
                        UsageRecord {
                            request_id: &request_id,
                            account,
                            operation: &spec,
                            channel,
                            client_ip,
                            payload,
                            tokens: 0,
                            cost_usd_micros: 0,
                            latency_ms: started.elapsed().as_millis() as u64,
                        },
                        self.clock.now_epoch_millis(),
                    )
                    .await;
                return Err(err);
            }
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let receipt = self
            .ledger
            .debit(
                UsageRecord {
                    request_id: &request_id,
                    account,
                    operation: &spec,
                    channel,
                    client_ip,
                    payload,
                    tokens: completion.tokens,
                    cost_usd_micros: completion.cost_usd_micros,
                    latency_ms,
                },
                self.clock.now_epoch_millis(),
            )
            .await?;

        tracing::info!(
            request_id = %request_id,
            account_id = %account.id,
            operation = slug,
            channel = channel.as_str(),
            credits_used = spec.cost,
            credits_remaining = receipt.new_balance,
            latency_ms,
            "request settled"
        );

        Ok(ExecuteOutcome {
            request_id,
            operation: slug.to_string(),
            data: completion.result,
            credits_used: spec.cost,
            credits_remaining: receipt.new_balance,
        })
    }
}
