//! Post-execution accounting. The conditional debit is the one hard write;
//! the usage log and the balance broadcast are best effort and must never
//! turn a successful generation into a client-visible failure.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::GatewayError;
use crate::account::{Account, Channel};
use crate::notify::{BalanceNotifier, BalanceUpdate};
use crate::registry::OperationSpec;
use crate::store::{DebitResult, Store, UsageLogEntry, UsageStatus};

/// Time allowed for the balance broadcast before it is abandoned.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(3);
/// Per-field cap for the payload snapshot kept in the usage log.
const SNAPSHOT_FIELD_CHARS: usize = 200;

#[derive(Clone, Debug)]
pub struct DebitReceipt {
    pub new_balance: u32,
}

/// Everything the ledger records about one billed attempt.
pub struct UsageRecord<'a> {
    pub request_id: &'a str,
    pub account: &'a Account,
    pub operation: &'a OperationSpec,
    pub channel: Channel,
    pub client_ip: &'a str,
    pub payload: &'a Value,
    pub tokens: u32,
    pub cost_usd_micros: u64,
    pub latency_ms: u64,
}

pub struct LedgerWriter {
    store: Arc<dyn Store>,
    notifier: Arc<dyn BalanceNotifier>,
}

impl LedgerWriter {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn BalanceNotifier>) -> Self {
        Self { store, notifier }
    }

    /// Settles a successful execution: conditional debit, then usage log,
    /// then broadcast. Only the debit can fail the call.
    pub async fn debit(
        &self,
        record: UsageRecord<'_>,
        now_ms: u64,
    ) -> Result<DebitReceipt, GatewayError> {
        let amount = record.operation.cost;
        let new_balance = match self
            .store
            .debit_if_sufficient(&record.account.id, amount, now_ms)
            .await?
        {
            DebitResult::Applied { new_balance } => new_balance,
            DebitResult::Insufficient { available } => {
                // The guard admitted this request, so the balance moved
                // between check and settle. The upstream work is done and
                // unbillable; surface the shortfall.
                return Err(GatewayError::InsufficientCredits {
                    required: amount,
                    available,
                });
            }
        };

        self.log_usage(&record, UsageStatus::Success, amount, now_ms)
            .await;
        self.broadcast(record.account.id.clone(), new_balance);
        Ok(DebitReceipt { new_balance })
    }

    /// Atomic increment, used for payment grants. Broadcasts the new balance
    /// like a debit does.
    pub async fn credit(
        &self,
        account_id: &str,
        amount: u32,
        now_ms: u64,
    ) -> Result<u32, GatewayError> {
        let new_balance = self.store.credit(account_id, amount, now_ms).await?;
        self.broadcast(account_id.to_string(), new_balance);
        Ok(new_balance)
    }

    /// Announces a balance that was already settled elsewhere (the webhook
    /// reconciler applies credits and the transaction row in one store call).
    pub fn announce(&self, account_id: &str, balance: u32) {
        self.broadcast(account_id.to_string(), balance);
    }

    /// Records a failed attempt for the audit trail. Zero credits, best
    /// effort, no broadcast.
    pub async fn record_failure(&self, record: UsageRecord<'_>, now_ms: u64) {
        self.log_usage(&record, UsageStatus::Error, 0, now_ms).await;
    }

    async fn log_usage(
        &self,
        record: &UsageRecord<'_>,
        status: UsageStatus,
        credits_used: u32,
        now_ms: u64,
    ) {
        let entry = UsageLogEntry {
            request_id: record.request_id.to_string(),
            account_id: record.account.id.clone(),
            operation: record.operation.slug.to_string(),
            credits_used,
            status,
            channel: record.channel,
            latency_ms: record.latency_ms,
            tokens: record.tokens,
            cost_usd_micros: record.cost_usd_micros,
            client_ip: record.client_ip.to_string(),
            payload_snapshot: snapshot(record.payload),
            created_at_ms: now_ms,
        };
        if let Err(err) = self.store.insert_usage(&entry).await {
            tracing::error!(
                request_id = %entry.request_id,
                account_id = %entry.account_id,
                error = %err,
                "usage log write failed"
            );
        }
    }

    fn broadcast(&self, account_id: String, balance: u32) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            let update = BalanceUpdate {
                account_id: account_id.clone(),
                balance,
            };
            if tokio::time::timeout(NOTIFY_TIMEOUT, notifier.balance_changed(update))
                .await
                .is_err()
            {
                tracing::warn!(account_id = %account_id, "balance broadcast timed out");
            }
        });
    }
}

/// Truncated copy of the payload, with every string capped wherever it is
/// nested. Enough for an audit trail without storing whole documents.
fn snapshot(payload: &Value) -> Value {
    match payload {
        Value::String(text) => Value::String(text.chars().take(SNAPSHOT_FIELD_CHARS).collect()),
        Value::Array(items) => Value::Array(items.iter().map(snapshot).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), snapshot(value)))
                .collect(),
        ),
        other => other.clone(),
    }
}
