use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::account::{Account, Channel, PlanTier};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("task join error: {0}")]
    Join(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// One append-only record per billed attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UsageLogEntry {
    pub request_id: String,
    pub account_id: String,
    pub operation: String,
    pub credits_used: u32,
    pub status: UsageStatus,
    pub channel: Channel,
    pub latency_ms: u64,
    pub tokens: u32,
    pub cost_usd_micros: u64,
    pub client_ip: String,
    pub payload_snapshot: Value,
    pub created_at_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageStatus {
    Success,
    Error,
}

impl UsageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub order_id: String,
    pub account_id: String,
    pub kind: TransactionKind,
    pub amount_usd_cents: u32,
    pub credits_added: u32,
    pub status: TransactionStatus,
    pub created_at_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Purchase,
    Subscription,
    Refund,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Subscription => "subscription",
            Self::Refund => "refund",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "purchase" => Some(Self::Purchase),
            "subscription" => Some(Self::Subscription),
            "refund" => Some(Self::Refund),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Refunded => "refunded",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }
}

/// A payment event to apply atomically: credit + transaction row, optionally
/// a plan change. The provider order id is the dedup key.
#[derive(Clone, Debug)]
pub struct PaymentApplication {
    pub order_id: String,
    pub account_id: String,
    pub kind: TransactionKind,
    pub amount_usd_cents: u32,
    pub credits: u32,
    pub new_plan: Option<PlanTier>,
    pub at_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentOutcome {
    Applied { new_balance: u32 },
    /// The order id was seen before; nothing was changed.
    Duplicate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebitResult {
    Applied { new_balance: u32 },
    Insufficient { available: u32 },
}

/// The narrow persistence interface the core depends on. The engine behind it
/// (sqlite here, anything relational in production) is interchangeable.
#[async_trait]
pub trait Store: Send + Sync {
    async fn find_account_by_api_key(&self, api_key: &str)
    -> Result<Option<Account>, StoreError>;
    async fn find_account(&self, id: &str) -> Result<Option<Account>, StoreError>;
    /// Race-safe insert: returns false (and changes nothing) when an account
    /// with this id already exists.
    async fn insert_account(&self, account: &Account) -> Result<bool, StoreError>;
    /// Atomic decrement-if-sufficient. The only per-account operation that
    /// requires serialization.
    async fn debit_if_sufficient(&self, id: &str, amount: u32, at_ms: u64)
    -> Result<DebitResult, StoreError>;
    async fn credit(&self, id: &str, amount: u32, at_ms: u64) -> Result<u32, StoreError>;
    async fn set_plan(&self, id: &str, plan: PlanTier, at_ms: u64) -> Result<(), StoreError>;
    async fn set_api_key(&self, id: &str, api_key: &str, at_ms: u64) -> Result<(), StoreError>;

    async fn insert_usage(&self, entry: &UsageLogEntry) -> Result<(), StoreError>;
    async fn recent_usage(
        &self,
        account_id: &str,
        limit: u32,
    ) -> Result<Vec<UsageLogEntry>, StoreError>;

    /// Idempotent credit + transaction insert, atomic with respect to both
    /// concurrent applications and replays of the same order id.
    async fn apply_payment(
        &self,
        payment: &PaymentApplication,
    ) -> Result<PaymentOutcome, StoreError>;
    async fn mark_refunded(&self, order_id: &str) -> Result<bool, StoreError>;
    async fn find_transaction(&self, order_id: &str) -> Result<Option<Transaction>, StoreError>;
}

/// In-memory store. Single-process only; the mutex makes every mutation
/// atomic, which is exactly the conditional-decrement guarantee the sqlite
/// store gets from its UPDATE … WHERE balance >= ? statement.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    accounts: HashMap<String, Account>,
    usage: Vec<UsageLogEntry>,
    transactions: HashMap<String, Transaction>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        // A poisoned lock means a panic mid-mutation; tests want that loud.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_account_by_api_key(
        &self,
        api_key: &str,
    ) -> Result<Option<Account>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .accounts
            .values()
            .find(|account| account.api_key == api_key)
            .cloned())
    }

    async fn find_account(&self, id: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.lock().accounts.get(id).cloned())
    }

    async fn insert_account(&self, account: &Account) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        if inner.accounts.contains_key(&account.id) {
            return Ok(false);
        }
        inner.accounts.insert(account.id.clone(), account.clone());
        Ok(true)
    }

    async fn debit_if_sufficient(
        &self,
        id: &str,
        amount: u32,
        at_ms: u64,
    ) -> Result<DebitResult, StoreError> {
        let mut inner = self.lock();
        let account = inner
            .accounts
            .get_mut(id)
            .ok_or_else(|| StoreError::Database(format!("no such account: {id}")))?;
        if account.credits_balance < amount {
            return Ok(DebitResult::Insufficient {
                available: account.credits_balance,
            });
        }
        account.credits_balance -= amount;
        account.updated_at_ms = at_ms;
        Ok(DebitResult::Applied {
            new_balance: account.credits_balance,
        })
    }

    async fn credit(&self, id: &str, amount: u32, at_ms: u64) -> Result<u32, StoreError> {
        let mut inner = self.lock();
        let account = inner
            .accounts
            .get_mut(id)
            .ok_or_else(|| StoreError::Database(format!("no such account: {id}")))?;
        account.credits_balance = account.credits_balance.saturating_add(amount);
        account.updated_at_ms = at_ms;
        Ok(account.credits_balance)
    }

    async fn set_plan(&self, id: &str, plan: PlanTier, at_ms: u64) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let account = inner
            .accounts
            .get_mut(id)
            .ok_or_else(|| StoreError::Database(format!("no such account: {id}")))?;
        account.plan = plan;
        account.updated_at_ms = at_ms;
        Ok(())
    }

    async fn set_api_key(&self, id: &str, api_key: &str, at_ms: u64) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let account = inner
            .accounts
            .get_mut(id)
            .ok_or_else(|| StoreError::Database(format!("no such account: {id}")))?;
        account.api_key = api_key.to_string();
        account.updated_at_ms = at_ms;
        Ok(())
    }

    async fn insert_usage(&self, entry: &UsageLogEntry) -> Result<(), StoreError> {
        self.lock().usage.push(entry.clone());
        Ok(())
    }

    async fn recent_usage(
        &self,
        account_id: &str,
        limit: u32,
    ) -> Result<Vec<UsageLogEntry>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .usage
            .iter()
            .rev()
            .filter(|entry| entry.account_id == account_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn apply_payment(
        &self,
        payment: &PaymentApplication,
    ) -> Result<PaymentOutcome, StoreError> {
        let mut inner = self.lock();
        if inner.transactions.contains_key(&payment.order_id) {
            return Ok(PaymentOutcome::Duplicate);
        }
        let account = inner
            .accounts
            .get_mut(&payment.account_id)
            .ok_or_else(|| {
                StoreError::Database(format!("no such account: {}", payment.account_id))
            })?;
        account.credits_balance = account.credits_balance.saturating_add(payment.credits);
        if let Some(plan) = payment.new_plan {
            account.plan = plan;
        }
        account.updated_at_ms = payment.at_ms;
        let new_balance = account.credits_balance;
        inner.transactions.insert(
            payment.order_id.clone(),
            Transaction {
                order_id: payment.order_id.clone(),
                account_id: payment.account_id.clone(),
                kind: payment.kind,
                amount_usd_cents: payment.amount_usd_cents,
                credits_added: payment.credits,
                status: TransactionStatus::Completed,
                created_at_ms: payment.at_ms,
            },
        );
        Ok(PaymentOutcome::Applied { new_balance })
    }

    async fn mark_refunded(&self, order_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        match inner.transactions.get_mut(order_id) {
            Some(transaction) => {
                transaction.status = TransactionStatus::Refunded;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_transaction(&self, order_id: &str) -> Result<Option<Transaction>, StoreError> {
        Ok(self.lock().transactions.get(order_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn account(id: &str, balance: u32) -> Account {
        Account {
            id: id.to_string(),
            credits_balance: balance,
            plan: PlanTier::FreeTrial,
            api_key: format!("tg_test_{}", "0".repeat(64)),
            created_at_ms: 0,
            updated_at_ms: 0,
        }
    }

    #[tokio::test]
    async fn debit_stops_at_zero() {
        let store = MemoryStore::new();
        store.insert_account(&account("a", 10)).await.unwrap();

        assert_eq!(
            store.debit_if_sufficient("a", 6, 1).await.unwrap(),
            DebitResult::Applied { new_balance: 4 }
        );
        assert_eq!(
            store.debit_if_sufficient("a", 6, 2).await.unwrap(),
            DebitResult::Insufficient { available: 4 }
        );
    }

    #[tokio::test]
    async fn insert_account_is_race_safe() {
        let store = MemoryStore::new();
        assert!(store.insert_account(&account("a", 10)).await.unwrap());
        assert!(!store.insert_account(&account("a", 99)).await.unwrap());
        let existing = store.find_account("a").await.unwrap().unwrap();
        assert_eq!(existing.credits_balance, 10);
    }

    #[tokio::test]
    async fn apply_payment_is_idempotent_on_order_id() {
        let store = MemoryStore::new();
        store.insert_account(&account("a", 0)).await.unwrap();
        let payment = PaymentApplication {
            order_id: "ord_1".to_string(),
            account_id: "a".to_string(),
            kind: TransactionKind::Purchase,
            amount_usd_cents: 800,
            credits: 100,
            new_plan: None,
            at_ms: 5,
        };

        assert_eq!(
            store.apply_payment(&payment).await.unwrap(),
            PaymentOutcome::Applied { new_balance: 100 }
        );
        assert_eq!(
            store.apply_payment(&payment).await.unwrap(),
            PaymentOutcome::Duplicate
        );
        let refreshed = store.find_account("a").await.unwrap().unwrap();
        assert_eq!(refreshed.credits_balance, 100);
    }

    #[tokio::test]
    async fn refund_flips_transaction_status() {
        let store = MemoryStore::new();
        store.insert_account(&account("a", 0)).await.unwrap();
        let payment = PaymentApplication {
            order_id: "ord_2".to_string(),
            account_id: "a".to_string(),
            kind: TransactionKind::Purchase,
            amount_usd_cents: 800,
            credits: 100,
            new_plan: None,
            at_ms: 5,
        };
        store.apply_payment(&payment).await.unwrap();

        assert!(store.mark_refunded("ord_2").await.unwrap());
        assert!(!store.mark_refunded("ord_missing").await.unwrap());
        let transaction = store.find_transaction("ord_2").await.unwrap().unwrap();
        assert_eq!(transaction.status, TransactionStatus::Refunded);
    }

    #[tokio::test]
    async fn recent_usage_is_newest_first_and_scoped() {
        let store = MemoryStore::new();
        for (i, account_id) in [("r1", "a"), ("r2", "b"), ("r3", "a")].iter().enumerate() {
            store
                .insert_usage(&UsageLogEntry {
                    request_id: account_id.0.to_string(),
                    account_id: account_id.1.to_string(),
                    operation: "translator".to_string(),
                    credits_used: 3,
                    status: UsageStatus::Success,
                    channel: Channel::Api,
                    latency_ms: 10,
                    tokens: 100,
                    cost_usd_micros: 500,
                    client_ip: "127.0.0.1".to_string(),
                    payload_snapshot: json!({}),
                    created_at_ms: i as u64,
                })
                .await
                .unwrap();
        }

        let usage = store.recent_usage("a", 10).await.unwrap();
        let ids: Vec<_> = usage.iter().map(|entry| entry.request_id.as_str()).collect();
        assert_eq!(ids, vec!["r3", "r1"]);
    }
}
