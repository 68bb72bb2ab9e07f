use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::OptionalExtension;
use serde_json::Value;

use crate::account::{Account, Channel, PlanTier};
use crate::store::{
    DebitResult, PaymentApplication, PaymentOutcome, Store, StoreError, Transaction,
    TransactionKind, TransactionStatus, UsageLogEntry, UsageStatus,
};

/// sqlite-backed store. Every call opens a connection on a blocking thread;
/// the conditional debit relies on a single UPDATE … WHERE balance >= ?
/// statement for its atomicity, payments on the transactions primary key.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        self.run(|conn| {
            init_schema(conn)?;
            Ok(())
        })
        .await
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<T, StoreError> {
            let mut conn = open_connection(path).map_err(db_err)?;
            init_schema(&conn).map_err(db_err)?;
            op(&mut conn).map_err(db_err)
        })
        .await
        .map_err(|err| StoreError::Join(err.to_string()))?
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn find_account_by_api_key(
        &self,
        api_key: &str,
    ) -> Result<Option<Account>, StoreError> {
        let api_key = api_key.to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT id, api_key, balance, plan, created_at_ms, updated_at_ms
                 FROM accounts WHERE api_key = ?1",
                rusqlite::params![api_key],
                row_to_account,
            )
            .optional()
        })
        .await
    }

    async fn find_account(&self, id: &str) -> Result<Option<Account>, StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT id, api_key, balance, plan, created_at_ms, updated_at_ms
                 FROM accounts WHERE id = ?1",
                rusqlite::params![id],
                row_to_account,
            )
            .optional()
        })
        .await
    }

    async fn insert_account(&self, account: &Account) -> Result<bool, StoreError> {
        let account = account.clone();
        self.run(move |conn| {
            let changed = conn.execute(
                "INSERT INTO accounts (id, api_key, balance, plan, created_at_ms, updated_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO NOTHING",
                rusqlite::params![
                    account.id,
                    account.api_key,
                    account.credits_balance,
                    account.plan.as_str(),
                    account.created_at_ms as i64,
                    account.updated_at_ms as i64,
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn debit_if_sufficient(
        &self,
        id: &str,
        amount: u32,
        at_ms: u64,
    ) -> Result<DebitResult, StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            let debited: Option<i64> = conn
                .query_row(
                    "UPDATE accounts SET balance = balance - ?2, updated_at_ms = ?3
                     WHERE id = ?1 AND balance >= ?2
                     RETURNING balance",
                    rusqlite::params![id, amount, at_ms as i64],
                    |row| row.get(0),
                )
                .optional()?;
            match debited {
                Some(balance) => Ok(DebitResult::Applied {
                    new_balance: balance.max(0) as u32,
                }),
                None => {
                    let available: i64 = conn.query_row(
                        "SELECT balance FROM accounts WHERE id = ?1",
                        rusqlite::params![id],
                        |row| row.get(0),
                    )?;
                    Ok(DebitResult::Insufficient {
                        available: available.max(0) as u32,
                    })
                }
            }
        })
        .await
    }

    async fn credit(&self, id: &str, amount: u32, at_ms: u64) -> Result<u32, StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            let balance: i64 = conn.query_row(
                "UPDATE accounts SET balance = balance + ?2, updated_at_ms = ?3
                 WHERE id = ?1
                 RETURNING balance",
                rusqlite::params![id, amount, at_ms as i64],
                |row| row.get(0),
            )?;
            Ok(balance.max(0) as u32)
        })
        .await
    }

    async fn set_plan(&self, id: &str, plan: PlanTier, at_ms: u64) -> Result<(), StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            conn.execute(
                "UPDATE accounts SET plan = ?2, updated_at_ms = ?3 WHERE id = ?1",
                rusqlite::params![id, plan.as_str(), at_ms as i64],
            )?;
            Ok(())
        })
        .await
    }

    async fn set_api_key(&self, id: &str, api_key: &str, at_ms: u64) -> Result<(), StoreError> {
        let id = id.to_string();
        let api_key = api_key.to_string();
        self.run(move |conn| {
            conn.execute(
                "UPDATE accounts SET api_key = ?2, updated_at_ms = ?3 WHERE id = ?1",
                rusqlite::params![id, api_key, at_ms as i64],
            )?;
            Ok(())
        })
        .await
    }

    async fn insert_usage(&self, entry: &UsageLogEntry) -> Result<(), StoreError> {
        let entry = entry.clone();
        let payload = serde_json::to_string(&entry.payload_snapshot)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO usage_logs (
                    id, account_id, operation, credits_used, status, channel,
                    latency_ms, tokens, cost_usd_micros, client_ip, payload_json, created_at_ms
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    entry.request_id,
                    entry.account_id,
                    entry.operation,
                    entry.credits_used,
                    entry.status.as_str(),
                    entry.channel.as_str(),
                    entry.latency_ms as i64,
                    entry.tokens,
                    entry.cost_usd_micros as i64,
                    entry.client_ip,
                    payload,
                    entry.created_at_ms as i64,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn recent_usage(
        &self,
        account_id: &str,
        limit: u32,
    ) -> Result<Vec<UsageLogEntry>, StoreError> {
        let account_id = account_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, account_id, operation, credits_used, status, channel,
                        latency_ms, tokens, cost_usd_micros, client_ip, payload_json, created_at_ms
                 FROM usage_logs WHERE account_id = ?1
                 ORDER BY created_at_ms DESC, id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![account_id, limit], row_to_usage)?;
            rows.collect()
        })
        .await
    }

    async fn apply_payment(
        &self,
        payment: &PaymentApplication,
    ) -> Result<PaymentOutcome, StoreError> {
        let payment = payment.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT INTO transactions (
                    order_id, account_id, kind, amount_usd_cents, credits_added, status, created_at_ms
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(order_id) DO NOTHING",
                rusqlite::params![
                    payment.order_id,
                    payment.account_id,
                    payment.kind.as_str(),
                    payment.amount_usd_cents,
                    payment.credits,
                    TransactionStatus::Completed.as_str(),
                    payment.at_ms as i64,
                ],
            )?;
            if inserted == 0 {
                // Replayed provider event; the original application already
                // credited the account.
                return Ok(PaymentOutcome::Duplicate);
            }
            let new_balance: i64 = tx.query_row(
                "UPDATE accounts SET balance = balance + ?2, updated_at_ms = ?3
                 WHERE id = ?1
                 RETURNING balance",
                rusqlite::params![payment.account_id, payment.credits, payment.at_ms as i64],
                |row| row.get(0),
            )?;
            if let Some(plan) = payment.new_plan {
                tx.execute(
                    "UPDATE accounts SET plan = ?2 WHERE id = ?1",
                    rusqlite::params![payment.account_id, plan.as_str()],
                )?;
            }
            tx.commit()?;
            Ok(PaymentOutcome::Applied {
                new_balance: new_balance.max(0) as u32,
            })
        })
        .await
    }

    async fn mark_refunded(&self, order_id: &str) -> Result<bool, StoreError> {
        let order_id = order_id.to_string();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE transactions SET status = ?2 WHERE order_id = ?1",
                rusqlite::params![order_id, TransactionStatus::Refunded.as_str()],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn find_transaction(&self, order_id: &str) -> Result<Option<Transaction>, StoreError> {
        let order_id = order_id.to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT order_id, account_id, kind, amount_usd_cents, credits_added, status, created_at_ms
                 FROM transactions WHERE order_id = ?1",
                rusqlite::params![order_id],
                row_to_transaction,
            )
            .optional()
        })
        .await
    }
}

fn row_to_account(row: &rusqlite::Row<'_>) -> Result<Account, rusqlite::Error> {
    let plan_raw: String = row.get(3)?;
    let balance: i64 = row.get(2)?;
    Ok(Account {
        id: row.get(0)?,
        api_key: row.get(1)?,
        credits_balance: balance.max(0) as u32,
        plan: PlanTier::parse(&plan_raw).unwrap_or(PlanTier::FreeTrial),
        created_at_ms: row.get::<_, i64>(4)?.max(0) as u64,
        updated_at_ms: row.get::<_, i64>(5)?.max(0) as u64,
    })
}

fn row_to_usage(row: &rusqlite::Row<'_>) -> Result<UsageLogEntry, rusqlite::Error> {
    let status_raw: String = row.get(4)?;
    let channel_raw: String = row.get(5)?;
    let payload_raw: String = row.get(10)?;
    Ok(UsageLogEntry {
        request_id: row.get(0)?,
        account_id: row.get(1)?,
        operation: row.get(2)?,
        credits_used: row.get(3)?,
        status: if status_raw == "error" {
            UsageStatus::Error
        } else {
            UsageStatus::Success
        },
        channel: Channel::parse(&channel_raw).unwrap_or(Channel::Api),
        latency_ms: row.get::<_, i64>(6)?.max(0) as u64,
        tokens: row.get(7)?,
        cost_usd_micros: row.get::<_, i64>(8)?.max(0) as u64,
        client_ip: row.get(9)?,
        payload_snapshot: serde_json::from_str::<Value>(&payload_raw).unwrap_or(Value::Null),
        created_at_ms: row.get::<_, i64>(11)?.max(0) as u64,
    })
}

fn row_to_transaction(row: &rusqlite::Row<'_>) -> Result<Transaction, rusqlite::Error> {
    let kind_raw: String = row.get(2)?;
    let status_raw: String = row.get(5)?;
    Ok(Transaction {
        order_id: row.get(0)?,
        account_id: row.get(1)?,
        kind: TransactionKind::parse(&kind_raw).unwrap_or(TransactionKind::Purchase),
        amount_usd_cents: row.get(3)?,
        credits_added: row.get(4)?,
        status: TransactionStatus::parse(&status_raw).unwrap_or(TransactionStatus::Completed),
        created_at_ms: row.get::<_, i64>(6)?.max(0) as u64,
    })
}

fn open_connection(path: PathBuf) -> Result<rusqlite::Connection, rusqlite::Error> {
    let conn = rusqlite::Connection::open(path)?;
    let _ = conn.busy_timeout(Duration::from_secs(5));
    let _ = conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;");
    Ok(conn)
}

fn init_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY NOT NULL,
            api_key TEXT NOT NULL UNIQUE,
            balance INTEGER NOT NULL,
            plan TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS usage_logs (
            id TEXT PRIMARY KEY NOT NULL,
            account_id TEXT NOT NULL,
            operation TEXT NOT NULL,
            credits_used INTEGER NOT NULL,
            status TEXT NOT NULL,
            channel TEXT NOT NULL,
            latency_ms INTEGER NOT NULL,
            tokens INTEGER NOT NULL,
            cost_usd_micros INTEGER NOT NULL,
            client_ip TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_usage_logs_account
            ON usage_logs (account_id, created_at_ms);

        CREATE TABLE IF NOT EXISTS transactions (
            order_id TEXT PRIMARY KEY NOT NULL,
            account_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            amount_usd_cents INTEGER NOT NULL,
            credits_added INTEGER NOT NULL,
            status TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL
        );",
    )
}

fn db_err(err: rusqlite::Error) -> StoreError {
    StoreError::Database(err.to_string())
}
