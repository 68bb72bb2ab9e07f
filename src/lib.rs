//! tollgate: a credit-metered gateway in front of AI-backed operations.
//!
//! Every billable request flows through one pipeline regardless of the
//! protocol it arrived on: resolve the bearer credential, enforce policy
//! (rate, credits, input, safety), dispatch the catalogued operation against
//! the upstream provider, then settle the ledger (atomic debit, usage log,
//! balance broadcast). Payment-provider webhooks feed the same balance
//! primitive in the credit direction.

pub mod account;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod ledger;
pub mod notify;
pub mod operations;
pub mod policy;
pub mod registry;
pub mod resolver;
pub mod sqlite_store;
pub mod store;
pub mod upstream;

pub use account::{Account, ApiKeyMode, Channel, PlanTier, generate_api_key, generate_request_id};
pub use clock::{Clock, SystemClock};
pub use config::{CreditPack, GatewayConfig, UpstreamConfig};
pub use error::GatewayError;
pub use gateway::{ExecuteOutcome, ExecuteRequest, Gateway};
pub use ledger::{DebitReceipt, LedgerWriter};
pub use notify::{BalanceNotifier, BalanceUpdate, BroadcastNotifier};
pub use policy::PolicyGuard;
pub use policy::rate::RateLimiter;
pub use policy::safety::{PatternSafetyPolicy, SafetyPolicy};
pub use registry::{Completion, OperationHandler, OperationRegistry, OperationSpec};
pub use resolver::CredentialResolver;
pub use sqlite_store::SqliteStore;
pub use store::{
    DebitResult, MemoryStore, PaymentApplication, PaymentOutcome, Store, StoreError,
};
pub use upstream::{ChatOutput, ChatRequest, ImageOutput, OpenAiCompatibleUpstream, Upstream};
