//! The pre-dispatch gate: rate limit, credit sufficiency, input validation,
//! content safety. Ordered cheapest-first; each check can short-circuit the
//! pipeline with its own failure.

pub mod rate;
pub mod safety;
pub mod validate;

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::GatewayError;
use crate::account::Account;
use crate::registry::OperationSpec;
use rate::RateLimiter;
use safety::{SafetyPolicy, scan_payload};

pub struct PolicyGuard {
    limiter: Mutex<RateLimiter>,
    safety: Arc<dyn SafetyPolicy>,
}

impl PolicyGuard {
    pub fn new(safety: Arc<dyn SafetyPolicy>) -> Self {
        Self {
            limiter: Mutex::new(RateLimiter::default()),
            safety,
        }
    }

    /// Runs all four checks in order. Pure with respect to the account and
    /// payload; only the rate window is consumed.
    pub fn check(
        &self,
        account: &Account,
        operation: &OperationSpec,
        payload: &Value,
        now_ms: u64,
    ) -> Result<(), GatewayError> {
        {
            let mut limiter = self
                .limiter
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            limiter.check_and_consume(&account.id, &account.plan.limits(), now_ms)?;
        }

        if account.credits_balance < operation.cost {
            return Err(GatewayError::InsufficientCredits {
                required: operation.cost,
                available: account.credits_balance,
            });
        }

        validate::validate_payload(operation.fields, payload)?;
        scan_payload(self.safety.as_ref(), payload)?;
        Ok(())
    }

    pub fn sweep_rate_windows(&self, now_ms: u64) {
        let mut limiter = self
            .limiter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        limiter.sweep(now_ms);
    }
}
