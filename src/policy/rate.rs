use std::collections::HashMap;

use crate::GatewayError;
use crate::account::PlanLimits;

const MINUTE_MS: u64 = 60_000;
const DAY_MS: u64 = 86_400_000;

/// Per-account sliding windows at minute and day granularity.
///
/// Process-local by design: not safe across multiple gateway instances
/// without an external shared counter. Owned by the policy guard and swept
/// on a timer so abandoned accounts do not accumulate.
#[derive(Debug, Default)]
pub struct RateLimiter {
    minute: HashMap<String, Window>,
    day: HashMap<String, Window>,
}

#[derive(Clone, Copy, Debug)]
struct Window {
    count: u32,
    reset_at_ms: u64,
}

impl RateLimiter {
    pub fn check_and_consume(
        &mut self,
        account_id: &str,
        limits: &PlanLimits,
        now_ms: u64,
    ) -> Result<(), GatewayError> {
        consume(
            &mut self.minute,
            account_id,
            limits.requests_per_min,
            MINUTE_MS,
            "minute",
            now_ms,
        )?;
        consume(
            &mut self.day,
            account_id,
            limits.requests_per_day,
            DAY_MS,
            "day",
            now_ms,
        )
    }

    /// Drops expired windows. Called from a periodic task.
    pub fn sweep(&mut self, now_ms: u64) {
        self.minute.retain(|_, window| window.reset_at_ms > now_ms);
        self.day.retain(|_, window| window.reset_at_ms > now_ms);
    }

    #[cfg(test)]
    fn tracked_accounts(&self) -> usize {
        self.minute.len()
    }
}

fn consume(
    windows: &mut HashMap<String, Window>,
    account_id: &str,
    limit: u32,
    window_ms: u64,
    window_name: &'static str,
    now_ms: u64,
) -> Result<(), GatewayError> {
    let window = windows.entry(account_id.to_string()).or_insert(Window {
        count: 0,
        reset_at_ms: now_ms + window_ms,
    });
    if window.reset_at_ms <= now_ms {
        window.count = 0;
        window.reset_at_ms = now_ms + window_ms;
    }
    let next = window.count.saturating_add(1);
    if limit == 0 || next > limit {
        return Err(GatewayError::RateLimited {
            limit,
            window: window_name,
        });
    }
    window.count = next;
    Ok(())
}
