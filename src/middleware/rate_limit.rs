use std::sync::Arc;

use crate::errors::GatewayError;
use crate::models::token::{
    QuotaResult, TokenRecord, TokenType, WindowCounter, MAX_WINDOW_SECONDS,
};
use crate::store::TokenStore;

pub const DEFAULT_CAS_RETRIES: u32 = 16;

/// Fixed-window call counter stored on the token record.
///
/// A window opens on the first charge (or the first charge after expiry) and
/// lasts `window_seconds`. The charge that overdraws the quota is still recorded;
/// callers reject when `remaining < 0`.
///
/// Concurrent charges on one token are serialized with compare-and-swap on
/// `(api_count, window_start)`; different tokens never contend.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn TokenStore>,
    max_retries: u32,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self {
            store,
            max_retries: DEFAULT_CAS_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub async fn charge(
        &self,
        token: &TokenRecord,
        amount: i64,
    ) -> Result<QuotaResult, GatewayError> {
        self.charge_at(token, amount, chrono::Utc::now().timestamp())
            .await
    }

    pub async fn charge_at(
        &self,
        token: &TokenRecord,
        amount: i64,
        now: i64,
    ) -> Result<QuotaResult, GatewayError> {
        if amount <= 0 {
            return Err(GatewayError::Internal(format!(
                "charge amount must be positive, got {}",
                amount
            )));
        }
        if token.token_type == TokenType::Unlimited {
            return Ok(QuotaResult {
                limit: token.api_limit,
                remaining: token.api_limit,
                reset_seconds: 0,
                token_type: TokenType::Unlimited,
            });
        }

        let mut current = token.counter();
        for attempt in 0..self.max_retries {
            let next = advance(current, token.window_seconds, amount, now);
            if self.store.persist_counter(token.id, current, next).await? {
                let quota = QuotaResult {
                    limit: token.api_limit,
                    remaining: token.api_limit.saturating_sub(next.api_count),
                    reset_seconds: next
                        .window_start
                        .saturating_add(token.window_seconds)
                        .saturating_sub(now),
                    token_type: TokenType::Limited,
                };
                if quota.is_exceeded() {
                    tracing::warn!(
                        rate_limit = true,
                        token_id = %token.id,
                        limit = quota.limit,
                        count = next.api_count,
                        "quota exceeded"
                    );
                }
                return Ok(quota);
            }

            tracing::debug!(token_id = %token.id, attempt, "counter conflict, reloading");
            current = self
                .store
                .load_counter(token.id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("token {} disappeared while charging", token.id))?;
        }

        Err(GatewayError::Store(anyhow::anyhow!(
            "counter for token {} still contended after {} attempts",
            token.id,
            self.max_retries
        )))
    }
}

/// Pure window arithmetic: roll over if never started or expired, then add.
/// Saturates instead of overflowing on oversized windows or counts.
pub fn advance(
    current: WindowCounter,
    window_seconds: i64,
    amount: i64,
    now: i64,
) -> WindowCounter {
    let expired =
        current.window_start == 0 || now > current.window_start.saturating_add(window_seconds);
    let base = if expired {
        WindowCounter {
            api_count: 0,
            window_start: now,
        }
    } else {
        current
    };
    WindowCounter {
        api_count: base.api_count.saturating_add(amount),
        window_start: base.window_start,
    }
}

/// Window lengths in config and CLI: bare seconds or `30s`, `15m`, `1h`, `1d`.
/// Anything longer than [`MAX_WINDOW_SECONDS`] is refused.
pub fn parse_window(s: &str) -> Option<i64> {
    let s = s.trim();
    let (digits, unit) = match s.char_indices().last()? {
        (i, 's') => (&s[..i], 1),
        (i, 'm') => (&s[..i], 60),
        (i, 'h') => (&s[..i], 3600),
        (i, 'd') => (&s[..i], 86_400),
        _ => (s, 1),
    };
    let value: i64 = digits.trim().parse().ok()?;
    if value <= 0 {
        return None;
    }
    value
        .checked_mul(unit)
        .filter(|secs| *secs <= MAX_WINDOW_SECONDS)
}
