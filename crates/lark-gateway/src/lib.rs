//! Request admission in front of the orchestrator. The core assumes
//! admitted requests only; everything about budgets and client identity
//! lives here.

pub mod miranda;
pub mod speech;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use lark_core::Orchestrator;
use lark_schema::InputEvent;
use tokio::sync::Mutex;

/// Which admission budget a request draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitScope {
    /// General traffic: 100 requests / 15 minutes per client.
    General,
    /// Model-backed endpoints: 10 requests / minute per client.
    Ai,
    /// Authentication attempts: 5 / hour per client.
    Auth,
}

#[derive(Debug, Clone, Copy)]
pub struct LimitRule {
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub general: LimitRule,
    pub ai: LimitRule,
    pub auth: LimitRule,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            general: LimitRule {
                max_requests: 100,
                window: Duration::from_secs(15 * 60),
            },
            ai: LimitRule {
                max_requests: 10,
                window: Duration::from_secs(60),
            },
            auth: LimitRule {
                max_requests: 5,
                window: Duration::from_secs(60 * 60),
            },
        }
    }
}

impl RateLimitConfig {
    fn rule(&self, scope: LimitScope) -> &LimitRule {
        match scope {
            LimitScope::General => &self.general,
            LimitScope::Ai => &self.ai,
            LimitScope::Auth => &self.auth,
        }
    }
}

struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64,
    last_refill: chrono::DateTime<chrono::Utc>,
}

impl TokenBucket {
    fn new(rule: &LimitRule) -> Self {
        let max = rule.max_requests as f64;
        Self {
            tokens: max,
            max_tokens: max,
            refill_rate: max / rule.window.as_secs_f64(),
            last_refill: chrono::Utc::now(),
        }
    }

    fn try_consume(&mut self) -> bool {
        let now = chrono::Utc::now();
        let elapsed = (now - self.last_refill).num_milliseconds() as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Token buckets keyed by (scope, client). Separate scopes never share a
/// bucket, so burning the AI budget leaves general traffic untouched.
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<(LimitScope, String), TokenBucket>>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    pub async fn check(&self, scope: LimitScope, client_ip: &str) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry((scope, client_ip.to_string()))
            .or_insert_with(|| TokenBucket::new(self.config.rule(scope)));
        bucket.try_consume()
    }
}

pub struct Gateway {
    orchestrator: Arc<Orchestrator>,
    rate_limiter: RateLimiter,
}

impl Gateway {
    pub fn new(orchestrator: Arc<Orchestrator>, rate_limiter: RateLimiter) -> Self {
        Self {
            orchestrator,
            rate_limiter,
        }
    }

    /// Admit one input event against the AI budget and hand it to the
    /// orchestrator. Rejected events never reach the core.
    pub async fn submit(&self, client_ip: &str, event: InputEvent) -> Result<()> {
        if !self.rate_limiter.check(LimitScope::Ai, client_ip).await {
            tracing::warn!(client_ip, "ai rate limit exceeded");
            anyhow::bail!("rate limited: too many requests");
        }
        self.orchestrator.receive_input(event).await;
        Ok(())
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }
}
