//! Three sliding-window limiters sharing one scripted admit sequence:
//! `ZREMRANGEBYSCORE` stale members, `ZCARD` the current count, then
//! `ZADD` + `EXPIRE` atomically. Scripts are loaded once and cached by
//! `redis::Script`'s SHA.

pub mod classify;

use std::time::Duration;

use once_cell::sync::Lazy;
use redis::Script;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::kv::KvClient;

/// Keys: 1 (the sorted-set scope key). Argv: now_ns, window_ns, limit.
/// Returns `{admitted (0|1), count, reset_ns}`.
static SLIDING_WINDOW_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', key, 0, now - window)
local count = redis.call('ZCARD', key)
if count < limit then
    redis.call('ZADD', key, now, now)
    redis.call('EXPIRE', key, math.ceil(window / 1e9))
    return {1, count + 1, now + window}
end
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local reset = now + window
if oldest[2] ~= nil then
    reset = tonumber(oldest[2]) + window
end
return {0, count, reset}
"#,
    )
});

#[derive(Debug, Clone, Copy)]
pub struct Decision {
    pub admitted: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix-nanosecond timestamp when the window resets.
    pub reset_at_ns: i64,
}

impl Decision {
    pub fn retry_after_secs(&self) -> u64 {
        let now_ns = now_ns();
        ((self.reset_at_ns - now_ns).max(1_000_000_000) / 1_000_000_000) as u64
    }
}

fn now_ns() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
}

/// Shared sliding-window admit logic used by all three limiter types.
/// When KV is nil or unreachable, admits with the configured limit as
/// "remaining" and logs a warning at most once per window (best effort: we
/// simply log each occurrence, the caller may rate-limit the log itself).
pub struct SlidingWindowLimiter {
    kv: KvClient,
}

impl SlidingWindowLimiter {
    pub fn new(kv: KvClient) -> Self {
        Self { kv }
    }

    pub async fn admit(&self, ct: &CancellationToken, scope_key: &str, window: Duration, limit: u32) -> Decision {
        if !self.kv.is_present() {
            return Decision { admitted: true, limit, remaining: limit, reset_at_ns: now_ns() + window.as_nanos() as i64 };
        }
        let now = now_ns();
        let window_ns = window.as_nanos() as i64;
        let result: Result<Option<(i64, i64, i64)>, _> = self
            .kv
            .eval_script(ct, &SLIDING_WINDOW_SCRIPT, vec![scope_key.to_string()], vec![
                now.to_string(),
                window_ns.to_string(),
                limit.to_string(),
            ])
            .await;
        match result {
            Ok(Some((admitted, count, reset))) => Decision {
                admitted: admitted == 1,
                limit,
                remaining: limit.saturating_sub(count.max(0) as u32),
                reset_at_ns: reset,
            },
            Ok(None) => Decision { admitted: true, limit, remaining: limit, reset_at_ns: now + window_ns },
            Err(e) => {
                warn!(error = %e, scope = scope_key, "rate limit script failed; failing open");
                Decision { admitted: true, limit, remaining: limit, reset_at_ns: now + window_ns }
            },
        }
    }
}

pub struct ApiRateLimiterConfig {
    pub per_min: u32,
    pub per_hour: Option<u32>,
}

pub struct ApiRateLimiter {
    limiter: SlidingWindowLimiter,
}

impl ApiRateLimiter {
    pub fn new(kv: KvClient) -> Self {
        Self { limiter: SlidingWindowLimiter::new(kv) }
    }

    pub async fn check(&self, ct: &CancellationToken, user_id: &str, cfg: &ApiRateLimiterConfig) -> Decision {
        let minute_key = crate::kv::KeyBuilder::rate_api_user(user_id, "min");
        let minute = self.limiter.admit(ct, &minute_key, Duration::from_secs(60), cfg.per_min).await;
        if !minute.admitted {
            return minute;
        }
        if let Some(per_hour) = cfg.per_hour {
            let hour_key = crate::kv::KeyBuilder::rate_api_user(user_id, "hour");
            let hour = self.limiter.admit(ct, &hour_key, Duration::from_secs(3600), per_hour).await;
            if !hour.admitted {
                return hour;
            }
        }
        minute
    }
}

pub struct IpRateLimiter {
    limiter: SlidingWindowLimiter,
    per_min: u32,
}

impl IpRateLimiter {
    pub fn new(kv: KvClient, per_min: u32) -> Self {
        Self { limiter: SlidingWindowLimiter::new(kv), per_min }
    }

    pub async fn check(&self, ct: &CancellationToken, ip: &str) -> Decision {
        let key = crate::kv::KeyBuilder::rate_ip(ip, "60s");
        self.limiter.admit(ct, &key, Duration::from_secs(60), self.per_min).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFlowScope {
    Session,
    Ip,
    User,
}

#[derive(Debug, Clone, Copy)]
pub struct AuthFlowLimits {
    pub session_per_10min: u32,
    pub ip_per_hour: u32,
    pub user_per_hour: u32,
}

pub struct AuthFlowCheckInput<'a> {
    pub session: Option<&'a str>,
    pub ip: Option<&'a str>,
    pub login_hint: Option<&'a str>,
}

#[derive(Debug, Clone, Copy)]
pub struct AuthFlowDecision {
    pub admitted: bool,
    pub blocked_by: Option<AuthFlowScope>,
    pub decision: Decision,
}

pub struct AuthFlowRateLimiter {
    limiter: SlidingWindowLimiter,
    limits: AuthFlowLimits,
}

impl AuthFlowRateLimiter {
    pub fn new(kv: KvClient, limits: AuthFlowLimits) -> Self {
        Self { limiter: SlidingWindowLimiter::new(kv), limits }
    }

    /// Checks session, then IP, then user scope; first to block wins.
    /// Missing scope identifiers skip that scope.
    pub async fn check(&self, ct: &CancellationToken, input: AuthFlowCheckInput<'_>) -> AuthFlowDecision {
        if let Some(session) = input.session {
            let key = crate::kv::KeyBuilder::rate_auth("session", session);
            let d = self.limiter.admit(ct, &key, Duration::from_secs(600), self.limits.session_per_10min).await;
            if !d.admitted {
                return AuthFlowDecision { admitted: false, blocked_by: Some(AuthFlowScope::Session), decision: d };
            }
        }
        if let Some(ip) = input.ip {
            let key = crate::kv::KeyBuilder::rate_auth("ip", ip);
            let d = self.limiter.admit(ct, &key, Duration::from_secs(3600), self.limits.ip_per_hour).await;
            if !d.admitted {
                return AuthFlowDecision { admitted: false, blocked_by: Some(AuthFlowScope::Ip), decision: d };
            }
        }
        if let Some(hint) = input.login_hint {
            let lowered = hint.to_lowercase();
            let key = crate::kv::KeyBuilder::rate_auth("user", &lowered);
            let d = self.limiter.admit(ct, &key, Duration::from_secs(3600), self.limits.user_per_hour).await;
            if !d.admitted {
                return AuthFlowDecision { admitted: false, blocked_by: Some(AuthFlowScope::User), decision: d };
            }
        }
        AuthFlowDecision {
            admitted: true,
            blocked_by: None,
            decision: Decision { admitted: true, limit: 0, remaining: 0, reset_at_ns: now_ns() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_kv_always_admits() {
        let limiter = ApiRateLimiter::new(KvClient::absent());
        let ct = CancellationToken::new();
        let cfg = ApiRateLimiterConfig { per_min: 1, per_hour: None };
        for _ in 0..5 {
            let d = limiter.check(&ct, "user-1", &cfg).await;
            assert!(d.admitted);
        }
    }

    #[tokio::test]
    async fn auth_flow_skips_missing_scopes() {
        let limiter = AuthFlowRateLimiter::new(
            KvClient::absent(),
            AuthFlowLimits { session_per_10min: 5, ip_per_hour: 100, user_per_hour: 10 },
        );
        let ct = CancellationToken::new();
        let decision = limiter.check(&ct, AuthFlowCheckInput { session: None, ip: None, login_hint: None }).await;
        assert!(decision.admitted);
        assert_eq!(decision.blocked_by, None);
    }
}
