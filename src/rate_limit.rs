//! In-memory rate limiting for the auth endpoints.
//!
//! Fixed-window counters keyed by client IP, or by IP plus the email carried
//! in the request body for the credential-issuance endpoints. Counters are
//! process-local; a multi-instance deployment enforces quotas independently
//! per instance unless the same key -> allow/deny contract is backed by a
//! shared store.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::error::ApiError;

/// Largest request body the email-keyed middleware will buffer.
const BODY_LIMIT: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateKey {
    Ip(IpAddr),
    IpEmail(IpAddr, String),
}

#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub window: Duration,
    pub max: u32,
    pub message: &'static str,
}

#[derive(Debug)]
struct Window {
    count: u32,
    window_start: Instant,
}

/// Fixed-window counter store for one endpoint policy.
#[derive(Debug)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    /// Loopback clients bypass the limiter in non-production deployments.
    skip_loopback: bool,
    entries: Mutex<HashMap<RateKey, Window>>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy, skip_loopback: bool) -> Self {
        Self {
            policy,
            skip_loopback,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn message(&self) -> &'static str {
        self.policy.message
    }

    /// Retry hint in whole minutes, rounded up.
    pub fn retry_after_minutes(&self) -> u64 {
        self.policy.window.as_secs().div_ceil(60)
    }

    fn bypass(&self, ip: IpAddr) -> bool {
        self.skip_loopback && ip.is_loopback()
    }

    /// Admission check without counting. Elapsed windows reset here.
    pub fn allow(&self, key: &RateKey) -> bool {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(key) {
            Some(window) => {
                if window.window_start.elapsed() > self.policy.window {
                    window.count = 0;
                    window.window_start = Instant::now();
                }
                window.count < self.policy.max
            }
            None => true,
        }
    }

    /// Count one attempt against the key.
    pub fn record(&self, key: RateKey) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let window = entries.entry(key).or_insert_with(|| Window {
            count: 0,
            window_start: Instant::now(),
        });
        if window.window_start.elapsed() > self.policy.window {
            window.count = 0;
            window.window_start = Instant::now();
        }
        window.count += 1;
    }

    /// Admission check that also counts the attempt; used by IP-keyed
    /// policies where every request draws from the quota.
    pub fn allow_and_record(&self, key: RateKey) -> bool {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let window = entries.entry(key).or_insert_with(|| Window {
            count: 0,
            window_start: Instant::now(),
        });
        if window.window_start.elapsed() > self.policy.window {
            window.count = 0;
            window.window_start = Instant::now();
        }
        if window.count >= self.policy.max {
            return false;
        }
        window.count += 1;
        true
    }
}

/// The per-endpoint-class limiters, selected once at startup.
pub struct RateLimiters {
    pub auth: Arc<RateLimiter>,
    pub login: Arc<RateLimiter>,
    pub signup: Arc<RateLimiter>,
    pub otp: Arc<RateLimiter>,
    pub magic: Arc<RateLimiter>,
}

impl RateLimiters {
    pub fn for_environment(production: bool) -> Self {
        let skip_loopback = !production;
        let limiter = |window: Duration, max: u32, message: &'static str| {
            Arc::new(RateLimiter::new(
                RateLimitPolicy {
                    window,
                    max,
                    message,
                },
                skip_loopback,
            ))
        };

        let auth = limiter(
            Duration::from_secs(15 * 60),
            10,
            "Too many authentication requests. Please try again in 15 minutes.",
        );

        if production {
            Self {
                auth,
                login: limiter(
                    Duration::from_secs(2 * 60),
                    3,
                    "Too many login attempts. Please try again in 2 minutes.",
                ),
                signup: limiter(
                    Duration::from_secs(2 * 60 * 60),
                    2,
                    "Too many signup attempts. Please try again in 2 hours.",
                ),
                otp: limiter(
                    Duration::from_secs(60 * 60),
                    2,
                    "Too many OTP requests. Please try again in 1 hour.",
                ),
                magic: limiter(
                    Duration::from_secs(15 * 60),
                    2,
                    "Too many magic link requests. Please try again in 15 minutes.",
                ),
            }
        } else {
            Self {
                auth,
                login: limiter(
                    Duration::from_secs(60),
                    5,
                    "Too many login attempts. Please try again in 1 minute.",
                ),
                signup: limiter(
                    Duration::from_secs(60 * 60),
                    3,
                    "Too many signup attempts. Please try again in 1 hour.",
                ),
                otp: limiter(
                    Duration::from_secs(60 * 60),
                    3,
                    "Too many OTP requests. Please try again in 1 hour.",
                ),
                magic: limiter(
                    Duration::from_secs(10 * 60),
                    3,
                    "Too many magic link requests. Please try again in 10 minutes.",
                ),
            }
        }
    }
}

/// Client IP resolution order: X-Forwarded-For (first hop), X-Real-IP, then
/// the peer address. The deployment sits behind a trusted proxy.
fn header_ip(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
}

fn client_ip(req: &Request) -> Option<IpAddr> {
    header_ip(req.headers()).or_else(|| {
        req.extensions()
            .get::<ConnectInfo<std::net::SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    })
}

fn rejected(limiter: &RateLimiter) -> Response {
    ApiError::RateLimited {
        message: limiter.message().to_string(),
        retry_after_minutes: limiter.retry_after_minutes(),
    }
    .into_response()
}

/// Middleware for IP-keyed policies; every admitted request counts.
pub async fn ip_rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(ip) = client_ip(&req) else {
        warn!("cannot determine client ip, skipping rate limit");
        return next.run(req).await;
    };
    if limiter.bypass(ip) {
        return next.run(req).await;
    }
    if !limiter.allow_and_record(RateKey::Ip(ip)) {
        warn!(%ip, path = %req.uri().path(), "rate limit exceeded");
        return rejected(&limiter);
    }
    next.run(req).await
}

/// Middleware for IP+email-keyed policies. Only failed requests count toward
/// the quota, so the counter is recorded after the response status is known.
/// The body is buffered to read the email field and then replayed.
pub async fn email_rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(ip) = client_ip(&req) else {
        warn!("cannot determine client ip, skipping rate limit");
        return next.run(req).await;
    };
    if limiter.bypass(ip) {
        return next.run(req).await;
    }

    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return ApiError::Validation("Request body too large".into()).into_response();
        }
    };

    let email = serde_json::from_slice::<serde_json::Value>(&bytes)
        .ok()
        .and_then(|v| {
            v.get("email")
                .or_else(|| v.get("identifier"))
                .and_then(|e| e.as_str())
                .map(|e| e.trim().to_lowercase())
        });
    let key = match email {
        Some(email) => RateKey::IpEmail(ip, email),
        None => RateKey::Ip(ip),
    };

    if !limiter.allow(&key) {
        warn!(%ip, path = %parts.uri.path(), "rate limit exceeded");
        return rejected(&limiter);
    }

    let req = Request::from_parts(parts, Body::from(bytes));
    let response = next.run(req).await;
    if response.status().is_client_error() || response.status().is_server_error() {
        limiter.record(key);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip() -> IpAddr {
        "203.0.113.7".parse().unwrap()
    }

    fn limiter(window: Duration, max: u32) -> RateLimiter {
        RateLimiter::new(
            RateLimitPolicy {
                window,
                max,
                message: "slow down",
            },
            false,
        )
    }

    #[test]
    fn rejects_request_over_quota() {
        let limiter = limiter(Duration::from_secs(60), 5);
        for _ in 0..5 {
            assert!(limiter.allow_and_record(RateKey::Ip(ip())));
        }
        assert!(!limiter.allow_and_record(RateKey::Ip(ip())));
    }

    #[test]
    fn window_elapse_resets_counter() {
        let limiter = limiter(Duration::from_millis(20), 1);
        assert!(limiter.allow_and_record(RateKey::Ip(ip())));
        assert!(!limiter.allow_and_record(RateKey::Ip(ip())));
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.allow_and_record(RateKey::Ip(ip())));
    }

    #[test]
    fn distinct_keys_are_tracked_independently() {
        let limiter = limiter(Duration::from_secs(60), 1);
        let a = RateKey::IpEmail(ip(), "a@x.com".into());
        let b = RateKey::IpEmail(ip(), "b@x.com".into());
        assert!(limiter.allow_and_record(a.clone()));
        assert!(!limiter.allow_and_record(a));
        assert!(limiter.allow_and_record(b));
    }

    #[test]
    fn allow_does_not_consume_quota() {
        let limiter = limiter(Duration::from_secs(60), 1);
        let key = RateKey::Ip(ip());
        assert!(limiter.allow(&key));
        assert!(limiter.allow(&key));
        limiter.record(key.clone());
        assert!(!limiter.allow(&key));
    }

    #[test]
    fn retry_after_rounds_up_to_whole_minutes() {
        assert_eq!(limiter(Duration::from_secs(60), 1).retry_after_minutes(), 1);
        assert_eq!(limiter(Duration::from_secs(90), 1).retry_after_minutes(), 2);
        assert_eq!(
            limiter(Duration::from_secs(15 * 60), 1).retry_after_minutes(),
            15
        );
    }

    #[test]
    fn loopback_bypasses_outside_production() {
        let limiter = RateLimiter::new(
            RateLimitPolicy {
                window: Duration::from_secs(60),
                max: 1,
                message: "slow down",
            },
            true,
        );
        assert!(limiter.bypass("127.0.0.1".parse().unwrap()));
        assert!(limiter.bypass("::1".parse().unwrap()));
        assert!(!limiter.bypass(ip()));
    }

    #[test]
    fn production_policies_are_stricter() {
        let dev = RateLimiters::for_environment(false);
        let prod = RateLimiters::for_environment(true);
        assert!(prod.login.policy.max < dev.login.policy.max);
        assert!(prod.signup.policy.window > dev.signup.policy.window);
        assert_eq!(prod.auth.policy.max, dev.auth.policy.max);
    }

    #[test]
    fn forwarded_header_wins_over_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "198.51.100.4, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "192.0.2.9".parse().unwrap());
        assert_eq!(
            header_ip(&headers),
            Some("198.51.100.4".parse::<IpAddr>().unwrap())
        );
    }
}
