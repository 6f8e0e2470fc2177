//! Per-client request rate limiting.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use voice_relay_core::config::RateLimitConfig;

use crate::error::ApiError;
use crate::state::AppState;

/// Sliding-window limiter keyed by client IP.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    requests: Arc<Mutex<HashMap<IpAddr, Vec<Instant>>>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, Duration::from_secs(config.window_secs))
    }

    /// Record a request from `ip`. Returns false if it exceeds the window budget.
    pub fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut map = self.lock();
        let timestamps = map.entry(ip).or_default();
        timestamps.retain(|t| now.duration_since(*t) < self.window);

        if timestamps.len() >= self.max_requests as usize {
            warn!(%ip, count = timestamps.len(), limit = self.max_requests,
                "Rate limited: too many requests from IP");
            return false;
        }

        timestamps.push(now);
        true
    }

    /// Drop clients with no requests inside the window.
    pub fn purge(&self) -> usize {
        let now = Instant::now();
        let mut map = self.lock();
        map.retain(|_, timestamps| {
            timestamps.retain(|t| now.duration_since(*t) < self.window);
            !timestamps.is_empty()
        });
        map.len()
    }

    /// Purge stale entries once per window until the limiter is dropped.
    pub fn spawn_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter = Arc::downgrade(self);
        let window = self.window;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(window).await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                let entries = limiter.purge();
                debug!(entries, "Rate limiter cleanup");
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<IpAddr, Vec<Instant>>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Middleware rejecting clients over their budget with 429.
///
/// Requests without a known peer address (in-process callers) pass through.
pub async fn limit_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(limiter) = &state.rate_limiter {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip());
        if let Some(ip) = peer {
            if !limiter.check(ip) {
                return ApiError::too_many_requests().into_response();
            }
        }
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_rate_limiter_allows() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));

        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
    }

    #[tokio::test]
    async fn test_rate_limiter_blocks() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(!limiter.check(ip));
    }

    #[tokio::test]
    async fn test_rate_limiter_different_ips() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let ip1 = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let ip2 = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

        assert!(limiter.check(ip1));
        assert!(limiter.check(ip2));
        assert!(!limiter.check(ip1));
        assert!(!limiter.check(ip2));
    }

    #[test]
    fn test_window_expiry() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3));

        assert!(limiter.check(ip));
        assert!(!limiter.check(ip));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(limiter.purge(), 0);
        assert!(limiter.check(ip));
    }
}
