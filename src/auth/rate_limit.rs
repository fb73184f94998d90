use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::AppState;

/// Fixed-window counter per key, held in process memory.
#[derive(Clone)]
pub struct RateLimitState {
    windows: Arc<Mutex<HashMap<String, Window>>>,
    max_requests: u32,
    window: Duration,
}

struct Window {
    count: u32,
    started: Instant,
}

impl RateLimitState {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    /// `Ok(remaining)` or `Err(retry_after)`.
    pub async fn check(&self, key: &str) -> Result<u32, Duration> {
        self.check_at(key, Instant::now()).await
    }

    async fn check_at(&self, key: &str, now: Instant) -> Result<u32, Duration> {
        let mut windows = self.windows.lock().await;
        let entry = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });

        if now.duration_since(entry.started) > self.window {
            entry.count = 0;
            entry.started = now;
        }

        if entry.count >= self.max_requests {
            return Err(self.window.saturating_sub(now.duration_since(entry.started)));
        }

        entry.count += 1;
        Ok(self.max_requests - entry.count)
    }

    /// Drops windows that can no longer limit anything.
    pub async fn prune(&self) {
        let now = Instant::now();
        let window = self.window;
        self.windows
            .lock()
            .await
            .retain(|_, w| now.duration_since(w.started) <= window);
    }
}

pub fn spawn_rate_limit_pruner(limiter: RateLimitState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(limiter.window.max(Duration::from_secs(60)));
        loop {
            interval.tick().await;
            limiter.prune().await;
        }
    });
}

/// Per client IP and path, so login and register are limited separately.
pub async fn rate_limit_auth(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ip = addr.ip().to_string();
    let path = req.uri().path().to_string();
    let key = format!("{}:{}", ip, path);

    match state.rate_limiter.check(&key).await {
        Ok(remaining) => {
            tracing::debug!(ip = %ip, path = %path, remaining, "Rate limit check passed");
            Ok(next.run(req).await)
        }
        Err(retry_after) => {
            tracing::warn!(
                ip = %ip,
                path = %path,
                retry_after_secs = retry_after.as_secs(),
                "Rate limit exceeded"
            );
            Err(AppError::RateLimited)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allows_up_to_limit_then_blocks() {
        let limiter = RateLimitState::new(3, 60);
        for expected_remaining in [2, 1, 0] {
            assert_eq!(limiter.check("1.2.3.4:/login").await, Ok(expected_remaining));
        }
        assert!(limiter.check("1.2.3.4:/login").await.is_err());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = RateLimitState::new(1, 60);
        assert!(limiter.check("a").await.is_ok());
        assert!(limiter.check("a").await.is_err());
        assert!(limiter.check("b").await.is_ok());
    }

    #[tokio::test]
    async fn test_window_expiry_resets_count() {
        let limiter = RateLimitState::new(1, 10);
        let start = Instant::now();
        assert!(limiter.check_at("k", start).await.is_ok());
        assert!(limiter.check_at("k", start + Duration::from_secs(5)).await.is_err());
        assert!(limiter.check_at("k", start + Duration::from_secs(11)).await.is_ok());
    }

    #[tokio::test]
    async fn test_prune_keeps_live_windows() {
        let limiter = RateLimitState::new(1, 60);
        limiter.check("k").await.unwrap();
        limiter.prune().await;
        assert!(limiter.check("k").await.is_err());
    }
}
