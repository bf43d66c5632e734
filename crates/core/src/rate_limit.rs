use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

pub const RATE_LIMITED_TEXT: &str =
    "I'm receiving too many requests from you right now. Please try again in a moment.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Admits or rejects a request for a key, recording it when admitted.
pub trait RateLimiter: Send + Sync {
    fn acquire(&self, key: &str) -> RateDecision;
}

#[derive(Debug)]
struct UserWindow {
    requests: VecDeque<Instant>,
    burst_tokens: u32,
}

/// Sliding window per key plus a small burst allowance.
///
/// Up to `max_requests` are admitted per window. Past that, each request
/// spends a burst token. Tokens come back one per admitted request while the
/// window is less than half full. Keys whose window has emptied are evicted
/// and start over with a full burst.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_requests: u32,
    burst_size: u32,
    window: Duration,
    users: Mutex<HashMap<String, UserWindow>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: u32, burst_size: u32) -> Self {
        Self::with_window(max_requests, burst_size, RATE_LIMIT_WINDOW)
    }

    pub fn with_window(max_requests: u32, burst_size: u32, window: Duration) -> Self {
        Self { max_requests, burst_size, window, users: Mutex::new(HashMap::new()) }
    }

    pub fn tracked_keys(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, UserWindow>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire_at(&self, key: &str, now: Instant) -> RateDecision {
        let mut users = self.lock();
        let window = self.window;
        users.retain(|_, user| {
            while user.requests.front().is_some_and(|at| now.saturating_duration_since(*at) >= window) {
                user.requests.pop_front();
            }
            !user.requests.is_empty()
        });

        let user = users.entry(key.to_owned()).or_insert_with(|| UserWindow {
            requests: VecDeque::new(),
            burst_tokens: self.burst_size,
        });

        let in_window = u32::try_from(user.requests.len()).unwrap_or(u32::MAX);
        if in_window >= self.max_requests {
            if user.burst_tokens == 0 {
                let retry_after = user
                    .requests
                    .front()
                    .map(|oldest| (*oldest + window).saturating_duration_since(now))
                    .unwrap_or(window);
                return RateDecision::Limited { retry_after };
            }
            user.burst_tokens -= 1;
        }

        user.requests.push_back(now);
        if user.requests.len().saturating_mul(2) < self.max_requests as usize {
            user.burst_tokens = (user.burst_tokens + 1).min(self.burst_size);
        }
        RateDecision::Allowed
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn acquire(&self, key: &str) -> RateDecision {
        self.acquire_at(key, Instant::now())
    }
}
