//! Per-user throttling hook for code delivery and code guessing.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use uuid::Uuid;

use crate::config::RateLimitConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    ResendVerification,
    VerifyUser,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    fn check(&self, user_id: Uuid, action: RateLimitAction) -> RateLimitDecision;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check(&self, _user_id: Uuid, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

/// Fixed-window counter keyed by (user, action).
pub struct WindowRateLimiter {
    window: Duration,
    resend_limit: u32,
    verify_limit: u32,
    hits: Mutex<HashMap<(Uuid, RateLimitAction), (Instant, u32)>>,
}

impl WindowRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            window: Duration::from_secs(config.window_seconds),
            resend_limit: config.resend_limit,
            verify_limit: config.verify_limit,
            hits: Mutex::new(HashMap::new()),
        }
    }

    fn limit_for(&self, action: RateLimitAction) -> u32 {
        match action {
            RateLimitAction::ResendVerification => self.resend_limit,
            RateLimitAction::VerifyUser => self.verify_limit,
        }
    }
}

impl RateLimiter for WindowRateLimiter {
    fn check(&self, user_id: Uuid, action: RateLimitAction) -> RateLimitDecision {
        let now = Instant::now();
        let limit = self.limit_for(action);
        let mut hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner);

        // Drop stale windows so the map does not grow without bound.
        hits.retain(|_, (started, _)| now.duration_since(*started) < self.window);

        let entry = hits.entry((user_id, action)).or_insert((now, 0));
        if entry.1 >= limit {
            return RateLimitDecision::Limited;
        }
        entry.1 += 1;
        RateLimitDecision::Allowed
    }
}
