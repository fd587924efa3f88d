//! Per-client rate limiting for analysis requests.
//!
//! Fixed windows keyed by client identity. State is process-local and lost
//! on restart, which is acceptable for an abuse deterrent.

mod identity;

pub use identity::client_identity;

use crate::config::RateLimitSettings;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct WindowState {
    count: u32,
    window_start: Instant,
}

impl WindowState {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    fn is_expired(&self, now: Instant, window: Duration) -> bool {
        now.duration_since(self.window_start) >= window
    }

    fn reset_if_expired(&mut self, now: Instant, window: Duration) {
        if self.is_expired(now, window) {
            self.count = 0;
            self.window_start = now;
        }
    }

    fn time_until_reset(&self, now: Instant, window: Duration) -> Duration {
        window.saturating_sub(now.duration_since(self.window_start))
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// Time until the window resets.
    pub retry_after: Duration,
    pub window: Duration,
}

impl RateLimitDecision {
    /// User-facing explanation of a rejection.
    pub fn message(&self) -> String {
        format!(
            "Rate limit exceeded. You can analyze {} songs per {}. Please try again in {}.",
            self.limit,
            describe_window(self.window),
            describe_wait(self.retry_after)
        )
    }

    /// Retry-After header value in whole seconds, never zero.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs.max(1)
        }
    }
}

fn describe_window(window: Duration) -> String {
    match window.as_secs() {
        86_400 => "day".to_string(),
        3_600 => "hour".to_string(),
        60 => "minute".to_string(),
        secs => format!("{} seconds", secs),
    }
}

fn describe_wait(wait: Duration) -> String {
    let secs = wait.as_secs().max(1);
    if secs >= 3_600 {
        let hours = secs.div_ceil(3_600);
        format!("{} hour{}", hours, if hours == 1 { "" } else { "s" })
    } else if secs >= 60 {
        let minutes = secs.div_ceil(60);
        format!("{} minute{}", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        format!("{} second{}", secs, if secs == 1 { "" } else { "s" })
    }
}

/// Admits at most `max_requests` per identity per window.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    sweep_interval: Duration,
    states: Mutex<HashMap<String, WindowState>>,
    last_sweep: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self {
            max_requests: settings.max_requests,
            window: Duration::from_secs(settings.window_secs),
            sweep_interval: Duration::from_secs(settings.sweep_interval_secs),
            states: Mutex::new(HashMap::new()),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Checks `identity` against its window and records the request if it is
    /// admitted.
    pub fn check(&self, identity: &str) -> RateLimitDecision {
        let now = Instant::now();
        self.maybe_sweep(now);

        let mut states = self.states();
        let state = states
            .entry(identity.to_string())
            .or_insert_with(|| WindowState::new(now));
        state.reset_if_expired(now, self.window);

        let retry_after = state.time_until_reset(now, self.window);
        if state.count >= self.max_requests {
            debug!(identity, "Rate limit exceeded");
            return self.decision(false, 0, retry_after);
        }

        state.count += 1;
        let remaining = self.max_requests - state.count;
        self.decision(true, remaining, retry_after)
    }

    /// Current counters for `identity` without recording anything.
    pub fn get_status(&self, identity: &str) -> RateLimitDecision {
        let now = Instant::now();
        let states = self.states();
        match states.get(identity) {
            Some(state) if !state.is_expired(now, self.window) => {
                let remaining = self.max_requests.saturating_sub(state.count);
                self.decision(
                    remaining > 0,
                    remaining,
                    state.time_until_reset(now, self.window),
                )
            }
            _ => self.decision(self.max_requests > 0, self.max_requests, self.window),
        }
    }

    /// Drops identities whose window has expired. Returns how many went.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut states = self.states();
        let before = states.len();
        states.retain(|_, state| !state.is_expired(now, self.window));
        before - states.len()
    }

    /// Number of identities currently tracked.
    pub fn tracked_identities(&self) -> usize {
        self.states().len()
    }

    fn maybe_sweep(&self, now: Instant) {
        let due = {
            let mut last_sweep = self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner);
            if now.duration_since(*last_sweep) >= self.sweep_interval {
                *last_sweep = now;
                true
            } else {
                false
            }
        };
        if due {
            let removed = self.sweep_expired();
            if removed > 0 {
                debug!(removed, "Swept expired rate limit windows");
            }
        }
    }

    fn decision(&self, allowed: bool, remaining: u32, until_reset: Duration) -> RateLimitDecision {
        let reset_at = Utc::now()
            + chrono::Duration::from_std(until_reset).unwrap_or_else(|_| chrono::Duration::zero());
        RateLimitDecision {
            allowed,
            limit: self.max_requests,
            remaining,
            reset_at,
            retry_after: until_reset,
            window: self.window,
        }
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, WindowState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
