//! Core rate limiter implementation.
//!
//! The limiter uses a fixed-window counter: each identifier gets a window
//! of `window_ms` starting at its first request, and at most
//! `max_requests` admits inside it. A client can therefore get up to
//! twice the quota across a window boundary; this is a known limitation
//! of the algorithm.

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::policy::Policy;
use super::sweeper::Sweeper;
use super::window::{now_millis, WindowEntry, WindowStore};
use crate::error::{Result, TallyError};

/// Outcome of a single rate limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Quota of the policy that was applied
    pub limit: u32,
    /// Admits left in the current window
    pub remaining: u32,
    /// Epoch milliseconds at which the window resets
    pub reset_at: u64,
    /// Why the request was denied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Decision {
    fn admitted(policy: &Policy, entry: &WindowEntry) -> Self {
        Self {
            allowed: true,
            limit: policy.max_requests(),
            remaining: policy.max_requests().saturating_sub(entry.count),
            reset_at: entry.reset_at,
            reason: None,
        }
    }

    fn denied(policy: &Policy, entry: &WindowEntry) -> Self {
        let reason = format!(
            "rate limit exceeded, retry after {}",
            format_iso(entry.reset_at)
        );
        Self {
            allowed: false,
            limit: policy.max_requests(),
            remaining: 0,
            reset_at: entry.reset_at,
            reason: Some(reason),
        }
    }

    /// The reset time as an ISO-8601 UTC timestamp with milliseconds.
    pub fn reset_at_iso(&self) -> String {
        format_iso(self.reset_at)
    }

    /// Time from `now` until the window resets, zero if already past.
    pub fn retry_after(&self, now: u64) -> Duration {
        Duration::from_millis(self.reset_at.saturating_sub(now))
    }
}

fn format_iso(millis: u64) -> String {
    let millis = i64::try_from(millis).unwrap_or(i64::MAX);
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The fixed-window rate limiter.
///
/// This struct is thread-safe and can be shared across tasks. Each
/// instance owns its own window store, so separate instances never
/// observe each other's state.
pub struct RateLimiter {
    /// Current windows indexed by identifier
    store: Arc<WindowStore>,
    /// Background sweep task, if one was started
    sweeper: Mutex<Option<Sweeper>>,
}

impl RateLimiter {
    /// Create a rate limiter without a background sweeper.
    ///
    /// Expired windows are still treated as absent by [`check`](Self::check);
    /// they are only reclaimed when replaced or on [`sweep_at`](Self::sweep_at).
    pub fn new() -> Self {
        Self {
            store: Arc::new(WindowStore::new()),
            sweeper: Mutex::new(None),
        }
    }

    /// Create a rate limiter that sweeps expired windows every `sweep_interval`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(sweep_interval: Duration) -> Result<Self> {
        if sweep_interval.is_zero() {
            return Err(TallyError::Config(
                "sweep interval must be greater than 0".to_string(),
            ));
        }

        let store = Arc::new(WindowStore::new());
        let sweeper = Sweeper::spawn(Arc::clone(&store), sweep_interval);
        Ok(Self {
            store,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// Check `identifier` against `policy` at the current time.
    pub fn check(&self, identifier: &str, policy: &Policy) -> Decision {
        self.check_at(identifier, policy, now_millis())
    }

    /// Check `identifier` against `policy` at `now` (epoch milliseconds).
    ///
    /// Admitted requests are counted; a denied request leaves the window
    /// untouched.
    pub fn check_at(&self, identifier: &str, policy: &Policy, now: u64) -> Decision {
        trace!(
            identifier = %identifier,
            limit = policy.max_requests(),
            window_ms = policy.window_ms(),
            now = now,
            "Checking rate limit"
        );

        let decision = self.store.with_entry(identifier, |slot| {
            if let Some(entry) = slot.as_mut().filter(|entry| entry.is_live(now)) {
                if entry.count >= policy.max_requests() {
                    return Decision::denied(policy, entry);
                }
                entry.count += 1;
                return Decision::admitted(policy, entry);
            }

            // Absent or lapsed: start a fresh window.
            let entry = WindowEntry::open(policy, now);
            *slot = Some(entry);
            debug!(
                identifier = %identifier,
                reset_at = entry.reset_at,
                "Opening new rate limit window"
            );
            Decision::admitted(policy, &entry)
        });

        if !decision.allowed {
            debug!(
                identifier = %identifier,
                limit = decision.limit,
                reset_at = decision.reset_at,
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Snapshot of the current window for `identifier`.
    pub fn window(&self, identifier: &str) -> Option<WindowEntry> {
        self.store.get(identifier)
    }

    /// Remove every window that expired before `now`.
    pub fn sweep_at(&self, now: u64) -> usize {
        self.store.sweep(now)
    }

    /// Clear all windows.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Get the number of tracked windows.
    pub fn tracked(&self) -> usize {
        self.store.len()
    }

    /// Whether a background sweeper is running.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|sweeper| !sweeper.is_finished())
    }

    /// Stop the background sweeper, if any, and wait for it to finish.
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
