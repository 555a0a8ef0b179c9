//! Rate limit response headers.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::ratelimit::Decision;

/// Quota of the applied policy.
pub const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Admits left in the current window.
pub const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// ISO-8601 time at which the window resets.
pub const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Write the rate limit headers for `decision` into `headers`.
///
/// Denials also get `Retry-After` in whole seconds, at least 1.
pub fn apply(headers: &mut HeaderMap, decision: &Decision, now: u64) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
    if let Ok(reset) = HeaderValue::from_str(&decision.reset_at_iso()) {
        headers.insert(RESET_HEADER, reset);
    }

    if !decision.allowed {
        let millis = decision.retry_after(now).as_millis() as u64;
        let secs = millis.div_ceil(1000).max(1);
        headers.insert(RETRY_AFTER, HeaderValue::from(secs));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{Policy, RateLimiter};

    #[test]
    fn test_headers_for_admitted_request() {
        let limiter = RateLimiter::new();
        let decision = limiter.check_at("u1", &Policy::AUTH, 0);

        let mut headers = HeaderMap::new();
        apply(&mut headers, &decision, 0);

        assert_eq!(headers[LIMIT_HEADER], "5");
        assert_eq!(headers[REMAINING_HEADER], "4");
        assert_eq!(headers[RESET_HEADER], "1970-01-01T00:15:00.000Z");
        assert!(headers.get(RETRY_AFTER).is_none());
    }

    #[test]
    fn test_headers_for_denied_request() {
        let limiter = RateLimiter::new();
        let policy = Policy::new(2500, 1).unwrap();
        limiter.check_at("u1", &policy, 0);
        let decision = limiter.check_at("u1", &policy, 1000);

        let mut headers = HeaderMap::new();
        apply(&mut headers, &decision, 1000);

        assert_eq!(headers[REMAINING_HEADER], "0");
        assert_eq!(headers[RETRY_AFTER], "2");
    }

    #[test]
    fn test_retry_after_is_at_least_one_second() {
        let limiter = RateLimiter::new();
        let policy = Policy::new(1000, 1).unwrap();
        limiter.check_at("u1", &policy, 0);
        let decision = limiter.check_at("u1", &policy, 999);

        let mut headers = HeaderMap::new();
        apply(&mut headers, &decision, 999);

        assert_eq!(headers[RETRY_AFTER], "1");
    }
}
