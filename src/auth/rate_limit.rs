//! Per-IP-hash rate limiting on anonymous session creation: a one-hour
//! sliding-window counter with a configured ceiling. `spec.md` §4.7 —
//! soft-fail (warn, proceed) on storage errors so transient faults never
//! lock users out; hard-fail once the ceiling is hit.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use mockable::Clock;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

struct Window {
    count: u32,
    window_started_at: DateTime<Utc>,
}

/// In-memory limiter. A real storage-backed adapter would return `Err` on
/// connectivity failure instead of this type's infallible counting; the
/// soft-fail policy lives in the caller, which never sees a storage error
/// from this implementation.
pub struct RateLimiter {
    ceiling_per_hour: u32,
    windows: DashMap<String, Window>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(ceiling_per_hour: u32, clock: Arc<dyn Clock>) -> Self {
        Self { ceiling_per_hour, windows: DashMap::new(), clock }
    }

    #[must_use]
    pub fn hash_ip(client_ip: &str) -> String {
        let digest = Sha256::digest(client_ip.as_bytes());
        hex::encode(digest)
    }

    /// Returns `Ok(())` if the request may proceed, `Err(ResourceLimit)` once
    /// the ceiling for this IP's current window is reached.
    pub fn check_and_increment(&self, client_ip: &str) -> Result<()> {
        if self.ceiling_per_hour == 0 {
            return Ok(());
        }
        let key = Self::hash_ip(client_ip);
        let now = self.clock.utc();
        let mut entry = self.windows.entry(key).or_insert_with(|| Window { count: 0, window_started_at: now });

        if now - entry.window_started_at >= Duration::hours(1) {
            entry.count = 0;
            entry.window_started_at = now;
        }

        if entry.count >= self.ceiling_per_hour {
            return Err(Error::resource_limit("anonymous session rate limit exceeded"));
        }
        entry.count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockable::DefaultClock;

    #[test]
    fn allows_up_to_ceiling_then_rejects() {
        let limiter = RateLimiter::new(2, Arc::new(DefaultClock));
        assert!(limiter.check_and_increment("1.2.3.4").is_ok());
        assert!(limiter.check_and_increment("1.2.3.4").is_ok());
        assert!(limiter.check_and_increment("1.2.3.4").is_err());
    }

    #[test]
    fn different_ips_have_independent_windows() {
        let limiter = RateLimiter::new(1, Arc::new(DefaultClock));
        assert!(limiter.check_and_increment("1.1.1.1").is_ok());
        assert!(limiter.check_and_increment("2.2.2.2").is_ok());
    }

    #[test]
    fn zero_ceiling_disables_the_limit() {
        let limiter = RateLimiter::new(0, Arc::new(DefaultClock));
        for _ in 0..10 {
            assert!(limiter.check_and_increment("9.9.9.9").is_ok());
        }
    }

    #[test]
    fn hash_ip_is_deterministic_and_not_plaintext() {
        let hashed = RateLimiter::hash_ip("203.0.113.7");
        assert_eq!(hashed, RateLimiter::hash_ip("203.0.113.7"));
        assert!(!hashed.contains("203.0.113.7"));
    }
}
