//! Cache Entry Module
//!
//! Defines a stored result together with its TTL metadata.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

// == Cache Entry ==
/// A stored result and the moment it was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// The stored value
    pub value: Value,
    /// When the entry was stored
    pub stored_at: DateTime<Utc>,
    /// How long the entry stays live after `stored_at`
    pub ttl: Duration,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry stored now.
    pub fn new(value: Value, ttl: Duration) -> Self {
        Self::stored_at(value, Utc::now(), ttl)
    }

    /// Creates an entry with an explicit store time.
    pub fn stored_at(value: Value, stored_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            value,
            stored_at,
            ttl,
        }
    }

    // == Expires At ==
    /// Returns `stored_at + ttl`, saturating at the last representable instant.
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.stored_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    // == Liveness ==
    /// An entry is live while `now < expires_at`.
    ///
    /// Once the TTL has fully elapsed the entry is expired, so a zero TTL
    /// produces an entry that is never observed as live.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }

    /// Checks the entry against the current time.
    pub fn is_expired(&self) -> bool {
        !self.is_live_at(Utc::now())
    }

    // == Time To Live ==
    /// Returns how long the entry stays live, zero once expired.
    pub fn ttl_remaining(&self) -> Duration {
        (self.expires_at() - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

// == Utility Functions ==
/// Current time as Unix microseconds, the resolution stored on disk.
pub fn current_timestamp_micros() -> i64 {
    Utc::now().timestamp_micros()
}

/// Converts stored Unix microseconds back into a timestamp.
pub fn from_timestamp_micros(micros: i64) -> DateTime<Utc> {
    Utc.timestamp_micros(micros)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Converts a TTL into microseconds, saturating at `i64::MAX`.
pub fn duration_to_micros(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_micros()).unwrap_or(i64::MAX)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread::sleep;

    #[test]
    fn test_entry_creation_with_ttl() {
        let entry = CacheEntry::new(json!("test_value"), Duration::from_secs(60));

        assert_eq!(entry.value, json!("test_value"));
        assert!(!entry.is_expired());
        assert_eq!(entry.expires_at(), entry.stored_at + chrono::Duration::seconds(60));
    }

    #[test]
    fn test_entry_expiration() {
        let entry = CacheEntry::new(json!(1), Duration::from_millis(50));

        assert!(!entry.is_expired());

        sleep(Duration::from_millis(100));

        assert!(entry.is_expired());
    }

    #[test]
    fn test_ttl_remaining() {
        let entry = CacheEntry::new(json!(1), Duration::from_secs(10));

        let remaining = entry.ttl_remaining();
        assert!(remaining <= Duration::from_secs(10));
        assert!(remaining >= Duration::from_secs(9));
    }

    #[test]
    fn test_ttl_remaining_expired() {
        let past = Utc::now() - chrono::Duration::seconds(5);
        let entry = CacheEntry::stored_at(json!(1), past, Duration::from_secs(1));

        assert!(entry.is_expired());
        assert_eq!(entry.ttl_remaining(), Duration::ZERO);
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let now = Utc::now();
        let entry = CacheEntry::stored_at(json!("test"), now, Duration::ZERO);

        // Live only while now < expires_at, so a zero TTL is expired at once
        assert!(!entry.is_live_at(now));
        assert!(entry.is_live_at(now - chrono::Duration::microseconds(1)));
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let entry = CacheEntry::new(json!(1), Duration::MAX);
        assert_eq!(entry.expires_at(), DateTime::<Utc>::MAX_UTC);
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_micros_round_trip() {
        let micros = current_timestamp_micros();
        assert_eq!(from_timestamp_micros(micros).timestamp_micros(), micros);
        assert_eq!(duration_to_micros(Duration::from_millis(50)), 50_000);
        assert_eq!(duration_to_micros(Duration::MAX), i64::MAX);
    }
}
