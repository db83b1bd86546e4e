//! Identifier generation for outgoing requests and change subscriptions.
//!
//! Correlation IDs are UUID v7 (time-ordered) so log lines for one request
//! sort naturally. Subscription IDs come from a per-registry counter.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Token linking an outgoing request to its eventual response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a new correlation ID (UUID v7)
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse from string
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Creation time encoded in the ID, in milliseconds since the Unix epoch.
    ///
    /// `None` for IDs that were not generated as UUID v7 (e.g. parsed from a
    /// peer that uses random UUIDs).
    pub fn timestamp_ms(&self) -> Option<u64> {
        let (secs, nanos) = self.0.get_timestamp()?.to_unix();
        Some(secs * 1_000 + u64::from(nanos) / 1_000_000)
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identifier of one change subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Monotonic generator for subscription IDs (`sub-1`, `sub-2`, ...).
#[derive(Debug)]
pub struct SubscriptionIdGenerator {
    next: AtomicU64,
}

impl SubscriptionIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next ID. Never repeats within the generator's lifetime.
    pub fn next_id(&self) -> SubscriptionId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        SubscriptionId(format!("sub-{n}"))
    }
}

impl Default for SubscriptionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_new_correlation_id() {
        let id1 = CorrelationId::new();
        let id2 = CorrelationId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_correlation_id_serialization() {
        let id = CorrelationId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }

    #[test]
    fn test_parse_correlation_id() {
        let id = CorrelationId::new();
        let parsed = CorrelationId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(CorrelationId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_timestamp_extraction() {
        let id = CorrelationId::new();
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        let ts = id.timestamp_ms().unwrap() as i64;
        assert!((ts - now_ms).abs() < 1000);
    }

    #[test]
    fn test_random_uuid_has_no_timestamp() {
        let id = CorrelationId::from(Uuid::from_u128(0x1234_5678_9abc_4def_8123_456789abcdef));
        assert!(id.timestamp_ms().is_none());
    }

    #[test]
    fn test_subscription_ids_are_sequential() {
        let ids = SubscriptionIdGenerator::new();
        assert_eq!(ids.next_id().as_str(), "sub-1");
        assert_eq!(ids.next_id().as_str(), "sub-2");
    }

    proptest! {
        #[test]
        fn prop_subscription_ids_never_repeat(count in 1usize..500) {
            let ids = SubscriptionIdGenerator::new();
            let seen: HashSet<_> = (0..count).map(|_| ids.next_id()).collect();
            prop_assert_eq!(seen.len(), count);
        }

        #[test]
        fn prop_correlation_ids_never_repeat(count in 1usize..500) {
            let seen: HashSet<_> = (0..count).map(|_| CorrelationId::new()).collect();
            prop_assert_eq!(seen.len(), count);
        }
    }
}
