//! Webhook delivery dedupe: providers retry deliveries, so the same event
//! may arrive more than once. Each delivery is keyed by an id extracted
//! from its payload and suppressed when seen again within the TTL.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use timeflux_core::context::scalar_to_string;

/// Payload fields tried for a delivery id, in order.
const KEY_FIELDS: [&str; 4] = ["payloadId", "eventId", "id", "timeEntryId"];

/// Entry count above which a write first prunes expired entries.
const PRUNE_THRESHOLD: usize = 10_000;

/// Remembers recently seen deliveries per `(workspace, event, key)`.
pub struct DedupeCache {
    ttl: Duration,
    seen: DashMap<(String, String, String), Instant>,
}

impl DedupeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: DashMap::new(),
        }
    }

    /// Records the delivery and reports whether it was already seen within
    /// the TTL. An expired entry counts as new and is re-armed.
    pub fn check_and_record(&self, workspace_id: &str, event_type: &str, key: &str) -> bool {
        if self.seen.len() > PRUNE_THRESHOLD {
            self.prune();
        }

        let now = Instant::now();
        let mut duplicate = false;
        self.seen
            .entry((
                workspace_id.to_string(),
                event_type.to_string(),
                key.to_string(),
            ))
            .and_modify(|seen_at| {
                if now.duration_since(*seen_at) < self.ttl {
                    duplicate = true;
                } else {
                    *seen_at = now;
                }
            })
            .or_insert(now);
        duplicate
    }

    /// Drops one recorded delivery. A failed invocation must stay
    /// retryable, so its key is forgotten.
    pub fn forget(&self, workspace_id: &str, event_type: &str, key: &str) {
        self.seen.remove(&(
            workspace_id.to_string(),
            event_type.to_string(),
            key.to_string(),
        ));
    }

    fn prune(&self) {
        let ttl = self.ttl;
        // After pruning, the map may still exceed the threshold; new
        // entries are never refused.
        self.seen.retain(|_, seen_at| seen_at.elapsed() < ttl);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl std::fmt::Debug for DedupeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupeCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.seen.len())
            .finish()
    }
}

/// Extracts the delivery id from a webhook payload.
///
/// The first non-blank of `payloadId`, `eventId`, `id`, `timeEntryId` or
/// `timeEntry.id` wins; payloads without any of them fall back to a
/// SHA-256 of the serialized payload, so retried identical bodies still
/// collapse.
pub fn dedupe_key(payload: &Value) -> String {
    for field in KEY_FIELDS {
        if let Some(value) = payload.get(field)
            && let Some(s) = scalar_to_string(value)
            && !s.trim().is_empty()
        {
            return s;
        }
    }
    if let Some(value) = payload.pointer("/timeEntry/id")
        && let Some(s) = scalar_to_string(value)
        && !s.trim().is_empty()
    {
        return s;
    }
    let serialized = serde_json::to_string(payload).unwrap_or_default();
    let digest = Sha256::digest(serialized.as_bytes());
    format!("{digest:x}")
}
