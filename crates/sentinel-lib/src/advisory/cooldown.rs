//! Confidence-weighted cooldowns
//!
//! One store is shared by the advisory gate and the action policy. A
//! subject (`advice:...`, `action:...`) may fire again only after its
//! cooldown has elapsed; the cooldown grows as confidence drops.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default maximum number of tracked subjects before eviction runs
const DEFAULT_CAPACITY: usize = 10_000;

/// Default retention for idle entries (1 hour)
const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Confidence below this is treated as this value
const MIN_CONFIDENCE: f64 = 0.1;

/// Cooldown bookkeeping for one subject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownEntry {
    pub last_executed_at: Instant,
    pub cooldown: Duration,
}

/// Outcome of a cooldown check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownDecision {
    /// Allowed; the subject is now cooling down for `cooldown`
    Allowed { cooldown: Duration },
    /// Still cooling down
    Blocked { remaining: Duration },
}

impl CooldownDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, CooldownDecision::Allowed { .. })
    }
}

/// `round(base / max(confidence, 0.1))`
pub fn adaptive_cooldown(base: Duration, confidence: f64) -> Duration {
    let confidence = confidence.max(MIN_CONFIDENCE);
    let millis = (base.as_millis() as f64 / confidence).round();
    Duration::from_millis(millis as u64)
}

struct Inner {
    entries: HashMap<String, CooldownEntry>,
    /// Largest base cooldown requested so far
    max_base: Duration,
}

/// Serialized store of per-subject cooldowns
pub struct CooldownStore {
    inner: Mutex<Inner>,
    capacity: usize,
    retention: Duration,
}

impl Default for CooldownStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CooldownStore {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CAPACITY, DEFAULT_RETENTION)
    }

    /// Create a store with a custom capacity and idle retention
    pub fn with_limits(capacity: usize, retention: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                max_base: Duration::ZERO,
            }),
            capacity: capacity.max(1),
            retention,
        }
    }

    /// Check and, if allowed, record the subject in one step
    pub fn is_allowed(&self, key: &str, confidence: f64, base: Duration) -> CooldownDecision {
        self.is_allowed_at(key, confidence, base, Instant::now())
    }

    pub fn is_allowed_at(
        &self,
        key: &str,
        confidence: f64,
        base: Duration,
        now: Instant,
    ) -> CooldownDecision {
        let cooldown = adaptive_cooldown(base, confidence);
        let mut inner = self.inner.lock();
        inner.max_base = inner.max_base.max(base);

        if let Some(entry) = inner.entries.get(key) {
            let elapsed = now.saturating_duration_since(entry.last_executed_at);
            if elapsed < entry.cooldown {
                let remaining = entry.cooldown - elapsed;
                debug!(
                    key = %key,
                    elapsed_ms = elapsed.as_millis() as u64,
                    remaining_ms = remaining.as_millis() as u64,
                    confidence,
                    "Blocked by confidence-weighted cooldown"
                );
                return CooldownDecision::Blocked { remaining };
            }
        }

        self.insert(&mut inner, key, now, cooldown);
        CooldownDecision::Allowed { cooldown }
    }

    /// Record a subject unconditionally
    pub fn record(&self, key: &str, confidence: f64, base: Duration) {
        let now = Instant::now();
        let cooldown = adaptive_cooldown(base, confidence);
        let mut inner = self.inner.lock();
        inner.max_base = inner.max_base.max(base);
        self.insert(&mut inner, key, now, cooldown);
    }

    /// Time left before the subject may fire again
    pub fn remaining(&self, key: &str) -> Option<Duration> {
        let inner = self.inner.lock();
        let entry = inner.entries.get(key)?;
        entry
            .cooldown
            .checked_sub(entry.last_executed_at.elapsed())
            .filter(|d| !d.is_zero())
    }

    pub fn entry(&self, key: &str) -> Option<CooldownEntry> {
        self.inner.lock().entries.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    fn insert(&self, inner: &mut Inner, key: &str, now: Instant, cooldown: Duration) {
        inner.entries.insert(
            key.to_string(),
            CooldownEntry {
                last_executed_at: now,
                cooldown,
            },
        );

        if inner.entries.len() > self.capacity {
            let retention = self.retention.max(inner.max_base * 10);
            let before = inner.entries.len();
            inner.entries.retain(|_, entry| {
                now.saturating_duration_since(entry.last_executed_at)
                    < retention.max(entry.cooldown)
            });
            debug!(
                evicted = before - inner.entries.len(),
                remaining = inner.entries.len(),
                "Evicted idle cooldown entries"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(60);

    #[test]
    fn test_adaptive_cooldown() {
        assert_eq!(adaptive_cooldown(BASE, 1.0), Duration::from_secs(60));
        assert_eq!(adaptive_cooldown(BASE, 0.5), Duration::from_secs(120));
        // Floor at 0.1
        assert_eq!(adaptive_cooldown(BASE, 0.0), Duration::from_secs(600));
        assert_eq!(adaptive_cooldown(BASE, -3.0), Duration::from_secs(600));
        assert_eq!(adaptive_cooldown(BASE, f64::NAN), Duration::from_secs(600));
        assert_eq!(
            adaptive_cooldown(Duration::from_millis(1000), 0.3),
            Duration::from_millis(3333)
        );
    }

    #[test]
    fn test_lower_confidence_never_shortens_cooldown() {
        let mut previous = Duration::ZERO;
        for step in (1..=20).rev() {
            let confidence = step as f64 / 20.0;
            let cooldown = adaptive_cooldown(BASE, confidence);
            assert!(cooldown >= previous);
            previous = cooldown;
        }
    }

    #[test]
    fn test_first_check_allows_and_seeds() {
        let store = CooldownStore::new();
        let now = Instant::now();

        let decision = store.is_allowed_at("advice:api:x", 1.0, BASE, now);
        assert_eq!(decision, CooldownDecision::Allowed { cooldown: BASE });
        assert_eq!(store.entry("advice:api:x").map(|e| e.cooldown), Some(BASE));
    }

    #[test]
    fn test_blocks_until_cooldown_elapses() {
        let store = CooldownStore::new();
        let start = Instant::now();

        assert!(store.is_allowed_at("k", 0.5, BASE, start).is_allowed());

        let blocked = store.is_allowed_at("k", 1.0, BASE, start + Duration::from_secs(30));
        assert_eq!(
            blocked,
            CooldownDecision::Blocked {
                remaining: Duration::from_secs(90)
            }
        );

        // The blocked attempt did not touch the entry
        let allowed = store.is_allowed_at("k", 1.0, BASE, start + Duration::from_secs(120));
        assert_eq!(allowed, CooldownDecision::Allowed { cooldown: BASE });
    }

    #[test]
    fn test_keys_are_independent() {
        let store = CooldownStore::new();
        let now = Instant::now();

        assert!(store.is_allowed_at("a", 1.0, BASE, now).is_allowed());
        assert!(store.is_allowed_at("b", 1.0, BASE, now).is_allowed());
        assert!(!store.is_allowed_at("a", 1.0, BASE, now).is_allowed());
    }

    #[test]
    fn test_eviction_drops_only_idle_entries() {
        let store = CooldownStore::with_limits(2, Duration::from_secs(1));
        let start = Instant::now();

        store.is_allowed_at("old", 1.0, Duration::from_millis(10), start);
        store.is_allowed_at("recent", 1.0, BASE, start + Duration::from_secs(650));

        // Over capacity; retention is raised to 10x the largest base (600s)
        let later = start + Duration::from_secs(700);
        store.is_allowed_at("new", 1.0, Duration::from_millis(10), later);

        assert!(store.entry("old").is_none());
        assert!(store.entry("recent").is_some());
        assert!(store.entry("new").is_some());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_record_sets_cooldown() {
        let store = CooldownStore::new();
        store.record("k", 1.0, BASE);
        assert!(store.remaining("k").is_some());
        assert!(!store.is_allowed("k", 1.0, BASE).is_allowed());
    }
}
