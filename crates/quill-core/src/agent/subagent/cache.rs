//! Process-wide cache of successful subagent runs.
//!
//! Keyed by a digest of kind, task text, and model so an identical
//! delegation within the TTL is answered without a fresh run. Only runs
//! that completed normally are stored.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use super::types::{SubagentKind, SubagentResult};

const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);
const MAX_ENTRIES: usize = 256;

struct CacheEntry {
    result: SubagentResult,
    stored_at: Instant,
    last_used: Instant,
}

pub struct SubagentCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl Default for SubagentCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl SubagentCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn key(kind: SubagentKind, task: &str, model: &str) -> String {
        let digest = Sha256::digest(format!("{}|{task}|{model}", kind.name()).as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn get(&self, key: &str) -> Option<SubagentResult> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(key)?;
        if entry.stored_at.elapsed() > self.ttl {
            entries.remove(key);
            return None;
        }
        entry.last_used = Instant::now();
        let mut result = entry.result.clone();
        result.cached = true;
        Some(result)
    }

    pub fn store(&self, key: String, result: SubagentResult) {
        let mut entries = self.entries.lock();
        if entries.len() >= MAX_ENTRIES && !entries.contains_key(&key) {
            evict_lru(&mut entries);
        }
        let now = Instant::now();
        entries.insert(
            key,
            CacheEntry {
                result,
                stored_at: now,
                last_used: now,
            },
        );
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn evict_lru(entries: &mut HashMap<String, CacheEntry>) {
    if let Some(oldest) = entries
        .iter()
        .min_by_key(|(_, e)| e.last_used)
        .map(|(k, _)| k.clone())
    {
        entries.remove(&oldest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::loop_events::CompletionReason;

    fn result(name: &str) -> SubagentResult {
        SubagentResult {
            name: name.to_string(),
            kind: "general".to_string(),
            success: true,
            completion: CompletionReason::Completed,
            summary: "done".to_string(),
            iterations: 3,
            duration_ms: 10,
            cached: false,
        }
    }

    #[test]
    fn test_round_trip_marks_cached() {
        let cache = SubagentCache::default();
        let key = SubagentCache::key(SubagentKind::General, "list files", "gpt-4o");
        cache.store(key.clone(), result("t"));

        let hit = cache.get(&key).unwrap();
        assert!(hit.cached);
        assert_eq!(hit.summary, "done");
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let cache = SubagentCache::new(Duration::from_millis(0));
        let key = SubagentCache::key(SubagentKind::General, "t", "m");
        cache.store(key.clone(), result("t"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_key_varies_by_kind_task_and_model() {
        let base = SubagentCache::key(SubagentKind::General, "t", "m");
        assert_ne!(base, SubagentCache::key(SubagentKind::Testing, "t", "m"));
        assert_ne!(base, SubagentCache::key(SubagentKind::General, "u", "m"));
        assert_ne!(base, SubagentCache::key(SubagentKind::General, "t", "n"));
    }

    #[test]
    fn test_eviction_keeps_recently_used() {
        let cache = SubagentCache::default();
        for i in 0..MAX_ENTRIES {
            cache.store(format!("key-{i}"), result("t"));
        }
        // Touch the first entry so it is no longer least recently used.
        assert!(cache.get("key-0").is_some());
        cache.store("overflow".to_string(), result("t"));
        assert_eq!(cache.len(), MAX_ENTRIES);
        assert!(cache.get("key-0").is_some());
    }
}
