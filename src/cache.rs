//! In-memory LRU+TTL response cache.
//!
//! Keyed on `{src}->{tgt}|{style signature}|{glossary signature}|{sha1 of the
//! frozen source text}` so a cache hit only ever serves a translation made
//! under the same invariant freeze, style settings and glossary.

use sha1::{Digest, Sha1};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Entry {
    inserted_at: Instant,
    value: serde_json::Value,
}

struct Inner {
    map: HashMap<String, Entry>,
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// A bounded, TTL-expiring, least-recently-used cache of translation
/// responses, shared across requests behind a mutex.
pub struct LruCache {
    inner: Mutex<Inner>,
    maxsize: usize,
    ttl: Duration,
}

impl LruCache {
    pub fn new(maxsize: usize, ttl_secs: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            maxsize: maxsize.max(1),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner.map.get(key) else {
            inner.misses += 1;
            return None;
        };
        if entry.inserted_at.elapsed() > self.ttl {
            inner.map.remove(key);
            if let Some(pos) = inner.order.iter().position(|k| k == key) {
                inner.order.remove(pos);
            }
            inner.misses += 1;
            return None;
        }
        let value = entry.value.clone();
        if let Some(pos) = inner.order.iter().position(|k| k == key) {
            inner.order.remove(pos);
        }
        inner.order.push_back(key.to_string());
        inner.hits += 1;
        Some(value)
    }

    pub fn set(&self, key: &str, value: serde_json::Value) {
        let mut inner = self.inner.lock().unwrap();
        inner.map.insert(
            key.to_string(),
            Entry {
                inserted_at: Instant::now(),
                value,
            },
        );
        if let Some(pos) = inner.order.iter().position(|k| k == key) {
            inner.order.remove(pos);
        }
        inner.order.push_back(key.to_string());

        if inner.map.len() > self.maxsize {
            if let Some(oldest) = inner.order.pop_front() {
                inner.map.remove(&oldest);
                inner.evictions += 1;
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            size: inner.map.len(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }
}

/// Canonicalize address/gender style options into a stable cache-key fragment.
pub fn style_signature(address: Option<&str>, gender: Option<&str>) -> String {
    let a = address.unwrap_or("auto").to_lowercase();
    let g = gender.unwrap_or("none").to_lowercase();
    format!("a={a};g={g}")
}

/// Hash the active glossary's canonical terms into a stable cache-key
/// fragment, so enabling/disabling or editing the glossary invalidates
/// cached translations made under a different term set.
pub fn glossary_signature(canonical_terms: &[String]) -> String {
    if canonical_terms.is_empty() {
        return "gl=none".to_string();
    }
    let mut sorted: Vec<String> = canonical_terms.iter().map(|s| s.trim().to_string()).collect();
    sorted.sort();
    let payload = sorted.join("|");
    let mut hasher = Sha1::new();
    hasher.update(payload.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("gl={}", &digest[..8])
}

/// Build the full cache key for one translation request.
pub fn build_key(src_engine: &str, tgt_engine: &str, frozen_text: &str, sig: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(frozen_text.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{src_engine}->{tgt_engine}|{sig}|{}", &digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_hits() {
        let cache = LruCache::new(10, 60);
        cache.set("k", serde_json::json!({"text": "hi"}));
        assert!(cache.get("k").is_some());
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn missing_key_counts_as_miss() {
        let cache = LruCache::new(10, 60);
        assert!(cache.get("nope").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn eviction_drops_least_recently_used() {
        let cache = LruCache::new(2, 60);
        cache.set("a", serde_json::json!(1));
        cache.set("b", serde_json::json!(2));
        cache.set("c", serde_json::json!(3));
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn access_refreshes_recency() {
        let cache = LruCache::new(2, 60);
        cache.set("a", serde_json::json!(1));
        cache.set("b", serde_json::json!(2));
        cache.get("a"); // a is now most-recently-used
        cache.set("c", serde_json::json!(3)); // should evict b, not a
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn ttl_expired_entry_is_a_miss() {
        let cache = LruCache::new(10, 0);
        cache.set("k", serde_json::json!(1));
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn style_signature_defaults_to_auto_none() {
        assert_eq!(style_signature(None, None), "a=auto;g=none");
    }

    #[test]
    fn glossary_signature_is_order_independent() {
        let a = glossary_signature(&["Zeta".to_string(), "Alpha".to_string()]);
        let b = glossary_signature(&["Alpha".to_string(), "Zeta".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn glossary_signature_empty_is_sentinel() {
        assert_eq!(glossary_signature(&[]), "gl=none");
    }

    #[test]
    fn build_key_differs_by_direction() {
        let a = build_key("en", "de", "hello", "a=auto;g=none");
        let b = build_key("de", "en", "hello", "a=auto;g=none");
        assert_ne!(a, b);
    }
}
