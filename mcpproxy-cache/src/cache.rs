//! Content-addressed cache of truncated responses

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::{CacheError, CacheResult, MAX_READ_LIMIT, MIN_READ_LIMIT};

/// One cached full response
#[derive(Debug, Clone, Serialize)]
pub struct CachedResponse {
    pub key: String,
    pub tool_name: String,
    pub args_json: String,

    /// The complete parsed response body
    pub response: Value,

    /// Dotted path to the paginated array within the body. `"."` means the
    /// body itself is the array; empty means no array was detected and the
    /// whole body reads back as a single record.
    pub record_path: String,

    pub total_records: usize,
    pub created_at: DateTime<Utc>,
}

/// One page of cached records
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub records: Vec<Value>,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_offset: Option<usize>,
}

struct Entry {
    response: CachedResponse,
    expires_at: Instant,
}

struct CacheInner {
    entries: HashMap<String, Entry>,
    /// Access order: front = least recently used
    order: VecDeque<String>,
}

/// LRU + TTL cache keyed by content hash.
///
/// Entries come back whole or not at all; an expired or evicted key is a
/// plain miss, never a partial read.
pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Store a response under its content key
    #[allow(clippy::too_many_arguments)]
    pub fn store(
        &self,
        key: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        response: Value,
        record_path: impl Into<String>,
        total_records: usize,
    ) {
        let key = key.into();
        let mut inner = self.inner.lock();

        if inner.entries.contains_key(&key) {
            inner.order.retain(|k| k != &key);
        }

        inner.entries.insert(
            key.clone(),
            Entry {
                response: CachedResponse {
                    key: key.clone(),
                    tool_name: tool_name.into(),
                    args_json: args_json.into(),
                    response,
                    record_path: record_path.into(),
                    total_records,
                    created_at: Utc::now(),
                },
                expires_at: Instant::now() + self.ttl,
            },
        );
        inner.order.push_back(key);

        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.entries.remove(&evicted);
                tracing::debug!(key = %evicted, "cache entry evicted");
            }
        }
    }

    /// Read a page of records. `limit` must be in [1, 1000] and `offset`
    /// non-negative; `offset` past the end is a range error.
    pub fn get_records(&self, key: &str, offset: i64, limit: i64) -> CacheResult<Page> {
        if offset < 0 {
            return Err(CacheError::InvalidRange {
                message: format!("offset must be >= 0, got {}", offset),
            });
        }
        if !(MIN_READ_LIMIT..=MAX_READ_LIMIT).contains(&limit) {
            return Err(CacheError::InvalidRange {
                message: format!(
                    "limit must be within [{}, {}], got {}",
                    MIN_READ_LIMIT, MAX_READ_LIMIT, limit
                ),
            });
        }
        let offset = offset as usize;
        let limit = limit as usize;

        let entry = self.get(key)?;
        let records = collect_records(&entry.response, &entry.record_path);
        let total = records.len();

        if offset >= total {
            return Err(CacheError::RangeOutOfBounds { offset, total });
        }

        let end = (offset + limit).min(total);
        let next_offset = if end < total { Some(end) } else { None };

        Ok(Page {
            records: records[offset..end].to_vec(),
            total,
            next_offset,
        })
    }

    /// Fetch a whole entry, refreshing its LRU position
    pub fn get(&self, key: &str) -> CacheResult<CachedResponse> {
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            Some(entry) => Instant::now() > entry.expires_at,
            None => {
                return Err(CacheError::Miss {
                    key: key.to_string(),
                })
            }
        };

        if expired {
            inner.entries.remove(key);
            inner.order.retain(|k| k != key);
            return Err(CacheError::Miss {
                key: key.to_string(),
            });
        }

        inner.order.retain(|k| k != key);
        inner.order.push_back(key.to_string());
        Ok(inner.entries[key].response.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolve the records a cached body paginates over
fn collect_records(response: &Value, record_path: &str) -> Vec<Value> {
    if record_path.is_empty() {
        return vec![response.clone()];
    }

    let target = if record_path == "." {
        Some(response)
    } else {
        record_path
            .split('.')
            .try_fold(response, |value, segment| value.get(segment))
    };

    match target {
        Some(Value::Array(items)) => items.clone(),
        // A stale path degrades to the single-record view
        _ => vec![response.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn array_body(n: usize) -> Value {
        Value::Array((0..n).map(|i| json!({"id": i})).collect())
    }

    fn cache() -> ResponseCache {
        ResponseCache::new(10, Duration::from_secs(60))
    }

    #[test]
    fn test_store_then_read_preserves_order() {
        let cache = cache();
        cache.store("k1", "t", "{}", array_body(5), ".", 5);

        let page = cache.get_records("k1", 0, 5).unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.next_offset, None);
        let ids: Vec<i64> = page
            .records
            .iter()
            .map(|r| r["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_pagination_next_offset() {
        let cache = cache();
        cache.store("k1", "t", "{}", array_body(25), ".", 25);

        let page = cache.get_records("k1", 0, 10).unwrap();
        assert_eq!(page.records.len(), 10);
        assert_eq!(page.next_offset, Some(10));

        let page = cache.get_records("k1", 20, 10).unwrap();
        assert_eq!(page.records.len(), 5);
        assert_eq!(page.next_offset, None);
    }

    #[test]
    fn test_nested_record_path() {
        let cache = cache();
        let body = json!({"meta": {"count": 3}, "data": {"items": [1, 2, 3]}});
        cache.store("k1", "t", "{}", body, "data.items", 3);

        let page = cache.get_records("k1", 1, 10).unwrap();
        assert_eq!(page.records, vec![json!(2), json!(3)]);
    }

    #[test]
    fn test_empty_path_is_single_record() {
        let cache = cache();
        cache.store("k1", "t", "{}", json!({"whole": true}), "", 1);

        let page = cache.get_records("k1", 0, 1).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.records[0], json!({"whole": true}));
    }

    #[test]
    fn test_range_validation() {
        let cache = cache();
        cache.store("k1", "t", "{}", array_body(5), ".", 5);

        assert!(matches!(
            cache.get_records("k1", -1, 10),
            Err(CacheError::InvalidRange { .. })
        ));
        assert!(matches!(
            cache.get_records("k1", 0, 0),
            Err(CacheError::InvalidRange { .. })
        ));
        assert!(matches!(
            cache.get_records("k1", 0, 1500),
            Err(CacheError::InvalidRange { .. })
        ));
        assert!(matches!(
            cache.get_records("k1", 100, 10),
            Err(CacheError::RangeOutOfBounds { total: 5, .. })
        ));
    }

    #[test]
    fn test_miss_on_unknown_key() {
        assert!(matches!(
            cache().get_records("nope", 0, 10),
            Err(CacheError::Miss { .. })
        ));
    }

    #[test]
    fn test_ttl_expiry_is_a_miss() {
        let cache = ResponseCache::new(10, Duration::ZERO);
        cache.store("k1", "t", "{}", array_body(2), ".", 2);
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(
            cache.get("k1"),
            Err(CacheError::Miss { .. })
        ));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.store("a", "t", "{}", array_body(1), ".", 1);
        cache.store("b", "t", "{}", array_body(1), ".", 1);

        // Touch "a" so "b" becomes the eviction candidate
        cache.get("a").unwrap();
        cache.store("c", "t", "{}", array_body(1), ".", 1);

        assert!(cache.get("a").is_ok());
        assert!(matches!(cache.get("b"), Err(CacheError::Miss { .. })));
        assert!(cache.get("c").is_ok());
    }
}
