use crate::store::SharedStore;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use taskmesh_core::MeshResult;
use tokio::sync::RwLock;

/// One stored value with an optional expiry.
#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    /// Insertion-ordered members; sorted views are computed on read.
    Zset(Vec<(String, f64)>),
    List(Vec<String>),
}

/// In-process [`SharedStore`] over a `tokio::sync::RwLock` map.
///
/// TTL expiry is lazy: expired entries read as absent and are dropped the
/// next time a writer touches them. Suitable for tests and single-process
/// wiring; a production deployment points the trait at a real store.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Matches `key` against `pattern`, where `*` matches any substring.
fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    // Pattern ended with '*' (or collapsed to wildcards only).
    true
}

/// Normalizes a possibly negative list index to `[0, len]`.
fn normalize_index(idx: i64, len: usize) -> usize {
    if idx < 0 {
        len.saturating_sub(idx.unsigned_abs() as usize)
    } else {
        (idx as usize).min(len)
    }
}

#[async_trait::async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> MeshResult<Option<String>> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match &entry.value {
                Value::Str(s) => Ok(Some(s.clone())),
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> MeshResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> MeshResult<bool> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| !e.is_expired(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|t| now + t),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> MeshResult<bool> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        match entries.remove(key) {
            Some(entry) => Ok(!entry.is_expired(now)),
            None => Ok(false),
        }
    }

    async fn scan(&self, pattern: &str) -> MeshResult<Vec<String>> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| !e.is_expired(now) && glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> MeshResult<()> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let entry = entries
            .entry(key.to_string())
            .and_modify(|e| {
                if e.is_expired(now) || !matches!(e.value, Value::Zset(_)) {
                    e.value = Value::Zset(Vec::new());
                    e.expires_at = None;
                }
            })
            .or_insert_with(|| Entry {
                value: Value::Zset(Vec::new()),
                expires_at: None,
            });

        if let Value::Zset(members) = &mut entry.value {
            match members.iter_mut().find(|(m, _)| m == member) {
                Some((_, s)) => *s = score,
                None => members.push((member.to_string(), score)),
            }
        }
        Ok(())
    }

    async fn zrange_top(&self, key: &str, count: usize) -> MeshResult<Vec<(String, f64)>> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        let Some(entry) = entries.get(key).filter(|e| !e.is_expired(now)) else {
            return Ok(Vec::new());
        };
        let Value::Zset(members) = &entry.value else {
            return Ok(Vec::new());
        };
        let mut sorted = members.clone();
        sorted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        sorted.truncate(count);
        Ok(sorted)
    }

    async fn zrem(&self, key: &str, member: &str) -> MeshResult<bool> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let Some(entry) = entries.get_mut(key).filter(|e| !e.is_expired(now)) else {
            return Ok(false);
        };
        let Value::Zset(members) = &mut entry.value else {
            return Ok(false);
        };
        let before = members.len();
        members.retain(|(m, _)| m != member);
        Ok(members.len() < before)
    }

    async fn zcard(&self, key: &str) -> MeshResult<usize> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        match entries.get(key).filter(|e| !e.is_expired(now)) {
            Some(Entry {
                value: Value::Zset(members),
                ..
            }) => Ok(members.len()),
            _ => Ok(0),
        }
    }

    async fn rpush(&self, key: &str, value: &str) -> MeshResult<usize> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let entry = entries
            .entry(key.to_string())
            .and_modify(|e| {
                if e.is_expired(now) || !matches!(e.value, Value::List(_)) {
                    e.value = Value::List(Vec::new());
                    e.expires_at = None;
                }
            })
            .or_insert_with(|| Entry {
                value: Value::List(Vec::new()),
                expires_at: None,
            });

        if let Value::List(items) = &mut entry.value {
            items.push(value.to_string());
            Ok(items.len())
        } else {
            Ok(0)
        }
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> MeshResult<Vec<String>> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        let Some(Entry {
            value: Value::List(items),
            ..
        }) = entries.get(key).filter(|e| !e.is_expired(now))
        else {
            return Ok(Vec::new());
        };
        let from = normalize_index(start, items.len());
        let to = (normalize_index(stop, items.len()) + 1).min(items.len());
        if from >= to {
            return Ok(Vec::new());
        }
        Ok(items[from..to].to_vec())
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> MeshResult<()> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let Some(entry) = entries.get_mut(key).filter(|e| !e.is_expired(now)) else {
            return Ok(());
        };
        let Value::List(items) = &mut entry.value else {
            return Ok(());
        };
        let from = normalize_index(start, items.len());
        let to = (normalize_index(stop, items.len()) + 1).min(items.len());
        if from >= to {
            items.clear();
        } else {
            *items = items[from..to].to_vec();
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::{get_json, set_json};

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(store.delete("k").await.unwrap());
        assert!(store.get("k").await.unwrap().is_none());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_nx_only_first_wins() {
        let store = MemoryStore::new();
        assert!(store.set_nx("lock", "a", None).await.unwrap());
        assert!(!store.set_nx("lock", "b", None).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("a"));

        store.delete("lock").await.unwrap();
        assert!(store.set_nx("lock", "b", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_nx_succeeds_after_expiry() {
        let store = MemoryStore::new();
        assert!(store
            .set_nx("lock", "a", Some(Duration::from_millis(20)))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.set_nx("lock", "b", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_zset_ordering_and_removal() {
        let store = MemoryStore::new();
        store.zadd("z", "low", 1.0).await.unwrap();
        store.zadd("z", "high", 10.0).await.unwrap();
        store.zadd("z", "mid", 5.0).await.unwrap();

        let top = store.zrange_top("z", 2).await.unwrap();
        assert_eq!(top[0].0, "high");
        assert_eq!(top[1].0, "mid");
        assert_eq!(store.zcard("z").await.unwrap(), 3);

        assert!(store.zrem("z", "high").await.unwrap());
        assert!(!store.zrem("z", "high").await.unwrap());
        assert_eq!(store.zcard("z").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_zadd_updates_existing_member_score() {
        let store = MemoryStore::new();
        store.zadd("z", "m", 1.0).await.unwrap();
        store.zadd("z", "m", 9.0).await.unwrap();
        assert_eq!(store.zcard("z").await.unwrap(), 1);
        let top = store.zrange_top("z", 1).await.unwrap();
        assert_eq!(top[0].1, 9.0);
    }

    #[tokio::test]
    async fn test_list_push_range_trim() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.rpush("l", &format!("e{i}")).await.unwrap();
        }
        let all = store.lrange("l", 0, -1).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0], "e0");

        // Keep the last three.
        store.ltrim("l", -3, -1).await.unwrap();
        let kept = store.lrange("l", 0, -1).await.unwrap();
        assert_eq!(kept, vec!["e2", "e3", "e4"]);
    }

    #[tokio::test]
    async fn test_lrange_on_missing_key() {
        let store = MemoryStore::new();
        assert!(store.lrange("nope", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_glob() {
        let store = MemoryStore::new();
        store.set("agent:a", "1", None).await.unwrap();
        store.set("agent:b", "1", None).await.unwrap();
        store.set("task:1", "1", None).await.unwrap();

        let agents = store.scan("agent:*").await.unwrap();
        assert_eq!(agents, vec!["agent:a", "agent:b"]);

        let all = store.scan("*").await.unwrap();
        assert_eq!(all.len(), 3);

        let exact = store.scan("task:1").await.unwrap();
        assert_eq!(exact, vec!["task:1"]);

        let middle = store.scan("*gent:a").await.unwrap();
        assert_eq!(middle, vec!["agent:a"]);
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let store = MemoryStore::new();
        set_json(&store, "k", &serde_json::json!({"n": 7}), None)
            .await
            .unwrap();
        let v: Option<serde_json::Value> = get_json(&store, "k").await.unwrap();
        assert_eq!(v.unwrap()["n"], 7);

        let missing: Option<serde_json::Value> = get_json(&store, "absent").await.unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_glob_match_cases() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("agent:*", "agent:x"));
        assert!(!glob_match("agent:*", "task:x"));
        assert!(glob_match("*:x", "agent:x"));
        assert!(glob_match("a*c", "abc"));
        assert!(glob_match("a*c", "ac"));
        assert!(!glob_match("a*c", "ab"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }
}
