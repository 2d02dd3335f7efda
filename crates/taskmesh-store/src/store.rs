use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use taskmesh_core::MeshResult;

/// The operations taskmesh requires from its shared store.
///
/// Mirrors the subset of a TTL-capable key-value store with atomic sorted
/// sets and lists that the core actually touches. There are no
/// transactional guarantees across keys; the only mutual-exclusion
/// primitive is [`SharedStore::set_nx`], which the bus uses for its
/// per-agent processing locks.
#[async_trait::async_trait]
pub trait SharedStore: Send + Sync {
    /// Reads the string value at `key`, if present and not expired.
    async fn get(&self, key: &str) -> MeshResult<Option<String>>;

    /// Writes `value` at `key`, replacing any previous value. A `ttl`
    /// expires the key after the given duration.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> MeshResult<()>;

    /// Writes `value` at `key` only if the key is absent. Returns whether
    /// the write happened. Atomic with respect to concurrent `set_nx`
    /// calls on the same key.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> MeshResult<bool>;

    /// Deletes `key`. Returns whether a live value existed.
    async fn delete(&self, key: &str) -> MeshResult<bool>;

    /// Returns all live keys matching `pattern`, where `*` matches any
    /// (possibly empty) substring.
    async fn scan(&self, pattern: &str) -> MeshResult<Vec<String>>;

    /// Adds `member` to the sorted set at `key` with `score`, replacing the
    /// member's score if it is already present.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> MeshResult<()>;

    /// Returns up to `count` members with the highest scores, best first.
    async fn zrange_top(&self, key: &str, count: usize) -> MeshResult<Vec<(String, f64)>>;

    /// Removes `member` from the sorted set at `key`. Returns whether it
    /// was present.
    async fn zrem(&self, key: &str, member: &str) -> MeshResult<bool>;

    /// Cardinality of the sorted set at `key` (0 for a missing key).
    async fn zcard(&self, key: &str) -> MeshResult<usize>;

    /// Appends `value` to the list at `key`. Returns the new length.
    async fn rpush(&self, key: &str, value: &str) -> MeshResult<usize>;

    /// Returns the list elements in `[start, stop]` (inclusive; negative
    /// indices count from the end, `-1` being the last element).
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> MeshResult<Vec<String>>;

    /// Trims the list at `key` to the elements in `[start, stop]`.
    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> MeshResult<()>;
}

/// Reads and deserializes the JSON value at `key`.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn SharedStore,
    key: &str,
) -> MeshResult<Option<T>> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Serializes `value` as JSON and writes it at `key`.
pub async fn set_json<T: Serialize>(
    store: &dyn SharedStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> MeshResult<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw, ttl).await
}
