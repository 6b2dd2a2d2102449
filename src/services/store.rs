use async_trait::async_trait;
use parking_lot::RwLock;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error for key {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Counter at {0} is not an integer")]
    NotAnInteger(String),
}

/// Key-value persistence behind the ledger and the repositories.
///
/// `put_if_absent` and `compare_and_swap` must be atomic per key; every state
/// transition of a payment or entitlement goes through them.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Returns `true` if the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Returns `true` if the value was written.
    async fn put_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    /// Replaces `expected` with `new`. Returns `false` if the current value is
    /// not exactly `expected` (including when the key is missing).
    async fn compare_and_swap(&self, key: &str, expected: &str, new: &str) -> Result<bool, StoreError>;

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    async fn ping(&self) -> bool;
}

pub fn encode<T: Serialize>(key: &str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|source| StoreError::Serialization {
        key: key.to_string(),
        source,
    })
}

pub fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|source| StoreError::Serialization {
        key: key.to_string(),
        source,
    })
}

/// Loads a JSON value together with the raw text it was decoded from, so the
/// caller can use the raw text as the expected value of a compare-and-swap.
pub async fn load<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<(String, T)>, StoreError> {
    match store.get(key).await? {
        Some(raw) => {
            let value = decode(key, &raw)?;
            Ok(Some((raw, value)))
        }
        None => Ok(None),
    }
}

/// Applies `update` to the JSON value at `key` with optimistic concurrency,
/// retrying until the swap lands. A missing key starts from `T::default()`.
pub async fn update<T, F>(store: &dyn KeyValueStore, key: &str, mut update: F) -> Result<T, StoreError>
where
    T: Serialize + DeserializeOwned + Default,
    F: FnMut(T) -> T,
{
    loop {
        match load::<T>(store, key).await? {
            Some((raw, current)) => {
                let next = update(current);
                if store.compare_and_swap(key, &raw, &encode(key, &next)?).await? {
                    return Ok(next);
                }
            }
            None => {
                let next = update(T::default());
                if store.put_if_absent(key, &encode(key, &next)?).await? {
                    return Ok(next);
                }
            }
        }
        tracing::debug!("Concurrent write on {}, retrying", key);
    }
}

/// Process-local store. State is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.write().remove(key).is_some())
    }

    async fn put_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write();
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, new: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(current) if current == expected => {
                *current = new.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut entries = self.entries.write();
        let current = match entries.get(key) {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| StoreError::NotAnInteger(key.to_string()))?,
            None => 0,
        };
        let next = current.saturating_add(delta);
        entries.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn ping(&self) -> bool {
        true
    }
}

const CAS_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

pub struct RedisStore {
    redis: redis::aio::ConnectionManager,
    cas: redis::Script,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let redis = client.get_connection_manager().await?;

        tracing::info!("Redis connected successfully");

        Ok(Self {
            redis,
            cas: redis::Script::new(CAS_SCRIPT),
        })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut redis = self.redis.clone();
        Ok(redis.get::<_, Option<String>>(key).await?)
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut redis = self.redis.clone();
        redis.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut redis = self.redis.clone();
        let removed: i64 = redis.del(key).await?;
        Ok(removed > 0)
    }

    async fn put_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut redis = self.redis.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .query_async(&mut redis)
            .await?;
        Ok(reply.is_some())
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, new: &str) -> Result<bool, StoreError> {
        let mut redis = self.redis.clone();
        let swapped: i32 = self
            .cas
            .key(key)
            .arg(expected)
            .arg(new)
            .invoke_async(&mut redis)
            .await?;
        Ok(swapped == 1)
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut redis = self.redis.clone();
        Ok(redis.incr(key, delta).await?)
    }

    async fn ping(&self) -> bool {
        let mut redis = self.redis.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut redis)
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_memory_store_basic_operations() {
        let store = MemoryStore::new();

        assert_eq!(store.get("a").await.unwrap(), None);
        store.put("a", "1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_if_absent_only_writes_once() {
        let store = MemoryStore::new();

        assert!(store.put_if_absent("k", "first").await.unwrap());
        assert!(!store.put_if_absent("k", "second").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = MemoryStore::new();

        assert!(!store.compare_and_swap("k", "x", "y").await.unwrap());

        store.put("k", "x").await.unwrap();
        assert!(!store.compare_and_swap("k", "other", "y").await.unwrap());
        assert!(store.compare_and_swap("k", "x", "y").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn test_increment_counts_from_zero() {
        let store = MemoryStore::new();

        assert_eq!(store.increment("c", 2).await.unwrap(), 2);
        assert_eq!(store.increment("c", 3).await.unwrap(), 5);

        store.put("bad", "abc").await.unwrap();
        assert!(matches!(
            store.increment("bad", 1).await,
            Err(StoreError::NotAnInteger(_))
        ));
    }

    #[tokio::test]
    async fn test_update_applies_every_concurrent_change() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    update::<Vec<u32>, _>(store.as_ref(), "list", |mut list| {
                        list.push(i);
                        list
                    })
                    .await
                })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let (_, list) = load::<Vec<u32>>(store.as_ref(), "list").await.unwrap().unwrap();
        assert_eq!(list.len(), 16);
    }
}
