//! Pluggable storage for keyed rate limiting.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// A bucket's persisted state: token count and the millisecond timestamp it
/// was last refilled at (in the caller's [`crate::clock::Clock`] units).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoredBucket {
    pub tokens: f64,
    pub last_refill_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasResult {
    Committed,
    Conflict,
}

/// Storage contract for keyed rate limiting. Implementations MUST make
/// `compare_and_set` atomic with respect to concurrent callers sharing a
/// key; the in-memory implementation below does this with a single mutex,
/// remote implementations would use a database-native CAS primitive.
#[async_trait]
pub trait RateLimitStorage: Send + Sync + fmt::Debug {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn get(&self, key: &str) -> Result<Option<StoredBucket>, Self::Error>;
    async fn set(&self, key: &str, bucket: StoredBucket) -> Result<(), Self::Error>;
    async fn delete(&self, key: &str) -> Result<(), Self::Error>;
    async fn clear(&self) -> Result<(), Self::Error>;

    /// Atomically replaces `key`'s bucket with `new` iff the stored value
    /// still equals `expected` (or, if `expected` is `None`, iff the key is
    /// still absent).
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<StoredBucket>,
        new: StoredBucket,
    ) -> Result<CasResult, Self::Error>;
}

#[derive(Debug, thiserror::Error)]
#[error("in-memory rate limit storage error: {0}")]
pub struct InMemoryStorageError(String);

/// Process-local storage. Not shared across processes; suitable as the
/// crate's default and for tests.
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStorage {
    data: Mutex<HashMap<String, StoredBucket>>,
}

impl InMemoryRateLimitStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStorage for InMemoryRateLimitStorage {
    type Error = InMemoryStorageError;

    async fn get(&self, key: &str) -> Result<Option<StoredBucket>, Self::Error> {
        Ok(self.data.lock().unwrap().get(key).copied())
    }

    async fn set(&self, key: &str, bucket: StoredBucket) -> Result<(), Self::Error> {
        self.data.lock().unwrap().insert(key.to_string(), bucket);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Self::Error> {
        self.data.lock().unwrap().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), Self::Error> {
        self.data.lock().unwrap().clear();
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<StoredBucket>,
        new: StoredBucket,
    ) -> Result<CasResult, Self::Error> {
        let mut data = self.data.lock().unwrap();
        let current = data.get(key).copied();
        if current == expected {
            data.insert(key.to_string(), new);
            Ok(CasResult::Committed)
        } else {
            Ok(CasResult::Conflict)
        }
    }
}
