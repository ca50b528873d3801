//! Searchable pointer index
//!
//! A content-addressed network can only fetch by digest, so finding a
//! record from its share code alone needs a keyed index. The index stores
//! where the record was published; the record itself stays on the network.
//! Entries are write-once.

use async_trait::async_trait;
use cyxshare_core::{CyxShareError, PublishedPointer, Result, ShareCode};
use parking_lot::RwLock;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use tracing::{debug, info};

/// Keyed code -> published pointer index
#[async_trait]
pub trait PointerIndex: Send + Sync {
    /// Record where the pointer for `code` was published. Fails if the code
    /// is already taken.
    async fn put(&self, code: &ShareCode, pointer: &PublishedPointer) -> Result<()>;

    async fn get(&self, code: &str) -> Result<Option<PublishedPointer>>;

    async fn contains(&self, code: &str) -> Result<bool> {
        Ok(self.get(code).await?.is_some())
    }
}

/// Redis index configuration
#[derive(Debug, Clone)]
pub struct RedisIndexConfig {
    /// Redis connection URL
    pub url: String,
    /// Key prefix
    pub prefix: String,
}

impl Default for RedisIndexConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            prefix: "cyxshare".to_string(),
        }
    }
}

/// Redis-backed pointer index
#[derive(Clone)]
pub struct RedisPointerIndex {
    conn: MultiplexedConnection,
    config: RedisIndexConfig,
}

impl RedisPointerIndex {
    /// Connect to Redis
    pub async fn connect(config: RedisIndexConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str()).map_err(index_error)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(index_error)?;
        info!(prefix = %config.prefix, "Connected to Redis pointer index");
        Ok(Self { conn, config })
    }

    /// Build an index key with prefix
    fn key(&self, code: &str) -> String {
        format!("{}:pointer:{}", self.config.prefix, code)
    }
}

fn index_error(err: redis::RedisError) -> CyxShareError {
    CyxShareError::Index(err.to_string())
}

#[async_trait]
impl PointerIndex for RedisPointerIndex {
    async fn put(&self, code: &ShareCode, pointer: &PublishedPointer) -> Result<()> {
        let key = self.key(code.as_str());
        let json = serde_json::to_string(pointer)?;
        let mut conn = self.conn.clone();

        let inserted: bool = conn.set_nx(&key, json).await.map_err(index_error)?;
        if !inserted {
            return Err(CyxShareError::Index(format!(
                "share code {} is already indexed",
                code
            )));
        }

        debug!(key = %key, record_root = %pointer.record_root, "Index set");
        Ok(())
    }

    async fn get(&self, code: &str) -> Result<Option<PublishedPointer>> {
        let key = self.key(code);
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(&key).await.map_err(index_error)?;

        match json {
            Some(json) => {
                let pointer = serde_json::from_str(&json)?;
                debug!(key = %key, "Index hit");
                Ok(Some(pointer))
            }
            None => {
                debug!(key = %key, "Index miss");
                Ok(None)
            }
        }
    }

    async fn contains(&self, code: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(self.key(code)).await.map_err(index_error)?;
        Ok(exists)
    }
}

/// In-memory pointer index
#[derive(Default)]
pub struct MemoryPointerIndex {
    pointers: RwLock<HashMap<String, PublishedPointer>>,
}

impl MemoryPointerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pointers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pointers.read().is_empty()
    }
}

#[async_trait]
impl PointerIndex for MemoryPointerIndex {
    async fn put(&self, code: &ShareCode, pointer: &PublishedPointer) -> Result<()> {
        let mut pointers = self.pointers.write();
        if pointers.contains_key(code.as_str()) {
            return Err(CyxShareError::Index(format!(
                "share code {} is already indexed",
                code
            )));
        }
        pointers.insert(code.as_str().to_string(), pointer.clone());
        Ok(())
    }

    async fn get(&self, code: &str) -> Result<Option<PublishedPointer>> {
        Ok(self.pointers.read().get(code).cloned())
    }
}
