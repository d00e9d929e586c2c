//! Client for the external key/value store holding computation progress.
//!
//! The store contract: `HGET "conc_cache:"+corpusId cacheKey` returns a JSON
//! array of length 3; element index 1 is the [`StatusRecord`]. Indices 0 and
//! 2 are undocumented and discarded. Kept behind a trait so the watchdog
//! stays storage-agnostic and unit-testable without a live Redis instance.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::config::CacheDbConfig;
use crate::error::ConcCacheError;
use crate::types::StatusRecord;

#[async_trait]
pub trait ConcCacheStore: Send + Sync {
    async fn get_status(
        &self,
        corpus_id: &str,
        cache_key: &str,
    ) -> Result<StatusRecord, ConcCacheError>;
}

/// Redis-backed implementation, connected lazily via a cheaply-cloneable
/// `ConnectionManager` (auto-reconnects, safe to share across watchdogs).
pub struct RedisConcCacheStore {
    conn: ConnectionManager,
}

impl RedisConcCacheStore {
    pub async fn connect(config: &CacheDbConfig) -> Result<Self, ConcCacheError> {
        let client = redis::Client::open(config.address.as_str())
            .map_err(|e| ConcCacheError::Connection(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| ConcCacheError::Connection(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl ConcCacheStore for RedisConcCacheStore {
    async fn get_status(
        &self,
        corpus_id: &str,
        cache_key: &str,
    ) -> Result<StatusRecord, ConcCacheError> {
        let hash_key = format!("conc_cache:{corpus_id}");
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn
            .hget(&hash_key, cache_key)
            .await
            .map_err(|e| ConcCacheError::Connection(e.to_string()))?;
        let payload = payload.ok_or(ConcCacheError::NotFound)?;
        parse_status_payload(&payload)
    }
}

/// Decodes the store's 3-element array payload, keeping only index 1.
fn parse_status_payload(payload: &str) -> Result<StatusRecord, ConcCacheError> {
    let values: Vec<serde_json::Value> =
        serde_json::from_str(payload).map_err(|e| ConcCacheError::Malformed(e.to_string()))?;
    let record_value = values
        .get(1)
        .ok_or_else(|| ConcCacheError::Malformed("store array has no index 1".to_string()))?;
    serde_json::from_value(record_value.clone())
        .map_err(|e| ConcCacheError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_index_one_and_discards_others() {
        let payload = r#"[{"ignored":true}, {"concSize":1,"fullSize":2,"relConcSize":0.5,"arf":1.2,"created":10,"lastUpdate":11,"finished":false}, "also ignored"]"#;
        let record = parse_status_payload(payload).expect("parse");
        assert_eq!(record.conc_size, 1);
        assert_eq!(record.last_update, 11);
        assert!(!record.finished);
    }

    #[test]
    fn rejects_malformed_payload() {
        assert!(parse_status_payload("not json").is_err());
        assert!(parse_status_payload("[1]").is_err());
    }
}
