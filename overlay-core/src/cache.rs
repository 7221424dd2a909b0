use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::types::{ResultMetadata, Row};

/// A complete query result, sliced into chunks of `chunk_size`. Immutable
/// once created; `get_chunk` only reads.
#[derive(Clone)]
pub struct ChunkedResult {
    pub uid: String,
    pub records: Vec<Row>,
    pub chunk_size: usize,
    pub metadata: ResultMetadata,
    created_at: Instant,
}

impl ChunkedResult {
    pub fn new(uid: String, records: Vec<Row>, chunk_size: usize, metadata: ResultMetadata) -> Self {
        Self {
            uid,
            records,
            chunk_size: chunk_size.max(1),
            metadata,
            created_at: Instant::now(),
        }
    }

    pub fn total_records(&self) -> usize {
        self.records.len()
    }

    pub fn total_chunks(&self) -> usize {
        (self.records.len() + self.chunk_size - 1) / self.chunk_size.max(1)
    }

    /// `None` for an out-of-range index; `Some((rows, is_last))` otherwise.
    pub fn chunk(&self, index: usize) -> Option<(&[Row], bool)> {
        let total = self.total_chunks();
        if index >= total {
            return None;
        }
        let start = index * self.chunk_size;
        let end = (start + self.chunk_size).min(self.records.len());
        Some((&self.records[start..end], index + 1 == total))
    }

    fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// In-memory store of pending [`ChunkedResult`]s, keyed by uid. Results are
/// evicted either eagerly (on the last chunk being drained — `spec.md` §4.4)
/// or lazily once older than `ttl` (checked on access, mirroring
/// `MemoryStore`'s lock-guarded-`Inner` shape in the teacher's `store_memory.rs`).
pub struct ResultCache {
    ttl: Duration,
    inner: RwLock<HashMap<String, ChunkedResult>>,
}

pub enum ChunkLookup {
    Chunk { data: Vec<Row>, index: usize, total_chunks: usize, is_last: bool },
    OutOfRange,
    Expired,
    NotFound,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, result: ChunkedResult) {
        let mut inner = self.inner.write().await;
        inner.insert(result.uid.clone(), result);
    }

    pub async fn get_chunk(&self, uid: &str, index: usize) -> ChunkLookup {
        let mut inner = self.inner.write().await;
        let Some(result) = inner.get(uid) else {
            return ChunkLookup::NotFound;
        };
        if result.age() > self.ttl {
            inner.remove(uid);
            return ChunkLookup::Expired;
        }
        let total_chunks = result.total_chunks();
        let Some((rows, is_last)) = result.chunk(index) else {
            return ChunkLookup::OutOfRange;
        };
        let rows = rows.to_vec();
        if is_last {
            inner.remove(uid);
        }
        ChunkLookup::Chunk {
            data: rows,
            index,
            total_chunks,
            is_last,
        }
    }

    pub async fn contains(&self, uid: &str) -> bool {
        self.inner.read().await.contains_key(uid)
    }

    /// Drops entries older than `ttl`. Intended to be driven by a periodic
    /// background task in `overlay-node`, since `get_chunk` alone only
    /// reclaims results that are actually requested again.
    pub async fn sweep_expired(&self) -> usize {
        let mut inner = self.inner.write().await;
        let before = inner.len();
        inner.retain(|_, result| result.age() <= self.ttl);
        before - inner.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QueryFilter;

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| Row {
                latitude: 0.0,
                longitude: 0.0,
                timestamp: format!("t{i}"),
                parameter: "pm25".to_string(),
                value: i as f64,
                unit: "ppm".to_string(),
                aqi: 1,
                site_name: "s".to_string(),
                date: "20200815".to_string(),
            })
            .collect()
    }

    fn metadata() -> ResultMetadata {
        ResultMetadata {
            producing_process: "A".to_string(),
            team: "none".to_string(),
            filters: QueryFilter::default(),
            forwarding_strategy: "round_robin".to_string(),
            chunking_strategy: "fixed".to_string(),
            async_forwarding: false,
        }
    }

    #[tokio::test]
    async fn chunks_cover_all_records_without_overlap() {
        let result = ChunkedResult::new("u1".to_string(), rows(7), 3, metadata());
        assert_eq!(result.total_chunks(), 3);
        let mut seen = 0;
        for i in 0..result.total_chunks() {
            let (chunk, is_last) = result.chunk(i).unwrap();
            seen += chunk.len();
            assert_eq!(is_last, i == result.total_chunks() - 1);
        }
        assert_eq!(seen, 7);
    }

    #[tokio::test]
    async fn last_chunk_evicts_eagerly() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache.insert(ChunkedResult::new("u1".to_string(), rows(2), 2, metadata())).await;
        assert!(cache.contains("u1").await);
        let lookup = cache.get_chunk("u1", 0).await;
        assert!(matches!(lookup, ChunkLookup::Chunk { is_last: true, .. }));
        assert!(!cache.contains("u1").await);
    }

    #[tokio::test]
    async fn out_of_range_does_not_evict() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache.insert(ChunkedResult::new("u1".to_string(), rows(4), 2, metadata())).await;
        let lookup = cache.get_chunk("u1", 99).await;
        assert!(matches!(lookup, ChunkLookup::OutOfRange));
        assert!(cache.contains("u1").await);
    }

    #[tokio::test]
    async fn expired_entry_is_swept_on_access() {
        let cache = ResultCache::new(Duration::from_millis(1));
        cache.insert(ChunkedResult::new("u1".to_string(), rows(2), 2, metadata())).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let lookup = cache.get_chunk("u1", 0).await;
        assert!(matches!(lookup, ChunkLookup::Expired));
        assert!(!cache.contains("u1").await);
    }
}
