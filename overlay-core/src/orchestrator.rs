use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::admission::AdmissionController;
use crate::cache::{ChunkLookup, ChunkedResult, ResultCache};
use crate::chunking::ChunkingStrategy;
use crate::config::{OverlayConfig, ProcessSpec, Role};
use crate::datasource::DataSource;
use crate::error::FilterParseError;
use crate::forwarding::{ForwardingStrategy, NeighborClient, RotationCounter};
use crate::metrics::{MetricsSnapshot, MetricsTracker};
use crate::types::{ChunkResponse, QueryFilter, QueryRequest, QueryResponse, ResultMetadata};

/// Ties together every pluggable piece into the request handling state
/// machine described by `spec.md` §4.6. Grounded in
/// `examples/original_source/overlay_core/facade.py`'s `OverlayFacade`:
/// `execute_query`, `get_chunk`, and `build_metrics_response`.
pub struct QueryOrchestrator {
    process_id: String,
    role: Role,
    team: String,
    default_limit: u32,
    config: Arc<OverlayConfig>,
    datasource: Arc<dyn DataSource>,
    admission: Arc<AdmissionController>,
    cache: Arc<ResultCache>,
    forwarding: Box<dyn ForwardingStrategy>,
    chunking: Box<dyn ChunkingStrategy>,
    metrics: Arc<MetricsTracker>,
    rotation: Arc<RotationCounter>,
    neighbor_client: Arc<dyn NeighborClient>,
    async_forwarding: bool,
}

pub struct OrchestratorConfig {
    pub process_id: String,
    pub role: Role,
    pub team: String,
    pub default_limit: u32,
    pub config: Arc<OverlayConfig>,
    pub datasource: Arc<dyn DataSource>,
    pub admission: Arc<AdmissionController>,
    pub cache: Arc<ResultCache>,
    pub forwarding: Box<dyn ForwardingStrategy>,
    pub chunking: Box<dyn ChunkingStrategy>,
    pub metrics: Arc<MetricsTracker>,
    pub rotation: Arc<RotationCounter>,
    pub neighbor_client: Arc<dyn NeighborClient>,
    pub async_forwarding: bool,
}

impl QueryOrchestrator {
    pub fn new(cfg: OrchestratorConfig) -> Self {
        Self {
            process_id: cfg.process_id,
            role: cfg.role,
            team: cfg.team,
            default_limit: cfg.default_limit,
            config: cfg.config,
            datasource: cfg.datasource,
            admission: cfg.admission,
            cache: cfg.cache,
            forwarding: cfg.forwarding,
            chunking: cfg.chunking,
            metrics: cfg.metrics,
            rotation: cfg.rotation,
            neighbor_client: cfg.neighbor_client,
            async_forwarding: cfg.async_forwarding,
        }
    }

    pub async fn execute_query(&self, request: QueryRequest) -> QueryResponse {
        let started = Instant::now();

        if request.hops.iter().any(|h| h == &self.process_id) {
            tracing::warn!(process = %self.process_id, client = %request.client_id, "loop detected, dropping query");
            return QueryResponse::empty(request.hops, "loop_detected");
        }
        let mut hops = request.hops.clone();
        hops.push(self.process_id.clone());

        let filter = match QueryFilter::parse(&request.query_params, self.default_limit) {
            Ok(f) => f,
            Err(e) => return self.invalid_query_response(hops, &e),
        };

        let team = filter.team.clone().unwrap_or_else(|| self.team.clone());
        let uid = Uuid::new_v4().to_string();

        let decision = self.admission.try_admit(&team, &uid).await;
        if !decision.admitted {
            tracing::info!(process = %self.process_id, %team, "query rejected by admission control");
            return QueryResponse::empty(hops, "rejected");
        }

        let limit = filter.limit as usize;
        let mut records = self.datasource.query(&filter, limit).await;

        if records.len() < limit {
            let neighbors = self.rotated(self.select_forward_targets(&hops));
            if !neighbors.is_empty() {
                let budget = limit - records.len();
                let outcome = self
                    .forwarding
                    .forward(&neighbors, &filter, &hops, budget, self.neighbor_client.as_ref())
                    .await;
                for failed in &outcome.failed_neighbors {
                    let line = format!("neighbor {failed} unavailable during fan-out from {}", self.process_id);
                    tracing::warn!(process = %self.process_id, neighbor = %failed, "neighbor unavailable during fan-out");
                    self.metrics.record_log(line).await;
                }
                records.extend(outcome.rows);
            }
        }
        records.truncate(limit);

        let chunk_size = self.chunking.chunk_size(records.len(), &filter);
        let metadata = ResultMetadata {
            producing_process: self.process_id.clone(),
            team: team.clone(),
            filters: filter,
            forwarding_strategy: self.forwarding.name().to_string(),
            chunking_strategy: self.chunking.name().to_string(),
            async_forwarding: self.async_forwarding,
        };

        let total_records = records.len() as u64;
        let result = ChunkedResult::new(uid.clone(), records, chunk_size, metadata);
        let total_chunks = result.total_chunks() as u64;
        self.cache.insert(result).await;

        self.admission.release(&uid).await;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics
            .record_query(
                elapsed_ms,
                total_records > 0,
                format!("{} query by {} -> {total_records} records, uid={uid}", self.process_id, request.client_id),
            )
            .await;

        QueryResponse {
            uid,
            total_chunks,
            total_records,
            hops,
            status: "ready".to_string(),
        }
    }

    /// Role-gated neighbor selection (`spec.md` §4.5): a leader only fans out
    /// to team leaders, a team leader only to same-team workers, a worker
    /// never fans out. Neighbors already visited on this request's path are
    /// dropped as a cycle guard.
    fn select_forward_targets(&self, hops: &[String]) -> Vec<ProcessSpec> {
        let neighbors = self.config.neighbors(&self.process_id).unwrap_or_default();
        neighbors
            .into_iter()
            .filter(|n| !hops.iter().any(|h| h == &n.id))
            .filter(|n| match self.role {
                Role::Leader => n.role == Role::TeamLeader,
                Role::TeamLeader => n.role == Role::Worker && n.team == self.team,
                Role::Worker => false,
            })
            .cloned()
            .collect()
    }

    /// Rotates the neighbor list so successive queries start fan-out at a
    /// different member, spreading load under small per-neighbor budgets
    /// (`spec.md` §4.5 "Ordering").
    fn rotated(&self, mut neighbors: Vec<ProcessSpec>) -> Vec<ProcessSpec> {
        if neighbors.is_empty() {
            return neighbors;
        }
        let start = self.rotation.next() % neighbors.len();
        neighbors.rotate_left(start);
        neighbors
    }

    pub async fn get_chunk(&self, uid: &str, index: usize) -> ChunkResponse {
        match self.cache.get_chunk(uid, index).await {
            ChunkLookup::Chunk { data, index, total_chunks, is_last } => ChunkResponse {
                uid: uid.to_string(),
                chunk_index: index as u64,
                total_chunks: total_chunks as u64,
                data: serde_json::to_string(&data).unwrap_or_else(|_| "[]".to_string()),
                is_last,
                status: "success".to_string(),
            },
            ChunkLookup::OutOfRange => ChunkResponse {
                uid: uid.to_string(),
                chunk_index: index as u64,
                total_chunks: 0,
                data: String::new(),
                is_last: false,
                status: "out_of_range".to_string(),
            },
            ChunkLookup::Expired => ChunkResponse {
                uid: uid.to_string(),
                chunk_index: index as u64,
                total_chunks: 0,
                data: String::new(),
                is_last: false,
                status: "not_found".to_string(),
            },
            ChunkLookup::NotFound => ChunkResponse {
                uid: uid.to_string(),
                chunk_index: index as u64,
                total_chunks: 0,
                data: String::new(),
                is_last: false,
                status: "not_found".to_string(),
            },
        }
    }

    pub async fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics
            .snapshot(
                self.admission.rejections().await,
                self.admission.active_count().await,
                self.cache.len().await,
                self.forwarding.name().to_string(),
                self.async_forwarding,
                self.chunking.name().to_string(),
                self.admission.strategy_name().to_string(),
            )
            .await
    }

    fn invalid_query_response(&self, hops: Vec<String>, err: &FilterParseError) -> QueryResponse {
        QueryResponse::empty(hops, format!("invalid_query:{}", err.reason()))
    }
}
