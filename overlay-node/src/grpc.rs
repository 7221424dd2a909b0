use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};

use overlay_core::config::{ProcessSpec, Role};
use overlay_core::forwarding::NeighborClient;
use overlay_core::orchestrator::QueryOrchestrator;
use overlay_core::types::{QueryRequest as CoreQueryRequest, QueryFilter, Row};

#[allow(clippy::enum_variant_names)]
pub mod proto {
    tonic::include_proto!("overlay.v1");
}

use proto::overlay_server::Overlay;
use proto::*;

pub struct OverlayService {
    pub orchestrator: Arc<QueryOrchestrator>,
    pub process_id: String,
    pub role: Role,
    pub team: String,
    pub max_capacity: u32,
    pub data_files_loaded: u32,
}

#[tonic::async_trait]
impl Overlay for OverlayService {
    async fn query(&self, request: Request<QueryRequest>) -> Result<Response<QueryResponse>, Status> {
        let req = request.into_inner();
        let response = self
            .orchestrator
            .execute_query(CoreQueryRequest {
                query_type: req.query_type,
                query_params: req.query_params,
                hops: req.hops,
                client_id: req.client_id,
            })
            .await;

        Ok(Response::new(QueryResponse {
            uid: response.uid,
            total_chunks: response.total_chunks,
            total_records: response.total_records,
            hops: response.hops,
            status: response.status,
        }))
    }

    async fn get_chunk(&self, request: Request<ChunkRequest>) -> Result<Response<ChunkResponse>, Status> {
        let req = request.into_inner();
        let response = self.orchestrator.get_chunk(&req.uid, req.chunk_index as usize).await;

        Ok(Response::new(ChunkResponse {
            uid: response.uid,
            chunk_index: response.chunk_index,
            total_chunks: response.total_chunks,
            data: response.data,
            is_last: response.is_last,
            status: response.status,
        }))
    }

    async fn get_metrics(&self, _request: Request<MetricsRequest>) -> Result<Response<MetricsResponse>, Status> {
        let snapshot = self.orchestrator.get_metrics().await;

        Ok(Response::new(MetricsResponse {
            process_id: self.process_id.clone(),
            role: role_name(self.role).to_string(),
            team: self.team.clone(),
            active_requests: snapshot.active_requests,
            max_capacity: self.max_capacity,
            is_healthy: snapshot.is_healthy,
            queue_size: snapshot.queue_size as u32,
            avg_processing_time_ms: snapshot.avg_processing_time_ms,
            data_files_loaded: self.data_files_loaded,
            forwarding_strategy: snapshot.forwarding_strategy,
            async_forwarding: snapshot.async_forwarding,
            chunking_strategy: snapshot.chunking_strategy,
            fairness_strategy: snapshot.fairness_strategy,
            recent_logs: snapshot.recent_log,
        }))
    }

    async fn shutdown(&self, _request: Request<ShutdownRequest>) -> Result<Response<ShutdownResponse>, Status> {
        tracing::info!(process = %self.process_id, "shutdown requested");
        Ok(Response::new(ShutdownResponse { ok: true }))
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::Leader => "leader",
        Role::TeamLeader => "team_leader",
        Role::Worker => "worker",
    }
}

/// Lazily connects and caches one gRPC client channel per neighbor.
/// Mirrors `examples/original_source/overlay_core/proxies.py`'s
/// `ProxyRegistry`/`NodeProxy`.
pub struct GrpcNeighborClient {
    clients: Mutex<HashMap<String, proto::overlay_client::OverlayClient<Channel>>>,
    call_timeout: Duration,
}

impl GrpcNeighborClient {
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            call_timeout,
        }
    }

    async fn client_for(&self, neighbor: &ProcessSpec) -> anyhow::Result<proto::overlay_client::OverlayClient<Channel>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&neighbor.id) {
            return Ok(client.clone());
        }
        let endpoint = tonic::transport::Endpoint::from_shared(format!("http://{}", neighbor.address()))?
            .timeout(self.call_timeout)
            .connect_timeout(self.call_timeout);
        let channel = endpoint.connect().await?;
        let client = proto::overlay_client::OverlayClient::new(channel);
        clients.insert(neighbor.id.clone(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl NeighborClient for GrpcNeighborClient {
    async fn query_and_drain(&self, neighbor: &ProcessSpec, filter: &QueryFilter, hops: Vec<String>) -> anyhow::Result<Vec<Row>> {
        let mut client = self.client_for(neighbor).await?;

        let query_params = serde_json::to_string(filter)?;
        let response = client
            .query(QueryRequest {
                query_type: "filter".to_string(),
                query_params,
                hops,
                client_id: format!("forward:{}", neighbor.id),
            })
            .await?
            .into_inner();

        if response.status != "ready" || response.uid.is_empty() {
            return Ok(Vec::new());
        }

        let mut rows = Vec::new();
        let mut remaining = filter.limit as i64;
        for index in 0..response.total_chunks {
            if remaining <= 0 {
                break;
            }
            let chunk = client
                .get_chunk(ChunkRequest {
                    uid: response.uid.clone(),
                    chunk_index: index,
                })
                .await?
                .into_inner();
            if chunk.status != "success" {
                break;
            }
            let chunk_rows: Vec<Row> = serde_json::from_str(&chunk.data).unwrap_or_default();
            remaining -= chunk_rows.len() as i64;
            rows.extend(chunk_rows);
            if chunk.is_last {
                break;
            }
        }
        Ok(rows)
    }
}
