use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use overlay_core::admission::{AdmissionController, StrictPerTeamFairness};
use overlay_core::cache::ResultCache;
use overlay_core::chunking::FixedChunking;
use overlay_core::config::{OverlayConfig, ProcessSpec, Role};
use overlay_core::datasource::{CsvDataSource, DataSource};
use overlay_core::forwarding::{NeighborClient, RotationCounter, RoundRobinForwarding};
use overlay_core::metrics::MetricsTracker;
use overlay_core::orchestrator::{OrchestratorConfig, QueryOrchestrator};
use overlay_core::types::{QueryFilter, QueryRequest, Row};

/// Dispatches a forwarded query to an in-process orchestrator keyed by
/// neighbor id, draining its chunks, instead of going over a real socket.
/// Mirrors the teacher's approach of exercising the facade directly rather
/// than standing up a live server (`bpmn-lite-server/tests/integration.rs`).
struct InProcessNeighborClient {
    nodes: HashMap<String, Arc<QueryOrchestrator>>,
}

#[async_trait]
impl NeighborClient for InProcessNeighborClient {
    async fn query_and_drain(&self, neighbor: &ProcessSpec, filter: &QueryFilter, hops: Vec<String>) -> anyhow::Result<Vec<Row>> {
        let Some(orchestrator) = self.nodes.get(&neighbor.id) else {
            return Ok(Vec::new());
        };
        let query_params = serde_json::to_string(filter)?;
        let response = orchestrator
            .execute_query(QueryRequest {
                query_type: "filter".to_string(),
                query_params,
                hops,
                client_id: "forward".to_string(),
            })
            .await;
        if response.status != "ready" || response.uid.is_empty() {
            return Ok(Vec::new());
        }
        let mut rows = Vec::new();
        for index in 0..response.total_chunks {
            let chunk = orchestrator.get_chunk(&response.uid, index as usize).await;
            if chunk.status != "success" {
                break;
            }
            let chunk_rows: Vec<Row> = serde_json::from_str(&chunk.data).unwrap_or_default();
            rows.extend(chunk_rows);
            if chunk.is_last {
                break;
            }
        }
        Ok(rows)
    }
}

fn spec(id: &str, role: Role, team: &str, neighbors: &[&str]) -> ProcessSpec {
    ProcessSpec {
        id: id.to_string(),
        role,
        team: team.to_string(),
        host: "127.0.0.1".to_string(),
        port: 9000,
        neighbors: neighbors.iter().map(|s| s.to_string()).collect(),
        date_bounds: None,
    }
}

fn row(parameter: &str, value: f64, site: &str) -> Row {
    Row {
        latitude: 10.0,
        longitude: 20.0,
        timestamp: "2020-08-15T00:00:00Z".to_string(),
        parameter: parameter.to_string(),
        value,
        unit: "ppm".to_string(),
        aqi: 40,
        site_name: site.to_string(),
        date: "20200815".to_string(),
    }
}

fn pm25_rows(n: usize, site: &str) -> Vec<Row> {
    (0..n).map(|i| row("PM2.5", 10.0 + i as f64, site)).collect()
}

/// Builds the topology from `spec.md` §8: A leader; B/C green team
/// (team_leader/worker); E/F/D pink team (team_leader/worker/worker).
fn topology() -> Arc<OverlayConfig> {
    let processes = vec![
        spec("A", Role::Leader, "none", &["B", "E"]),
        spec("B", Role::TeamLeader, "green", &["C"]),
        spec("C", Role::Worker, "green", &[]),
        spec("E", Role::TeamLeader, "pink", &["F", "D"]),
        spec("F", Role::Worker, "pink", &[]),
        spec("D", Role::Worker, "pink", &[]),
    ];
    let mut map = HashMap::new();
    for p in processes {
        map.insert(p.id.clone(), p);
    }
    let raw = serde_json::to_string(&serde_json::json!({ "processes": map })).unwrap();
    Arc::new(OverlayConfig::parse(&raw).unwrap())
}

fn build_orchestrator(
    id: &str,
    role: Role,
    team: &str,
    config: Arc<OverlayConfig>,
    datasource: Arc<dyn DataSource>,
    neighbor_client: Arc<dyn NeighborClient>,
) -> Arc<QueryOrchestrator> {
    Arc::new(QueryOrchestrator::new(OrchestratorConfig {
        process_id: id.to_string(),
        role,
        team: team.to_string(),
        default_limit: 100,
        config,
        datasource,
        admission: Arc::new(AdmissionController::new(Box::new(StrictPerTeamFairness), 16, 64)),
        cache: Arc::new(ResultCache::new(Duration::from_secs(300))),
        forwarding: Box::new(RoundRobinForwarding { parallel: false }),
        chunking: Box::new(FixedChunking { size: 100 }),
        metrics: Arc::new(MetricsTracker::default()),
        rotation: Arc::new(RotationCounter::default()),
        neighbor_client,
        async_forwarding: false,
    }))
}

fn empty_source() -> Arc<dyn DataSource> {
    Arc::new(CsvDataSource::from_rows(Vec::new()))
}

/// Wires up the six-node tree with workers C, F, D each owning local rows,
/// team leaders B, E owning none, and a registry so forwarded queries reach
/// the right sibling orchestrator.
fn build_tree() -> Arc<QueryOrchestrator> {
    let config = topology();

    let c = build_orchestrator("C", Role::Worker, "green", config.clone(), Arc::new(CsvDataSource::from_rows(pm25_rows(30, "C"))), Arc::new(InProcessNeighborClient { nodes: HashMap::new() }));
    let f = build_orchestrator("F", Role::Worker, "pink", config.clone(), Arc::new(CsvDataSource::from_rows(pm25_rows(30, "F"))), Arc::new(InProcessNeighborClient { nodes: HashMap::new() }));
    let d = build_orchestrator("D", Role::Worker, "pink", config.clone(), Arc::new(CsvDataSource::from_rows(pm25_rows(30, "D"))), Arc::new(InProcessNeighborClient { nodes: HashMap::new() }));

    let mut b_nodes = HashMap::new();
    b_nodes.insert("C".to_string(), c.clone());
    let b = build_orchestrator("B", Role::TeamLeader, "green", config.clone(), empty_source(), Arc::new(InProcessNeighborClient { nodes: b_nodes }));

    let mut e_nodes = HashMap::new();
    e_nodes.insert("F".to_string(), f.clone());
    e_nodes.insert("D".to_string(), d.clone());
    let e = build_orchestrator("E", Role::TeamLeader, "pink", config.clone(), empty_source(), Arc::new(InProcessNeighborClient { nodes: e_nodes }));

    let mut a_nodes = HashMap::new();
    a_nodes.insert("B".to_string(), b.clone());
    a_nodes.insert("E".to_string(), e.clone());
    build_orchestrator("A", Role::Leader, "none", config, empty_source(), Arc::new(InProcessNeighborClient { nodes: a_nodes }))
}

fn request(limit: u32) -> QueryRequest {
    let params = serde_json::json!({
        "parameter": "PM2.5",
        "min_value": 10,
        "max_value": 50,
        "limit": limit,
    });
    QueryRequest {
        query_type: "filter".to_string(),
        query_params: params.to_string(),
        hops: vec![],
        client_id: "test-client".to_string(),
    }
}

#[tokio::test]
async fn single_node_local_query() {
    let config = topology();
    let worker = build_orchestrator(
        "C",
        Role::Worker,
        "green",
        config,
        Arc::new(CsvDataSource::from_rows(pm25_rows(30, "C"))),
        Arc::new(InProcessNeighborClient { nodes: HashMap::new() }),
    );
    let response = worker.execute_query(request(100)).await;
    assert_eq!(response.status, "ready");
    assert!(response.total_records <= 100);
}

#[tokio::test]
async fn leader_fan_out_aggregates_both_teams() {
    let a = build_tree();
    let response = a.execute_query(request(100)).await;
    assert_eq!(response.status, "ready");
    assert_eq!(response.hops.first().map(String::as_str), Some("A"));
    assert!(response.total_records <= 100);
    assert!(response.total_records > 0);
}

#[tokio::test]
async fn limit_one_is_satisfied_by_exactly_one_branch() {
    let a = build_tree();
    let response = a.execute_query(request(1)).await;
    assert_eq!(response.status, "ready");
    assert_eq!(response.total_records, 1);
}

#[tokio::test]
async fn chunk_drain_covers_exact_row_count_then_not_found() {
    let config = topology();
    let worker = build_orchestrator(
        "C",
        Role::Worker,
        "green",
        config,
        Arc::new(CsvDataSource::from_rows(pm25_rows(30, "C"))),
        Arc::new(InProcessNeighborClient { nodes: HashMap::new() }),
    );
    let response = worker.execute_query(request(25)).await;
    let mut total = 0usize;
    for i in 0..response.total_chunks {
        let chunk = worker.get_chunk(&response.uid, i as usize).await;
        assert_eq!(chunk.status, "success");
        let rows: Vec<Row> = serde_json::from_str(&chunk.data).unwrap();
        total += rows.len();
        if i + 1 == response.total_chunks {
            assert!(chunk.is_last);
        }
    }
    assert_eq!(total as u64, response.total_records);

    let after_drain = worker.get_chunk(&response.uid, 0).await;
    assert_eq!(after_drain.status, "not_found");
}

#[tokio::test]
async fn hops_containing_self_is_loop_detected() {
    let config = topology();
    let worker = build_orchestrator(
        "C",
        Role::Worker,
        "green",
        config,
        empty_source(),
        Arc::new(InProcessNeighborClient { nodes: HashMap::new() }),
    );
    let mut req = request(10);
    req.hops = vec!["C".to_string()];
    let response = worker.execute_query(req).await;
    assert_eq!(response.status, "loop_detected");
}

/// Wraps a `NeighborClient` with an artificial delay, standing in for a
/// neighbor that is slow to answer, so two concurrently submitted queries
/// race the admission controller the way `spec.md` §8 scenario 6 describes.
struct SlowNeighborClient {
    inner: InProcessNeighborClient,
    delay: Duration,
}

#[async_trait]
impl NeighborClient for SlowNeighborClient {
    async fn query_and_drain(&self, neighbor: &ProcessSpec, filter: &QueryFilter, hops: Vec<String>) -> anyhow::Result<Vec<Row>> {
        tokio::time::sleep(self.delay).await;
        self.inner.query_and_drain(neighbor, filter, hops).await
    }
}

#[tokio::test]
async fn admission_rejection_blocks_concurrent_second_query() {
    let config = topology();
    let c = build_orchestrator(
        "C",
        Role::Worker,
        "green",
        config.clone(),
        Arc::new(CsvDataSource::from_rows(pm25_rows(5, "C"))),
        Arc::new(InProcessNeighborClient { nodes: HashMap::new() }),
    );
    let mut nodes = HashMap::new();
    nodes.insert("C".to_string(), c);
    let admission = Arc::new(AdmissionController::new(Box::new(StrictPerTeamFairness), 1, 64));
    let orchestrator = Arc::new(QueryOrchestrator::new(OrchestratorConfig {
        process_id: "B".to_string(),
        role: Role::TeamLeader,
        team: "green".to_string(),
        default_limit: 100,
        config,
        datasource: empty_source(),
        admission: admission.clone(),
        cache: Arc::new(ResultCache::new(Duration::from_secs(300))),
        forwarding: Box::new(RoundRobinForwarding { parallel: false }),
        chunking: Box::new(FixedChunking { size: 100 }),
        metrics: Arc::new(MetricsTracker::default()),
        rotation: Arc::new(RotationCounter::default()),
        neighbor_client: Arc::new(SlowNeighborClient {
            inner: InProcessNeighborClient { nodes },
            delay: Duration::from_millis(100),
        }),
        async_forwarding: false,
    }));

    let first = orchestrator.execute_query(request(10));
    let second_delayed = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        orchestrator.execute_query(request(10)).await
    };
    let (first_response, second_response) = tokio::join!(first, second_delayed);

    assert_eq!(first_response.status, "ready");
    assert_eq!(second_response.status, "rejected");
    assert_eq!(admission.rejections().await, 1);
}

/// Delegates to an `InProcessNeighborClient`, except for one neighbor id
/// which always errors — simulates the neighbor outage in `spec.md` §8's
/// "Neighbor outage" scenario.
struct OutageClient {
    inner: InProcessNeighborClient,
    unreachable: String,
}

#[async_trait]
impl NeighborClient for OutageClient {
    async fn query_and_drain(&self, neighbor: &ProcessSpec, filter: &QueryFilter, hops: Vec<String>) -> anyhow::Result<Vec<Row>> {
        if neighbor.id == self.unreachable {
            anyhow::bail!("neighbor {} unreachable", neighbor.id);
        }
        self.inner.query_and_drain(neighbor, filter, hops).await
    }
}

#[tokio::test]
async fn neighbor_outage_is_isolated_and_logged() {
    let config = topology();
    let b = build_orchestrator(
        "B",
        Role::TeamLeader,
        "green",
        config.clone(),
        empty_source(),
        Arc::new(InProcessNeighborClient { nodes: HashMap::new() }),
    );
    let mut nodes = HashMap::new();
    nodes.insert("B".to_string(), b);
    let a = Arc::new(QueryOrchestrator::new(OrchestratorConfig {
        process_id: "A".to_string(),
        role: Role::Leader,
        team: "none".to_string(),
        default_limit: 100,
        config,
        datasource: empty_source(),
        admission: Arc::new(AdmissionController::new(Box::new(StrictPerTeamFairness), 16, 64)),
        cache: Arc::new(ResultCache::new(Duration::from_secs(300))),
        forwarding: Box::new(RoundRobinForwarding { parallel: false }),
        chunking: Box::new(FixedChunking { size: 100 }),
        metrics: Arc::new(MetricsTracker::default()),
        rotation: Arc::new(RotationCounter::default()),
        neighbor_client: Arc::new(OutageClient {
            inner: InProcessNeighborClient { nodes },
            unreachable: "E".to_string(),
        }),
        async_forwarding: false,
    }));

    let response = a.execute_query(request(100)).await;
    assert_eq!(response.status, "ready");

    let snapshot = a.get_metrics().await;
    assert!(snapshot.recent_log.iter().any(|line| line.contains('E') && line.contains("unavailable")));
}
