use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use overlay_core::admission::{fairness_strategy, AdmissionController};
use overlay_core::cache::ResultCache;
use overlay_core::chunking::chunking_strategy;
use overlay_core::config::OverlayConfig;
use overlay_core::datasource::{CsvDataSource, DataSource};
use overlay_core::forwarding::{forwarding_strategy, RotationCounter};
use overlay_core::metrics::MetricsTracker;
use overlay_core::orchestrator::{OrchestratorConfig, QueryOrchestrator};
use overlay_node::grpc::proto::overlay_server::OverlayServer;
use overlay_node::grpc::{GrpcNeighborClient, OverlayService};
use tonic::transport::Server;
use tracing_subscriber::EnvFilter;

/// Starts one process of the hierarchical query overlay.
#[derive(Parser, Debug)]
#[command(name = "overlay-node")]
struct Cli {
    /// Path to the JSON topology/config file.
    #[arg(long)]
    config: PathBuf,

    /// This process's id, looked up in the config file.
    #[arg(long, value_name = "ID")]
    process_id: String,

    /// Root directory holding per-team CSV datasets.
    #[arg(long, default_value = "data")]
    dataset_root: PathBuf,

    /// Fixed chunk size used by the `fixed` chunking strategy.
    #[arg(long, default_value_t = 100)]
    chunk_size: usize,

    /// Default (and maximum) value of `limit` on an unspecified query.
    #[arg(long, default_value_t = 100)]
    default_limit: u32,

    /// How long a cached result survives without being fully drained.
    #[arg(long, default_value_t = 300)]
    result_ttl_seconds: u64,

    /// Overall concurrently admitted query cap.
    #[arg(long, default_value_t = 64)]
    max_active: u32,

    /// Per-team concurrently admitted query cap.
    #[arg(long, default_value_t = 16)]
    per_team_limit: u32,

    #[arg(long, default_value = "round_robin")]
    forwarding_strategy: String,

    #[arg(long, default_value_t = false)]
    async_forwarding: bool,

    #[arg(long, default_value = "fixed")]
    chunking_strategy: String,

    #[arg(long, default_value = "strict")]
    fairness_strategy: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Arc::new(OverlayConfig::load(&cli.config)?);
    let process = config.get(&cli.process_id)?.clone();
    let strategies = config.strategies().clone();

    let forwarding_name = strategies.forwarding_strategy.unwrap_or(cli.forwarding_strategy);
    let async_forwarding = strategies.async_forwarding.unwrap_or(cli.async_forwarding);
    let chunking_name = strategies.chunking_strategy.unwrap_or(cli.chunking_strategy);
    let fairness_name = strategies.fairness_strategy.unwrap_or(cli.fairness_strategy);

    let team_members: Vec<_> = config.team_members(&process.team);
    let datasource: Arc<dyn DataSource> = match &process.date_bounds {
        Some(_) => {
            let path = cli.dataset_root.join(format!("{}.csv", process.team));
            match CsvDataSource::load(&path, &process, &team_members) {
                Ok(source) => {
                    tracing::info!(process = %process.id, path = %path.display(), "loaded local datasource");
                    Arc::new(source)
                }
                Err(e) => {
                    tracing::warn!(process = %process.id, error = %e, "failed to load datasource, serving no local rows");
                    Arc::new(CsvDataSource::from_rows(Vec::new()))
                }
            }
        }
        None => {
            tracing::info!(process = %process.id, "no date_bounds configured, acting as pure coordinator");
            Arc::new(CsvDataSource::from_rows(Vec::new()))
        }
    };

    let admission = Arc::new(AdmissionController::new(
        fairness_strategy(&fairness_name),
        cli.per_team_limit,
        cli.max_active,
    ));
    let cache = Arc::new(ResultCache::new(Duration::from_secs(cli.result_ttl_seconds)));
    let metrics = Arc::new(MetricsTracker::default());
    let rotation = Arc::new(RotationCounter::default());
    let neighbor_client = Arc::new(GrpcNeighborClient::new(Duration::from_secs(10)));

    let orchestrator = Arc::new(QueryOrchestrator::new(OrchestratorConfig {
        process_id: process.id.clone(),
        role: process.role,
        team: process.team.clone(),
        default_limit: cli.default_limit,
        config: config.clone(),
        datasource: datasource.clone(),
        admission: admission.clone(),
        cache: cache.clone(),
        forwarding: forwarding_strategy(&forwarding_name, async_forwarding),
        chunking: chunking_strategy(&chunking_name, cli.chunk_size),
        metrics: metrics.clone(),
        rotation,
        neighbor_client,
        async_forwarding,
    }));

    spawn_ttl_sweeper(cache.clone());

    let stats = datasource.stats().await;
    let service = OverlayService {
        orchestrator,
        process_id: process.id.clone(),
        role: process.role,
        team: process.team.clone(),
        max_capacity: cli.max_active,
        data_files_loaded: if stats.row_count > 0 { 1 } else { 0 },
    };

    let addr: SocketAddr = format!("0.0.0.0:{}", process.port).parse()?;
    tracing::info!(process = %process.id, %addr, "overlay node listening");

    Server::builder()
        .add_service(OverlayServer::new(service))
        .serve(addr)
        .await?;

    Ok(())
}

/// Periodically reclaims cached results past their TTL; eager eviction on
/// the last chunk pull handles the common case, this is the fallback for
/// results nobody ever finishes draining (`spec.md` §4.4).
fn spawn_ttl_sweeper(cache: Arc<ResultCache>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            let evicted = cache.sweep_expired().await;
            if evicted > 0 {
                tracing::debug!(evicted, "swept expired cache entries");
            }
        }
    });
}
