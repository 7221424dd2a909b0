use async_trait::async_trait;

use crate::config::ProcessSpec;
use crate::types::{QueryFilter, Row};

/// Decouples the orchestrator from the RPC transport. `overlay-node`
/// implements this over a `tonic` client channel per neighbor; tests use an
/// in-memory fake. Mirrors `examples/original_source/overlay_core/proxies.py`'s
/// `NodeProxy`.
#[async_trait]
pub trait NeighborClient: Send + Sync {
    /// Issues a `Query` RPC and drains every chunk via `GetChunk`, returning
    /// the concatenated rows. Returns `Err` on any transport or remote
    /// failure; the caller treats that as "this neighbor contributed
    /// nothing" rather than failing the whole query (`spec.md` §7: neighbor
    /// outages are isolated).
    async fn query_and_drain(&self, neighbor: &ProcessSpec, filter: &QueryFilter, hops: Vec<String>) -> anyhow::Result<Vec<Row>>;
}

/// Result of fanning a query out to a set of neighbors: the rows collected,
/// plus the id of every neighbor whose `query_and_drain` call failed so the
/// caller can log a per-neighbor outage (`spec.md` §7: neighbor outages are
/// isolated, not silently dropped).
#[derive(Default)]
pub struct ForwardOutcome {
    pub rows: Vec<Row>,
    pub failed_neighbors: Vec<String>,
}

/// Chooses which neighbors to forward to and how many records to request
/// from each, then drains their results through a [`NeighborClient`].
/// Grounded in `strategies.py`'s `RoundRobinForwarding` / `ParallelForwarding`;
/// `CapacityBasedForwarding` has no original-source counterpart (see
/// `DESIGN.md`).
#[async_trait]
pub trait ForwardingStrategy: Send + Sync {
    async fn forward(
        &self,
        neighbors: &[ProcessSpec],
        filter: &QueryFilter,
        hops: &[String],
        budget: usize,
        client: &dyn NeighborClient,
    ) -> ForwardOutcome;

    fn name(&self) -> &'static str;
}

/// Splits `budget` across `neighbors` (base share plus round-robin
/// remainder, rotation index supplied by the caller) and queries them one
/// at a time, stopping once `budget` rows have been collected.
pub struct RoundRobinForwarding {
    pub parallel: bool,
}

impl RoundRobinForwarding {
    fn per_neighbor_limits(neighbors: &[ProcessSpec], budget: usize, rotation: usize) -> Vec<usize> {
        allocate_limits(neighbors.len(), budget, rotation)
    }
}

#[async_trait]
impl ForwardingStrategy for RoundRobinForwarding {
    async fn forward(
        &self,
        neighbors: &[ProcessSpec],
        filter: &QueryFilter,
        hops: &[String],
        budget: usize,
        client: &dyn NeighborClient,
    ) -> ForwardOutcome {
        if neighbors.is_empty() || budget == 0 {
            return ForwardOutcome::default();
        }
        let limits = Self::per_neighbor_limits(neighbors, budget, 0);

        if self.parallel {
            let futures = neighbors.iter().zip(limits.iter()).map(|(n, &limit)| {
                let f = filter.with_limit(limit).with_team(&n.team);
                let h = hops.to_vec();
                async move { (n.id.clone(), client.query_and_drain(n, &f, h).await) }
            });
            let results = futures::future::join_all(futures).await;
            let mut collected = Vec::new();
            let mut failed = Vec::new();
            for (id, result) in results {
                match result {
                    Ok(rows) => collected.extend(rows),
                    Err(_) => failed.push(id),
                }
            }
            collected.truncate(budget);
            ForwardOutcome { rows: collected, failed_neighbors: failed }
        } else {
            let mut collected = Vec::new();
            let mut failed = Vec::new();
            for (neighbor, limit) in neighbors.iter().zip(limits.iter()) {
                if collected.len() >= budget {
                    break;
                }
                let remaining = budget - collected.len();
                let f = filter.with_limit(remaining.min(*limit).max(1)).with_team(&neighbor.team);
                match client.query_and_drain(neighbor, &f, hops.to_vec()).await {
                    Ok(rows) => collected.extend(rows),
                    Err(_) => failed.push(neighbor.id.clone()),
                }
            }
            collected.truncate(budget);
            ForwardOutcome { rows: collected, failed_neighbors: failed }
        }
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

/// Always fans out to every neighbor concurrently; the blocking form falls
/// back to sequential calls (mirrors `strategies.py`'s `ParallelForwarding`,
/// whose blocking path degrades to a sequential loop rather than using
/// threads).
pub struct ParallelForwarding;

#[async_trait]
impl ForwardingStrategy for ParallelForwarding {
    async fn forward(
        &self,
        neighbors: &[ProcessSpec],
        filter: &QueryFilter,
        hops: &[String],
        budget: usize,
        client: &dyn NeighborClient,
    ) -> ForwardOutcome {
        if neighbors.is_empty() || budget == 0 {
            return ForwardOutcome::default();
        }
        let limits = allocate_limits(neighbors.len(), budget, 0);
        let futures = neighbors.iter().zip(limits.iter()).map(|(n, &limit)| {
            let f = filter.with_limit(limit).with_team(&n.team);
            let h = hops.to_vec();
            async move { (n.id.clone(), client.query_and_drain(n, &f, h).await) }
        });
        let results = futures::future::join_all(futures).await;
        let mut collected = Vec::new();
        let mut failed = Vec::new();
        for (id, result) in results {
            match result {
                Ok(rows) => collected.extend(rows),
                Err(_) => failed.push(id),
            }
        }
        collected.truncate(budget);
        ForwardOutcome { rows: collected, failed_neighbors: failed }
    }

    fn name(&self) -> &'static str {
        "parallel"
    }
}

/// Weights each neighbor's share of `budget` by a simple proxy for its
/// remaining capacity: workers get a larger share than team leaders, since
/// team leaders also field their own local queries.
pub struct CapacityBasedForwarding;

#[async_trait]
impl ForwardingStrategy for CapacityBasedForwarding {
    async fn forward(
        &self,
        neighbors: &[ProcessSpec],
        filter: &QueryFilter,
        hops: &[String],
        budget: usize,
        client: &dyn NeighborClient,
    ) -> ForwardOutcome {
        if neighbors.is_empty() || budget == 0 {
            return ForwardOutcome::default();
        }
        let weights: Vec<u32> = neighbors.iter().map(|n| n.role.share_weight()).collect();
        let total_weight: u32 = weights.iter().sum::<u32>().max(1);
        let limits: Vec<usize> = weights
            .iter()
            .map(|w| ((*w as f64 / total_weight as f64) * budget as f64).round().max(1.0) as usize)
            .collect();

        let futures = neighbors.iter().zip(limits.iter()).map(|(n, &limit)| {
            let f = filter.with_limit(limit).with_team(&n.team);
            let h = hops.to_vec();
            async move { (n.id.clone(), client.query_and_drain(n, &f, h).await) }
        });
        let results = futures::future::join_all(futures).await;
        let mut collected = Vec::new();
        let mut failed = Vec::new();
        for (id, result) in results {
            match result {
                Ok(rows) => collected.extend(rows),
                Err(_) => failed.push(id),
            }
        }
        collected.truncate(budget);
        ForwardOutcome { rows: collected, failed_neighbors: failed }
    }

    fn name(&self) -> &'static str {
        "capacity"
    }
}

pub fn forwarding_strategy(name: &str, parallel: bool) -> Box<dyn ForwardingStrategy> {
    match name {
        "parallel" => Box::new(ParallelForwarding),
        "capacity" => Box::new(CapacityBasedForwarding),
        _ => Box::new(RoundRobinForwarding { parallel }),
    }
}

/// Splits `budget` across `count` neighbors: each gets `budget / count`, and
/// the first `budget % count` (starting at `rotation`) get one extra, so
/// repeated calls rotate who absorbs the remainder.
fn allocate_limits(count: usize, budget: usize, rotation: usize) -> Vec<usize> {
    if count == 0 {
        return Vec::new();
    }
    let base = budget / count;
    let remainder = budget % count;
    (0..count)
        .map(|i| {
            let gets_extra = (i + count - (rotation % count)) % count < remainder;
            if gets_extra {
                base + 1
            } else {
                base
            }
        })
        .collect()
}

/// Process-wide rotation counter so successive queries start round-robin
/// allocation at a different neighbor (`facade.py`'s `_rr_lock`/`_rr_index`).
pub struct RotationCounter {
    counter: std::sync::atomic::AtomicUsize,
}

impl Default for RotationCounter {
    fn default() -> Self {
        Self {
            counter: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

impl RotationCounter {
    pub fn next(&self) -> usize {
        self.counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}
