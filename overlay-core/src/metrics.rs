use std::collections::VecDeque;

use tokio::sync::RwLock;

const MAX_SAMPLES: usize = 100;
const MAX_LOG_LINES: usize = 50;

#[derive(Default)]
struct Inner {
    processing_times_ms: VecDeque<f64>,
    queries_handled: u64,
    queries_forwarded: u64,
    log: VecDeque<String>,
}

/// Rolling performance counters for one process, exposed via `GetMetrics`.
/// The capped ring buffer for processing times mirrors
/// `examples/original_source/node.py`'s `processing_times` list, which pops
/// its oldest entry once it grows past 100.
pub struct MetricsTracker {
    inner: RwLock<Inner>,
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MetricsSnapshot {
    pub queries_handled: u64,
    pub queries_forwarded: u64,
    pub avg_processing_time_ms: f64,
    pub is_healthy: bool,
    pub recent_log: Vec<String>,
    pub active_requests: u32,
    pub queue_size: usize,
    pub forwarding_strategy: String,
    pub async_forwarding: bool,
    pub chunking_strategy: String,
    pub fairness_strategy: String,
}

impl MetricsTracker {
    pub async fn record_query(&self, processing_time_ms: f64, forwarded: bool, log_line: impl Into<String>) {
        let mut inner = self.inner.write().await;
        inner.queries_handled += 1;
        if forwarded {
            inner.queries_forwarded += 1;
        }
        inner.processing_times_ms.push_back(processing_time_ms);
        if inner.processing_times_ms.len() > MAX_SAMPLES {
            inner.processing_times_ms.pop_front();
        }
        inner.log.push_back(log_line.into());
        if inner.log.len() > MAX_LOG_LINES {
            inner.log.pop_front();
        }
    }

    /// Pushes a standalone log line (e.g. a neighbor outage) onto the ring
    /// buffer without affecting the query/forwarding counters.
    pub async fn record_log(&self, log_line: impl Into<String>) {
        let mut inner = self.inner.write().await;
        inner.log.push_back(log_line.into());
        if inner.log.len() > MAX_LOG_LINES {
            inner.log.pop_front();
        }
    }

    /// `is_healthy` mirrors the spec's stated default: it flips to `false`
    /// as soon as the admission controller has ever rejected a query, and
    /// stays that way for the life of the process. The live-state fields
    /// (`active_requests`, `queue_size`, strategy names) are supplied by the
    /// caller, since the tracker itself only owns the rolling counters.
    #[allow(clippy::too_many_arguments)]
    pub async fn snapshot(
        &self,
        admission_rejections: u64,
        active_requests: u32,
        queue_size: usize,
        forwarding_strategy: String,
        async_forwarding: bool,
        chunking_strategy: String,
        fairness_strategy: String,
    ) -> MetricsSnapshot {
        let inner = self.inner.read().await;
        let avg = if inner.processing_times_ms.is_empty() {
            0.0
        } else {
            inner.processing_times_ms.iter().sum::<f64>() / inner.processing_times_ms.len() as f64
        };
        MetricsSnapshot {
            queries_handled: inner.queries_handled,
            queries_forwarded: inner.queries_forwarded,
            avg_processing_time_ms: avg,
            is_healthy: admission_rejections == 0,
            recent_log: inner.log.iter().cloned().collect(),
            active_requests,
            queue_size,
            forwarding_strategy,
            async_forwarding,
            chunking_strategy,
            fairness_strategy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_snapshot_args() -> (u64, u32, usize, String, bool, String, String) {
        (0, 0, 0, "round_robin".to_string(), false, "fixed".to_string(), "strict".to_string())
    }

    #[tokio::test]
    async fn averages_processing_time() {
        let tracker = MetricsTracker::default();
        tracker.record_query(10.0, false, "q1").await;
        tracker.record_query(20.0, true, "q2").await;
        let (rejections, active, queue, fwd, async_fwd, chunk, fair) = empty_snapshot_args();
        let snapshot = tracker.snapshot(rejections, active, queue, fwd, async_fwd, chunk, fair).await;
        assert_eq!(snapshot.queries_handled, 2);
        assert_eq!(snapshot.queries_forwarded, 1);
        assert_eq!(snapshot.avg_processing_time_ms, 15.0);
    }

    #[tokio::test]
    async fn caps_rolling_sample_window() {
        let tracker = MetricsTracker::default();
        for i in 0..150 {
            tracker.record_query(i as f64, false, format!("q{i}")).await;
        }
        let inner = tracker.inner.read().await;
        assert_eq!(inner.processing_times_ms.len(), MAX_SAMPLES);
        assert_eq!(*inner.processing_times_ms.front().unwrap(), 50.0);
    }

    #[tokio::test]
    async fn unhealthy_once_any_rejection_recorded() {
        let tracker = MetricsTracker::default();
        let (_, active, queue, fwd, async_fwd, chunk, fair) = empty_snapshot_args();
        let healthy = tracker.snapshot(0, active, queue, fwd.clone(), async_fwd, chunk.clone(), fair.clone()).await;
        let unhealthy = tracker.snapshot(3, active, queue, fwd, async_fwd, chunk, fair).await;
        assert!(healthy.is_healthy);
        assert!(!unhealthy.is_healthy);
    }

    #[tokio::test]
    async fn record_log_appends_without_touching_query_counters() {
        let tracker = MetricsTracker::default();
        tracker.record_log("neighbor E unavailable during fan-out from B").await;
        let (rejections, active, queue, fwd, async_fwd, chunk, fair) = empty_snapshot_args();
        let snapshot = tracker.snapshot(rejections, active, queue, fwd, async_fwd, chunk, fair).await;
        assert_eq!(snapshot.queries_handled, 0);
        assert_eq!(snapshot.recent_log.len(), 1);
        assert!(snapshot.recent_log[0].contains("neighbor E unavailable"));
    }
}
