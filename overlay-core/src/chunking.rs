use crate::types::QueryFilter;

/// Decides how many records go into one chunk of a result. Grounded in
/// `examples/original_source/overlay_core/strategies.py`'s `FixedChunking` /
/// `AdaptiveChunking`; `QueryBasedChunking` has no original-source
/// counterpart and is a supplemented addition (see `DESIGN.md`).
pub trait ChunkingStrategy: Send + Sync {
    fn chunk_size(&self, total_records: usize, filter: &QueryFilter) -> usize;

    fn name(&self) -> &'static str;
}

pub struct FixedChunking {
    pub size: usize,
}

impl ChunkingStrategy for FixedChunking {
    fn chunk_size(&self, _total_records: usize, _filter: &QueryFilter) -> usize {
        self.size.max(1)
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Chunk size grows with result size so small results aren't needlessly
/// fragmented and large ones don't produce an unwieldy single chunk.
/// Thresholds match `strategies.py`'s `AdaptiveChunking`.
pub struct AdaptiveChunking;

impl ChunkingStrategy for AdaptiveChunking {
    fn chunk_size(&self, total_records: usize, _filter: &QueryFilter) -> usize {
        if total_records <= 100 {
            25
        } else if total_records <= 500 {
            100
        } else if total_records <= 2000 {
            250
        } else {
            500
        }
    }

    fn name(&self) -> &'static str {
        "adaptive"
    }
}

/// Narrows the chunk size for queries with a tight date range (likely to be
/// interactively paginated) and widens it for broad, unbounded scans, on
/// top of the `AdaptiveChunking` baseline.
pub struct QueryBasedChunking;

impl ChunkingStrategy for QueryBasedChunking {
    fn chunk_size(&self, total_records: usize, filter: &QueryFilter) -> usize {
        let base = AdaptiveChunking.chunk_size(total_records, filter);
        match (&filter.date_start, &filter.date_end) {
            (Some(start), Some(end)) if end.as_str() >= start.as_str() => {
                let span: i64 = end
                    .parse::<i64>()
                    .unwrap_or(0)
                    .saturating_sub(start.parse::<i64>().unwrap_or(0));
                if span.abs() <= 1 {
                    (base / 2).max(10)
                } else {
                    base
                }
            }
            _ => base,
        }
    }

    fn name(&self) -> &'static str {
        "query_based"
    }
}

pub fn chunking_strategy(name: &str, fixed_size: usize) -> Box<dyn ChunkingStrategy> {
    match name {
        "adaptive" => Box::new(AdaptiveChunking),
        "query_based" => Box::new(QueryBasedChunking),
        _ => Box::new(FixedChunking { size: fixed_size }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adaptive_scales_with_result_size() {
        let strategy = AdaptiveChunking;
        let filter = QueryFilter::default();
        assert_eq!(strategy.chunk_size(50, &filter), 25);
        assert_eq!(strategy.chunk_size(300, &filter), 100);
        assert_eq!(strategy.chunk_size(1000, &filter), 250);
        assert_eq!(strategy.chunk_size(5000, &filter), 500);
    }

    #[test]
    fn query_based_narrows_for_single_day_queries() {
        let strategy = QueryBasedChunking;
        let mut filter = QueryFilter::default();
        filter.date_start = Some("20200815".to_string());
        filter.date_end = Some("20200815".to_string());
        assert!(strategy.chunk_size(1000, &filter) < AdaptiveChunking.chunk_size(1000, &filter));
    }

    #[test]
    fn fixed_ignores_result_size() {
        let strategy = FixedChunking { size: 50 };
        assert_eq!(strategy.chunk_size(3, &QueryFilter::default()), 50);
        assert_eq!(strategy.chunk_size(10_000, &QueryFilter::default()), 50);
    }
}
