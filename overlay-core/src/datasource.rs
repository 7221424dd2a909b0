use std::path::Path;

use async_trait::async_trait;

use crate::config::{ProcessSpec, Role};
use crate::types::{QueryFilter, Row};

/// Per-team absolute date range, as partitioned in the original corpus
/// (`examples/original_source/overlay_core/data_store.py`'s `TEAM_DATE_BOUNDS`).
pub const TEAM_DATE_BOUNDS: &[(&str, (&str, &str))] = &[
    ("green", ("20200810", "20200820")),
    ("pink", ("20200821", "20200924")),
];

pub fn team_date_bounds(team: &str) -> Option<(String, String)> {
    TEAM_DATE_BOUNDS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(team))
        .map(|(_, bounds)| (bounds.0.to_string(), bounds.1.to_string()))
}

/// A source of rows local to this process. Implementations are free to back
/// onto a CSV file, a database, or an in-memory fixture (tests use the
/// latter). Mirrors `data_store.py`'s `DataStore` abstraction.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn query(&self, filter: &QueryFilter, limit: usize) -> Vec<Row>;

    /// Row count and distinct-date count, exposed on the `GetMetrics` RPC.
    async fn stats(&self) -> DataSourceStats;
}

#[derive(Clone, Debug, Default)]
pub struct DataSourceStats {
    pub row_count: usize,
    pub distinct_dates: usize,
}

/// CSV-backed datasource scoped to this process's weighted share of its
/// team's date range. Grounded in `data_store.py`'s `CsvDataStore`.
pub struct CsvDataSource {
    rows: Vec<Row>,
}

impl CsvDataSource {
    /// Loads `path`, then restricts to the dates assigned to `process` within
    /// its team (see [`assigned_dates`]). A leader with no team date bounds
    /// (role `Leader`, no `date_bounds` in config) sees the full file.
    pub fn load(path: impl AsRef<Path>, process: &ProcessSpec, team_members: &[&ProcessSpec]) -> Result<Self, csv::Error> {
        let rows = read_rows(path.as_ref())?;
        let assigned = assigned_dates(process, team_members);
        let rows = match assigned {
            Some(dates) => rows.into_iter().filter(|r| dates.contains(&r.date)).collect(),
            None => rows,
        };
        Ok(Self { rows })
    }

    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self { rows }
    }
}

/// Reads every row in `path`. A single malformed row is skipped rather than
/// failing the whole load, mirroring `data_store.py::_convert_row`'s
/// per-row try/except.
fn read_rows(path: &Path) -> Result<Vec<Row>, csv::Error> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.deserialize::<CsvRow>() {
        match record {
            Ok(row) => rows.push(row.into()),
            Err(e) => tracing::warn!(error = %e, "skipping unreadable row"),
        }
    }
    Ok(rows)
}

#[derive(serde::Deserialize)]
struct CsvRow {
    latitude: f64,
    longitude: f64,
    timestamp: String,
    parameter: String,
    value: f64,
    unit: String,
    aqi: i64,
    #[serde(rename = "siteName")]
    site_name: String,
    date: String,
}

impl From<CsvRow> for Row {
    fn from(r: CsvRow) -> Self {
        Row {
            latitude: r.latitude,
            longitude: r.longitude,
            timestamp: r.timestamp,
            parameter: r.parameter,
            value: r.value,
            unit: r.unit,
            aqi: r.aqi,
            site_name: r.site_name,
            date: r.date,
        }
    }
}

#[async_trait]
impl DataSource for CsvDataSource {
    async fn query(&self, filter: &QueryFilter, limit: usize) -> Vec<Row> {
        self.rows
            .iter()
            .filter(|row| matches_filter(row, filter))
            .take(limit)
            .cloned()
            .collect()
    }

    async fn stats(&self) -> DataSourceStats {
        let mut dates: Vec<&str> = self.rows.iter().map(|r| r.date.as_str()).collect();
        dates.sort_unstable();
        dates.dedup();
        DataSourceStats {
            row_count: self.rows.len(),
            distinct_dates: dates.len(),
        }
    }
}

/// Predicate mirroring `data_store.py`'s `_matches`: parameter is matched
/// case-insensitively; numeric/date bounds are inclusive on both ends.
fn matches_filter(row: &Row, filter: &QueryFilter) -> bool {
    if let Some(p) = &filter.parameter {
        if !row.parameter.eq_ignore_ascii_case(p) {
            return false;
        }
    }
    if let Some(min) = filter.min_value {
        if row.value < min {
            return false;
        }
    }
    if let Some(max) = filter.max_value {
        if row.value > max {
            return false;
        }
    }
    if let Some(start) = &filter.date_start {
        if row.date.as_str() < start.as_str() {
            return false;
        }
    }
    if let Some(end) = &filter.date_end {
        if row.date.as_str() > end.as_str() {
            return false;
        }
    }
    if let Some(lat_min) = filter.lat_min {
        if row.latitude < lat_min {
            return false;
        }
    }
    if let Some(lat_max) = filter.lat_max {
        if row.latitude > lat_max {
            return false;
        }
    }
    if let Some(lon_min) = filter.lon_min {
        if row.longitude < lon_min {
            return false;
        }
    }
    if let Some(lon_max) = filter.lon_max {
        if row.longitude > lon_max {
            return false;
        }
    }
    true
}

/// Every date (inclusive) between `start` and `end`, as `YYYYMMDD` strings.
fn date_range(start: &str, end: &str) -> Vec<String> {
    let parse = |s: &str| -> (i32, u32, u32) {
        let y = s[0..4].parse().unwrap_or(1970);
        let m = s[4..6].parse().unwrap_or(1);
        let d = s[6..8].parse().unwrap_or(1);
        (y, m, d)
    };
    let to_ord = |(y, m, d): (i32, u32, u32)| -> i64 {
        // days-from-epoch via a simple proleptic Gregorian ordinal; sufficient
        // for the 2020-scoped fixture range this overlay operates on.
        let a = (14 - m as i64) / 12;
        let yy = y as i64 + 4800 - a;
        let mm = m as i64 + 12 * a - 3;
        d as i64 + (153 * mm + 2) / 5 + 365 * yy + yy / 4 - yy / 100 + yy / 400 - 32045
    };
    let from_ord = |ord: i64| -> String {
        let a = ord + 32044;
        let b = (4 * a + 3) / 146097;
        let c = a - (146097 * b) / 4;
        let d = (4 * c + 3) / 1461;
        let e = c - (1461 * d) / 4;
        let m = (5 * e + 2) / 153;
        let day = e - (153 * m + 2) / 5 + 1;
        let month = m + 3 - 12 * (m / 10);
        let year = 100 * b + d - 4800 + m / 10;
        format!("{year:04}{month:02}{day:02}")
    };
    let start_ord = to_ord(parse(start));
    let end_ord = to_ord(parse(end));
    (start_ord..=end_ord).map(from_ord).collect()
}

/// Weighted date-share partitioning across a team's members. `None` means
/// "no restriction" (used for the leader's own, team-less datasource).
/// Mirrors `data_store.py`'s `_resolve_selected_dates`/`_compute_member_shares`:
/// weight 1 for team leaders, 2 for workers; each member gets
/// `max(1, round(weight / total_weight * total_dates))`, with the remainder
/// reconciled onto the last member in id order.
pub fn assigned_dates(process: &ProcessSpec, team_members: &[&ProcessSpec]) -> Option<Vec<String>> {
    if process.role == Role::Leader && process.date_bounds.is_none() {
        return None;
    }
    let (start, end) = process.date_bounds.clone().or_else(|| team_date_bounds(&process.team))?;
    let all_dates = date_range(&start, &end);
    if team_members.is_empty() {
        return Some(all_dates);
    }

    let total_weight: u32 = team_members.iter().map(|m| m.role.share_weight()).sum();
    let total_dates = all_dates.len() as f64;
    let mut shares: Vec<(String, usize)> = team_members
        .iter()
        .map(|m| {
            let raw = (m.role.share_weight() as f64 / total_weight as f64) * total_dates;
            (m.id.clone(), (raw.round() as usize).max(1))
        })
        .collect();

    let assigned_total: usize = shares.iter().map(|(_, n)| n).sum();
    if let Some(last) = shares.last_mut() {
        let total_dates_usize = all_dates.len();
        if assigned_total != total_dates_usize {
            let diff = total_dates_usize as i64 - assigned_total as i64;
            last.1 = (last.1 as i64 + diff).max(1) as usize;
        }
    }

    let mut cursor = 0usize;
    for (id, count) in &shares {
        let end = (cursor + count).min(all_dates.len());
        if id == &process.id {
            return Some(all_dates[cursor..end].to_vec());
        }
        cursor = end;
    }
    Some(Vec::new())
}
