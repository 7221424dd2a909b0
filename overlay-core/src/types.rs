use serde::{Deserialize, Serialize};

/// One air-quality observation. Opaque to the overlay beyond filter evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: String,
    pub parameter: String,
    pub value: f64,
    pub unit: String,
    pub aqi: i64,
    #[serde(rename = "siteName")]
    pub site_name: String,
    pub date: String,
}

/// A request-scoped, immutable filter. Deserialized from the JSON object
/// carried in `QueryRequest.query_params` (`spec.md` §6).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub parameter: Option<String>,
    #[serde(rename = "min_value")]
    pub min_value: Option<f64>,
    #[serde(rename = "max_value")]
    pub max_value: Option<f64>,
    #[serde(rename = "date_start")]
    pub date_start: Option<String>,
    #[serde(rename = "date_end")]
    pub date_end: Option<String>,
    #[serde(rename = "lat_min")]
    pub lat_min: Option<f64>,
    #[serde(rename = "lat_max")]
    pub lat_max: Option<f64>,
    #[serde(rename = "lon_min")]
    pub lon_min: Option<f64>,
    #[serde(rename = "lon_max")]
    pub lon_max: Option<f64>,
    pub team: Option<String>,
    #[serde(default)]
    pub limit: u32,
}

impl QueryFilter {
    /// Parse the raw JSON object carried by a `Query` RPC, clamping `limit`
    /// into `[1, default_limit]`. Mirrors `OverlayFacade._parse_filters`.
    pub fn parse(raw: &str, default_limit: u32) -> Result<Self, crate::error::FilterParseError> {
        let value: serde_json::Value = if raw.trim().is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_json::from_str(raw).map_err(crate::error::FilterParseError::Decode)?
        };
        if !value.is_object() {
            return Err(crate::error::FilterParseError::NotAnObject);
        }
        let mut filter: QueryFilter =
            serde_json::from_value(value).map_err(crate::error::FilterParseError::Decode)?;
        let requested = if filter.limit == 0 {
            default_limit
        } else {
            filter.limit
        };
        filter.limit = requested.clamp(1, default_limit);
        Ok(filter)
    }

    /// Returns a copy with `limit` replaced — used when allocating a share
    /// of the remaining budget to a forwarded neighbor.
    pub fn with_limit(&self, limit: usize) -> Self {
        let mut clone = self.clone();
        clone.limit = limit.max(1) as u32;
        clone
    }

    /// Returns a copy with `team` overridden — used so a forwarded query
    /// carries the forwarder's own team for downstream admission fairness.
    pub fn with_team(&self, team: &str) -> Self {
        let mut clone = self.clone();
        clone.team = Some(team.to_string());
        clone
    }
}

/// Ordered list of process ids visited by an in-flight query.
pub type Hops = Vec<String>;

/// Request shape for the `Query` RPC, independent of the wire encoding.
#[derive(Clone, Debug)]
pub struct QueryRequest {
    pub query_type: String,
    pub query_params: String,
    pub hops: Hops,
    pub client_id: String,
}

/// Response shape for the `Query` RPC.
#[derive(Clone, Debug)]
pub struct QueryResponse {
    pub uid: String,
    pub total_chunks: u64,
    pub total_records: u64,
    pub hops: Hops,
    pub status: String,
}

impl QueryResponse {
    pub fn empty(hops: Hops, status: impl Into<String>) -> Self {
        Self {
            uid: String::new(),
            total_chunks: 0,
            total_records: 0,
            hops,
            status: status.into(),
        }
    }
}

/// Response shape for the `GetChunk` RPC.
#[derive(Clone, Debug)]
pub struct ChunkResponse {
    pub uid: String,
    pub chunk_index: u64,
    pub total_chunks: u64,
    pub data: String,
    pub is_last: bool,
    pub status: String,
}

/// Metadata stamped onto a `ChunkedResult` at creation time.
#[derive(Clone, Debug, Serialize)]
pub struct ResultMetadata {
    pub producing_process: String,
    pub team: String,
    pub filters: QueryFilter,
    pub forwarding_strategy: String,
    pub chunking_strategy: String,
    pub async_forwarding: bool,
}
