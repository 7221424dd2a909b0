use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A process's position in the overlay hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Leader,
    TeamLeader,
    Worker,
}

impl Role {
    /// Weight used when splitting a team's date range across its members
    /// (`spec.md` §4.2: "team_leader weight 1, worker weight 2").
    pub fn share_weight(&self) -> u32 {
        match self {
            Role::TeamLeader => 1,
            Role::Worker => 2,
            Role::Leader => 1,
        }
    }
}

/// Inclusive date bounds, lexicographically ordered (`YYYYMMDD` strings).
pub type DateBounds = (String, String);

/// Immutable description of one configured process. Never mutated after load.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub id: String,
    pub role: Role,
    pub team: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub neighbors: Vec<String>,
    #[serde(default, rename = "date_bounds")]
    pub date_bounds: Option<DateBounds>,
}

impl ProcessSpec {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Strategy selection carried in the config file's optional `strategies` key.
/// Startup CLI flags (`spec.md` §6) take precedence when both are present;
/// `overlay-node` merges the two before constructing the orchestrator.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StrategiesConfig {
    pub forwarding_strategy: Option<String>,
    pub async_forwarding: Option<bool>,
    pub chunking_strategy: Option<String>,
    pub fairness_strategy: Option<String>,
}

#[derive(Deserialize)]
struct RawConfigFile {
    processes: HashMap<String, ProcessSpec>,
    #[serde(default)]
    strategies: Option<StrategiesConfig>,
}

/// Config facade that hides JSON parsing and neighbor/team lookup semantics.
/// Mirrors `examples/original_source/overlay_core/config.py`'s `OverlayConfig`.
pub struct OverlayConfig {
    processes: HashMap<String, ProcessSpec>,
    strategies: StrategiesConfig,
}

impl OverlayConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let parsed: RawConfigFile = serde_json::from_str(raw)?;
        if parsed.processes.is_empty() {
            return Err(ConfigError::Empty);
        }

        for (id, spec) in &parsed.processes {
            for neighbor_id in &spec.neighbors {
                if !parsed.processes.contains_key(neighbor_id) {
                    return Err(ConfigError::UnknownNeighbor(id.clone(), neighbor_id.clone()));
                }
            }
        }

        Ok(Self {
            processes: parsed.processes,
            strategies: parsed.strategies.unwrap_or_default(),
        })
    }

    pub fn get(&self, process_id: &str) -> Result<&ProcessSpec, ConfigError> {
        self.processes
            .get(process_id)
            .ok_or_else(|| ConfigError::UnknownProcess(process_id.to_string()))
    }

    pub fn neighbors(&self, process_id: &str) -> Result<Vec<&ProcessSpec>, ConfigError> {
        let process = self.get(process_id)?;
        Ok(process
            .neighbors
            .iter()
            .filter_map(|nid| self.processes.get(nid))
            .collect())
    }

    pub fn all(&self) -> &HashMap<String, ProcessSpec> {
        &self.processes
    }

    pub fn strategies(&self) -> &StrategiesConfig {
        &self.strategies
    }

    /// All processes sharing `team`, sorted by id — used by the datasource
    /// to compute this process's weighted share of the team's date range.
    pub fn team_members(&self, team: &str) -> Vec<&ProcessSpec> {
        let mut members: Vec<&ProcessSpec> = self
            .processes
            .values()
            .filter(|p| p.team.eq_ignore_ascii_case(team))
            .collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members
    }
}
