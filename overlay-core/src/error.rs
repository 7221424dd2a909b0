use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("process '{0}' is not defined in the configuration")]
    UnknownProcess(String),
    #[error("process '{0}' references unknown neighbor '{1}'")]
    UnknownNeighbor(String, String),
    #[error("configuration must include at least one process definition")]
    Empty,
    #[error("invalid role '{0}' for process '{1}'")]
    InvalidRole(String, String),
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum FilterParseError {
    #[error("query_params is not decodable as a JSON object: {0}")]
    Decode(serde_json::Error),
    #[error("query_params must decode into a JSON object")]
    NotAnObject,
}

impl FilterParseError {
    pub fn reason(&self) -> String {
        match self {
            FilterParseError::Decode(e) => e.to_string(),
            FilterParseError::NotAnObject => self.to_string(),
        }
    }
}
