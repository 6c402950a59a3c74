use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prefix of stream names in logs and errors.
    pub server_id: String,
    /// Most requests an ordered stream may have outstanding before it fails.
    pub window_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_id: "server".into(),
            window_capacity: 4096,
        }
    }
}

impl Config {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            ..Default::default()
        }
    }
}
