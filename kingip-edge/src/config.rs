use std::collections::HashMap;
use std::net::SocketAddr;

use serde::Deserialize;

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_per_host() -> usize {
    16
}

fn default_idle_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
pub struct EdgeConfig {
    pub relays: Vec<SocketAddr>,
    pub regions: HashMap<String, String>,
    #[serde(default = "default_max_per_host")]
    pub max_per_host: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl EdgeConfig {
    pub fn from_yaml_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_yaml::from_reader(file)?)
    }
}
