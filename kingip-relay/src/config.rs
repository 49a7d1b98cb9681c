use std::net::SocketAddr;

use serde::Deserialize;

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
    pub hostname: String,
    pub gateways: Vec<SocketAddr>,
    pub regions: Vec<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl RelayConfig {
    pub fn from_yaml_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_yaml::from_reader(file)?)
    }

    pub fn region_map(&self) -> std::collections::HashMap<String, String> {
        self.regions.iter().map(|r| (r.clone(), self.hostname.clone())).collect()
    }
}
