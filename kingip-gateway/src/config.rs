use std::net::SocketAddr;
use std::time::Duration;

use kingip_core::store::{InMemoryBandwidthStore, InMemorySessionStore, InMemoryUserStore, User};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ProxyListenerConfig {
    pub region: String,
    pub listen_addr: SocketAddr,
}

#[derive(Debug, Deserialize)]
pub struct UserConfig {
    pub name: String,
    pub password: String,
    pub max_sessions: u16,
    pub max_bandwidth_gb: f64,
    pub max_session_duration_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    pub relay_listen_addr: SocketAddr,
    pub proxies: Vec<ProxyListenerConfig>,
    #[serde(default)]
    pub users: Vec<UserConfig>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl GatewayConfig {
    pub fn from_yaml_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_yaml::from_reader(file)?)
    }

    pub fn build_user_store(&self) -> InMemoryUserStore {
        let mut store = InMemoryUserStore::new();
        let mut next_id = 1u64;
        for user_config in &self.users {
            let user = User::new(
                user_config.name.clone(),
                next_id,
                user_config.max_sessions,
                user_config.max_bandwidth_gb,
                Duration::from_secs(user_config.max_session_duration_secs),
            );
            store = store.with_user(user_config.password.clone(), user);
            next_id += 1;
        }
        store
    }
}

pub fn build_bandwidth_store() -> InMemoryBandwidthStore {
    InMemoryBandwidthStore::new()
}

pub fn build_session_store() -> InMemorySessionStore {
    InMemorySessionStore::new()
}
