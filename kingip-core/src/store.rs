//! Store interfaces the session core consumes, plus in-memory reference
//! implementations grounded in `svc/store/user.go` / `svc/store/session.go`
//! (`MockUserStore` / `MockSessionStore`). These are volatile — no
//! persistence — which matches this system's scope.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

/// A user's identity and quota policy. Immutable after construction.
#[derive(Debug, Clone)]
pub struct User {
    pub name: String,
    pub id: u64,
    pub max_sessions: u16,
    pub max_bandwidth_gb: f64,
    pub max_session_duration: Duration,
}

impl User {
    pub fn new(
        name: impl Into<String>,
        id: u64,
        max_sessions: u16,
        max_bandwidth_gb: f64,
        max_session_duration: Duration,
    ) -> Self {
        User {
            name: name.into(),
            id,
            max_sessions,
            max_bandwidth_gb,
            max_session_duration,
        }
    }

    /// `max_sessions=u16::MAX`, `max_bandwidth_gb=f64::MAX`, one hour
    /// duration cap — the "effectively unlimited" policy the original's
    /// CLI wiring seeds for local testing.
    pub fn unlimited(name: impl Into<String>, id: u64) -> Self {
        User::new(name, id, u16::MAX, f64::MAX, Duration::from_secs(3600))
    }
}

pub trait UserStore: Send + Sync {
    /// Constant-time comparison is recommended for the password check.
    fn lookup(&self, name: &str, password: &str) -> Option<User>;
}

pub trait SessionStore: Send + Sync {
    /// Increments the user's session count and returns the new value.
    fn add(&self, user_id: u64) -> u16;

    fn remove(&self, user_id: u64);
}

pub trait BandwidthStore: Send + Sync {
    fn used_mb(&self, user_id: u64) -> f64;

    fn add_mb(&self, user_id: u64, delta: f64);
}

struct UserRecord {
    password: String,
    user: User,
}

/// Reference `UserStore`: a fixed map of `name -> (password, User)`, seeded
/// once at startup from configuration.
pub struct InMemoryUserStore {
    users: HashMap<String, UserRecord>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        InMemoryUserStore { users: HashMap::new() }
    }

    pub fn with_user(mut self, password: impl Into<String>, user: User) -> Self {
        self.users.insert(user.name.clone(), UserRecord { password: password.into(), user });
        self
    }
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UserStore for InMemoryUserStore {
    fn lookup(&self, name: &str, password: &str) -> Option<User> {
        let record = self.users.get(name)?;
        if constant_time_eq(record.password.as_bytes(), password.as_bytes()) {
            Some(record.user.clone())
        } else {
            None
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Reference `SessionStore`: per-user live session count behind a mutex.
pub struct InMemorySessionStore {
    counts: Mutex<HashMap<u64, u16>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        InMemorySessionStore { counts: Mutex::new(HashMap::new()) }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for InMemorySessionStore {
    fn add(&self, user_id: u64) -> u16 {
        let mut counts = self.counts.lock();
        let count = counts.entry(user_id).or_insert(0);
        *count += 1;
        *count
    }

    fn remove(&self, user_id: u64) {
        let mut counts = self.counts.lock();
        if let Some(count) = counts.get_mut(&user_id) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Reference `BandwidthStore`: per-user cumulative megabytes behind a mutex.
pub struct InMemoryBandwidthStore {
    used_mb: Mutex<HashMap<u64, f64>>,
}

impl InMemoryBandwidthStore {
    pub fn new() -> Self {
        InMemoryBandwidthStore { used_mb: Mutex::new(HashMap::new()) }
    }
}

impl Default for InMemoryBandwidthStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BandwidthStore for InMemoryBandwidthStore {
    fn used_mb(&self, user_id: u64) -> f64 {
        *self.used_mb.lock().get(&user_id).unwrap_or(&0.0)
    }

    fn add_mb(&self, user_id: u64, delta: f64) {
        let mut used = self.used_mb.lock();
        *used.entry(user_id).or_insert(0.0) += delta;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_store_counts_up_and_down() {
        let store = InMemorySessionStore::new();
        assert_eq!(store.add(1), 1);
        assert_eq!(store.add(1), 2);
        store.remove(1);
        assert_eq!(store.add(1), 2);
    }

    #[test]
    fn bandwidth_store_is_monotonic_until_reset() {
        let store = InMemoryBandwidthStore::new();
        assert_eq!(store.used_mb(7), 0.0);
        store.add_mb(7, 1.5);
        store.add_mb(7, 2.5);
        assert_eq!(store.used_mb(7), 4.0);
    }

    #[test]
    fn user_store_rejects_wrong_password() {
        let store = InMemoryUserStore::new().with_user("hunter2", User::unlimited("alice", 1));
        assert!(store.lookup("alice", "wrong").is_none());
        assert!(store.lookup("alice", "hunter2").is_some());
    }
}
