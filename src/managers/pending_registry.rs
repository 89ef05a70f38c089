use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Help requests older than this are dropped by the sweep
pub const PENDING_TTL_SECS: i64 = 3600;

/// Cadence of the background sweep
pub const SWEEP_INTERVAL_SECS: u64 = 300;

/// An open help request waiting for a curator
#[derive(Debug, Clone, Serialize)]
pub struct PendingHelpRequest {
    pub message_id: String,
    pub server_id: String,
    pub channel_id: String,
    pub author_id: String,
    pub created_at: DateTime<Utc>,
    pub trigger_keywords: Vec<String>,
}

impl PendingHelpRequest {
    pub fn new(
        message_id: &str,
        server_id: &str,
        channel_id: &str,
        author_id: &str,
        trigger_keywords: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: message_id.to_string(),
            server_id: server_id.to_string(),
            channel_id: channel_id.to_string(),
            author_id: author_id.to_string(),
            created_at: now,
            trigger_keywords,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }
}

/// Open help requests keyed by message id.
///
/// Every mutation goes through a single DashMap operation on the key, so
/// register, take-on-match and sweep-eviction are atomic per key: whichever of
/// `remove` or `sweep` reaches an entry first owns it, the other sees nothing.
pub struct PendingRegistry {
    entries: DashMap<String, PendingHelpRequest>,
    ttl: Duration,
}

impl Default for PendingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::with_ttl(Duration::seconds(PENDING_TTL_SECS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert a new request. Returns false (and changes nothing) if the
    /// message is already pending.
    pub fn register(&self, request: PendingHelpRequest) -> bool {
        match self.entries.entry(request.message_id.clone()) {
            Entry::Occupied(_) => {
                debug!("Help request {} already pending", request.message_id);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(request);
                true
            }
        }
    }

    pub fn lookup(&self, message_id: &str) -> Option<PendingHelpRequest> {
        self.entries.get(message_id).map(|r| r.clone())
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.entries.contains_key(message_id)
    }

    /// Remove and return the entry. Only one caller can ever get `Some` for a key.
    pub fn remove(&self, message_id: &str) -> Option<PendingHelpRequest> {
        self.entries.remove(message_id).map(|(_, request)| request)
    }

    pub fn is_stale(&self, request: &PendingHelpRequest, now: DateTime<Utc>) -> bool {
        request.age(now) > self.ttl
    }

    /// Drop every entry older than the TTL. Returns the removed message ids.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut expired = Vec::new();
        self.entries.retain(|message_id, request| {
            if request.age(now) > self.ttl {
                expired.push(message_id.clone());
                false
            } else {
                true
            }
        });
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of all open requests, oldest first
    pub fn list(&self) -> Vec<PendingHelpRequest> {
        let mut requests: Vec<PendingHelpRequest> =
            self.entries.iter().map(|r| r.value().clone()).collect();
        requests.sort_by_key(|r| r.created_at);
        requests
    }

    /// Open requests for one server, oldest first
    pub fn list_for_server(&self, server_id: &str) -> Vec<PendingHelpRequest> {
        self.list()
            .into_iter()
            .filter(|r| r.server_id == server_id)
            .collect()
    }
}

/// Shared registry type
pub type SharedPendingRegistry = Arc<PendingRegistry>;

pub fn create_shared_pending_registry() -> SharedPendingRegistry {
    Arc::new(PendingRegistry::new())
}

/// Run the expiry sweep every `interval` until `shutdown` flips to true
pub async fn run_sweeper(
    registry: SharedPendingRegistry,
    interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Pending help-request sweep started ({}s cadence)", interval.as_secs());
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let expired = registry.sweep(Utc::now());
                if !expired.is_empty() {
                    info!("Cleaned up {} expired pending help requests", expired.len());
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Pending help-request sweep stopped");
                    return;
                }
            }
        }
    }
}

/// Spawn the sweeper on the runtime
pub fn spawn_sweeper(
    registry: SharedPendingRegistry,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_sweeper(
        registry,
        std::time::Duration::from_secs(SWEEP_INTERVAL_SECS),
        shutdown,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str, at: DateTime<Utc>) -> PendingHelpRequest {
        PendingHelpRequest::new(id, "1", "2", "100", vec!["help".to_string()], at)
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = PendingRegistry::new();
        let t0 = Utc::now();

        assert!(registry.register(request("a", t0)));
        assert!(!registry.register(request("a", t0 + Duration::seconds(30))));

        let entry = registry.lookup("a").unwrap();
        assert_eq!(entry.created_at, t0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_is_at_most_once() {
        let registry = PendingRegistry::new();
        registry.register(request("a", Utc::now()));

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert!(registry.remove("never-registered").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sweep_removes_only_stale_entries() {
        let registry = PendingRegistry::new();
        let t0 = Utc::now();
        registry.register(request("old", t0));
        registry.register(request("fresh", t0 + Duration::seconds(1800)));

        // Exactly at the TTL the entry survives
        assert!(registry.sweep(t0 + Duration::seconds(3600)).is_empty());

        let expired = registry.sweep(t0 + Duration::seconds(3601));
        assert_eq!(expired, vec!["old".to_string()]);
        assert!(registry.contains("fresh"));
        assert!(!registry.contains("old"));
    }

    #[test]
    fn test_bounded_lifetime() {
        let registry = PendingRegistry::new();
        let t0 = Utc::now();
        for i in 0..20 {
            registry.register(request(&i.to_string(), t0 + Duration::seconds(i * 60)));
        }

        // Sweeps every 300s of simulated time
        let mut now = t0;
        while now < t0 + Duration::seconds(20 * 60 + 3600 + 300) {
            now += Duration::seconds(SWEEP_INTERVAL_SECS as i64);
            registry.sweep(now);
            for entry in registry.list() {
                assert!(entry.age(now) <= registry.ttl());
            }
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_list_is_oldest_first() {
        let registry = PendingRegistry::new();
        let t0 = Utc::now();
        registry.register(request("b", t0 + Duration::seconds(10)));
        registry.register(request("a", t0));

        let mut other = request("c", t0 + Duration::seconds(5));
        other.server_id = "9".to_string();
        registry.register(other);

        let ids: Vec<String> = registry.list().into_iter().map(|r| r.message_id).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        assert_eq!(registry.list_for_server("1").len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_remove_has_single_winner() {
        let registry = Arc::new(PendingRegistry::new());
        registry.register(request("k", Utc::now()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move { registry.remove("k").is_some() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let registry = create_shared_pending_registry();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_sweeper(
            registry,
            std::time::Duration::from_millis(10),
            rx,
        ));

        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
