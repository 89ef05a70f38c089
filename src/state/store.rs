use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::{Result, TrackerError};
use crate::models::{
    Activity, ActivityType, Curator, CuratorOrigin, DiscordServer, RatingLevel, ResponseTracking,
};

/// Whose records a range query selects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordScope {
    Actor(String),
    Server(String),
    All,
}

/// Persistence interface consumed by the tracking engine
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn find_curator(&self, actor_id: &str) -> Result<Option<Curator>>;

    /// Create a curator. Returns the existing record if the actor is already known.
    async fn create_curator(
        &self,
        actor_id: &str,
        name: &str,
        origin: CuratorOrigin,
    ) -> Result<Curator>;

    async fn list_curators(&self) -> Result<Vec<Curator>>;

    async fn update_curator_points(
        &self,
        actor_id: &str,
        total_points: i64,
        rating_level: RatingLevel,
    ) -> Result<()>;

    async fn find_server(&self, server_id: &str) -> Result<Option<DiscordServer>>;

    async fn list_servers(&self) -> Result<Vec<DiscordServer>>;

    async fn upsert_server(&self, server: DiscordServer) -> Result<()>;

    /// Update the two reminder-policy fields. `None` leaves a field unchanged.
    async fn update_server_reminder_policy(
        &self,
        server_id: &str,
        reminder_interval_seconds: Option<i64>,
        auto_reminder_enabled: Option<bool>,
    ) -> Result<DiscordServer>;

    async fn insert_activity(&self, activity: Activity) -> Result<()>;

    /// Activities at or after `since`, optionally of one type
    async fn query_activities(
        &self,
        scope: &RecordScope,
        since: DateTime<Utc>,
        kind: Option<ActivityType>,
    ) -> Result<Vec<Activity>>;

    async fn insert_response_tracking(&self, record: ResponseTracking) -> Result<()>;

    /// Responses whose mention happened at or after `since`
    async fn query_responses(
        &self,
        scope: &RecordScope,
        since: DateTime<Utc>,
    ) -> Result<Vec<ResponseTracking>>;
}

/// Shared entity store type
pub type SharedEntityStore = Arc<dyn EntityStore>;

/// How often pending writes are persisted
pub const FLUSH_INTERVAL_SECS: u64 = 5;

const STORE_VERSION: u32 = 2;

/// On-disk layout of the store. Records are grouped by actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreData {
    /// Schema version
    version: u32,
    curators: HashMap<String, Curator>,
    servers: HashMap<String, DiscordServer>,
    activities: HashMap<String, Vec<Activity>>,
    responses: HashMap<String, Vec<ResponseTracking>>,
}

impl Default for StoreData {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            curators: HashMap::new(),
            servers: HashMap::new(),
            activities: HashMap::new(),
            responses: HashMap::new(),
        }
    }
}

/// Records of the table that fall in `scope`
fn select<'a, T>(
    table: &'a HashMap<String, Vec<T>>,
    scope: &RecordScope,
    server_of: fn(&T) -> &str,
) -> Vec<&'a T> {
    match scope {
        RecordScope::Actor(id) => table
            .get(id)
            .map(|records| records.iter().collect())
            .unwrap_or_default(),
        RecordScope::Server(id) => table
            .values()
            .flatten()
            .filter(|record| server_of(record) == id.as_str())
            .collect(),
        RecordScope::All => table.values().flatten().collect(),
    }
}

/// Drop records older than `cutoff`, and actors left with none
fn retain_since<T>(
    table: &mut HashMap<String, Vec<T>>,
    cutoff: DateTime<Utc>,
    time_of: fn(&T) -> DateTime<Utc>,
) -> usize {
    let mut removed = 0;
    for records in table.values_mut() {
        let before = records.len();
        records.retain(|record| time_of(record) >= cutoff);
        removed += before - records.len();
    }
    table.retain(|_, records| !records.is_empty());
    removed
}

/// Entity store kept in memory. Writes only mark it dirty; `flush` (driven
/// by [`spawn_flusher`]) writes the snapshot to a JSON file. Without a path
/// it is purely in-memory.
pub struct JsonEntityStore {
    data: RwLock<StoreData>,
    path: Option<String>,
    retention: Option<Duration>,
    dirty: AtomicBool,
    /// Serialises snapshot writes so temp files never interleave
    flush_lock: tokio::sync::Mutex<()>,
}

impl JsonEntityStore {
    fn with_data(data: StoreData, path: Option<String>) -> Self {
        Self {
            data: RwLock::new(data),
            path,
            retention: None,
            dirty: AtomicBool::new(false),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::with_data(StoreData::default(), None)
    }

    /// Load from a JSON file, or start empty if it does not exist
    pub async fn load(path: &str) -> Result<Self> {
        let data = match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                serde_json::from_str(&content).map_err(|e| TrackerError::StateParse {
                    path: path.to_string(),
                    source: e,
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => {
                return Err(TrackerError::StateLoad {
                    path: path.to_string(),
                    source: e,
                })
            }
        };

        Ok(Self::with_data(data, Some(path.to_string())))
    }

    /// Keep activities and responses for this many days
    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention = Duration::try_days(days);
        self
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Whether there are writes not yet on disk
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Drop activities and responses older than the retention window.
    /// Returns how many records were removed.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = self.retention.and_then(|r| now.checked_sub_signed(r)) else {
            return 0;
        };

        let removed = {
            let mut data = self.data.write();
            retain_since(&mut data.activities, cutoff, |a| a.timestamp)
                + retain_since(&mut data.responses, cutoff, |r| r.mention_timestamp)
        };
        if removed > 0 {
            self.mark_dirty();
        }
        removed
    }

    /// Prune, then write the snapshot atomically (temp file, then rename) if
    /// anything changed since the last successful write. A failed write
    /// leaves the store dirty so the next flush retries.
    pub async fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.flush_lock.lock().await;
        let pruned = self.prune(Utc::now());
        if pruned > 0 {
            debug!("Pruned {} records past retention", pruned);
        }
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let result = self.write_snapshot(path).await;
        if result.is_err() {
            self.mark_dirty();
        }
        result
    }

    async fn write_snapshot(&self, path: &str) -> Result<()> {
        let content = {
            let data = self.data.read();
            serde_json::to_string(&*data)?
        };

        let temp_path = format!("{}.tmp", path);
        tokio::fs::write(&temp_path, &content)
            .await
            .map_err(|e| TrackerError::StateSave {
                path: path.to_string(),
                source: e,
            })?;

        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|e| TrackerError::StateSave {
                path: path.to_string(),
                source: e,
            })?;

        Ok(())
    }

    #[cfg(test)]
    pub fn response_count(&self) -> usize {
        self.data.read().responses.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl EntityStore for JsonEntityStore {
    async fn find_curator(&self, actor_id: &str) -> Result<Option<Curator>> {
        Ok(self.data.read().curators.get(actor_id).cloned())
    }

    async fn create_curator(
        &self,
        actor_id: &str,
        name: &str,
        origin: CuratorOrigin,
    ) -> Result<Curator> {
        let curator = self
            .data
            .write()
            .curators
            .entry(actor_id.to_string())
            .or_insert_with(|| Curator::new(actor_id, name, origin, Utc::now()))
            .clone();
        self.mark_dirty();
        Ok(curator)
    }

    async fn list_curators(&self) -> Result<Vec<Curator>> {
        Ok(self.data.read().curators.values().cloned().collect())
    }

    async fn update_curator_points(
        &self,
        actor_id: &str,
        total_points: i64,
        rating_level: RatingLevel,
    ) -> Result<()> {
        {
            let mut data = self.data.write();
            let curator = data
                .curators
                .get_mut(actor_id)
                .ok_or_else(|| TrackerError::curator_not_found(actor_id))?;
            curator.total_points = total_points;
            curator.rating_level = rating_level;
            curator.updated_at = Utc::now();
        }
        self.mark_dirty();
        Ok(())
    }

    async fn find_server(&self, server_id: &str) -> Result<Option<DiscordServer>> {
        Ok(self.data.read().servers.get(server_id).cloned())
    }

    async fn list_servers(&self) -> Result<Vec<DiscordServer>> {
        Ok(self.data.read().servers.values().cloned().collect())
    }

    async fn upsert_server(&self, mut server: DiscordServer) -> Result<()> {
        {
            let mut data = self.data.write();
            if let Some(existing) = data.servers.get(&server.server_id) {
                server.created_at = existing.created_at;
            }
            server.updated_at = Utc::now();
            data.servers.insert(server.server_id.clone(), server);
        }
        self.mark_dirty();
        Ok(())
    }

    async fn update_server_reminder_policy(
        &self,
        server_id: &str,
        reminder_interval_seconds: Option<i64>,
        auto_reminder_enabled: Option<bool>,
    ) -> Result<DiscordServer> {
        let server = {
            let mut data = self.data.write();
            let server = data
                .servers
                .get_mut(server_id)
                .ok_or_else(|| TrackerError::server_not_found(server_id))?;
            if let Some(interval) = reminder_interval_seconds {
                server.reminder_interval_seconds = Some(interval);
            }
            if let Some(enabled) = auto_reminder_enabled {
                server.auto_reminder_enabled = Some(enabled);
            }
            server.updated_at = Utc::now();
            server.clone()
        };
        self.mark_dirty();
        Ok(server)
    }

    async fn insert_activity(&self, activity: Activity) -> Result<()> {
        self.data
            .write()
            .activities
            .entry(activity.actor_id.clone())
            .or_default()
            .push(activity);
        self.mark_dirty();
        Ok(())
    }

    async fn query_activities(
        &self,
        scope: &RecordScope,
        since: DateTime<Utc>,
        kind: Option<ActivityType>,
    ) -> Result<Vec<Activity>> {
        let data = self.data.read();
        Ok(select(&data.activities, scope, |a| a.server_id.as_str())
            .into_iter()
            .filter(|a| a.timestamp >= since)
            .filter(|a| kind.map_or(true, |k| a.kind == k))
            .cloned()
            .collect())
    }

    async fn insert_response_tracking(&self, record: ResponseTracking) -> Result<()> {
        self.data
            .write()
            .responses
            .entry(record.actor_id.clone())
            .or_default()
            .push(record);
        self.mark_dirty();
        Ok(())
    }

    async fn query_responses(
        &self,
        scope: &RecordScope,
        since: DateTime<Utc>,
    ) -> Result<Vec<ResponseTracking>> {
        let data = self.data.read();
        Ok(select(&data.responses, scope, |r| r.server_id.as_str())
            .into_iter()
            .filter(|r| r.mention_timestamp >= since)
            .cloned()
            .collect())
    }
}

/// Persist dirty state every `interval` until shutdown, then once more
pub async fn run_flusher(
    store: Arc<JsonEntityStore>,
    interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("State flush started ({}s cadence)", interval.as_secs());
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = store.flush().await {
                    error!("Failed to persist tracker state: {}", e);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    match store.flush().await {
        Ok(()) => info!("State flush stopped, final snapshot written"),
        Err(e) => error!("Final state snapshot failed: {}", e),
    }
}

/// Spawn the flusher on the runtime
pub fn spawn_flusher(
    store: Arc<JsonEntityStore>,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_flusher(
        store,
        std::time::Duration::from_secs(FLUSH_INTERVAL_SECS),
        shutdown,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_curator_is_idempotent() {
        let store = JsonEntityStore::in_memory();
        let first = store
            .create_curator("1", "Alice", CuratorOrigin::AutoProvisioned)
            .await
            .unwrap();
        let second = store
            .create_curator("1", "Renamed", CuratorOrigin::Administrative)
            .await
            .unwrap();

        assert_eq!(first.name, "Alice");
        assert_eq!(second.name, "Alice");
        assert_eq!(store.list_curators().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_activity_range_query() {
        let store = JsonEntityStore::in_memory();
        let now = Utc::now();

        store
            .insert_activity(Activity::new("1", "s", ActivityType::Message, "a", 3, now))
            .await
            .unwrap();
        store
            .insert_activity(Activity::new("1", "s", ActivityType::Reaction, "b", 1, now))
            .await
            .unwrap();
        store
            .insert_activity(Activity::new(
                "1",
                "s",
                ActivityType::Message,
                "old",
                3,
                now - Duration::days(40),
            ))
            .await
            .unwrap();
        store
            .insert_activity(Activity::new("2", "s", ActivityType::Message, "c", 3, now))
            .await
            .unwrap();

        let since = now - Duration::days(30);
        let actor = RecordScope::Actor("1".to_string());
        assert_eq!(store.query_activities(&actor, since, None).await.unwrap().len(), 2);
        assert_eq!(
            store
                .query_activities(&actor, since, Some(ActivityType::Reaction))
                .await
                .unwrap()
                .len(),
            1
        );

        let server = RecordScope::Server("s".to_string());
        assert_eq!(store.query_activities(&server, since, None).await.unwrap().len(), 3);
        assert_eq!(
            store
                .query_activities(&RecordScope::All, since, None)
                .await
                .unwrap()
                .len(),
            3
        );
    }

    #[tokio::test]
    async fn test_update_points_requires_curator() {
        let store = JsonEntityStore::in_memory();
        let result = store
            .update_curator_points("missing", 10, RatingLevel::Poor)
            .await;
        assert!(matches!(result, Err(TrackerError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_reminder_policy_update() {
        let store = JsonEntityStore::in_memory();
        store
            .upsert_server(DiscordServer::new("s", "Server", Utc::now()))
            .await
            .unwrap();

        let updated = store
            .update_server_reminder_policy("s", Some(120), None)
            .await
            .unwrap();
        assert_eq!(updated.reminder_interval_secs(), 120);
        assert!(updated.auto_reminder());

        let updated = store
            .update_server_reminder_policy("s", None, Some(false))
            .await
            .unwrap();
        assert_eq!(updated.reminder_interval_secs(), 120);
        assert!(!updated.auto_reminder());
    }

    async fn temp_store_path() -> (std::path::PathBuf, String) {
        let dir = std::env::temp_dir().join(format!("curator-store-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("store.json").to_str().unwrap().to_string();
        (dir, path)
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_on_disk() {
        let (dir, path) = temp_store_path().await;
        let path = path.as_str();

        let store = JsonEntityStore::load(path).await.unwrap();
        store
            .create_curator("7", "Bob", CuratorOrigin::Administrative)
            .await
            .unwrap();
        store.update_curator_points("7", 21, RatingLevel::Normal).await.unwrap();

        // Writes stay in memory until flushed
        assert!(store.is_dirty());
        assert!(!std::path::Path::new(path).exists());
        store.flush().await.unwrap();
        assert!(!store.is_dirty());

        let reloaded = JsonEntityStore::load(path).await.unwrap();
        let bob = reloaded.find_curator("7").await.unwrap().unwrap();
        assert_eq!(bob.total_points, 21);
        assert_eq!(bob.rating_level, RatingLevel::Normal);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn test_corrupt_state_file_is_a_state_error() {
        let (dir, path) = temp_store_path().await;
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let result = JsonEntityStore::load(&path).await;
        assert!(matches!(result, Err(TrackerError::StateParse { .. })));

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn test_failed_flush_stays_dirty() {
        let dir = std::env::temp_dir().join(format!("curator-missing-{}", uuid::Uuid::new_v4()));
        let path = dir.join("store.json");
        let store = JsonEntityStore::load(path.to_str().unwrap()).await.unwrap();

        store
            .create_curator("1", "Alice", CuratorOrigin::Administrative)
            .await
            .unwrap();
        assert!(matches!(
            store.flush().await,
            Err(TrackerError::StateSave { .. })
        ));
        assert!(store.is_dirty());
        assert!(store.find_curator("1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_prune_drops_records_past_retention() {
        let store = JsonEntityStore::in_memory().with_retention_days(90);
        let now = Utc::now();

        for age in [0, 89, 91, 400] {
            store
                .insert_activity(Activity::new(
                    "1",
                    "s",
                    ActivityType::Message,
                    "",
                    3,
                    now - Duration::days(age),
                ))
                .await
                .unwrap();
        }

        assert_eq!(store.prune(now), 2);
        let everything = store
            .query_activities(&RecordScope::Actor("1".to_string()), now - Duration::days(1000), None)
            .await
            .unwrap();
        assert_eq!(everything.len(), 2);

        // Without a retention window nothing is dropped
        let unbounded = JsonEntityStore::in_memory();
        unbounded
            .insert_activity(Activity::new(
                "1",
                "s",
                ActivityType::Message,
                "",
                3,
                now - Duration::days(4000),
            ))
            .await
            .unwrap();
        assert_eq!(unbounded.prune(now), 0);
    }

    #[tokio::test]
    async fn test_flusher_writes_on_shutdown() {
        let (dir, path) = temp_store_path().await;
        let store = Arc::new(JsonEntityStore::load(&path).await.unwrap());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_flusher(
            store.clone(),
            std::time::Duration::from_secs(3600),
            rx,
        ));

        store
            .upsert_server(DiscordServer::new("s", "Server", Utc::now()))
            .await
            .unwrap();
        tx.send(true).unwrap();
        handle.await.unwrap();

        let reloaded = JsonEntityStore::load(&path).await.unwrap();
        assert!(reloaded.find_server("s").await.unwrap().is_some());

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
