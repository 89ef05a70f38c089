//! Periodic rating recomputation

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::managers::SharedRatingEngine;

/// Cadence of the rating batch
pub const RATING_BATCH_INTERVAL_SECS: u64 = 3600;

/// Recompute every curator each `interval` until `shutdown` flips to true.
/// The first batch runs one interval after start.
pub async fn run_rating_batch(
    engine: SharedRatingEngine,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Rating batch scheduled every {}s", interval.as_secs());
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                info!("Running scheduled rating update");
                if let Err(e) = engine.recompute_all().await {
                    error!("Scheduled rating update failed: {}", e);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Rating batch stopped");
                    return;
                }
            }
        }
    }
}

pub fn spawn_rating_batch(
    engine: SharedRatingEngine,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run_rating_batch(
        engine,
        Duration::from_secs(RATING_BATCH_INTERVAL_SECS),
        shutdown,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::managers::rating_engine::RatingEngine;
    use crate::models::{Activity, ActivityType, CuratorOrigin};
    use crate::state::{EntityStore, JsonEntityStore};
    use chrono::Utc;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_batch_updates_totals_then_stops() {
        let store = Arc::new(JsonEntityStore::in_memory());
        store
            .create_curator("a", "Alice", CuratorOrigin::Administrative)
            .await
            .unwrap();
        store
            .insert_activity(Activity::new("a", "s", ActivityType::TaskVerification, "", 5, Utc::now()))
            .await
            .unwrap();

        let engine = Arc::new(RatingEngine::new(store.clone(), Arc::new(TrackerConfig::default())));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_rating_batch(engine, Duration::from_millis(20), rx));

        tokio::time::sleep(Duration::from_millis(70)).await;
        let curator = store.find_curator("a").await.unwrap().unwrap();
        assert_eq!(curator.total_points, 5);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("batch did not stop")
            .unwrap();
    }
}
