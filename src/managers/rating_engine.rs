use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::{window_start, ResponseThresholds, TrackerConfig};
use crate::error::Result;
use crate::managers::response_metrics::{summarize, ResponseMetrics, ServerResponseSummary};
use crate::models::{Activity, ActivityType, Curator, RatingLevel, ResponseQuality, ResponseTracking};
use crate::state::{RecordScope, SharedEntityStore};

/// How many curators the batch recomputes at once
const BATCH_CONCURRENCY: usize = 8;

const WEEK_DAYS: i64 = 7;

/// Points per activity type inside the window (points, not counts)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PointsBreakdown {
    pub messages: i64,
    pub reactions: i64,
    pub replies: i64,
    pub task_verifications: i64,
    pub total_activities: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResponseStats {
    pub total: i64,
    pub good: i64,
    pub poor: i64,
    /// Seconds, one decimal
    pub average_time: f64,
    pub fastest: Option<i64>,
    pub slowest: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RatingReport {
    pub actor_id: String,
    /// Base points plus response bonus
    pub total_points: i64,
    pub base_points: i64,
    pub response_bonus: i64,
    pub level: RatingLevel,
    pub breakdown: PointsBreakdown,
    pub response_stats: ResponseStats,
    pub window_days: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CuratorRanking {
    pub rank: usize,
    pub total_curators: usize,
    pub percentile: f64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct BatchSummary {
    pub updated: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

/// This week's rating against last week's activity points
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyImprovement {
    pub current_week_points: i64,
    pub previous_week_points: i64,
    pub improvement: i64,
    /// Relative to the previous week, one decimal; 0 when it had no points
    pub improvement_percentage: f64,
    pub trend: Trend,
}

impl WeeklyImprovement {
    pub fn new(current_week_points: i64, previous_week_points: i64) -> Self {
        let improvement = current_week_points - previous_week_points;
        let improvement_percentage = if previous_week_points > 0 {
            (improvement as f64 / previous_week_points as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };
        let trend = match improvement {
            i if i > 0 => Trend::Up,
            i if i < 0 => Trend::Down,
            _ => Trend::Stable,
        };

        Self {
            current_week_points,
            previous_week_points,
            improvement,
            improvement_percentage,
            trend,
        }
    }
}

pub fn response_stats(responses: &[ResponseTracking], thresholds: &ResponseThresholds) -> ResponseStats {
    if responses.is_empty() {
        return ResponseStats::default();
    }

    let times: Vec<i64> = responses.iter().map(|r| r.response_time_seconds).collect();
    let total = times.len() as i64;
    let sum: i64 = times.iter().sum();

    let mut stats = ResponseStats {
        total,
        average_time: ((sum as f64 / total as f64) * 10.0).round() / 10.0,
        fastest: times.iter().min().copied(),
        slowest: times.iter().max().copied(),
        ..Default::default()
    };

    for &secs in &times {
        match thresholds.classify(secs) {
            ResponseQuality::Good => stats.good += 1,
            ResponseQuality::Poor => stats.poor += 1,
            ResponseQuality::Average => {}
        }
    }
    stats
}

/// `good - poor`, plus 20% of the response count when at least 80% were good,
/// or minus 30% when at least half were poor. Never below `-total`.
pub fn response_bonus(stats: &ResponseStats) -> i64 {
    let total = stats.total;
    if total == 0 {
        return 0;
    }

    let mut bonus = stats.good - stats.poor;
    if stats.good * 10 >= total * 8 {
        bonus += total / 5;
    } else if stats.poor * 2 >= total {
        bonus -= total * 3 / 10;
    }
    bonus.max(-total)
}

/// Rate an actor from the records that fall inside the window. Pure.
pub fn rate(
    actor_id: &str,
    activities: &[Activity],
    responses: &[ResponseTracking],
    config: &TrackerConfig,
    window_days: i64,
) -> RatingReport {
    let mut breakdown = PointsBreakdown {
        total_activities: activities.len(),
        ..Default::default()
    };

    for activity in activities {
        let points = activity.points as i64;
        match activity.kind {
            ActivityType::Message => breakdown.messages += points,
            ActivityType::Reaction => breakdown.reactions += points,
            ActivityType::Reply => breakdown.replies += points,
            ActivityType::TaskVerification => breakdown.task_verifications += points,
        }
    }

    let base_points =
        breakdown.messages + breakdown.reactions + breakdown.replies + breakdown.task_verifications;
    let stats = response_stats(responses, &config.response_thresholds);
    let bonus = response_bonus(&stats);
    let total_points = base_points + bonus;

    RatingReport {
        actor_id: actor_id.to_string(),
        total_points,
        base_points,
        response_bonus: bonus,
        level: config.rating_levels.level_for(total_points),
        breakdown,
        response_stats: stats,
        window_days,
    }
}

/// Computes ratings from stored records and keeps curator totals in sync
pub struct RatingEngine {
    store: SharedEntityStore,
    config: Arc<TrackerConfig>,
}

impl RatingEngine {
    pub fn new(store: SharedEntityStore, config: Arc<TrackerConfig>) -> Self {
        Self { store, config }
    }

    pub fn window_days(&self) -> i64 {
        self.config.rating_window_days
    }

    pub async fn compute_rating(&self, actor_id: &str, days: i64) -> Result<RatingReport> {
        self.compute_rating_at(actor_id, days, Utc::now()).await
    }

    pub async fn compute_rating_at(
        &self,
        actor_id: &str,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<RatingReport> {
        let since = window_start(now, days)?;
        let scope = RecordScope::Actor(actor_id.to_string());

        let activities = self.store.query_activities(&scope, since, None).await?;
        let responses = self.store.query_responses(&scope, since).await?;

        Ok(rate(actor_id, &activities, &responses, &self.config, days))
    }

    /// Recompute over the configured window and store the result on the curator
    pub async fn recompute(&self, actor_id: &str) -> Result<RatingReport> {
        let previous = self.store.find_curator(actor_id).await?;
        let report = self.compute_rating(actor_id, self.window_days()).await?;

        self.store
            .update_curator_points(actor_id, report.total_points, report.level)
            .await?;

        match previous {
            Some(curator) if curator.rating_level != report.level => info!(
                "Curator {} moved from {} to {} ({} points)",
                actor_id, curator.rating_level, report.level, report.total_points
            ),
            _ => debug!(
                "Curator {} rated {} ({} points)",
                actor_id, report.level, report.total_points
            ),
        }
        Ok(report)
    }

    /// Recompute every curator. One curator failing does not stop the rest.
    pub async fn recompute_all(&self) -> Result<BatchSummary> {
        let curators = self.store.list_curators().await?;

        let results: Vec<(String, Result<RatingReport>)> = stream::iter(curators)
            .map(|curator| async move {
                let result = self.recompute(&curator.actor_id).await;
                (curator.actor_id, result)
            })
            .buffer_unordered(BATCH_CONCURRENCY)
            .collect()
            .await;

        let mut summary = BatchSummary::default();
        for (actor_id, result) in results {
            match result {
                Ok(_) => summary.updated += 1,
                Err(e) => {
                    error!("Failed to update rating for curator {}: {}", actor_id, e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Updated ratings for {} curators ({} failed)",
            summary.updated, summary.failed
        );
        Ok(summary)
    }

    /// Rank by stored total. Ties share a rank.
    pub async fn ranking(&self, actor_id: &str) -> Result<Option<CuratorRanking>> {
        let curators = self.store.list_curators().await?;
        let Some(target) = curators.iter().find(|c| c.actor_id == actor_id) else {
            return Ok(None);
        };

        let higher = curators
            .iter()
            .filter(|c| c.total_points > target.total_points)
            .count();
        let rank = higher + 1;
        let total_curators = curators.len();
        let percentile =
            ((1.0 - (rank - 1) as f64 / total_curators as f64) * 1000.0).round() / 10.0;

        Ok(Some(CuratorRanking {
            rank,
            total_curators,
            percentile,
        }))
    }

    /// Curator count per stored level; every level is present
    pub async fn level_distribution(&self) -> Result<BTreeMap<RatingLevel, usize>> {
        let mut distribution: BTreeMap<RatingLevel, usize> =
            RatingLevel::ALL.iter().map(|level| (*level, 0)).collect();
        for curator in self.store.list_curators().await? {
            *distribution.entry(curator.rating_level).or_default() += 1;
        }
        Ok(distribution)
    }

    /// Rating over the last week against activity points of the week before
    pub async fn weekly_improvement(&self, actor_id: &str) -> Result<WeeklyImprovement> {
        self.weekly_improvement_at(actor_id, Utc::now()).await
    }

    pub async fn weekly_improvement_at(
        &self,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<WeeklyImprovement> {
        let current = self.compute_rating_at(actor_id, WEEK_DAYS, now).await?;

        let week_ago = window_start(now, WEEK_DAYS)?;
        let fortnight_ago = window_start(now, WEEK_DAYS * 2)?;
        let scope = RecordScope::Actor(actor_id.to_string());
        let previous: i64 = self
            .store
            .query_activities(&scope, fortnight_ago, None)
            .await?
            .iter()
            .filter(|a| a.timestamp < week_ago)
            .map(|a| a.points as i64)
            .sum();

        Ok(WeeklyImprovement::new(current.total_points, previous))
    }

    pub async fn response_metrics(&self, scope: &RecordScope, days: i64) -> Result<ResponseMetrics> {
        self.response_metrics_at(scope, days, Utc::now()).await
    }

    pub async fn response_metrics_at(
        &self,
        scope: &RecordScope,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<ResponseMetrics> {
        let since = window_start(now, days)?;
        let responses = self.store.query_responses(scope, since).await?;
        Ok(summarize(&responses, &self.config.response_thresholds, now))
    }

    /// Response metrics per active server, fastest average first
    pub async fn server_comparison(&self, days: i64) -> Result<Vec<ServerResponseSummary>> {
        let now = Utc::now();
        let mut rows = Vec::new();
        for server in self.store.list_servers().await? {
            if !server.is_active {
                continue;
            }
            let scope = RecordScope::Server(server.server_id.clone());
            let metrics = self.response_metrics_at(&scope, days, now).await?;
            rows.push(ServerResponseSummary::new(&server.server_id, &server.name, metrics));
        }

        rows.sort_by(|a, b| {
            a.average_time
                .cmp(&b.average_time)
                .then_with(|| a.server_id.cmp(&b.server_id))
        });
        Ok(rows)
    }

    /// Highest stored totals first
    pub async fn top(&self, limit: usize) -> Result<Vec<Curator>> {
        let mut curators = self.store.list_curators().await?;
        curators.sort_by(|a, b| {
            b.total_points
                .cmp(&a.total_points)
                .then_with(|| a.name.cmp(&b.name))
        });
        curators.truncate(limit);
        Ok(curators)
    }
}

pub type SharedRatingEngine = Arc<RatingEngine>;
