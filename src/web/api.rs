//! Operational JSON API
//!
//! Read-mostly view of the tracker: health, open help requests, ratings,
//! response analytics, and the captured log stream. The one write is
//! triggering a rating batch.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{error, info};

use crate::config::MAX_WINDOW_DAYS;
use crate::error::TrackerError;
use crate::logging::{LogEntry, SharedLogBuffer};
use crate::managers::rating_engine::CuratorRanking;
use crate::managers::{
    BatchSummary, PendingHelpRequest, RatingReport, ResponseMetrics, ServerResponseSummary,
    SharedActivityTracker, WeeklyImprovement,
};
use crate::models::RatingLevel;
use crate::state::{EntityStore, RecordScope};

#[derive(Clone)]
pub struct ApiState {
    pub tracker: SharedActivityTracker,
    pub log_buffer: SharedLogBuffer,
}

pub fn api_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/pending", get(pending))
        .route("/api/curators/:actor_id/rating", get(curator_rating))
        .route("/api/curators/:actor_id/improvement", get(curator_improvement))
        .route("/api/metrics/responses", get(response_metrics))
        .route("/api/metrics/servers", get(server_comparison))
        .route("/api/ratings/distribution", get(distribution))
        .route("/api/ratings/recompute", post(recompute))
        .route("/api/logs", get(logs))
        .route("/api/logs/stream", get(logs_stream))
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for TrackerError {
    fn into_response(self) -> Response {
        let status = match &self {
            TrackerError::NotFound { .. } => StatusCode::NOT_FOUND,
            TrackerError::ConfigValidation { .. } => StatusCode::BAD_REQUEST,
            _ => {
                error!("API request failed: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, TrackerError>;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub pending_help_requests: usize,
    pub active_reminders: usize,
}

async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        pending_help_requests: state.tracker.registry().len(),
        active_reminders: state.tracker.scheduler().active_count(),
    })
}

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    pub server_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PendingView {
    #[serde(flatten)]
    pub request: PendingHelpRequest,
    pub age_seconds: i64,
    pub reminders_sent: u32,
}

async fn pending(
    State(state): State<ApiState>,
    Query(query): Query<PendingQuery>,
) -> Json<Vec<PendingView>> {
    let registry = state.tracker.registry();
    let requests = match &query.server_id {
        Some(server_id) => registry.list_for_server(server_id),
        None => registry.list(),
    };

    let now = Utc::now();
    let views = requests
        .into_iter()
        .map(|request| PendingView {
            age_seconds: request.age(now).num_seconds(),
            reminders_sent: state
                .tracker
                .scheduler()
                .state(&request.message_id)
                .map(|s| s.sent())
                .unwrap_or(0),
            request,
        })
        .collect();
    Json(views)
}

#[derive(Debug, Deserialize)]
pub struct RatingQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CuratorRatingResponse {
    #[serde(flatten)]
    pub report: RatingReport,
    pub ranking: Option<CuratorRanking>,
}

async fn curator_rating(
    State(state): State<ApiState>,
    Path(actor_id): Path<String>,
    Query(query): Query<RatingQuery>,
) -> ApiResult<CuratorRatingResponse> {
    if state.tracker.store().find_curator(&actor_id).await?.is_none() {
        return Err(TrackerError::curator_not_found(&actor_id));
    }

    let ratings = state.tracker.ratings();
    let days = checked_days(query.days, ratings.window_days())?;

    let report = ratings.compute_rating(&actor_id, days).await?;
    let ranking = ratings.ranking(&actor_id).await?;
    Ok(Json(CuratorRatingResponse { report, ranking }))
}

fn checked_days(days: Option<i64>, default: i64) -> Result<i64, TrackerError> {
    let days = days.unwrap_or(default);
    if !(1..=MAX_WINDOW_DAYS).contains(&days) {
        return Err(TrackerError::ConfigValidation {
            message: format!("days must be between 1 and {}", MAX_WINDOW_DAYS),
        });
    }
    Ok(days)
}

async fn curator_improvement(
    State(state): State<ApiState>,
    Path(actor_id): Path<String>,
) -> ApiResult<WeeklyImprovement> {
    if state.tracker.store().find_curator(&actor_id).await?.is_none() {
        return Err(TrackerError::curator_not_found(&actor_id));
    }
    Ok(Json(state.tracker.ratings().weekly_improvement(&actor_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    pub server_id: Option<String>,
    pub actor_id: Option<String>,
    pub days: Option<i64>,
}

async fn response_metrics(
    State(state): State<ApiState>,
    Query(query): Query<MetricsQuery>,
) -> ApiResult<ResponseMetrics> {
    let ratings = state.tracker.ratings();
    let days = checked_days(query.days, ratings.window_days())?;
    let scope = match (query.server_id, query.actor_id) {
        (Some(_), Some(_)) => {
            return Err(TrackerError::ConfigValidation {
                message: "give either server_id or actor_id, not both".to_string(),
            })
        }
        (Some(server_id), None) => RecordScope::Server(server_id),
        (None, Some(actor_id)) => RecordScope::Actor(actor_id),
        (None, None) => RecordScope::All,
    };
    Ok(Json(ratings.response_metrics(&scope, days).await?))
}

#[derive(Debug, Deserialize)]
pub struct ComparisonQuery {
    pub days: Option<i64>,
}

async fn server_comparison(
    State(state): State<ApiState>,
    Query(query): Query<ComparisonQuery>,
) -> ApiResult<Vec<ServerResponseSummary>> {
    let ratings = state.tracker.ratings();
    let days = checked_days(query.days, ratings.window_days())?;
    Ok(Json(ratings.server_comparison(days).await?))
}

async fn distribution(State(state): State<ApiState>) -> ApiResult<BTreeMap<RatingLevel, usize>> {
    Ok(Json(state.tracker.ratings().level_distribution().await?))
}

async fn recompute(State(state): State<ApiState>) -> ApiResult<BatchSummary> {
    info!("Rating recompute triggered via API");
    Ok(Json(state.tracker.ratings().recompute_all().await?))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub count: Option<usize>,
}

async fn logs(
    State(state): State<ApiState>,
    Query(query): Query<LogsQuery>,
) -> Json<Vec<LogEntry>> {
    Json(state.log_buffer.recent(query.count.unwrap_or(100)))
}

/// Live log stream; lagged entries are skipped
async fn logs_stream(State(state): State<ApiState>) -> impl IntoResponse {
    let rx = state.log_buffer.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(entry) => Some(Ok::<_, Infallible>(Event::default().data(entry.to_json()))),
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
