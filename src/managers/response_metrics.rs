//! Response-time analytics over stored response records

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::ResponseThresholds;
use crate::models::{ResponseQuality, ResponseTracking};

/// Days covered by the daily trend, today included
pub const TREND_DAYS: i64 = 7;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QualityDistribution {
    pub good: usize,
    pub average: usize,
    pub poor: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimeBucket {
    pub count: usize,
    pub avg_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyTrend {
    /// YYYY-MM-DD, UTC
    pub date: String,
    pub count: usize,
    pub avg_time: i64,
}

/// Times are whole seconds; averages round down
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResponseMetrics {
    pub total_responses: usize,
    pub average_time: i64,
    pub median_time: i64,
    pub fastest_time: i64,
    pub slowest_time: i64,
    pub quality_distribution: QualityDistribution,
    /// Keyed by the UTC hour the help request was posted
    pub hourly_distribution: BTreeMap<u32, TimeBucket>,
    /// Oldest day first, ending today
    pub daily_trend: Vec<DailyTrend>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerResponseSummary {
    pub server_id: String,
    pub server_name: String,
    pub total_responses: usize,
    pub average_time: i64,
    pub quality_distribution: QualityDistribution,
}

impl ServerResponseSummary {
    pub fn new(server_id: &str, server_name: &str, metrics: ResponseMetrics) -> Self {
        Self {
            server_id: server_id.to_string(),
            server_name: server_name.to_string(),
            total_responses: metrics.total_responses,
            average_time: metrics.average_time,
            quality_distribution: metrics.quality_distribution,
        }
    }
}

fn floor_average(times: &[i64]) -> i64 {
    if times.is_empty() {
        return 0;
    }
    times.iter().sum::<i64>() / times.len() as i64
}

/// Summarise responses. Pure.
pub fn summarize(
    responses: &[ResponseTracking],
    thresholds: &ResponseThresholds,
    now: DateTime<Utc>,
) -> ResponseMetrics {
    let daily_trend = daily_trend(responses, now.date_naive());
    if responses.is_empty() {
        return ResponseMetrics {
            daily_trend,
            ..Default::default()
        };
    }

    let mut times: Vec<i64> = responses.iter().map(|r| r.response_time_seconds).collect();
    times.sort_unstable();
    let total = times.len();

    let mut quality_distribution = QualityDistribution::default();
    for &secs in &times {
        match thresholds.classify(secs) {
            ResponseQuality::Good => quality_distribution.good += 1,
            ResponseQuality::Average => quality_distribution.average += 1,
            ResponseQuality::Poor => quality_distribution.poor += 1,
        }
    }

    let mut by_hour: BTreeMap<u32, Vec<i64>> = BTreeMap::new();
    for response in responses {
        by_hour
            .entry(response.mention_timestamp.hour())
            .or_default()
            .push(response.response_time_seconds);
    }
    let hourly_distribution = by_hour
        .into_iter()
        .map(|(hour, times)| {
            let bucket = TimeBucket {
                count: times.len(),
                avg_time: floor_average(&times),
            };
            (hour, bucket)
        })
        .collect();

    ResponseMetrics {
        total_responses: total,
        average_time: floor_average(&times),
        median_time: times[total / 2],
        fastest_time: times[0],
        slowest_time: times[total - 1],
        quality_distribution,
        hourly_distribution,
        daily_trend,
    }
}

fn daily_trend(responses: &[ResponseTracking], today: NaiveDate) -> Vec<DailyTrend> {
    (0..TREND_DAYS)
        .rev()
        .filter_map(|offset| today.checked_sub_signed(Duration::days(offset)))
        .map(|day| {
            let times: Vec<i64> = responses
                .iter()
                .filter(|r| r.mention_timestamp.date_naive() == day)
                .map(|r| r.response_time_seconds)
                .collect();
            DailyTrend {
                date: day.format("%Y-%m-%d").to_string(),
                count: times.len(),
                avg_time: floor_average(&times),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn response(secs: i64, at: DateTime<Utc>) -> ResponseTracking {
        ResponseTracking {
            id: Uuid::new_v4(),
            actor_id: "a".to_string(),
            server_id: "s".to_string(),
            mention_timestamp: at,
            response_timestamp: at + Duration::seconds(secs),
            response_time_seconds: secs,
            quality: ResponseThresholds::default().classify(secs),
            mention_message_id: Uuid::new_v4().to_string(),
            response_message_id: "r".to_string(),
            channel_id: "c".to_string(),
            trigger_keywords: "help".to_string(),
        }
    }

    #[test]
    fn test_empty_metrics() {
        let now = Utc::now();
        let metrics = summarize(&[], &ResponseThresholds::default(), now);
        assert_eq!(metrics.total_responses, 0);
        assert_eq!(metrics.average_time, 0);
        assert_eq!(metrics.median_time, 0);
        assert!(metrics.hourly_distribution.is_empty());
        assert_eq!(metrics.daily_trend.len(), TREND_DAYS as usize);
        assert!(metrics.daily_trend.iter().all(|d| d.count == 0));
    }

    #[test]
    fn test_summary_statistics() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 18, 0, 0).unwrap();
        let nine = Utc.with_ymd_and_hms(2024, 3, 10, 9, 15, 0).unwrap();
        let yesterday = Utc.with_ymd_and_hms(2024, 3, 9, 9, 40, 0).unwrap();
        let fourteen = Utc.with_ymd_and_hms(2024, 3, 10, 14, 0, 0).unwrap();

        let responses = vec![
            response(30, nine),
            response(45, yesterday),
            response(120, fourteen),
            response(400, fourteen),
        ];
        let metrics = summarize(&responses, &ResponseThresholds::default(), now);

        assert_eq!(metrics.total_responses, 4);
        // (30 + 45 + 120 + 400) / 4 = 148.75
        assert_eq!(metrics.average_time, 148);
        assert_eq!(metrics.median_time, 120);
        assert_eq!(metrics.fastest_time, 30);
        assert_eq!(metrics.slowest_time, 400);
        assert_eq!(
            metrics.quality_distribution,
            QualityDistribution { good: 2, average: 1, poor: 1 }
        );

        assert_eq!(metrics.hourly_distribution[&9], TimeBucket { count: 2, avg_time: 37 });
        assert_eq!(metrics.hourly_distribution[&14], TimeBucket { count: 2, avg_time: 260 });

        let trend = &metrics.daily_trend;
        assert_eq!(trend.first().map(|d| d.date.as_str()), Some("2024-03-04"));
        let today = trend.last().unwrap();
        assert_eq!(today.date, "2024-03-10");
        assert_eq!(today.count, 3);
        assert_eq!(today.avg_time, 183);
        assert_eq!(trend[5].count, 1);
        assert_eq!(trend[5].avg_time, 45);
    }
}
