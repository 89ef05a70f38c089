use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};
use crate::models::{ActivityType, RatingLevel, ResponseQuality};

/// Longest look-back accepted anywhere a window is given in days
pub const MAX_WINDOW_DAYS: i64 = 3650;

/// History needed to compare this week against the previous one
pub const WEEKLY_COMPARISON_DAYS: i64 = 14;

/// Start of a look-back window of `days` ending at `now`.
/// Rejects windows outside `1..=MAX_WINDOW_DAYS`.
pub fn window_start(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>> {
    if !(1..=MAX_WINDOW_DAYS).contains(&days) {
        return Err(TrackerError::ConfigValidation {
            message: format!("window must be between 1 and {} days, got {}", MAX_WINDOW_DAYS, days),
        });
    }
    Duration::try_days(days)
        .and_then(|span| now.checked_sub_signed(span))
        .ok_or_else(|| TrackerError::ConfigValidation {
            message: format!("window of {} days is out of range", days),
        })
}

/// Engine tuning, loaded from data/tracker.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackerConfig {
    /// Lowercase substrings that mark a post as a help request
    #[serde(default = "default_keywords")]
    pub help_keywords: Vec<String>,

    #[serde(default)]
    pub points: PointValues,

    #[serde(default)]
    pub response_thresholds: ResponseThresholds,

    #[serde(default)]
    pub rating_levels: LevelThresholds,

    /// Rolling window for rating computation
    #[serde(default = "default_window_days")]
    pub rating_window_days: i64,

    /// Activities and responses older than this are pruned from the store
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_keywords() -> Vec<String> {
    ["curator", "help", "куратор", "помощь"]
        .iter()
        .map(|k| k.to_string())
        .collect()
}

fn default_window_days() -> i64 {
    30
}

fn default_retention_days() -> i64 {
    90
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            help_keywords: default_keywords(),
            points: PointValues::default(),
            response_thresholds: ResponseThresholds::default(),
            rating_levels: LevelThresholds::default(),
            rating_window_days: default_window_days(),
            retention_days: default_retention_days(),
        }
    }
}

/// Points awarded per activity type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PointValues {
    pub message: u32,
    pub reaction: u32,
    pub reply: u32,
    pub task_verification: u32,
}

impl Default for PointValues {
    fn default() -> Self {
        Self {
            message: 3,
            reaction: 1,
            reply: 2,
            task_verification: 5,
        }
    }
}

impl PointValues {
    pub fn for_type(&self, kind: ActivityType) -> u32 {
        match kind {
            ActivityType::Message => self.message,
            ActivityType::Reaction => self.reaction,
            ActivityType::Reply => self.reply,
            ActivityType::TaskVerification => self.task_verification,
        }
    }
}

/// Response time thresholds in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseThresholds {
    /// At or below this a response is good
    pub good: i64,
    /// At or above this a response is poor
    pub poor: i64,
}

impl Default for ResponseThresholds {
    fn default() -> Self {
        Self { good: 60, poor: 300 }
    }
}

impl ResponseThresholds {
    pub fn classify(&self, response_time_seconds: i64) -> ResponseQuality {
        if response_time_seconds <= self.good {
            ResponseQuality::Good
        } else if response_time_seconds >= self.poor {
            ResponseQuality::Poor
        } else {
            ResponseQuality::Average
        }
    }
}

/// Lower bounds (inclusive) of each rating band
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelThresholds {
    pub excellent: i64,
    pub good: i64,
    pub normal: i64,
    pub poor: i64,
    pub terrible: i64,
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self {
            excellent: 50,
            good: 35,
            normal: 20,
            poor: 10,
            terrible: 0,
        }
    }
}

impl LevelThresholds {
    /// Map a point value onto exactly one band. Anything below `poor`,
    /// negative totals included, lands in the lowest band.
    pub fn level_for(&self, points: i64) -> RatingLevel {
        if points >= self.excellent {
            RatingLevel::Excellent
        } else if points >= self.good {
            RatingLevel::Good
        } else if points >= self.normal {
            RatingLevel::Normal
        } else if points >= self.poor {
            RatingLevel::Poor
        } else {
            RatingLevel::Terrible
        }
    }

    fn as_descending(&self) -> [i64; 5] {
        [self.excellent, self.good, self.normal, self.poor, self.terrible]
    }
}

impl TrackerConfig {
    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No tracker config at '{}', using defaults", path);
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(TrackerError::ConfigLoad {
                    path: path.to_string(),
                    source: e,
                })
            }
        };

        let config: TrackerConfig =
            serde_json::from_str(&content).map_err(|e| TrackerError::ConfigParse {
                path: path.to_string(),
                source: e,
            })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.help_keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(TrackerError::ConfigValidation {
                message: "help_keywords must contain at least one keyword".to_string(),
            });
        }

        let thresholds = &self.response_thresholds;
        if thresholds.good < 0 || thresholds.good >= thresholds.poor {
            return Err(TrackerError::ConfigValidation {
                message: format!(
                    "response_thresholds.good ({}) must be non-negative and below poor ({})",
                    thresholds.good, thresholds.poor
                ),
            });
        }

        let levels = self.rating_levels.as_descending();
        if levels.windows(2).any(|pair| pair[0] <= pair[1]) {
            return Err(TrackerError::ConfigValidation {
                message: format!("rating_levels must be strictly descending, got {:?}", levels),
            });
        }

        if !(1..=MAX_WINDOW_DAYS).contains(&self.rating_window_days) {
            return Err(TrackerError::ConfigValidation {
                message: format!(
                    "rating_window_days must be between 1 and {}, got {}",
                    MAX_WINDOW_DAYS, self.rating_window_days
                ),
            });
        }

        let min_retention = self.rating_window_days.max(WEEKLY_COMPARISON_DAYS);
        if !(min_retention..=MAX_WINDOW_DAYS).contains(&self.retention_days) {
            return Err(TrackerError::ConfigValidation {
                message: format!(
                    "retention_days must be between {} and {}, got {}",
                    min_retention, MAX_WINDOW_DAYS, self.retention_days
                ),
            });
        }

        Ok(())
    }

    /// Keywords normalised to lowercase, blanks dropped
    pub fn normalized_keywords(&self) -> Vec<String> {
        self.help_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect()
    }
}
