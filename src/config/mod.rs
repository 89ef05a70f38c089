pub mod tracker;

pub use tracker::{window_start, ResponseThresholds, TrackerConfig, MAX_WINDOW_DAYS};
