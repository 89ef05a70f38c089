pub mod activity_tracker;
pub mod classifier;
pub mod pending_registry;
pub mod rating_engine;
pub mod reminder_scheduler;
pub mod response_matcher;
pub mod response_metrics;

pub use activity_tracker::{ActivityTracker, SharedActivityTracker};
pub use classifier::{EventKind, InboundEvent};
pub use pending_registry::{spawn_sweeper, PendingHelpRequest, SharedPendingRegistry};
pub use rating_engine::{BatchSummary, RatingReport, SharedRatingEngine, WeeklyImprovement};
pub use reminder_scheduler::{ReminderNotice, ReminderNotifier};
pub use response_metrics::{ResponseMetrics, ServerResponseSummary};
