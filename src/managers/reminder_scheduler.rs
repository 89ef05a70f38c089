//! Per-request reminder loops.
//!
//! Every open help request on a server with a notification role gets one
//! task. The task sleeps for the server's reminder interval, re-reads the
//! policy, checks the request is still pending and fresh, then pings the role.
//! It stops on the first of: request resolved, request stale, explicit
//! cancellation, single-shot policy, or a failed send.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::managers::pending_registry::{PendingHelpRequest, SharedPendingRegistry};
use crate::state::SharedEntityStore;

/// Floor applied to any interval so a bad value cannot spin the loop
pub const MIN_REMINDER_INTERVAL: Duration = Duration::from_millis(10);

/// Why a reminder loop resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedBy {
    /// The request left the registry (answered, deleted or swept)
    Answered,
    /// Auto-reminders are off, so only one reminder was sent
    SingleShot,
    /// The server no longer has a notification role
    RoleRemoved,
}

/// Reminder loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderState {
    Armed,
    Reminding { sent: u32 },
    Resolved { by: ResolvedBy, sent: u32 },
    Expired { sent: u32 },
    Cancelled { sent: u32 },
    Failed { sent: u32 },
}

impl ReminderState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReminderState::Armed | ReminderState::Reminding { .. })
    }

    pub fn sent(&self) -> u32 {
        match *self {
            ReminderState::Armed => 0,
            ReminderState::Reminding { sent }
            | ReminderState::Resolved { sent, .. }
            | ReminderState::Expired { sent }
            | ReminderState::Cancelled { sent }
            | ReminderState::Failed { sent } => sent,
        }
    }
}

/// Reminder settings as read at a tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderPolicy {
    pub interval: Duration,
    pub auto_reminder: bool,
    pub role_id: String,
}

/// Where reminder settings come from. Consulted on every tick.
#[async_trait]
pub trait ReminderPolicySource: Send + Sync {
    /// `None` when the server has no notification role (or is unknown)
    async fn policy(&self, server_id: &str) -> Result<Option<ReminderPolicy>>;
}

/// Reads the policy from the server record in the entity store
pub struct StorePolicySource {
    store: SharedEntityStore,
}

impl StorePolicySource {
    pub fn new(store: SharedEntityStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ReminderPolicySource for StorePolicySource {
    async fn policy(&self, server_id: &str) -> Result<Option<ReminderPolicy>> {
        let Some(server) = self.store.find_server(server_id).await? else {
            return Ok(None);
        };
        Ok(server.notification_role_id.clone().map(|role_id| ReminderPolicy {
            interval: Duration::from_secs(server.reminder_interval_secs()),
            auto_reminder: server.auto_reminder(),
            role_id,
        }))
    }
}

/// Content of one reminder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderNotice {
    pub server_id: String,
    pub channel_id: String,
    pub message_id: String,
    pub role_id: String,
    pub elapsed_secs: i64,
    pub reminder_number: u32,
}

impl ReminderNotice {
    pub fn jump_url(&self) -> String {
        format!(
            "https://discord.com/channels/{}/{}/{}",
            self.server_id, self.channel_id, self.message_id
        )
    }

    pub fn render(&self) -> String {
        format!(
            "⚠️ <@&{}> Help request still unanswered after {}!\nMessage: {}",
            self.role_id,
            format_elapsed(self.elapsed_secs),
            self.jump_url()
        )
    }
}

/// "5 minutes 30 seconds", "1 minute", "45 seconds"
pub fn format_elapsed(secs: i64) -> String {
    let secs = secs.max(0);
    let minutes = secs / 60;
    let seconds = secs % 60;

    let unit = |n: i64, word: &str| {
        if n == 1 {
            format!("1 {}", word)
        } else {
            format!("{} {}s", n, word)
        }
    };

    match (minutes, seconds) {
        (0, s) => unit(s, "second"),
        (m, 0) => unit(m, "minute"),
        (m, s) => format!("{} {}", unit(m, "minute"), unit(s, "second")),
    }
}

/// Delivers reminders to wherever the role is pinged
#[async_trait]
pub trait ReminderNotifier: Send + Sync {
    async fn send_reminder(&self, notice: &ReminderNotice) -> Result<()>;
}

struct ReminderHandle {
    generation: u64,
    cancel: Option<oneshot::Sender<()>>,
    state: watch::Receiver<ReminderState>,
}

/// Owns the table of running reminder loops, one per pending message id
pub struct ReminderScheduler {
    registry: SharedPendingRegistry,
    notifier: Arc<dyn ReminderNotifier>,
    policies: Arc<dyn ReminderPolicySource>,
    tasks: Arc<DashMap<String, ReminderHandle>>,
    next_generation: AtomicU64,
}

impl ReminderScheduler {
    pub fn new(
        registry: SharedPendingRegistry,
        notifier: Arc<dyn ReminderNotifier>,
        policies: Arc<dyn ReminderPolicySource>,
    ) -> Self {
        Self {
            registry,
            notifier,
            policies,
            tasks: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Start the reminder loop for `request`. Returns `None` if a loop is
    /// already running for that message.
    pub fn arm(&self, request: &PendingHelpRequest) -> Option<watch::Receiver<ReminderState>> {
        match self.tasks.entry(request.message_id.clone()) {
            Entry::Occupied(_) => {
                debug!("Reminder already armed for {}", request.message_id);
                None
            }
            Entry::Vacant(slot) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let (cancel_tx, cancel_rx) = oneshot::channel();
                let (state_tx, state_rx) = watch::channel(ReminderState::Armed);

                let reminder_loop = ReminderLoop {
                    message_id: request.message_id.clone(),
                    server_id: request.server_id.clone(),
                    channel_id: request.channel_id.clone(),
                    registry: self.registry.clone(),
                    notifier: self.notifier.clone(),
                    policies: self.policies.clone(),
                    state: state_tx,
                };
                let tasks = self.tasks.clone();
                let key = request.message_id.clone();

                tokio::spawn(async move {
                    let final_state = reminder_loop.run(cancel_rx).await;
                    tasks.remove_if(&key, |_, handle| handle.generation == generation);
                    debug!("Reminder loop for {} ended: {:?}", key, final_state);
                });

                slot.insert(ReminderHandle {
                    generation,
                    cancel: Some(cancel_tx),
                    state: state_rx.clone(),
                });
                info!("Reminders armed for help request {}", request.message_id);
                Some(state_rx)
            }
        }
    }

    /// Interrupt the loop for `message_id`, even mid-wait. Returns false if none was running.
    pub fn cancel(&self, message_id: &str) -> bool {
        match self.tasks.remove(message_id) {
            Some((_, mut handle)) => {
                if let Some(cancel) = handle.cancel.take() {
                    let _ = cancel.send(());
                }
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, message_id: &str) -> bool {
        self.tasks.contains_key(message_id)
    }

    pub fn state(&self, message_id: &str) -> Option<ReminderState> {
        self.tasks.get(message_id).map(|h| *h.state.borrow())
    }

    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    /// Cancel every running loop
    pub fn cancel_all(&self) -> usize {
        let keys: Vec<String> = self.tasks.iter().map(|e| e.key().clone()).collect();
        keys.iter().filter(|key| self.cancel(key)).count()
    }
}

/// Shared scheduler type
pub type SharedReminderScheduler = Arc<ReminderScheduler>;

/// State owned by one running reminder task
struct ReminderLoop {
    message_id: String,
    server_id: String,
    channel_id: String,
    registry: SharedPendingRegistry,
    notifier: Arc<dyn ReminderNotifier>,
    policies: Arc<dyn ReminderPolicySource>,
    state: watch::Sender<ReminderState>,
}

impl ReminderLoop {
    async fn run(self, mut cancel: oneshot::Receiver<()>) -> ReminderState {
        let mut sent = 0u32;

        let final_state = 'reminding: loop {
            let policy = match self.current_policy(sent).await {
                Ok(policy) => policy,
                Err(terminal) => break 'reminding terminal,
            };

            let interval = policy.interval.max(MIN_REMINDER_INTERVAL);
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                // A dropped sender also ends the wait
                _ = &mut cancel => {
                    info!("Reminders cancelled for help request {}", self.message_id);
                    break 'reminding ReminderState::Cancelled { sent };
                }
            }

            // Settings may have changed while we slept
            let policy = match self.current_policy(sent).await {
                Ok(policy) => policy,
                Err(terminal) => break 'reminding terminal,
            };

            let now = Utc::now();
            let Some(request) = self.registry.lookup(&self.message_id) else {
                info!("Help request {} was answered, stopping reminders", self.message_id);
                break 'reminding ReminderState::Resolved {
                    by: ResolvedBy::Answered,
                    sent,
                };
            };

            if self.registry.is_stale(&request, now) {
                info!("Help request {} went stale, stopping reminders", self.message_id);
                break 'reminding ReminderState::Expired { sent };
            }

            let notice = ReminderNotice {
                server_id: self.server_id.clone(),
                channel_id: self.channel_id.clone(),
                message_id: self.message_id.clone(),
                role_id: policy.role_id.clone(),
                elapsed_secs: request.age(now).num_seconds(),
                reminder_number: sent + 1,
            };

            if let Err(e) = self.notifier.send_reminder(&notice).await {
                error!("Could not send reminder for {}: {}", self.message_id, e);
                break 'reminding ReminderState::Failed { sent };
            }

            sent += 1;
            info!(
                "Reminder #{} sent for help request {} after {}s",
                sent, self.message_id, notice.elapsed_secs
            );
            let _ = self.state.send(ReminderState::Reminding { sent });

            if !policy.auto_reminder {
                info!("Auto reminder disabled, sent single reminder for {}", self.message_id);
                break 'reminding ReminderState::Resolved {
                    by: ResolvedBy::SingleShot,
                    sent,
                };
            }
        };

        let _ = self.state.send(final_state);
        final_state
    }

    /// Fresh policy, or the terminal state to stop in
    async fn current_policy(&self, sent: u32) -> std::result::Result<ReminderPolicy, ReminderState> {
        match self.policies.policy(&self.server_id).await {
            Ok(Some(policy)) => Ok(policy),
            Ok(None) => {
                info!(
                    "Server {} has no notification role, stopping reminders for {}",
                    self.server_id, self.message_id
                );
                Err(ReminderState::Resolved {
                    by: ResolvedBy::RoleRemoved,
                    sent,
                })
            }
            Err(e) => {
                warn!("Could not read reminder settings for {}: {}", self.server_id, e);
                Err(ReminderState::Failed { sent })
            }
        }
    }
}
