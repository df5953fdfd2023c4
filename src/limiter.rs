//! Layered sliding-window rate limiter
//!
//! Three independent counters gate admission into a session's queue:
//! per-session-per-minute, per-session-per-hour, and
//! per-session-per-recipient-per-hour. Windows are plain timestamp lists
//! pruned relative to "now" on every check; a periodic background sweep
//! additionally bounds memory but is never required for correctness.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::debug;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Why an admission check denied a send. The variant names the limit that
/// tripped; denial by any one limit is final.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionDenied {
    #[error("rate limit exceeded: {limit} messages per minute for session {session_id}")]
    PerMinute { session_id: String, limit: u32 },

    #[error("rate limit exceeded: {limit} messages per hour for session {session_id}")]
    PerHour { session_id: String, limit: u32 },

    #[error(
        "rate limit exceeded: {limit} messages per hour to recipient {recipient} for session {session_id}"
    )]
    PerRecipient {
        session_id: String,
        recipient: String,
        limit: u32,
    },
}

/// The three configured ceilings. No defaults here; values come from
/// [`crate::config::GatewayConfig`].
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub per_minute: u32,
    pub per_hour: u32,
    pub per_recipient_per_hour: u32,
}

impl From<&crate::config::GatewayConfig> for RateLimits {
    fn from(config: &crate::config::GatewayConfig) -> Self {
        Self {
            per_minute: config.max_messages_per_minute,
            per_hour: config.max_messages_per_hour,
            per_recipient_per_hour: config.max_messages_per_recipient_per_hour,
        }
    }
}

/// Sliding-window admission control over attempted sends.
///
/// `record` is called once a send has been admitted into a queue, so failed
/// deliveries still count toward throughput — the windows track attempts,
/// not successes.
pub struct RateLimiter {
    limits: RateLimits,
    /// Per-session send timestamps within the trailing hour
    session_windows: Mutex<HashMap<String, Vec<Instant>>>,
    /// Per-(session, recipient) send timestamps within the trailing hour
    recipient_windows: Mutex<HashMap<(String, String), Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            session_windows: Mutex::new(HashMap::new()),
            recipient_windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &crate::config::GatewayConfig) -> Self {
        Self::new(RateLimits::from(config))
    }

    /// May a send for this session/recipient proceed right now?
    ///
    /// Prunes each window before counting, so correctness never depends on
    /// the background sweep.
    pub fn check_admission(
        &self,
        session_id: &str,
        recipient: &str,
    ) -> Result<(), AdmissionDenied> {
        self.check_admission_at(session_id, recipient, Instant::now())
    }

    fn check_admission_at(
        &self,
        session_id: &str,
        recipient: &str,
        now: Instant,
    ) -> Result<(), AdmissionDenied> {
        {
            let mut sessions = self.session_windows.lock();
            let window = sessions.entry(session_id.to_string()).or_default();
            prune(window, now, HOUR);

            let last_minute = window
                .iter()
                .filter(|t| now.duration_since(**t) < MINUTE)
                .count();
            if last_minute >= self.limits.per_minute as usize {
                return Err(AdmissionDenied::PerMinute {
                    session_id: session_id.to_string(),
                    limit: self.limits.per_minute,
                });
            }
            if window.len() >= self.limits.per_hour as usize {
                return Err(AdmissionDenied::PerHour {
                    session_id: session_id.to_string(),
                    limit: self.limits.per_hour,
                });
            }
        }

        let mut recipients = self.recipient_windows.lock();
        let key = (session_id.to_string(), recipient.to_string());
        let window = recipients.entry(key).or_default();
        prune(window, now, HOUR);
        if window.len() >= self.limits.per_recipient_per_hour as usize {
            return Err(AdmissionDenied::PerRecipient {
                session_id: session_id.to_string(),
                recipient: recipient.to_string(),
                limit: self.limits.per_recipient_per_hour,
            });
        }

        Ok(())
    }

    /// Record an admitted send attempt. Call only after `check_admission`
    /// allowed it.
    pub fn record(&self, session_id: &str, recipient: &str) {
        self.record_at(session_id, recipient, Instant::now());
    }

    fn record_at(&self, session_id: &str, recipient: &str, now: Instant) {
        self.session_windows
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .push(now);
        self.recipient_windows
            .lock()
            .entry((session_id.to_string(), recipient.to_string()))
            .or_default()
            .push(now);
    }

    /// Drop timestamps older than the tracked horizon and any now-empty
    /// windows. Returns how many timestamps were removed. Advisory only;
    /// admission checks prune inline.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        {
            let mut sessions = self.session_windows.lock();
            for window in sessions.values_mut() {
                let before = window.len();
                prune(window, now, HOUR);
                removed += before - window.len();
            }
            sessions.retain(|_, w| !w.is_empty());
        }

        {
            let mut recipients = self.recipient_windows.lock();
            for window in recipients.values_mut() {
                let before = window.len();
                prune(window, now, HOUR);
                removed += before - window.len();
            }
            recipients.retain(|_, w| !w.is_empty());
        }

        removed
    }

    /// Run `sweep` on a fixed interval (60 seconds is the recommended
    /// cadence) until the shutdown signal flips.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                if *shutdown.borrow() {
                    break;
                }
                let removed = limiter.sweep();
                if removed > 0 {
                    debug!(removed, "rate window sweep pruned stale timestamps");
                }
            }
        })
    }

    /// Number of live timestamps tracked for a session (trailing hour).
    pub fn session_window_len(&self, session_id: &str) -> usize {
        self.session_windows
            .lock()
            .get(session_id)
            .map(|w| w.len())
            .unwrap_or(0)
    }
}

fn prune(window: &mut Vec<Instant>, now: Instant, horizon: Duration) {
    window.retain(|t| now.duration_since(*t) < horizon);
}
