//! Reconnect supervision for a [`RealtimeHandle`].
//!
//! The connection manager never retries. [`ReconnectSupervisor`] watches the
//! published [`RealtimeView`] and, when the feed goes down while consumers
//! are still registered, waits out a backoff delay and asks the hub to
//! reconnect. Status churn while already down (a consumer switching
//! currency, say) is not another failure, and neither is the teardown after
//! the last consumer leaves.

use crate::{RealtimeHandle, RealtimeView};
use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Upper bound of the random extra delay, as a fraction of the base delay.
const MAX_JITTER: f64 = 0.25;

/// Exponential reconnect backoff.
///
/// ```rust
/// use std::time::Duration;
/// use ticker_feeds::ReconnectPolicy;
///
/// let policy = ReconnectPolicy { jitter: false, ..Default::default() };
/// assert_eq!(policy.delay_for(1), Duration::from_secs(1));
/// assert_eq!(policy.delay_for(3), Duration::from_secs(4));
/// assert_eq!(policy.delay_for(30), Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect (ms)
    pub initial_delay_ms: u64,
    /// Cap for any single delay, before jitter (ms)
    pub max_delay_ms: u64,
    /// Consecutive failures tolerated; 0 retries forever
    pub max_retries: u32,
    /// Add up to 25% random delay so many clients don't reconnect in lockstep
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_retries: 10,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let base = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        let extra = if self.jitter {
            (base as f64 * rand::thread_rng().gen_range(0.0..=MAX_JITTER)) as u64
        } else {
            0
        };
        Duration::from_millis(base.saturating_add(extra))
    }

    pub fn allows(&self, attempt: u32) -> bool {
        self.max_retries == 0 || attempt <= self.max_retries
    }
}

/// Why a supervisor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// The hub task is gone
    HubClosed,
    /// The feed stayed down for more attempts than the policy allows
    GaveUp { attempts: u32 },
}

/// Keeps a hub's connection alive while anyone is watching.
#[derive(Debug)]
pub struct ReconnectSupervisor {
    handle: RealtimeHandle,
    view: watch::Receiver<RealtimeView>,
    policy: ReconnectPolicy,
    /// Consecutive failed connections
    failures: u32,
    /// Last observation was "closed with consumers waiting"
    was_down: bool,
}

impl ReconnectSupervisor {
    pub fn new(handle: RealtimeHandle, policy: ReconnectPolicy) -> Self {
        let view = handle.watch_view();
        Self {
            handle,
            view,
            policy,
            failures: 0,
            was_down: false,
        }
    }

    pub fn spawn(self) -> JoinHandle<SupervisorExit> {
        tokio::spawn(self.run())
    }

    /// Supervise until the retry budget is spent or the hub stops.
    pub async fn run(mut self) -> SupervisorExit {
        loop {
            let view = self.view.borrow_and_update().clone();
            if self.went_down(&view) {
                if let Some(exit) = self.reconnect_after_backoff().await {
                    return exit;
                }
            }
            if self.view.changed().await.is_err() {
                return SupervisorExit::HubClosed;
            }
        }
    }

    /// Track the view; true only on the move into "closed with consumers".
    fn went_down(&mut self, view: &RealtimeView) -> bool {
        if view.status.is_open() {
            if self.failures > 0 {
                info!(failures = self.failures, "Realtime feed recovered");
            }
            self.failures = 0;
        }
        let down = is_down(view);
        let entered = down && !self.was_down;
        self.was_down = down;
        entered
    }

    async fn reconnect_after_backoff(&mut self) -> Option<SupervisorExit> {
        self.failures += 1;
        if !self.policy.allows(self.failures) {
            error!(
                attempts = self.failures,
                "Realtime feed unavailable, giving up"
            );
            return Some(SupervisorExit::GaveUp {
                attempts: self.failures,
            });
        }

        let delay = self.policy.delay_for(self.failures);
        warn!(
            attempt = self.failures,
            delay_ms = delay.as_millis() as u64,
            "Realtime feed closed, reconnecting"
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                changed = self.view.changed() => {
                    if changed.is_err() {
                        return Some(SupervisorExit::HubClosed);
                    }
                    let view = self.view.borrow_and_update().clone();
                    if !is_down(&view) {
                        debug!(status = ?view.status, "Reconnect no longer needed");
                        self.went_down(&view);
                        return None;
                    }
                }
            }
        }

        if self.handle.reconnect().is_err() {
            return Some(SupervisorExit::HubClosed);
        }
        // The next Closed, however quickly it follows, is a new failure.
        self.was_down = false;
        None
    }
}

fn is_down(view: &RealtimeView) -> bool {
    view.status.is_closed() && view.consumers > 0
}
