//! Downlink timing.
//!
//! [`ProcessingDelay`] holds a downlink back until a configured budget has
//! elapsed since the uplink arrived, so replies line up with the device's
//! fixed receive windows.  Setting the budget to zero or a negative value
//! disables the wait entirely (loopback tests, gateways that schedule on
//! their own).
//!
//! [`ReceiveWindowPlanner`] decides which class A receive window a downlink
//! can still reach:
//!
//! ```text
//! received_at        rx1 opens (+rx1_delay)      rx2 opens (+rx1_delay+1s)
//!      │──────────────────────│───────────────────────────│
//!      now + package_time ≤ rx1  → Rx1
//!      now + package_time ≤ rx2  → Rx2
//!      otherwise                 → too late, drop
//! ```

use std::time::Duration;

// ---

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ---

use lns_domain::ReceiveWindow;

// ---------------------------------------------------------------------------
// ProcessingDelay
// ---------------------------------------------------------------------------

/// Budget used when none is configured.
pub const DEFAULT_PROCESSING_DELAY_MS: u64 = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayOutcome {
    // ---
    /// The budget ran out; the downlink may go.
    Elapsed,

    /// The delay is disabled.
    Skipped,

    /// The signal fired before the budget ran out.
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
pub struct ProcessingDelay {
    // ---
    /// `None` = disabled.
    budget: Option<Duration>,
}

impl ProcessingDelay {
    // ---
    /// `budget_ms` absent → default budget; `<= 0` → disabled.
    pub fn new(budget_ms: Option<i64>) -> Self {
        // ---
        let budget = match budget_ms {
            None => Some(Duration::from_millis(DEFAULT_PROCESSING_DELAY_MS)),
            Some(ms) if ms > 0 => Some(Duration::from_millis(ms.unsigned_abs())),
            Some(_) => None,
        };
        Self { budget }
    }

    pub fn is_enabled(&self) -> bool {
        self.budget.is_some()
    }

    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }

    /// Instant before which no downlink for an uplink received at
    /// `received_at` may go out.
    pub fn deadline(&self, received_at: Instant) -> Option<Instant> {
        self.budget.map(|b| received_at + b)
    }

    // ---

    /// Sleep until the deadline, or until `cancel` fires.
    pub async fn wait(&self, received_at: Instant, cancel: &CancellationToken) -> DelayOutcome {
        // ---
        let Some(deadline) = self.deadline(received_at) else {
            return DelayOutcome::Skipped;
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => DelayOutcome::Cancelled,
            _ = tokio::time::sleep_until(deadline) => DelayOutcome::Elapsed,
        }
    }
}

// ---------------------------------------------------------------------------
// ReceiveWindowPlanner
// ---------------------------------------------------------------------------

pub const DEFAULT_RX1_DELAY: Duration = Duration::from_secs(1);

/// RX2 opens this long after RX1.
pub const RX2_OFFSET: Duration = Duration::from_secs(1);

/// Expected time to package a downlink and hand it to the radio.
pub const DEFAULT_PACKAGE_TIME: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy)]
pub struct ReceiveWindowPlanner {
    // ---
    rx1_delay: Duration,
    package_time: Duration,
}

impl Default for ReceiveWindowPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_RX1_DELAY)
    }
}

impl ReceiveWindowPlanner {
    // ---
    pub fn new(rx1_delay: Duration) -> Self {
        Self {
            rx1_delay,
            package_time: DEFAULT_PACKAGE_TIME,
        }
    }

    pub fn with_package_time(mut self, package_time: Duration) -> Self {
        self.package_time = package_time;
        self
    }

    pub fn rx1_open(&self, received_at: Instant) -> Instant {
        received_at + self.rx1_delay
    }

    pub fn rx2_open(&self, received_at: Instant) -> Instant {
        received_at + self.rx1_delay + RX2_OFFSET
    }

    // ---

    /// Window a downlink prepared at `now` can still make.  `None` when both
    /// have passed.
    pub fn window_for(&self, received_at: Instant, now: Instant) -> Option<ReceiveWindow> {
        // ---
        let ready_at = now + self.package_time;

        if ready_at <= self.rx1_open(received_at) {
            Some(ReceiveWindow::Rx1)
        } else if ready_at <= self.rx2_open(received_at) {
            Some(ReceiveWindow::Rx2)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn enabled_for_absent_or_positive_budget() {
        // ---
        assert!(ProcessingDelay::new(None).is_enabled());
        assert_eq!(
            ProcessingDelay::new(None).budget(),
            Some(Duration::from_millis(DEFAULT_PROCESSING_DELAY_MS))
        );
        assert!(ProcessingDelay::new(Some(1)).is_enabled());
        assert!(!ProcessingDelay::new(Some(0)).is_enabled());
        assert!(!ProcessingDelay::new(Some(-250)).is_enabled());
    }

    // ---

    #[tokio::test(start_paused = true)]
    async fn wait_runs_out_the_budget() {
        // ---
        let received_at = Instant::now();
        let delay = ProcessingDelay::new(Some(250));

        let outcome = delay.wait(received_at, &CancellationToken::new()).await;

        assert_eq!(outcome, DelayOutcome::Elapsed);
        assert_eq!(Instant::now() - received_at, Duration::from_millis(250));
    }

    // ---

    #[tokio::test(start_paused = true)]
    async fn disabled_delay_returns_immediately() {
        // ---
        let received_at = Instant::now();
        let outcome = ProcessingDelay::new(Some(0))
            .wait(received_at, &CancellationToken::new())
            .await;

        assert_eq!(outcome, DelayOutcome::Skipped);
        assert_eq!(Instant::now(), received_at);
    }

    // ---

    #[tokio::test(start_paused = true)]
    async fn cancellation_unblocks_the_wait() {
        // ---
        let received_at = Instant::now();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = ProcessingDelay::new(Some(5_000)).wait(received_at, &cancel).await;

        assert_eq!(outcome, DelayOutcome::Cancelled);
        assert!(Instant::now() - received_at < Duration::from_secs(1));
    }

    // ---

    #[test]
    fn planner_picks_the_earliest_reachable_window() {
        // ---
        let planner = ReceiveWindowPlanner::default();
        let t0 = Instant::now();

        assert_eq!(planner.window_for(t0, t0), Some(ReceiveWindow::Rx1));
        assert_eq!(
            planner.window_for(t0, t0 + Duration::from_millis(700)),
            Some(ReceiveWindow::Rx1)
        );
        assert_eq!(
            planner.window_for(t0, t0 + Duration::from_millis(701)),
            Some(ReceiveWindow::Rx2)
        );
        assert_eq!(
            planner.window_for(t0, t0 + Duration::from_millis(1_700)),
            Some(ReceiveWindow::Rx2)
        );
        assert_eq!(planner.window_for(t0, t0 + Duration::from_millis(1_701)), None);
    }

    // ---

    #[test]
    fn planner_honours_configured_rx1_delay() {
        // ---
        let planner = ReceiveWindowPlanner::new(Duration::from_secs(5))
            .with_package_time(Duration::from_millis(100));
        let t0 = Instant::now();

        assert_eq!(planner.rx2_open(t0) - planner.rx1_open(t0), RX2_OFFSET);
        assert_eq!(
            planner.window_for(t0, t0 + Duration::from_millis(4_900)),
            Some(ReceiveWindow::Rx1)
        );
        assert_eq!(
            planner.window_for(t0, t0 + Duration::from_millis(5_500)),
            Some(ReceiveWindow::Rx2)
        );
    }
}
