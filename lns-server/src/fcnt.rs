//! Frame counter strategies.
//!
//! A device pinned to this gateway is validated locally
//! ([`SingleGatewayStrategy`]).  A device any gateway may hear is validated
//! against the cluster's preferred-gateway resolver
//! ([`MultiGatewayStrategy`]), which detects two instances claiming the same
//! uplink.  A device pinned to a different gateway gets no strategy at all:
//! this server must not handle it.
//!
//! Both strategies answer with a [`FrameCounterDecision`]: whether the uplink
//! is new, and what kind of downlink (if any) may follow it.

use std::sync::Arc;

// ---

use async_trait::async_trait;

// ---

use lns_domain::{NetworkServerServicePtr, UplinkClaim};

// ---

use super::metrics::ServerMetrics;
use super::observe::report_failure;
use super::registry::DeviceSession;

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    // ---
    SingleGateway,
    MultiGateway,
}

/// Which strategy validates a device whose directory record names
/// `device_gateway_id`, as seen from the gateway `local_gateway_id`.
///
/// `None` means the device belongs to another gateway.
pub fn select_strategy_kind(
    device_gateway_id: Option<&str>,
    local_gateway_id: &str,
) -> Option<StrategyKind> {
    // ---
    match device_gateway_id {
        None | Some("") => Some(StrategyKind::MultiGateway),
        Some(id) if id.eq_ignore_ascii_case(local_gateway_id) => Some(StrategyKind::SingleGateway),
        Some(_) => None,
    }
}

// ---------------------------------------------------------------------------
// FrameCounterDecision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    // ---
    /// New uplink.  `fcnt_up` is the counter now stored in the session.
    Accepted { fcnt_up: u32, next_expected: u32 },

    /// Same counter as the last accepted uplink: the device did not get our
    /// acknowledgment and sent the frame again.
    Resubmission,

    /// Another gateway owns this uplink.
    Duplicate,

    /// Counter went backwards.
    Replay,
}

/// What may be sent back after the uplink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownlinkPermission {
    // ---
    Allowed,

    /// The counter could not be checked against the cluster; only an
    /// unconfirmed downlink may go out.
    UnconfirmedOnly,

    Suppressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCounterDecision {
    // ---
    pub verdict: Verdict,
    pub downlink: DownlinkPermission,
}

impl FrameCounterDecision {
    // ---
    fn new(verdict: Verdict, downlink: DownlinkPermission) -> Self {
        Self { verdict, downlink }
    }

    /// The uplink should be acknowledged (new or resubmitted).
    pub fn is_processable(&self) -> bool {
        matches!(
            self.verdict,
            Verdict::Accepted { .. } | Verdict::Resubmission
        )
    }
}

// ---------------------------------------------------------------------------
// FrameCounterStrategy
// ---------------------------------------------------------------------------

#[async_trait]
pub trait FrameCounterStrategy: Send + Sync {
    // ---
    fn kind(&self) -> StrategyKind;

    /// Validate uplink counter `fcnt_up` against `session`, advancing the
    /// session's counter on acceptance.
    async fn validate_uplink(&self, session: &mut DeviceSession, fcnt_up: u32)
        -> FrameCounterDecision;

    /// Counter for the next downlink, stored in `session`.  `None` means no
    /// counter could be obtained and the downlink must be skipped.
    async fn next_fcnt_down(&self, session: &mut DeviceSession) -> Option<u32>;
}

pub type FrameCounterStrategyPtr = Arc<dyn FrameCounterStrategy>;

// ---------------------------------------------------------------------------
// Local compare rule
// ---------------------------------------------------------------------------

/// Compare `fcnt_up` with the session's stored counter.  A session that has
/// never accepted an uplink accepts anything, including counter zero.
fn compare_local(session: &DeviceSession, fcnt_up: u32) -> Verdict {
    // ---
    let stored = session.fcnt_up;

    if session.uplinks_seen == 0 || fcnt_up > stored {
        Verdict::Accepted {
            fcnt_up,
            next_expected: fcnt_up.wrapping_add(1),
        }
    } else if fcnt_up == stored {
        Verdict::Resubmission
    } else {
        Verdict::Replay
    }
}

fn record_accepted(session: &mut DeviceSession, fcnt_up: u32) {
    session.fcnt_up = fcnt_up;
    session.uplinks_seen += 1;
}

// ---------------------------------------------------------------------------
// SingleGatewayStrategy
// ---------------------------------------------------------------------------

/// Local compare-and-increment.  No network calls.
#[derive(Debug, Default)]
pub struct SingleGatewayStrategy;

#[async_trait]
impl FrameCounterStrategy for SingleGatewayStrategy {
    // ---
    fn kind(&self) -> StrategyKind {
        StrategyKind::SingleGateway
    }

    async fn validate_uplink(
        &self,
        session: &mut DeviceSession,
        fcnt_up: u32,
    ) -> FrameCounterDecision {
        // ---
        let verdict = compare_local(session, fcnt_up);

        let downlink = match verdict {
            Verdict::Accepted { fcnt_up, .. } => {
                record_accepted(session, fcnt_up);
                DownlinkPermission::Allowed
            }
            Verdict::Resubmission => DownlinkPermission::Allowed,
            Verdict::Duplicate | Verdict::Replay => {
                tracing::debug!(
                    identity = %session.identity,
                    fcnt_up,
                    stored = session.fcnt_up,
                    "uplink counter behind session",
                );
                DownlinkPermission::Suppressed
            }
        };

        FrameCounterDecision::new(verdict, downlink)
    }

    async fn next_fcnt_down(&self, session: &mut DeviceSession) -> Option<u32> {
        session.fcnt_down = session.fcnt_down.wrapping_add(1);
        Some(session.fcnt_down)
    }
}

// ---------------------------------------------------------------------------
// MultiGatewayStrategy
// ---------------------------------------------------------------------------

/// Cluster-wide validation through the preferred-gateway resolver.
pub struct MultiGatewayStrategy {
    // ---
    service: NetworkServerServicePtr,
    gateway_id: String,
    metrics: Arc<ServerMetrics>,
}

impl MultiGatewayStrategy {
    // ---
    pub fn new(
        service: NetworkServerServicePtr,
        gateway_id: impl Into<String>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            service,
            gateway_id: gateway_id.into(),
            metrics,
        }
    }

    // ---

    /// Resolver unreachable: accept on the local rule, but never promise a
    /// confirmed downlink.
    fn degraded(&self, session: &mut DeviceSession, fcnt_up: u32) -> FrameCounterDecision {
        // ---
        let verdict = compare_local(session, fcnt_up);
        let downlink = match verdict {
            Verdict::Accepted { fcnt_up, .. } => {
                record_accepted(session, fcnt_up);
                DownlinkPermission::UnconfirmedOnly
            }
            Verdict::Resubmission => DownlinkPermission::UnconfirmedOnly,
            Verdict::Duplicate | Verdict::Replay => DownlinkPermission::Suppressed,
        };

        tracing::debug!(
            identity = %session.identity,
            fcnt_up,
            ?verdict,
            "resolver unavailable, validated locally",
        );
        FrameCounterDecision::new(verdict, downlink)
    }
}

// ---

#[async_trait]
impl FrameCounterStrategy for MultiGatewayStrategy {
    // ---
    fn kind(&self) -> StrategyKind {
        StrategyKind::MultiGateway
    }

    async fn validate_uplink(
        &self,
        session: &mut DeviceSession,
        fcnt_up: u32,
    ) -> FrameCounterDecision {
        // ---
        let identity = session.identity;
        let claim = UplinkClaim::new(identity, fcnt_up, &self.gateway_id);

        let result = report_failure(self.service.resolve_preferred_gateway(&claim), |e| {
            self.metrics.resolver_failures.increment();
            tracing::warn!(%identity, fcnt_up, "preferred gateway lookup failed: {e}");
        })
        .await;

        let result = match result {
            Ok(result) => result,
            Err(_) => return self.degraded(session, fcnt_up),
        };

        if result.conflict && result.request_fcnt_up < result.current_fcnt_up {
            tracing::debug!(
                %identity,
                fcnt_up,
                current = result.current_fcnt_up,
                reason = result.error_message.as_deref().unwrap_or_default(),
                "stale uplink counter",
            );
            return FrameCounterDecision::new(Verdict::Replay, DownlinkPermission::Suppressed);
        }

        if result.conflict && !result.is_preferred(&self.gateway_id) {
            tracing::debug!(
                %identity,
                fcnt_up,
                preferred = result.preferred_gateway_id.as_deref().unwrap_or_default(),
                "another gateway owns this uplink",
            );
            return FrameCounterDecision::new(Verdict::Duplicate, DownlinkPermission::Suppressed);
        }

        let current = result.current_fcnt_up;

        // The cluster agrees we own the counter this session already
        // accepted: the device is resending, not sending anew.
        if session.uplinks_seen > 0 && current == session.fcnt_up {
            tracing::debug!(%identity, fcnt_up, "uplink resubmitted");
            return FrameCounterDecision::new(Verdict::Resubmission, DownlinkPermission::Allowed);
        }

        record_accepted(session, current);

        FrameCounterDecision::new(
            Verdict::Accepted {
                fcnt_up: current,
                next_expected: current.wrapping_add(1),
            },
            DownlinkPermission::Allowed,
        )
    }

    // ---

    async fn next_fcnt_down(&self, session: &mut DeviceSession) -> Option<u32> {
        // ---
        let identity = session.identity;
        let next = report_failure(
            self.service.next_fcnt_down(
                identity.dev_eui,
                session.fcnt_down,
                session.fcnt_up,
                &self.gateway_id,
            ),
            |e| tracing::warn!(%identity, "downlink counter unavailable: {e}"),
        )
        .await
        .ok()?;

        // The facade answers 0 when it refuses to hand out a counter.
        if next == 0 {
            tracing::debug!(%identity, "downlink counter refused");
            return None;
        }

        session.fcnt_down = next;
        Some(next)
    }
}

// ---------------------------------------------------------------------------
// FrameCounterStrategyProvider
// ---------------------------------------------------------------------------

/// Hands out the shared strategy instance matching a device.
pub struct FrameCounterStrategyProvider {
    // ---
    gateway_id: String,
    single: FrameCounterStrategyPtr,
    multi: FrameCounterStrategyPtr,
}

impl FrameCounterStrategyProvider {
    // ---
    pub fn new(
        gateway_id: impl Into<String>,
        service: NetworkServerServicePtr,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        // ---
        let gateway_id = gateway_id.into();
        Self {
            single: Arc::new(SingleGatewayStrategy),
            multi: Arc::new(MultiGatewayStrategy::new(service, gateway_id.clone(), metrics)),
            gateway_id,
        }
    }

    pub fn select(&self, device_gateway_id: Option<&str>) -> Option<FrameCounterStrategyPtr> {
        // ---
        match select_strategy_kind(device_gateway_id, &self.gateway_id)? {
            StrategyKind::SingleGateway => Some(self.single.clone()),
            StrategyKind::MultiGateway => Some(self.multi.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
