//! [`UplinkProcessor`] — the per-uplink pipeline.
//!
//! ```text
//! uplink ─► classify ─► address filter ─► session (registry / directory)
//!        ─► frame counter strategy ─► forward upstream
//!        ─► processing delay ─► receive window ─► downlink counter ─► decision
//! ```
//!
//! Every uplink runs on its own task under a [`ScopedCancellation`] bound to
//! its processing deadline.  The device session stays locked for the whole
//! pipeline; a second uplink for the same device arriving meanwhile is
//! rejected as busy, not queued.

use std::sync::Arc;

// ---

use tokio::time::Instant;

// ---

use lns_domain::{
    // ---
    requires_confirmation,
    CloudMessage,
    DevAddr,
    DeviceConnectorPtr,
    DeviceIdentity,
    DownlinkDecision,
    LnsError,
    NetworkServerServicePtr,
    Result,
    ScopedCancellation,
    Uplink,
    UplinkPayload,
};

// ---

use super::config::ServerConfig;
use super::delay::{DelayOutcome, ProcessingDelay, ReceiveWindowPlanner};
use super::fcnt::{DownlinkPermission, FrameCounterStrategyProvider, Verdict};
use super::metrics::ServerMetrics;
use super::observe::report_failure;
use super::registry::{ConnectionRegistry, DeviceSession, DeviceSessionPtr};

// ---------------------------------------------------------------------------
// UplinkOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum UplinkOutcome {
    // ---
    /// Not for this server (join request, filtered address, foreign or
    /// unknown device).
    Ignored(&'static str),

    /// Another gateway owns this uplink.
    Duplicate,

    /// Counter behind the session.
    Replay,

    /// The scope was cancelled before a downlink could be produced.
    Cancelled,

    /// Processed; `Some` when a downlink is owed.
    Completed(Option<DownlinkDecision>),
}

// ---------------------------------------------------------------------------
// UplinkProcessor
// ---------------------------------------------------------------------------

pub struct UplinkProcessor {
    // ---
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    strategies: FrameCounterStrategyProvider,
    service: NetworkServerServicePtr,
    connector: DeviceConnectorPtr,
    delay: ProcessingDelay,
    planner: ReceiveWindowPlanner,
    metrics: Arc<ServerMetrics>,
}

// ---

impl UplinkProcessor {
    // ---
    pub fn new(
        config: Arc<ServerConfig>,
        registry: Arc<ConnectionRegistry>,
        service: NetworkServerServicePtr,
        connector: DeviceConnectorPtr,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        // ---
        Self {
            strategies: FrameCounterStrategyProvider::new(
                config.gateway_id.clone(),
                service.clone(),
                metrics.clone(),
            ),
            delay: ProcessingDelay::new(config.processing_delay_ms),
            planner: ReceiveWindowPlanner::new(config.rx1_delay),
            config,
            registry,
            service,
            connector,
            metrics,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<ServerMetrics> {
        &self.metrics
    }

    /// Past this instant no receive window is reachable.
    pub fn processing_deadline(&self, received_at: Instant) -> Instant {
        self.planner.rx2_open(received_at)
    }

    // ---

    /// Run one uplink through the pipeline.
    ///
    /// Errors are limited to conditions the caller logs and drops: the
    /// device is busy, a concurrent uplink registered its session first
    /// ([`LnsError::Conflict`]), its directory lookup failed, or its
    /// connection could not be opened.
    pub async fn process(
        &self,
        uplink: &Uplink,
        received_at: Instant,
        scope: &ScopedCancellation,
    ) -> Result<UplinkOutcome> {
        // ---
        self.metrics.uplinks_received.increment();

        let (dev_addr, fcnt) = match &uplink.payload {
            UplinkPayload::JoinRequest { dev_eui, .. } => {
                tracing::debug!(%dev_eui, uplink_id = %uplink.id, "join request ignored");
                return Ok(UplinkOutcome::Ignored("join request"));
            }
            UplinkPayload::Data { dev_addr, fcnt, .. } => (*dev_addr, *fcnt),
        };

        if !self.config.is_dev_addr_allowed(dev_addr) {
            tracing::debug!(%dev_addr, "device address not allowed");
            return Ok(UplinkOutcome::Ignored("address not allowed"));
        }

        let needs_ack = requires_confirmation(&uplink.payload);

        let Some((identity, session)) = self.acquire_session(dev_addr).await? else {
            return Ok(UplinkOutcome::Ignored("device not served here"));
        };

        let mut session = session
            .try_lock()
            .map_err(|_| LnsError::Busy(identity))?;

        let Some(strategy) = self.strategies.select(session.gateway_id.as_deref()) else {
            return Ok(UplinkOutcome::Ignored("device served by another gateway"));
        };

        if scope.is_cancelled() {
            return Ok(UplinkOutcome::Cancelled);
        }

        let decision = strategy.validate_uplink(&mut session, fcnt).await;
        tracing::debug!(
            %identity,
            fcnt,
            kind = ?strategy.kind(),
            verdict = ?decision.verdict,
            downlink = ?decision.downlink,
            "frame counter validated",
        );

        match decision.verdict {
            Verdict::Duplicate => {
                self.metrics.duplicates_dropped.increment();
                return Ok(UplinkOutcome::Duplicate);
            }
            Verdict::Replay => {
                self.metrics.duplicates_dropped.increment();
                return Ok(UplinkOutcome::Replay);
            }
            Verdict::Accepted { .. } => self.forward(&session, uplink).await,
            Verdict::Resubmission => {}
        }

        if decision.downlink == DownlinkPermission::Suppressed {
            return Ok(UplinkOutcome::Completed(None));
        }

        // Cloud messages are only delivered on a counter the cluster agreed
        // on; a resubmission gets its acknowledgment and nothing else.
        let message = match (decision.verdict, decision.downlink) {
            (Verdict::Accepted { .. }, DownlinkPermission::Allowed) => {
                self.pending_message(&session).await
            }
            _ => None,
        };

        if !needs_ack && message.is_none() {
            return Ok(UplinkOutcome::Completed(None));
        }

        let waited_from = Instant::now();
        match self.delay.wait(received_at, scope.signal()).await {
            DelayOutcome::Cancelled => {
                tracing::debug!(%identity, "uplink cancelled during processing delay");
                return Ok(UplinkOutcome::Cancelled);
            }
            DelayOutcome::Elapsed => {
                self.metrics
                    .processing_delay_wait
                    .record(Instant::now() - waited_from);
            }
            DelayOutcome::Skipped => {}
        }

        let Some(window) = self.planner.window_for(received_at, Instant::now()) else {
            tracing::warn!(%identity, fcnt, "receive windows missed, downlink dropped");
            return Ok(UplinkOutcome::Completed(None));
        };

        let Some(fcnt_down) = strategy.next_fcnt_down(&mut session).await else {
            return Ok(UplinkOutcome::Completed(None));
        };

        let confirmed = decision.downlink == DownlinkPermission::Allowed
            && message.as_ref().is_some_and(|m| m.confirmed);

        let (fport, payload) = match message {
            Some(m) => (Some(m.fport), m.payload),
            None => (None, Vec::new()),
        };

        let downlink = DownlinkDecision {
            uplink_id: uplink.id,
            dev_eui: identity.dev_eui,
            dev_addr: identity.dev_addr,
            fcnt_down,
            ack: needs_ack,
            confirmed,
            fport,
            payload,
            window,
        };

        self.metrics.downlinks_scheduled.increment();
        tracing::debug!(%identity, fcnt_down, ?window, ack = needs_ack, "downlink scheduled");

        Ok(UplinkOutcome::Completed(Some(downlink)))
    }

    // ---

    /// Live session for `dev_addr`, registering one from the device
    /// directory if needed.  `None` when no directory record is ours.
    async fn acquire_session(
        &self,
        dev_addr: DevAddr,
    ) -> Result<Option<(DeviceIdentity, DeviceSessionPtr)>> {
        // ---
        if let Some((identity, _)) = self.registry.find_by_dev_addr(dev_addr).into_iter().next() {
            if let Some(session) = self.registry.lookup(identity) {
                return Ok(Some((identity, session)));
            }
        }

        let devices = self.service.search_devices(dev_addr).await?;
        let Some(record) = devices
            .iter()
            .find(|r| self.strategies.select(r.gateway_id()).is_some())
        else {
            tracing::debug!(%dev_addr, candidates = devices.len(), "no directory record for this gateway");
            return Ok(None);
        };

        let identity = record.identity();
        let connection = self.connector.connect(record).await?;
        let session = DeviceSession::new(identity, record.gateway_id.clone(), connection.clone());

        match self.registry.register(session) {
            Ok(session) => {
                tracing::info!(%identity, gateway_id = record.gateway_id().unwrap_or("*"), "device session opened");
                Ok(Some((identity, session)))
            }
            Err(e) => {
                // A conflict means a concurrent uplink for the same device
                // registered first; this copy is dropped, not queued.
                connection.release();
                tracing::debug!(%identity, "session registration lost: {e}");
                Err(e)
            }
        }
    }

    // ---

    async fn forward(&self, session: &DeviceSession, uplink: &Uplink) {
        // ---
        let identity = session.identity;
        // A failed forward does not revoke the acknowledgment.
        let _ = report_failure(session.connection.send_event(uplink), |e| {
            tracing::warn!(%identity, uplink_id = %uplink.id, "forwarding uplink failed: {e}")
        })
        .await;
    }

    async fn pending_message(&self, session: &DeviceSession) -> Option<CloudMessage> {
        // ---
        let identity = session.identity;
        report_failure(session.connection.receive_pending(), |e| {
            tracing::warn!(%identity, "fetching cloud message failed: {e}")
        })
        .await
        .ok()
        .flatten()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::time::Duration;

    use lns_domain::{DeviceDirectoryRecord, Eui64, ReceiveWindow};
    use lns_sim::{SimConfig, SimConnector, SimResolver};
    use tokio_util::sync::CancellationToken;

    use super::*;

    // ---

    const ADDR: u32 = 0x0228_B1B1;
    const EUI: u64 = 0x0004_A30B_001C_0530;

    fn record(gateway_id: Option<&str>) -> DeviceDirectoryRecord {
        DeviceDirectoryRecord {
            dev_addr: DevAddr::new(ADDR),
            dev_eui: Eui64::new(EUI),
            gateway_id: gateway_id.map(str::to_owned),
            nwk_s_key: None,
            primary_key: "a2V5".into(),
        }
    }

    fn data(fcnt: u32, confirmed: bool) -> Uplink {
        Uplink {
            id: Default::default(),
            payload: UplinkPayload::Data {
                dev_addr: DevAddr::new(ADDR),
                fcnt,
                confirmed,
                fport: Some(1),
                frm_payload: vec![0xAB],
            },
            rssi: Some(-80.0),
        }
    }

    struct Harness {
        processor: UplinkProcessor,
        sim: Arc<SimResolver>,
        connector: Arc<SimConnector>,
    }

    fn harness(gateway_id: &str, delay_ms: Option<i64>, sim: Arc<SimResolver>) -> Harness {
        // ---
        let mut config = ServerConfig::for_gateway(gateway_id);
        config.processing_delay_ms = delay_ms;

        let connector = Arc::new(SimConnector::new());
        let processor = UplinkProcessor::new(
            Arc::new(config),
            Arc::new(ConnectionRegistry::new(Duration::from_secs(60))),
            sim.clone(),
            connector.clone(),
            Arc::new(ServerMetrics::new().unwrap()),
        );
        Harness {
            processor,
            sim,
            connector,
        }
    }

    fn sim_with(gateway_id: Option<&str>) -> Arc<SimResolver> {
        let sim = Arc::new(SimResolver::new(SimConfig::perfect()));
        sim.add_device(record(gateway_id));
        sim
    }

    async fn run(h: &Harness, uplink: &Uplink) -> UplinkOutcome {
        let scope = ScopedCancellation::detached();
        h.processor
            .process(uplink, Instant::now(), &scope)
            .await
            .unwrap()
    }

    // ---

    #[tokio::test]
    async fn join_requests_are_ignored() {
        // ---
        let h = harness("edge-a", Some(0), sim_with(None));
        let join = Uplink {
            id: Default::default(),
            payload: UplinkPayload::JoinRequest {
                join_eui: Eui64::new(1),
                dev_eui: Eui64::new(EUI),
                dev_nonce: 7,
            },
            rssi: None,
        };

        assert_eq!(run(&h, &join).await, UplinkOutcome::Ignored("join request"));
        assert_eq!(h.sim.searches(), 0);
    }

    // ---

    #[tokio::test]
    async fn confirmed_uplink_gets_an_ack() {
        // ---
        let h = harness("edge-a", Some(0), sim_with(Some("edge-a")));

        let UplinkOutcome::Completed(Some(downlink)) = run(&h, &data(1, true)).await else {
            panic!("expected a downlink");
        };

        assert!(downlink.ack);
        assert!(!downlink.confirmed);
        assert_eq!(downlink.fcnt_down, 1);
        assert_eq!(downlink.window, ReceiveWindow::Rx1);
        assert_eq!(downlink.dev_eui, Eui64::new(EUI));

        let identity = DeviceIdentity::new(DevAddr::new(ADDR), Eui64::new(EUI));
        let connection = h.connector.connection_for(identity).unwrap();
        assert_eq!(connection.events().len(), 1, "accepted uplink is forwarded");
        assert_eq!(h.processor.metrics().downlinks_scheduled.get(), 1);
    }

    // ---

    #[tokio::test]
    async fn unconfirmed_uplink_without_message_needs_no_downlink() {
        // ---
        let h = harness("edge-a", Some(0), sim_with(None));
        assert_eq!(run(&h, &data(1, false)).await, UplinkOutcome::Completed(None));
        assert_eq!(h.processor.registry().len(), 1);
    }

    // ---

    #[tokio::test]
    async fn cloud_message_rides_on_the_downlink() {
        // ---
        let h = harness("edge-a", Some(0), sim_with(Some("edge-a")));
        run(&h, &data(1, false)).await;

        let connection = h.connector.connections().pop().unwrap();
        connection.push_cloud_message(CloudMessage {
            fport: 10,
            payload: vec![1, 2, 3],
            confirmed: true,
        });

        let UplinkOutcome::Completed(Some(downlink)) = run(&h, &data(2, false)).await else {
            panic!("expected a downlink");
        };
        assert!(!downlink.ack);
        assert!(downlink.confirmed);
        assert_eq!(downlink.fport, Some(10));
        assert_eq!(downlink.payload, vec![1, 2, 3]);
    }

    // ---

    #[tokio::test]
    async fn replay_and_resubmission() {
        // ---
        let h = harness("edge-a", Some(0), sim_with(Some("edge-a")));

        run(&h, &data(5, true)).await;
        let UplinkOutcome::Completed(Some(again)) = run(&h, &data(5, true)).await else {
            panic!("resubmission must still be acknowledged");
        };
        assert!(again.ack);

        assert_eq!(run(&h, &data(4, true)).await, UplinkOutcome::Replay);

        let connection = h.connector.connections().pop().unwrap();
        assert_eq!(connection.events().len(), 1, "only the first copy is forwarded");
        assert_eq!(h.processor.metrics().duplicates_dropped.get(), 1);
    }

    // ---

    #[tokio::test]
    async fn foreign_and_filtered_devices_are_ignored() {
        // ---
        let h = harness("edge-a", Some(0), sim_with(Some("edge-b")));
        assert_eq!(
            run(&h, &data(1, true)).await,
            UplinkOutcome::Ignored("device not served here")
        );
        assert!(h.processor.registry().is_empty());

        let mut config = ServerConfig::for_gateway("edge-a");
        config.allowed_dev_addresses = Some(["00000001".to_owned()].into());
        let processor = UplinkProcessor::new(
            Arc::new(config),
            Arc::new(ConnectionRegistry::new(Duration::from_secs(60))),
            sim_with(None),
            Arc::new(SimConnector::new()),
            Arc::new(ServerMetrics::new().unwrap()),
        );
        let outcome = processor
            .process(&data(1, true), Instant::now(), &ScopedCancellation::detached())
            .await
            .unwrap();
        assert_eq!(outcome, UplinkOutcome::Ignored("address not allowed"));
    }

    // ---

    #[tokio::test]
    async fn two_gateways_one_downlink() {
        // ---
        let sim = sim_with(None);
        let a = harness("edge-a", Some(0), sim.clone());
        let b = harness("edge-b", Some(0), sim);

        let first = run(&a, &data(3, true)).await;
        let second = run(&b, &data(3, true)).await;

        assert!(matches!(first, UplinkOutcome::Completed(Some(_))));
        assert_eq!(second, UplinkOutcome::Duplicate);
    }

    // ---

    #[tokio::test]
    async fn resolver_outage_never_confirms() {
        // ---
        let h = harness("edge-a", Some(0), sim_with(None));
        run(&h, &data(1, false)).await;

        let connection = h.connector.connections().pop().unwrap();
        connection.push_cloud_message(CloudMessage {
            fport: 10,
            payload: vec![9],
            confirmed: true,
        });
        h.sim.set_outage(true);

        // Degraded: accepted, no counter from the cluster, so no downlink.
        assert_eq!(run(&h, &data(2, true)).await, UplinkOutcome::Completed(None));
        assert_eq!(connection.events().len(), 2);
        assert_eq!(h.processor.metrics().resolver_failures.get(), 1);
    }

    // ---

    #[tokio::test]
    async fn held_session_rejects_a_second_uplink() {
        // ---
        let h = harness("edge-a", Some(0), sim_with(Some("edge-a")));
        run(&h, &data(1, false)).await;

        let identity = DeviceIdentity::new(DevAddr::new(ADDR), Eui64::new(EUI));
        let session = h.processor.registry().lookup(identity).unwrap();
        let _held = session.lock().await;

        let err = h
            .processor
            .process(&data(2, false), Instant::now(), &ScopedCancellation::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, LnsError::Busy(d) if d == identity));
    }

    // ---

    #[tokio::test(start_paused = true)]
    async fn racing_first_uplinks_register_one_session() {
        // ---
        let sim = sim_with(Some("edge-a"));
        let connector = Arc::new(SimConnector::slow(Duration::from_millis(50)));
        let processor = UplinkProcessor::new(
            Arc::new({
                let mut config = ServerConfig::for_gateway("edge-a");
                config.processing_delay_ms = Some(0);
                config
            }),
            Arc::new(ConnectionRegistry::new(Duration::from_secs(60))),
            sim,
            connector.clone(),
            Arc::new(ServerMetrics::new().unwrap()),
        );

        let uplink = data(1, true);
        let (scope_a, scope_b) = (ScopedCancellation::detached(), ScopedCancellation::detached());
        let (first, second) = tokio::join!(
            processor.process(&uplink, Instant::now(), &scope_a),
            processor.process(&uplink, Instant::now(), &scope_b),
        );

        let identity = DeviceIdentity::new(DevAddr::new(ADDR), Eui64::new(EUI));
        let (won, lost) = match (first, second) {
            (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
            other => panic!("expected exactly one rejection, got {other:?}"),
        };
        assert!(matches!(won, UplinkOutcome::Completed(Some(_))));
        assert!(matches!(lost, LnsError::Conflict(d) if d == identity));
        assert_eq!(processor.metrics().downlinks_scheduled.get(), 1);
        assert_eq!(processor.registry().len(), 1);

        // The loser's connection is released unused; the registered one
        // carries the single forwarded uplink.
        let (kept, dropped): (Vec<_>, Vec<_>) = connector
            .connections()
            .into_iter()
            .partition(|c| c.release_count() == 0);
        assert_eq!((kept.len(), dropped.len()), (1, 1));
        assert_eq!(kept[0].events().len(), 1);
        assert_eq!(dropped[0].release_count(), 1);
        assert!(dropped[0].events().is_empty());
    }

    // ---

    #[tokio::test(start_paused = true)]
    async fn processing_delay_holds_the_downlink() {
        // ---
        let h = harness("edge-a", None, sim_with(Some("edge-a")));
        let received_at = Instant::now();
        let scope = ScopedCancellation::detached();

        let outcome = h
            .processor
            .process(&data(1, true), received_at, &scope)
            .await
            .unwrap();

        assert!(matches!(outcome, UplinkOutcome::Completed(Some(_))));
        assert!(Instant::now() - received_at >= Duration::from_millis(400));
        assert_eq!(h.processor.metrics().processing_delay_wait.count(), 1);
    }

    // ---

    #[tokio::test(start_paused = true)]
    async fn cancelled_scope_unblocks_the_delay() {
        // ---
        let h = harness("edge-a", Some(5_000), sim_with(Some("edge-a")));
        let received_at = Instant::now();
        let scope = ScopedCancellation::new(None, &CancellationToken::new());

        let trigger: CancellationToken = (&scope).into();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = h
            .processor
            .process(&data(1, true), received_at, &scope)
            .await
            .unwrap();

        assert_eq!(outcome, UplinkOutcome::Cancelled);
        assert!(Instant::now() - received_at < Duration::from_secs(1));
    }
}
