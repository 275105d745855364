//! UDP ingress: one JSON [`Uplink`] per datagram in, one JSON
//! [`DownlinkDecision`](lns_domain::DownlinkDecision) back to the sender when
//! a downlink is owed.
//!
//! Stands in for the packet-forwarder translation layer, which decodes radio
//! frames before they reach this server.

use std::net::SocketAddr;
use std::sync::Arc;

// ---

use anyhow::Context;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ---

use lns_domain::{ScopedCancellation, Uplink};

// ---

use super::observe::spawn_reported;
use super::processor::{UplinkOutcome, UplinkProcessor};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Largest datagram accepted.  A LoRaWAN frame tops out at 255 bytes; the
/// JSON envelope around it stays well below this.
const MAX_DATAGRAM: usize = 8 * 1024;

// ---------------------------------------------------------------------------
// UdpIngress
// ---------------------------------------------------------------------------

pub struct UdpIngress {
    // ---
    socket: Arc<UdpSocket>,
    processor: Arc<UplinkProcessor>,
    shutdown: CancellationToken,
}

// ---

impl UdpIngress {
    // ---
    pub async fn bind(
        addr: SocketAddr,
        processor: Arc<UplinkProcessor>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        // ---
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("binding UDP ingress on {addr}"))?;

        Ok(Self {
            socket: Arc::new(socket),
            processor,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    // ---

    /// Receive until `shutdown` fires.  Each uplink is processed on its own
    /// task.
    pub async fn run(self) -> anyhow::Result<()> {
        // ---
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let (len, peer) = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received?,
            };
            let received_at = Instant::now();

            let uplink: Uplink = match serde_json::from_slice(&buf[..len]) {
                Ok(uplink) => uplink,
                Err(e) => {
                    tracing::warn!(%peer, "malformed uplink datagram: {e}");
                    continue;
                }
            };

            spawn_reported(
                "uplink",
                handle_uplink(
                    self.processor.clone(),
                    self.socket.clone(),
                    self.shutdown.clone(),
                    uplink,
                    received_at,
                    peer,
                ),
            );
        }

        tracing::info!("UDP ingress stopped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-uplink task
// ---------------------------------------------------------------------------

async fn handle_uplink(
    processor: Arc<UplinkProcessor>,
    socket: Arc<UdpSocket>,
    shutdown: CancellationToken,
    uplink: Uplink,
    received_at: Instant,
    peer: SocketAddr,
) -> anyhow::Result<()> {
    // ---
    let scope = ScopedCancellation::with_deadline(
        &shutdown,
        processor.processing_deadline(received_at),
    );

    let outcome = processor.process(&uplink, received_at, &scope).await;
    scope.release();

    match outcome {
        Ok(UplinkOutcome::Completed(Some(downlink))) => {
            let body = serde_json::to_vec(&downlink)?;
            socket
                .send_to(&body, peer)
                .await
                .with_context(|| format!("sending downlink to {peer}"))?;
        }
        Ok(other) => {
            tracing::trace!(uplink_id = %uplink.id, ?other, "no downlink");
        }
        Err(e) => {
            tracing::debug!(uplink_id = %uplink.id, "uplink dropped: {e}");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::time::Duration;

    use lns_domain::{DevAddr, DeviceDirectoryRecord, DownlinkDecision, Eui64, UplinkPayload};
    use lns_sim::{SimConfig, SimConnector, SimResolver};

    use super::super::config::ServerConfig;
    use super::super::metrics::ServerMetrics;
    use super::super::registry::ConnectionRegistry;
    use super::*;

    // ---

    async fn start() -> (SocketAddr, CancellationToken, tokio::task::JoinHandle<anyhow::Result<()>>) {
        // ---
        let sim = Arc::new(SimResolver::new(SimConfig::perfect()));
        sim.add_device(DeviceDirectoryRecord {
            dev_addr: DevAddr::new(0x0228_B1B1),
            dev_eui: Eui64::new(0x0004_A30B_001C_0530),
            gateway_id: Some("edge-a".into()),
            nwk_s_key: None,
            primary_key: "a2V5".into(),
        });

        let mut config = ServerConfig::for_gateway("edge-a");
        config.processing_delay_ms = Some(0);

        let processor = Arc::new(UplinkProcessor::new(
            Arc::new(config),
            Arc::new(ConnectionRegistry::new(Duration::from_secs(60))),
            sim,
            Arc::new(SimConnector::new()),
            Arc::new(ServerMetrics::new().unwrap()),
        ));

        let shutdown = CancellationToken::new();
        let ingress = UdpIngress::bind("127.0.0.1:0".parse().unwrap(), processor, shutdown.clone())
            .await
            .unwrap();
        let addr = ingress.local_addr().unwrap();
        (addr, shutdown, tokio::spawn(ingress.run()))
    }

    // ---

    #[tokio::test]
    async fn confirmed_uplink_is_answered() {
        // ---
        let (addr, shutdown, task) = start().await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let uplink = Uplink {
            id: uuid::Uuid::new_v4(),
            payload: UplinkPayload::Data {
                dev_addr: DevAddr::new(0x0228_B1B1),
                fcnt: 1,
                confirmed: true,
                fport: Some(1),
                frm_payload: vec![],
            },
            rssi: None,
        };
        client
            .send_to(&serde_json::to_vec(&uplink).unwrap(), addr)
            .await
            .unwrap();

        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .expect("no downlink within 5 s")
            .unwrap();

        let downlink: DownlinkDecision = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(downlink.uplink_id, uplink.id);
        assert!(downlink.ack);

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    // ---

    #[tokio::test]
    async fn malformed_datagram_does_not_stop_the_loop() {
        // ---
        let (addr, shutdown, task) = start().await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        client.send_to(b"not json", addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }
}
