use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ---

use async_trait::async_trait;

// ---

use lns_domain::{
    // ---
    CloudMessage,
    DeviceConnection,
    DeviceConnectionPtr,
    DeviceConnector,
    DeviceDirectoryRecord,
    DeviceIdentity,
    Result,
    Uplink,
};

// ---------------------------------------------------------------------------
// CountingConnection
// ---------------------------------------------------------------------------

/// In-memory [`DeviceConnection`] that records what happens to it.
///
/// `release` is counted, never deduplicated, so tests can observe the
/// registry's double-release behaviour directly.
#[derive(Default)]
pub struct CountingConnection {
    // ---
    identity: Option<DeviceIdentity>,
    releases: AtomicUsize,
    events: Mutex<Vec<Uplink>>,
    pending: Mutex<VecDeque<CloudMessage>>,
}

// ---

impl CountingConnection {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_device(identity: DeviceIdentity) -> Self {
        Self {
            identity: Some(identity),
            ..Default::default()
        }
    }

    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.identity
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Uplinks forwarded upstream so far.
    pub fn events(&self) -> Vec<Uplink> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Queue a cloud-to-device message for the next downlink.
    pub fn push_cloud_message(&self, message: CloudMessage) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(message);
    }
}

// ---

#[async_trait]
impl DeviceConnection for CountingConnection {
    // ---
    async fn send_event(&self, uplink: &Uplink) -> Result<()> {
        // ---
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(uplink.clone());
        Ok(())
    }

    async fn receive_pending(&self) -> Result<Option<CloudMessage>> {
        Ok(self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front())
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// SimConnector
// ---------------------------------------------------------------------------

/// [`DeviceConnector`] that creates [`CountingConnection`]s and keeps a
/// handle to each for later inspection.
#[derive(Default)]
pub struct SimConnector {
    // ---
    created: Mutex<Vec<Arc<CountingConnection>>>,

    /// Added to every `connect` before it resolves.  `None` = immediate.
    latency: Option<Duration>,
}

// ---

impl SimConnector {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector whose `connect` answers after `latency`, widening the
    /// window in which concurrent uplinks race to register a session.
    pub fn slow(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Default::default()
        }
    }

    /// Every connection handed out so far, in creation order.
    pub fn connections(&self) -> Vec<Arc<CountingConnection>> {
        self.created.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Most recent connection created for `identity`.
    pub fn connection_for(&self, identity: DeviceIdentity) -> Option<Arc<CountingConnection>> {
        self.connections()
            .into_iter()
            .rev()
            .find(|c| c.identity() == Some(identity))
    }
}

// ---

#[async_trait]
impl DeviceConnector for SimConnector {
    // ---
    async fn connect(&self, record: &DeviceDirectoryRecord) -> Result<DeviceConnectionPtr> {
        // ---
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let connection = Arc::new(CountingConnection::for_device(record.identity()));
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(connection.clone());
        Ok(connection as DeviceConnectionPtr)
    }
}
