use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::directory::DeviceDirectoryRecord;
use super::error::Result;
use super::uplink::Uplink;

// ---------------------------------------------------------------------------
// CloudMessage
// ---------------------------------------------------------------------------

/// Application payload queued upstream for delivery to the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudMessage {
    // ---
    pub fport: u8,

    pub payload: Vec<u8>,

    /// The application asked for a `ConfirmedDataDown`.
    #[serde(default)]
    pub confirmed: bool,
}

// ---------------------------------------------------------------------------
// DeviceConnection
// ---------------------------------------------------------------------------

/// Live upstream connection bound to one device session.
///
/// # Release contract
///
/// [`DeviceConnection::release`] ends the connection's resource lifetime and
/// MUST tolerate being called more than once.  The connection registry
/// releases every connection once on explicit teardown and once more from
/// its eviction path; both calls reach the implementation.
#[async_trait]
pub trait DeviceConnection: Send + Sync {
    // ---
    /// Forward an accepted uplink upstream.
    async fn send_event(&self, uplink: &Uplink) -> Result<()>;

    /// Fetch the next queued cloud-to-device message, if any.
    async fn receive_pending(&self) -> Result<Option<CloudMessage>>;

    /// End the resource lifetime.  Idempotent.
    fn release(&self);
}

// ---

/// Convenience type alias for a shared [`DeviceConnection`].
pub type DeviceConnectionPtr = Arc<dyn DeviceConnection>;

// ---------------------------------------------------------------------------
// DeviceConnector
// ---------------------------------------------------------------------------

/// Factory for [`DeviceConnection`]s, one per newly registered session.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    // ---
    async fn connect(&self, record: &DeviceDirectoryRecord) -> Result<DeviceConnectionPtr>;
}

// ---

/// Convenience type alias for a shared [`DeviceConnector`].
pub type DeviceConnectorPtr = Arc<dyn DeviceConnector>;
