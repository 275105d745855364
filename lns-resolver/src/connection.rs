use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ---

use async_trait::async_trait;
use reqwest::{Method, StatusCode};

// ---

use lns_domain::{
    // ---
    CloudMessage,
    DeviceConnection,
    DeviceConnectionPtr,
    DeviceConnector,
    DeviceDirectoryRecord,
    Eui64,
    LnsError,
    Result,
    Uplink,
};

// ---

use super::endpoint::{decode_json, Endpoint};

// ---------------------------------------------------------------------------
// HttpDeviceConnector
// ---------------------------------------------------------------------------

/// Creates one [`HttpDeviceConnection`] per device session, all sharing the
/// endpoint's pooled client.
pub struct HttpDeviceConnector {
    // ---
    endpoint: Endpoint,
}

impl HttpDeviceConnector {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl DeviceConnector for HttpDeviceConnector {
    // ---
    async fn connect(&self, record: &DeviceDirectoryRecord) -> Result<DeviceConnectionPtr> {
        // ---
        tracing::debug!(dev_eui = %record.dev_eui, "opening device connection");
        let connection: DeviceConnectionPtr = Arc::new(HttpDeviceConnection {
            endpoint: self.endpoint.clone(),
            dev_eui: record.dev_eui,
            primary_key: record.primary_key.clone(),
            released: AtomicBool::new(false),
        });
        Ok(connection)
    }
}

// ---------------------------------------------------------------------------
// HttpDeviceConnection
// ---------------------------------------------------------------------------

/// Upstream connection for one device, authenticated with the device's
/// primary key.
pub struct HttpDeviceConnection {
    // ---
    endpoint: Endpoint,
    dev_eui: Eui64,
    primary_key: String,

    /// Set by the first `release`; later calls are no-ops.
    released: AtomicBool,
}

// ---

impl HttpDeviceConnection {
    // ---
    fn ensure_open(&self) -> Result<()> {
        // ---
        if self.released.load(Ordering::Acquire) {
            return Err(LnsError::Connection(format!(
                "connection for {} already released",
                self.dev_eui
            )));
        }
        Ok(())
    }
}

// ---

#[async_trait]
impl DeviceConnection for HttpDeviceConnection {
    // ---
    async fn send_event(&self, uplink: &Uplink) -> Result<()> {
        // ---
        self.ensure_open()?;

        let route = format!("DeviceEvent/{}", self.dev_eui);
        let builder = self
            .endpoint
            .request(Method::POST, &route)
            .bearer_auth(&self.primary_key)
            .json(uplink);

        self.endpoint.send(&route, builder, &[]).await?;
        Ok(())
    }

    // ---

    async fn receive_pending(&self) -> Result<Option<CloudMessage>> {
        // ---
        self.ensure_open()?;

        let route = format!("CloudMessage/{}", self.dev_eui);
        let builder = self
            .endpoint
            .request(Method::GET, &route)
            .bearer_auth(&self.primary_key);

        let resp = self
            .endpoint
            .send(&route, builder, &[StatusCode::NO_CONTENT, StatusCode::NOT_FOUND])
            .await?;

        if resp.status() != StatusCode::OK {
            return Ok(None);
        }
        Ok(Some(decode_json(&route, resp).await?))
    }

    // ---

    fn release(&self) {
        // ---
        if self.released.swap(true, Ordering::AcqRel) {
            tracing::trace!(dev_eui = %self.dev_eui, "device connection already released");
        } else {
            tracing::debug!(dev_eui = %self.dev_eui, "device connection released");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
