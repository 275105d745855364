use std::sync::Arc;

use async_trait::async_trait;

use super::directory::SearchDevicesResult;
use super::error::Result;
use super::identity::{DevAddr, Eui64};
use super::preferred::{PreferredGatewayResult, UplinkClaim};

// ---------------------------------------------------------------------------
// NetworkServerService
// ---------------------------------------------------------------------------

/// Cluster-facing capabilities the network server consumes.
///
/// Implementations: `lns_resolver::HttpResolver` (production),
/// `lns_sim::SimResolver` (in-process, for tests).
///
/// Retries and timeouts belong to the implementation.  Callers treat every
/// method as one opaque call that either yields a result or fails.
#[async_trait]
pub trait NetworkServerService: Send + Sync {
    // ---
    /// Validate and advance the downlink frame counter for `dev_eui`.
    ///
    /// Returns the counter the caller must use for its next downlink, or
    /// `0` when the cluster refuses to hand one out.
    async fn next_fcnt_down(
        &self,
        dev_eui: Eui64,
        fcnt_down: u32,
        fcnt_up: u32,
        gateway_id: &str,
    ) -> Result<u32>;

    /// Submit `claim` and learn which gateway owns this uplink.
    async fn resolve_preferred_gateway(&self, claim: &UplinkClaim) -> Result<PreferredGatewayResult>;

    /// Look up every directory record currently using `dev_addr`.
    async fn search_devices(&self, dev_addr: DevAddr) -> Result<SearchDevicesResult>;
}

// ---

/// Convenience type alias for a shared [`NetworkServerService`].
pub type NetworkServerServicePtr = Arc<dyn NetworkServerService>;
