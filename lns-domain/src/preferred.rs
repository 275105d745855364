use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::identity::{DevAddr, DeviceIdentity, Eui64};

// ---------------------------------------------------------------------------
// UplinkClaim
// ---------------------------------------------------------------------------

/// "This gateway is processing uplink `fcnt_up` of this device."
///
/// Sent to the preferred-gateway resolver by the multi-gateway strategy and
/// dropped as soon as the result comes back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UplinkClaim {
    // ---
    #[serde(rename = "DevAddr")]
    pub dev_addr: DevAddr,

    #[serde(rename = "DevEUI")]
    pub dev_eui: Eui64,

    #[serde(rename = "FCntUp")]
    pub fcnt_up: u32,

    #[serde(rename = "GatewayId")]
    pub gateway_id: String,

    /// Milliseconds since the Unix epoch.
    #[serde(rename = "Timestamp")]
    pub timestamp_ms: u64,
}

// ---

impl UplinkClaim {
    // ---
    /// Build a claim stamped with the current wall-clock time.
    pub fn new(identity: DeviceIdentity, fcnt_up: u32, gateway_id: impl Into<String>) -> Self {
        // ---
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Self {
            dev_addr: identity.dev_addr,
            dev_eui: identity.dev_eui,
            fcnt_up,
            gateway_id: gateway_id.into(),
            timestamp_ms,
        }
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.dev_addr, self.dev_eui)
    }
}

// ---------------------------------------------------------------------------
// PreferredGatewayResult
// ---------------------------------------------------------------------------

/// Resolver verdict for one [`UplinkClaim`].
///
/// Field names and nullability are part of the cross-service contract;
/// `None` serializes as JSON `null`, never as an omitted key.
///
/// `conflict == true` means at least two gateways claimed the same counter
/// for the device in the current window.  It is not an error: the gateway
/// named by `preferred_gateway_id` wins and everyone else backs off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferredGatewayResult {
    // ---
    #[serde(rename = "RequestFcntUp")]
    pub request_fcnt_up: u32,

    #[serde(rename = "PreferredGatewayID")]
    pub preferred_gateway_id: Option<String>,

    #[serde(rename = "Conflict")]
    pub conflict: bool,

    #[serde(rename = "CurrentFcntUp")]
    pub current_fcnt_up: u32,

    #[serde(rename = "ErrorMessage")]
    pub error_message: Option<String>,
}

// ---

impl PreferredGatewayResult {
    // ---
    /// `true` when `gateway_id` is the preferred gateway (ASCII
    /// case-insensitive).  A result naming no gateway prefers nobody.
    pub fn is_preferred(&self, gateway_id: &str) -> bool {
        self.preferred_gateway_id
            .as_deref()
            .is_some_and(|p| p.eq_ignore_ascii_case(gateway_id))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
