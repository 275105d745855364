use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identity::{DevAddr, Eui64};

// ---------------------------------------------------------------------------
// UplinkPayload
// ---------------------------------------------------------------------------

/// Decoded uplink as handed over by the payload codec.
///
/// MIC verification and MAC-command parsing happen before this point; the
/// core only needs the frame kind, the addressing fields, and the counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UplinkPayload {
    // ---
    JoinRequest {
        join_eui: Eui64,
        dev_eui: Eui64,
        dev_nonce: u16,
    },

    Data {
        dev_addr: DevAddr,

        /// Full 32-bit uplink frame counter (reconstructed by the codec).
        fcnt: u32,

        /// `true` for `ConfirmedDataUp`, `false` for `UnconfirmedDataUp`.
        confirmed: bool,

        #[serde(default)]
        fport: Option<u8>,

        #[serde(default)]
        frm_payload: Vec<u8>,
    },
}

// ---

impl UplinkPayload {
    // ---
    pub fn dev_addr(&self) -> Option<DevAddr> {
        match self {
            Self::Data { dev_addr, .. } => Some(*dev_addr),
            Self::JoinRequest { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Uplink
// ---------------------------------------------------------------------------

/// One radio frame as received by this server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Uplink {
    // ---
    /// Correlation id for logs.  Generated on receipt when the ingress does
    /// not supply one.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    pub payload: UplinkPayload,

    #[serde(default)]
    pub rssi: Option<f32>,
}

// ---------------------------------------------------------------------------
// Confirmation classifier
// ---------------------------------------------------------------------------

/// `true` when the server owes the device an acknowledgment: the frame is a
/// data frame with the confirmed flag set.  Join-requests and unconfirmed
/// data frames never require one.
pub fn requires_confirmation(payload: &UplinkPayload) -> bool {
    matches!(payload, UplinkPayload::Data { confirmed: true, .. })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn data(confirmed: bool) -> UplinkPayload {
        UplinkPayload::Data {
            dev_addr: DevAddr::new(0x0228_B1B1),
            fcnt: 7,
            confirmed,
            fport: Some(1),
            frm_payload: vec![0x01, 0x02],
        }
    }

    #[test]
    fn confirmed_data_requires_ack() {
        assert!(requires_confirmation(&data(true)));
    }

    #[test]
    fn unconfirmed_data_does_not_require_ack() {
        assert!(!requires_confirmation(&data(false)));
    }

    #[test]
    fn join_request_does_not_require_ack() {
        // ---
        let join = UplinkPayload::JoinRequest {
            join_eui: Eui64::new(0x70B3_D57E_D000_0000),
            dev_eui: Eui64::new(0x0004_A30B_001C_0530),
            dev_nonce: 0x1234,
        };
        assert!(!requires_confirmation(&join));
        assert_eq!(join.dev_addr(), None);
    }

    // ---

    #[test]
    fn uplink_decodes_without_optional_fields() {
        // ---
        let json = r#"{
            "payload": { "kind": "data", "dev_addr": "0228B1B1", "fcnt": 3, "confirmed": true }
        }"#;
        let uplink: Uplink = serde_json::from_str(json).unwrap();

        assert_eq!(uplink.payload.dev_addr(), Some(DevAddr::new(0x0228_B1B1)));
        assert!(requires_confirmation(&uplink.payload));
        assert_eq!(uplink.rssi, None);
    }
}
