use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identity::{DevAddr, Eui64};

// ---------------------------------------------------------------------------
// ReceiveWindow
// ---------------------------------------------------------------------------

/// Class A receive window a downlink is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiveWindow {
    // ---
    Rx1,
    Rx2,
}

// ---------------------------------------------------------------------------
// DownlinkDecision
// ---------------------------------------------------------------------------

/// What the server decided to send back for one uplink.
///
/// Handed to the radio layer, which encodes and encrypts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownlinkDecision {
    // ---
    /// Id of the uplink this answers.
    pub uplink_id: Uuid,

    pub dev_eui: Eui64,
    pub dev_addr: DevAddr,

    pub fcnt_down: u32,

    /// ACK bit: set when the uplink was confirmed.
    pub ack: bool,

    /// Send as `ConfirmedDataDown`.  Never set when the frame counter could
    /// not be validated against the cluster.
    pub confirmed: bool,

    pub fport: Option<u8>,

    pub payload: Vec<u8>,

    pub window: ReceiveWindow,
}
