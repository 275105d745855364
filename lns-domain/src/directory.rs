use std::ops::Index;

use serde::{Deserialize, Serialize};

use super::identity::{DevAddr, DeviceIdentity, Eui64};

// ---------------------------------------------------------------------------
// DeviceDirectoryRecord
// ---------------------------------------------------------------------------

/// One device as known to the external device directory.
///
/// Field names are the directory's wire names.  Addresses travel as
/// canonical hex strings; `NwkSKey` is `null` for devices that have not
/// joined yet.
///
/// Addresses are parsed case-insensitively and re-serialized upper-case and
/// zero-padded, so a record only round-trips byte for byte when the
/// directory already sent canonical hex.  The decoded values are the same
/// either way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDirectoryRecord {
    // ---
    #[serde(rename = "DevAddr")]
    pub dev_addr: DevAddr,

    #[serde(rename = "DevEUI")]
    pub dev_eui: Eui64,

    /// Owning gateway.  `None` or empty means any gateway may serve it.
    #[serde(rename = "GatewayId", default)]
    pub gateway_id: Option<String>,

    #[serde(rename = "NwkSKey", default)]
    pub nwk_s_key: Option<String>,

    #[serde(rename = "PrimaryKey")]
    pub primary_key: String,
}

// ---

impl DeviceDirectoryRecord {
    // ---
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.dev_addr, self.dev_eui)
    }

    pub fn gateway_id(&self) -> Option<&str> {
        self.gateway_id.as_deref()
    }
}

// ---------------------------------------------------------------------------
// SearchDevicesResult
// ---------------------------------------------------------------------------

/// Ordered result of a directory search by device address.
///
/// Never absent: a search with no source yields an empty collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDevicesResult {
    // ---
    #[serde(rename = "Devices", default)]
    devices: Vec<DeviceDirectoryRecord>,
}

// ---

impl SearchDevicesResult {
    // ---
    pub fn new(source: Option<Vec<DeviceDirectoryRecord>>) -> Self {
        Self {
            devices: source.unwrap_or_default(),
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DeviceDirectoryRecord> {
        self.devices.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DeviceDirectoryRecord> {
        self.devices.iter()
    }
}

impl Index<usize> for SearchDevicesResult {
    type Output = DeviceDirectoryRecord;

    fn index(&self, index: usize) -> &Self::Output {
        &self.devices[index]
    }
}

impl<'a> IntoIterator for &'a SearchDevicesResult {
    type Item = &'a DeviceDirectoryRecord;
    type IntoIter = std::slice::Iter<'a, DeviceDirectoryRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.iter()
    }
}

impl IntoIterator for SearchDevicesResult {
    type Item = DeviceDirectoryRecord;
    type IntoIter = std::vec::IntoIter<DeviceDirectoryRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.into_iter()
    }
}

impl FromIterator<DeviceDirectoryRecord> for SearchDevicesResult {
    fn from_iter<I: IntoIterator<Item = DeviceDirectoryRecord>>(iter: I) -> Self {
        Self {
            devices: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
