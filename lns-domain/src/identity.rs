use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{LnsError, Result};

// ---------------------------------------------------------------------------
// DevAddr
// ---------------------------------------------------------------------------

/// 32-bit network-layer device address.
///
/// Assigned for the life of a session and reused across sessions, so it is
/// not unique on its own.  Canonical text form is eight upper-case hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DevAddr(u32);

// ---

impl DevAddr {
    // ---
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// The 7-bit network identifier carried in the top bits of the address.
    pub const fn network_id(self) -> u8 {
        (self.0 >> 25) as u8
    }
}

impl fmt::Display for DevAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

impl FromStr for DevAddr {
    type Err = LnsError;

    fn from_str(s: &str) -> Result<Self> {
        // ---
        parse_hex(s, 8)
            .map(|v| Self(v as u32))
            .ok_or_else(|| LnsError::InvalidInput(format!("bad DevAddr `{s}`")))
    }
}

impl TryFrom<String> for DevAddr {
    type Error = LnsError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<DevAddr> for String {
    fn from(a: DevAddr) -> Self {
        a.to_string()
    }
}

// ---------------------------------------------------------------------------
// Eui64
// ---------------------------------------------------------------------------

/// Globally unique 64-bit extended identifier (DevEUI, JoinEUI, station EUI).
///
/// Canonical text form is sixteen upper-case hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Eui64(u64);

/// Width of a physical (MAC) address accepted by [`Eui64::from_physical_address`].
const PHYSICAL_ADDRESS_LEN: usize = 6;

// ---

impl Eui64 {
    // ---
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    // ---

    /// Derive an EUI-64 from a 48-bit physical address by inserting the
    /// `FF FE` marker between the upper and lower three bytes.
    ///
    /// `11 22 33 44 55 66` becomes `1122:33FF:FE44:5566`.  Only six-byte
    /// input is accepted; `None` fails with [`LnsError::NullArgument`].
    pub fn from_physical_address(address: Option<&[u8]>) -> Result<Self> {
        // ---
        let address = address.ok_or(LnsError::NullArgument("address"))?;

        let mac: [u8; PHYSICAL_ADDRESS_LEN] =
            address
                .try_into()
                .map_err(|_| LnsError::UnsupportedWidth {
                    expected: PHYSICAL_ADDRESS_LEN,
                    actual: address.len(),
                })?;

        let mut bytes = [0u8; 8];
        bytes[..3].copy_from_slice(&mac[..3]);
        bytes[3] = 0xFF;
        bytes[4] = 0xFE;
        bytes[5..].copy_from_slice(&mac[3..]);

        Ok(Self(u64::from_be_bytes(bytes)))
    }

    // ---

    /// ID6 rendering: four colon-separated groups of four hex digits.
    pub fn id6(self) -> String {
        // ---
        let v = self.0;
        format!(
            "{:04X}:{:04X}:{:04X}:{:04X}",
            (v >> 48) & 0xFFFF,
            (v >> 32) & 0xFFFF,
            (v >> 16) & 0xFFFF,
            v & 0xFFFF,
        )
    }
}

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

impl FromStr for Eui64 {
    type Err = LnsError;

    fn from_str(s: &str) -> Result<Self> {
        // ---
        parse_hex(s, 16)
            .map(Self)
            .ok_or_else(|| LnsError::InvalidInput(format!("bad EUI-64 `{s}`")))
    }
}

impl TryFrom<String> for Eui64 {
    type Error = LnsError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Eui64> for String {
    fn from(e: Eui64) -> Self {
        e.to_string()
    }
}

// ---------------------------------------------------------------------------
// DeviceIdentity
// ---------------------------------------------------------------------------

/// Registry key: the session address plus the permanent extended identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    // ---
    pub dev_addr: DevAddr,
    pub dev_eui: Eui64,
}

impl DeviceIdentity {
    pub const fn new(dev_addr: DevAddr, dev_eui: Eui64) -> Self {
        Self { dev_addr, dev_eui }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dev_eui, self.dev_addr)
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Parse up to `max_digits` hex digits, case-insensitive.  Empty input and
/// sign prefixes are rejected.
fn parse_hex(s: &str, max_digits: usize) -> Option<u64> {
    // ---
    if s.is_empty() || s.len() > max_digits || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(s, 16).ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn physical_address_gets_fffe_marker() {
        // ---
        let mac = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
        let eui = Eui64::from_physical_address(Some(&mac)).unwrap();

        assert_eq!(eui.as_u64(), 0x1122_33FF_FE44_5566);
        assert_eq!(eui.id6(), "1122:33FF:FE44:5566");
    }

    // ---

    #[test]
    fn eight_byte_address_is_unsupported_width() {
        // ---
        let addr = [0u8; 8];
        let err = Eui64::from_physical_address(Some(&addr)).unwrap_err();
        assert!(
            matches!(err, LnsError::UnsupportedWidth { expected: 6, actual: 8 }),
            "unexpected error: {err}"
        );
    }

    // ---

    #[test]
    fn absent_address_names_the_parameter() {
        // ---
        let err = Eui64::from_physical_address(None).unwrap_err();
        assert!(matches!(err, LnsError::NullArgument("address")));
        assert!(err.to_string().contains("address"));
    }

    // ---

    #[test]
    fn hex_forms_are_canonical_upper_case() {
        // ---
        let addr: DevAddr = "0228b1b1".parse().unwrap();
        assert_eq!(addr.to_string(), "0228B1B1");
        assert_eq!(addr.network_id(), 0x01);

        let eui: Eui64 = "0004a30b001c0530".parse().unwrap();
        assert_eq!(eui.to_string(), "0004A30B001C0530");

        assert!("".parse::<DevAddr>().is_err());
        assert!("123456789".parse::<DevAddr>().is_err());
        assert!("-1".parse::<Eui64>().is_err());
        assert!("zz".parse::<Eui64>().is_err());
    }
}
