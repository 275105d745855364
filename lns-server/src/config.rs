//! Configuration for `lns-server`.
//!
//! Every option can come from the command line or from the environment
//! (container deployments set the environment only):
//!
//!   lns-server --gateway-id edge-a --facade-server-url http://facade:7071/api
//!   IOTEDGE_DEVICEID=edge-a FACADE_SERVER_URL=http://facade:7071/api lns-server
//!
//! [`Config`] is parsed once in `main` and converted into the immutable
//! [`ServerConfig`], which is passed by `Arc` to every component.  Nothing
//! else reads the environment.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

// ---

use clap::Parser;

// ---

use lns_domain::{DevAddr, LnsError};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "lns-server", about = "LoRaWAN network-server message core")]
pub struct Config {
    // ---
    /// Identifier of this network-server instance.  Devices pinned to this
    /// gateway use the single-gateway frame counter strategy.
    #[arg(long, env = "IOTEDGE_DEVICEID")]
    pub gateway_id: String,

    /// Base URL of the cluster facade (preferred-gateway resolver, device
    /// directory, downlink counters).
    #[arg(long, env = "FACADE_SERVER_URL")]
    pub facade_server_url: String,

    /// Access code appended to every facade request.
    #[arg(long, env = "FACADE_AUTH_CODE")]
    pub facade_auth_code: Option<String>,

    /// Minimum time between uplink receipt and downlink emission, in
    /// milliseconds.  Absent = default budget; zero or negative disables it.
    #[arg(long, env = "PROCESSING_DELAY_IN_MS", allow_negative_numbers = true)]
    pub processing_delay_ms: Option<i64>,

    /// `;`-separated device addresses this server accepts.  Absent = all.
    #[arg(long, env = "AllowedDevAddresses")]
    pub allowed_dev_addresses: Option<String>,

    /// UDP address on which decoded uplinks arrive.
    #[arg(long, env = "LNS_LISTEN", default_value = "0.0.0.0:1680")]
    pub listen: SocketAddr,

    /// Evict a device session after this many idle seconds.
    #[arg(long, default_value_t = 3600)]
    pub session_idle_ttl_secs: u64,

    /// Period of the idle-eviction sweep, in seconds.
    #[arg(long, default_value_t = 60)]
    pub sweep_interval_secs: u64,

    /// RX1 delay configured on the devices, in milliseconds.  RX2 opens one
    /// second later.
    #[arg(long, default_value_t = 1000)]
    pub rx1_delay_ms: u64,

    /// Upper bound for one facade request, in milliseconds.
    #[arg(long, default_value_t = 3000)]
    pub resolver_timeout_ms: u64,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Validated, immutable server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // ---
    pub gateway_id: String,
    pub facade_server_url: String,
    pub facade_auth_code: Option<String>,
    pub processing_delay_ms: Option<i64>,

    /// `None` accepts every address.
    pub allowed_dev_addresses: Option<HashSet<String>>,

    pub listen: SocketAddr,
    pub session_idle_ttl: Duration,
    pub sweep_interval: Duration,
    pub rx1_delay: Duration,
    pub resolver_timeout: Duration,
}

// ---

impl ServerConfig {
    // ---
    /// Defaults for everything but the gateway id.
    pub fn for_gateway(gateway_id: impl Into<String>) -> Self {
        // ---
        Self {
            gateway_id: gateway_id.into(),
            facade_server_url: String::new(),
            facade_auth_code: None,
            processing_delay_ms: None,
            allowed_dev_addresses: None,
            listen: SocketAddr::from(([0, 0, 0, 0], 1680)),
            session_idle_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
            rx1_delay: Duration::from_secs(1),
            resolver_timeout: Duration::from_secs(3),
        }
    }

    // ---

    /// Address filter.  Entries compare ASCII case-insensitively against the
    /// canonical hex form.
    pub fn is_dev_addr_allowed(&self, dev_addr: DevAddr) -> bool {
        // ---
        let Some(allowed) = &self.allowed_dev_addresses else {
            return true;
        };
        let wanted = dev_addr.to_string();
        allowed.iter().any(|a| a.eq_ignore_ascii_case(&wanted))
    }
}

// ---

impl TryFrom<Config> for ServerConfig {
    type Error = LnsError;

    fn try_from(cfg: Config) -> Result<Self, Self::Error> {
        // ---
        let gateway_id = cfg.gateway_id.trim().to_owned();
        if gateway_id.is_empty() {
            return Err(LnsError::InvalidInput("gateway id must not be empty".into()));
        }
        if cfg.sweep_interval_secs == 0 {
            return Err(LnsError::InvalidInput("sweep interval must be positive".into()));
        }

        Ok(Self {
            gateway_id,
            facade_server_url: cfg.facade_server_url,
            facade_auth_code: cfg.facade_auth_code,
            processing_delay_ms: cfg.processing_delay_ms,
            allowed_dev_addresses: cfg
                .allowed_dev_addresses
                .as_deref()
                .map(parse_allowed_dev_addresses),
            listen: cfg.listen,
            session_idle_ttl: Duration::from_secs(cfg.session_idle_ttl_secs),
            sweep_interval: Duration::from_secs(cfg.sweep_interval_secs),
            rx1_delay: Duration::from_millis(cfg.rx1_delay_ms),
            resolver_timeout: Duration::from_millis(cfg.resolver_timeout_ms),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Split on `;` literally.  Consecutive or trailing separators produce an
/// empty-string member; that is accepted input, not an error.
pub fn parse_allowed_dev_addresses(raw: &str) -> HashSet<String> {
    raw.split(';').map(str::to_owned).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
