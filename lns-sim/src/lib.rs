//! In-process cluster simulator for network-server unit and integration
//! testing.
//!
//! [`SimResolver`] implements [`lns_domain::NetworkServerService`] with plain
//! in-memory maps instead of a remote store. [`SimConfig`] controls injected
//! impairments:
//!
//! - Resolver failure probability
//! - Hard outage (every call fails)
//! - Per-call latency
//! - Deterministic RNG seed for reproducible runs
//!
//! [`SimConnector`] hands out [`CountingConnection`]s that record every
//! forwarded uplink and every release call.
//!
//! # Quick start
//!
//! ```rust
//! use lns_sim::{SimConfig, SimResolver};
//!
//! let resolver = SimResolver::new(SimConfig::flaky(0.25));
//! resolver.set_outage(true);
//! ```

mod config;
mod connection;
mod resolver;

// --- public API
pub use config::SimConfig;
pub use connection::{CountingConnection, SimConnector};
pub use resolver::SimResolver;
