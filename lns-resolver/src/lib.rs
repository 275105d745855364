//! HTTP client for the cluster services the network server consumes.
//!
//! Implements [`lns_domain::NetworkServerService`] and
//! [`lns_domain::DeviceConnector`] over `reqwest`.
//!
//! # Routes
//!
//! All routes are relative to the configured endpoint URL.  When an access
//! code is configured it travels as the `code` query parameter.
//!
//! ```text
//! POST PreferredGateway            body: UplinkClaim  → PreferredGatewayResult
//! GET  NextFCntDown?DevEUI=&FCntDown=&FCntUp=&GatewayId=  → integer
//! GET  GetDevice?DevAddr=                             → {"Devices": [...]}
//! POST DeviceEvent/{DevEUI}        body: Uplink       → 2xx
//! GET  CloudMessage/{DevEUI}                          → CloudMessage | 204
//! ```
//!
//! # Quick start
//!
//! ```ignore
//! use std::time::Duration;
//! use lns_resolver::{Endpoint, HttpResolver, HttpDeviceConnector};
//!
//! let endpoint  = Endpoint::new("http://facade:7071/api", None, Duration::from_secs(3))?;
//! let resolver  = HttpResolver::new(endpoint.clone());
//! let connector = HttpDeviceConnector::new(endpoint);
//! ```

mod client;
mod connection;
mod endpoint;
mod error;

#[cfg(test)]
mod test_facade;

pub use client::HttpResolver;
pub use connection::{HttpDeviceConnection, HttpDeviceConnector};
pub use endpoint::Endpoint;
pub use error::ResolverError;
