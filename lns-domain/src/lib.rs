//! Core traits and types for the network-server message core.
//!
//! This crate defines the vocabulary of the system. All other crates depend
//! on `lns-domain` and speak its types. No I/O lives here.
//!
//! # Structure
//!
//! - [`error`]      — [`LnsError`] and [`Result<T>`] alias
//! - [`identity`]   — [`DevAddr`], [`Eui64`], [`DeviceIdentity`]
//! - [`uplink`]     — [`Uplink`], [`UplinkPayload`], [`requires_confirmation`]
//! - [`downlink`]   — [`DownlinkDecision`], [`ReceiveWindow`]
//! - [`preferred`]  — [`UplinkClaim`], [`PreferredGatewayResult`]
//! - [`directory`]  — [`DeviceDirectoryRecord`], [`SearchDevicesResult`]
//! - [`service`]    — [`NetworkServerService`] trait
//! - [`connection`] — [`DeviceConnection`], [`DeviceConnector`] traits
//! - [`cancel`]     — [`ScopedCancellation`], [`Disposable`]

mod cancel;
mod connection;
mod directory;
mod downlink;
mod error;
mod identity;
mod preferred;
mod service;
mod uplink;

// --- error
pub use error::{LnsError, Result};

// --- identity
pub use identity::{DevAddr, DeviceIdentity, Eui64};

// --- uplink
pub use uplink::{requires_confirmation, Uplink, UplinkPayload};

// --- downlink
pub use downlink::{DownlinkDecision, ReceiveWindow};

// --- preferred gateway contract
pub use preferred::{PreferredGatewayResult, UplinkClaim};

// --- device directory
pub use directory::{DeviceDirectoryRecord, SearchDevicesResult};

// --- service
pub use service::{NetworkServerService, NetworkServerServicePtr};

// --- connection
pub use connection::{
    // ---
    CloudMessage,
    DeviceConnection,
    DeviceConnectionPtr,
    DeviceConnector,
    DeviceConnectorPtr,
};

// --- cancellation
pub use cancel::{Disposable, ScopedCancellation};

// Re-exported so downstream crates name the same signal type.
pub use tokio_util::sync::CancellationToken;
