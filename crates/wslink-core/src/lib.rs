//! # wslink-core
//!
//! Foundation types for the wslink packet-correlation layer.
//!
//! This crate provides the shared vocabulary the transport crates depend on:
//!
//! - **Packets**: the open tagged wire format (`event` + `pID` + free-form fields)
//!   with typed constructors for the two protocol-level control packets
//! - **Branded IDs**: `PacketId`, `ConnectionId` as newtypes for type safety
//! - **Errors**: `LinkError` via `thiserror`
//! - **Configuration**: `HubConfig` / `ClientConfig` with the protocol defaults

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod ids;
pub mod packet;

pub use config::{ClientConfig, HubConfig};
pub use error::LinkError;
pub use ids::{ConnectionId, PacketId};
pub use packet::{EVENT_HEARTBEAT, EVENT_RESPONCE, Packet};
