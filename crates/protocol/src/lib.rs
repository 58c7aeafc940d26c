//! Wire types for the device transport protocol.
//!
//! This crate contains the serde-serializable types exchanged with the
//! on-device agent over the transport's event stream: device and process
//! identities, foreground-process reports, tracking-support classifications,
//! and the command/activity enums.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization/deserialization
//! - **1:1 with protocol**: Match the shapes the transport puts on the wire
//! - **Stable**: Changes only when the wire protocol changes
//!
//! Higher-level coordination logic is built on top of these types in `fg`.

pub mod events;
pub mod types;

pub use events::*;
pub use types::*;
