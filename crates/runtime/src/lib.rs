//! fg Runtime - Transport abstraction and event-stream plumbing
//!
//! This crate provides the low-level runtime infrastructure the detection
//! layer is built on:
//!
//! - **Transport**: The collaborator interface for the device event channel
//!   (activity feed, per-device event subscriptions, fire-and-forget
//!   commands, device clock)
//! - **Event streams**: Broadcast-backed receivers with lag handling, since
//!   the transport fans every event out to every client session
//! - **Testing**: An in-memory [`FakeTransport`] that scripts device
//!   activity and auto-replies to handshake commands
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │     fg      │  Coordination layer (detection, handshake, session state)
//! └──────┬──────┘
//!        │ holds Arc<dyn Transport>
//! ┌──────▼──────┐
//! │  fg-runtime │  This crate
//! │  ┌────────┐ │
//! │  │ Trans  │ │  Transport trait
//! │  └────────┘ │
//! │  ┌────────┐ │
//! │  │ Stream │ │  EventStream over broadcast
//! │  └────────┘ │
//! └─────────────┘
//! ```
//!
//! [`FakeTransport`]: testing::FakeTransport

pub mod error;
pub mod event_stream;
pub mod testing;
pub mod transport;

// Re-export key types at crate root
pub use error::{Error, Result};
pub use event_stream::EventStream;
pub use transport::Transport;
