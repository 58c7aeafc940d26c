//! fg: foreground-process detection for device inspection tooling.
//!
//! This crate keeps a local model of "which device is being inspected"
//! synchronized across independent client sessions that share the same
//! physical devices. It negotiates with each newly connected device whether
//! it supports on-device foreground-process tracking, starts and stops the
//! on-device poller, correlates foreground-process reports with the process
//! registry, and reference-counts the shared on-device tracker across
//! sessions so one session's stop never breaks another.
//!
//! # Components
//!
//! - [`ForegroundProcessDetection`] - the per-session coordinator driving
//!   everything below
//! - [`HandshakeExecutor`] - per-device negotiation state machine with a
//!   periodic retry loop
//! - [`DeviceModel`] - one session's selected device and per-device support
//!   classifications
//! - [`SessionRegistry`] / [`ConnectClockTable`] - process-wide services
//!   shared by every session
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use fg::{
//!     ConnectClockTable, DetectionConfig, DeviceModel, ForegroundProcessDetection,
//!     NoopMetrics, SessionRegistry,
//! };
//!
//! let registry = Arc::new(SessionRegistry::new());
//! let clocks = Arc::new(ConnectClockTable::new());
//! let device_model = DeviceModel::new(process_model.clone(), registry.clone());
//! let detection = ForegroundProcessDetection::new(
//!     device_model,
//!     process_model,
//!     transport,
//!     Arc::new(NoopMetrics),
//!     registry,
//!     clocks,
//!     DetectionConfig::default(),
//! );
//! detection.start();
//! ```

pub mod config;
pub mod detection;
pub mod device_model;
pub mod handshake;
pub mod metrics;
pub mod process_model;
pub mod registry;
pub mod testing;

pub use config::DetectionConfig;
pub use detection::{DisconnectHook, ForegroundProcessDetection, ForegroundProcessListener};
pub use device_model::{DeviceModel, ListenerId, SelectedDeviceListener, SupportStatus};
pub use handshake::{HandshakeExecutor, HandshakeState};
pub use metrics::{DetectionMetrics, HandshakeConversion, NoopMetrics};
pub use process_model::{ProcessesModel, SelectionListener};
pub use registry::{ConnectClockTable, SessionRegistry};

// The coordination layer reports failures with the runtime's error type.
pub use fg_runtime::{Error, Result};
