//! PTP/IP camera transfer core.
//!
//! Speaks ISO 15740 Picture Transfer Protocol over TCP (port 15740) to
//! WiFi cameras: discovery probes, the Init/OpenSession handshake,
//! vendor-specific event detection, object metadata, chunked downloads,
//! and staging to an on-disk spool for the surrounding app's upload queue.
//!
//! The usual flow: a [`CameraScanner`] probes candidate addresses and
//! pools [`DiscoveredCamera`]s holding prepared sessions; the caller
//! extracts one [`CameraSession`], starts event monitoring, and consumes
//! [`SessionEvent`]s as captures arrive.

pub mod camera_session;
pub mod config;
pub mod error;
mod events;
pub mod identity;
pub mod net;
pub mod protocol;
pub mod scanner;
pub mod spool;
pub mod telemetry;
pub mod transaction;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use camera_session::CameraSession;
pub use config::{CoreConfig, ScanConfig, SessionConfig};
pub use error::{CoreError, Result};
pub use net::PtpChannel;
pub use protocol::object_info::ObjectInfo;
pub use scanner::{CameraScanner, DiscoveredCamera};
pub use spool::CaptureSpool;
pub use types::{SessionEvent, SessionState, SpoolItem, Vendor};
