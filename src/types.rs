use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::error::CoreError;

/// Camera vendor family, controlling the event-detection strategy.
///
/// Derived from the camera name reported in InitCommandAck; unrecognized
/// names fall back to [`Vendor::Standard`] (push events on the event
/// channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    Canon,
    Nikon,
    Sony,
    Standard,
}

impl Vendor {
    /// Classify a camera by its advertised name.
    pub fn from_camera_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.contains("canon") || lower.contains("eos") {
            Vendor::Canon
        } else if lower.contains("nikon") {
            Vendor::Nikon
        } else if lower.contains("sony") {
            Vendor::Sony
        } else {
            Vendor::Standard
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Canon => "canon",
            Vendor::Nikon => "nikon",
            Vendor::Sony => "sony",
            Vendor::Standard => "standard",
        }
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Preparing,
    /// OpenSession succeeded but event monitoring is not running.
    Prepared,
    /// Monitoring is running and callbacks may fire.
    Connected,
    Disconnecting,
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Preparing => "preparing",
            SessionState::Prepared => "prepared",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// A staged download on disk, waiting for the external upload sink.
#[derive(Debug, Clone)]
pub struct SpoolItem {
    pub id: String,
    pub absolute_path: PathBuf,
    pub filename: String,
    pub content_type: &'static str,
    pub created_at: DateTime<Utc>,
    pub bytes: u64,
}

/// Delegate notifications emitted by a session.
///
/// Delivered over an unbounded channel; if the receiver is gone every send
/// is a no-op, matching the weak-delegate contract.
#[derive(Debug)]
pub enum SessionEvent {
    DidConnect {
        camera_name: String,
        vendor: Vendor,
    },
    DidDetectPhoto {
        handle: u32,
        filename: String,
        capture_time: Option<DateTime<Utc>>,
        size: u64,
    },
    DidCompleteDownload {
        handle: u32,
        item: SpoolItem,
        bytes: Vec<u8>,
    },
    DidSkipRaw {
        filename: String,
    },
    DidFail {
        error: CoreError,
    },
    DidDisconnect,
}
