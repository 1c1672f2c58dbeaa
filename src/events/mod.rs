//! Vendor-specific detection of new objects.
//!
//! Four strategies behind one surface: Canon and Nikon poll vendor GetEvent
//! opcodes on the command channel; Standard vendors push events on the
//! event channel; Sony extends Standard with the in-memory capture gate.

pub(crate) mod canon;
pub(crate) mod nikon;
pub(crate) mod sony;
pub(crate) mod standard;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::camera_session::SessionInner;
use crate::error::Result;
use crate::types::Vendor;

/// A running monitor: its stop signal plus every task it spawned.
pub(crate) struct MonitorHandle {
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl MonitorHandle {
    pub(crate) fn new(stop: watch::Sender<bool>, tasks: Vec<JoinHandle<()>>) -> Self {
        Self { stop, tasks }
    }

    /// Signal stop and wait for every task to finish. Returning before the
    /// tasks are done is how sessions end up needing several disconnect
    /// attempts, so this always awaits.
    pub(crate) async fn stop(self) {
        let _ = self.stop.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Resolves when the stop signal fires (or its sender is gone).
pub(crate) async fn wait_stop(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep, unless stop fires first. Returns true when stopped.
pub(crate) async fn sleep_or_stop(stop: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    if *stop.borrow() {
        return true;
    }
    tokio::select! {
        _ = wait_stop(stop) => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

/// The vendor strategies as one tagged sum.
pub(crate) enum EventSource {
    Canon(canon::CanonEventSource),
    Nikon(nikon::NikonEventSource),
    Standard(standard::StandardEventSource),
    Sony(sony::SonyEventSource),
}

impl EventSource {
    pub(crate) fn for_vendor(vendor: Vendor, inner: Arc<SessionInner>) -> Self {
        match vendor {
            Vendor::Canon => EventSource::Canon(canon::CanonEventSource::new(inner)),
            Vendor::Nikon => EventSource::Nikon(nikon::NikonEventSource::new(inner)),
            Vendor::Sony => EventSource::Sony(sony::SonyEventSource::new(inner)),
            Vendor::Standard => EventSource::Standard(standard::StandardEventSource::new(inner)),
        }
    }

    pub(crate) async fn start_monitoring(&mut self) -> Result<()> {
        match self {
            EventSource::Canon(s) => s.start_monitoring().await,
            EventSource::Nikon(s) => s.start_monitoring().await,
            EventSource::Standard(s) => s.start_monitoring().await,
            EventSource::Sony(s) => s.start_monitoring().await,
        }
    }

    /// Stop and await the background tasks; no callbacks fire afterwards.
    pub(crate) async fn stop_monitoring(&mut self) {
        let handle = match self {
            EventSource::Canon(s) => s.take_handle(),
            EventSource::Nikon(s) => s.take_handle(),
            EventSource::Standard(s) => s.take_handle(),
            EventSource::Sony(s) => s.take_handle(),
        };
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    pub(crate) async fn cleanup(&mut self) {
        self.stop_monitoring().await;
        debug!("event source cleaned up");
    }
}
