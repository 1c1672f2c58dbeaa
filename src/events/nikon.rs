//! Nikon event polling (opcode 0x90C7).
//!
//! Same adaptive schedule as the Canon poller, different payload: a record
//! count followed by `{code: u16, param1: u32}` entries. Nikon bodies emit
//! the same ObjectAdded several times per capture, so duplicates are
//! suppressed downstream by handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::camera_session::SessionInner;
use crate::error::{CoreError, Result};
use crate::events::{sleep_or_stop, MonitorHandle};
use crate::protocol::event;
use crate::types::SessionState;

/// Decode a Nikon GetEvent payload into `(code, param1)` records. A count
/// that overruns the payload yields the records that fit.
pub(crate) fn parse_nikon_events(data: &[u8]) -> Vec<(u16, u32)> {
    if data.len() < 2 {
        return Vec::new();
    }
    let count = u16::from_le_bytes([data[0], data[1]]) as usize;
    let mut records = Vec::new();
    let mut offset = 2usize;
    for _ in 0..count {
        if offset + 6 > data.len() {
            debug!("nikon event payload truncated after {} records", records.len());
            break;
        }
        let code = u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap());
        let param1 = u32::from_le_bytes(data[offset + 2..offset + 6].try_into().unwrap());
        records.push((code, param1));
        offset += 6;
    }
    records
}

/// Handles carried by photo-bearing event codes, in wire order.
pub(crate) fn photo_handles(records: &[(u16, u32)]) -> Vec<u32> {
    records
        .iter()
        .filter(|(code, _)| {
            matches!(*code, event::OBJECT_ADDED | event::NIKON_OBJECT_ADDED_IN_SDRAM)
        })
        .map(|(_, param1)| *param1)
        .collect()
}

pub(crate) struct NikonEventSource {
    inner: Arc<SessionInner>,
    handle: Option<MonitorHandle>,
}

impl NikonEventSource {
    pub(crate) fn new(inner: Arc<SessionInner>) -> Self {
        Self { inner, handle: None }
    }

    pub(crate) async fn start_monitoring(&mut self) -> Result<()> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(poll_loop(self.inner.clone(), stop_rx));
        self.handle = Some(MonitorHandle::new(stop_tx, vec![task]));
        Ok(())
    }

    pub(crate) fn take_handle(&mut self) -> Option<MonitorHandle> {
        self.handle.take()
    }
}

async fn poll_loop(inner: Arc<SessionInner>, mut stop: watch::Receiver<bool>) {
    let min = inner.config.poll_interval_min_ms;
    let max = inner.config.poll_interval_max_ms;
    let step = inner.config.poll_interval_step_ms;
    let mut interval = min;

    info!("🔍 nikon event polling started");
    loop {
        if *stop.borrow() {
            break;
        }
        if matches!(
            inner.state(),
            SessionState::Disconnecting | SessionState::Terminated
        ) {
            break;
        }

        match inner.nikon_get_event().await {
            Ok(payload) => {
                let handles = photo_handles(&parse_nikon_events(&payload));
                if handles.is_empty() {
                    if sleep_or_stop(&mut stop, Duration::from_millis(interval)).await {
                        break;
                    }
                    interval = (interval + step).min(max);
                } else {
                    debug!("nikon reported {} object event(s)", handles.len());
                    interval = min;
                    for handle in handles {
                        inner.enqueue_for_download(handle).await;
                    }
                }
            }
            Err(CoreError::Cancelled) | Err(CoreError::NotConnected) => break,
            Err(e) => {
                warn!("nikon poll failed, backing off: {}", e);
                interval = max;
                if sleep_or_stop(&mut stop, Duration::from_millis(interval)).await {
                    break;
                }
            }
        }
    }
    debug!("nikon event polling stopped");
}
