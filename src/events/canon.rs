//! Canon event polling (opcode 0x9116).
//!
//! Canon bodies do not push ObjectAdded on the event channel; new captures
//! show up in the Canon_GetEvent record stream. The poll interval adapts:
//! tight while events flow, relaxing toward a cap while the camera idles.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::camera_session::SessionInner;
use crate::error::{CoreError, Result};
use crate::events::{sleep_or_stop, MonitorHandle};
use crate::protocol::event;
use crate::types::SessionState;

/// Record types whose first body word is an object handle.
const PHOTO_RECORD_TYPES: [u32; 4] = [
    event::CANON_OBJECT_ADDED_EX as u32,
    event::CANON_OBJECT_ADDED_EX64 as u32,
    event::CANON_REQUEST_OBJECT_TRANSFER as u32,
    event::CANON_REQUEST_OBJECT_TRANSFER64 as u32,
];

/// Extract object handles from a Canon event blob.
///
/// The blob is a packed run of `{size: u32, type: u32, body}` records,
/// terminated by `size == 8 && type == 0`. A record that exactly fills the
/// remaining buffer is still a record.
pub(crate) fn parse_canon_events(data: &[u8]) -> Vec<u32> {
    let mut handles = Vec::new();
    let mut offset = 0usize;

    while offset + 8 <= data.len() {
        let size = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap()) as usize;
        let record_type = u32::from_le_bytes(data[offset + 4..offset + 8].try_into().unwrap());

        if size == 8 && record_type == 0 {
            break; // terminator
        }
        if size < 8 || offset + size > data.len() {
            debug!("truncated canon event record at offset {}", offset);
            break;
        }
        if PHOTO_RECORD_TYPES.contains(&record_type) && size >= 12 {
            let handle =
                u32::from_le_bytes(data[offset + 8..offset + 12].try_into().unwrap());
            handles.push(handle);
        }
        offset += size;
    }
    handles
}

pub(crate) struct CanonEventSource {
    inner: Arc<SessionInner>,
    handle: Option<MonitorHandle>,
}

impl CanonEventSource {
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

    info!("🔍 canon event polling started");
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

        match inner.canon_get_event().await {
            Ok(blob) => {
                let handles = parse_canon_events(&blob);
                if handles.is_empty() {
                    if sleep_or_stop(&mut stop, Duration::from_millis(interval)).await {
                        break;
                    }
                    interval = (interval + step).min(max);
                } else {
                    debug!("canon reported {} new object(s)", handles.len());
                    interval = min;
                    for handle in handles {
                        inner.enqueue_for_download(handle).await;
                    }
                    // events flowing: re-poll immediately
                }
            }
            Err(CoreError::Cancelled) | Err(CoreError::NotConnected) => break,
            Err(e) => {
                warn!("canon poll failed, backing off: {}", e);
                interval = max;
                if sleep_or_stop(&mut stop, Duration::from_millis(interval)).await {
                    break;
                }
            }
        }
    }
    debug!("canon event polling stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(size: u32, record_type: u32, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&record_type.to_le_bytes());
        out.extend_from_slice(body);
        out
    }

    fn terminator() -> Vec<u8> {
        record(8, 0, &[])
    }

    #[test]
    fn extracts_handles_in_wire_order() {
        let mut blob = Vec::new();
        blob.extend(record(16, 0xC181, &[0x01, 0x00, 0x01, 0x00, 0, 0, 0, 0]));
        blob.extend(record(12, 0xC1A7, &[0x02, 0x00, 0x01, 0x00]));
        blob.extend(record(20, 0x0000C189, &[0u8; 12])); // uninteresting type
        blob.extend(record(12, 0xC186, &[0x03, 0x00, 0x01, 0x00]));
        blob.extend(record(12, 0xC1A9, &[0x04, 0x00, 0x01, 0x00]));
        blob.extend(terminator());

        assert_eq!(
            parse_canon_events(&blob),
            vec![0x00010001, 0x00010002, 0x00010003, 0x00010004]
        );
    }

    #[test]
    fn terminator_stops_parsing() {
        let mut blob = Vec::new();
        blob.extend(terminator());
        blob.extend(record(12, 0xC181, &[0x55, 0, 0, 0]));
        assert!(parse_canon_events(&blob).is_empty());
    }

    #[test]
    fn record_exactly_filling_the_buffer_is_parsed() {
        // no terminator, final record ends exactly at the buffer edge
        let blob = record(12, 0xC181, &[0x42, 0x00, 0x00, 0x00]);
        assert_eq!(parse_canon_events(&blob), vec![0x42]);
    }

    #[test]
    fn undersized_photo_record_yields_no_handle() {
        // size 8 carries no body to read a handle from
        let mut blob = record(8, 0xC181, &[]);
        blob.extend(terminator());
        assert!(parse_canon_events(&blob).is_empty());
    }

    #[test]
    fn truncated_or_corrupt_records_stop_cleanly() {
        // size overruns the buffer
        assert!(parse_canon_events(&record(64, 0xC181, &[0u8; 8])).is_empty());
        // size smaller than a header
        assert!(parse_canon_events(&record(4, 0xC181, &[])).is_empty());
        // empty blob
        assert!(parse_canon_events(&[]).is_empty());
    }
}
