//! Sony event source: the standard push monitor plus the in-memory
//! capture gate.
//!
//! During a capture Sony bodies burst ObjectAdded events for the transient
//! handle 0xFFFFC001 while the image exists only in camera memory. Reading
//! it too early can crash the firmware: the `objectInMemory` device
//! property must report `>= 0x8000` first. This rule is a contract with
//! the camera, not an optimization target.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::camera_session::SessionInner;
use crate::error::{CoreError, Result};
use crate::events::{sleep_or_stop, standard, wait_stop, MonitorHandle};
use crate::protocol::binary::{get_u16, get_u8};
use crate::protocol::object_info::ObjectInfo;
use crate::protocol::{
    prop, SONY_IN_MEMORY_HANDLE, SONY_IN_MEMORY_READY, SYNTHETIC_HANDLE_BASE,
    SYNTHETIC_HANDLE_MASK,
};
use crate::types::SessionEvent;

/// Pull the current value out of a DevicePropDesc dataset, for properties
/// whose datatype is an integer of at most 64 bits.
pub(crate) fn parse_prop_desc_current(data: &[u8]) -> Result<u64> {
    let mut buf = data;
    let _property_code = get_u16(&mut buf, "prop desc code")?;
    let datatype = get_u16(&mut buf, "prop desc datatype")?;
    let _get_set = get_u8(&mut buf, "prop desc get/set")?;

    let width = match datatype {
        0x0001 | 0x0002 => 1,
        0x0003 | 0x0004 => 2,
        0x0005 | 0x0006 => 4,
        0x0007 | 0x0008 => 8,
        _ => return Err(CoreError::Malformed("prop desc datatype")),
    };
    if buf.len() < width * 2 {
        return Err(CoreError::Malformed("prop desc values"));
    }
    let current = &buf[width..width * 2];
    let mut value = 0u64;
    for (i, byte) in current.iter().enumerate() {
        value |= (*byte as u64) << (8 * i);
    }
    Ok(value)
}

pub(crate) struct SonyEventSource {
    inner: Arc<SessionInner>,
    handle: Option<MonitorHandle>,
}

impl SonyEventSource {
    pub(crate) fn new(inner: Arc<SessionInner>) -> Self {
        Self { inner, handle: None }
    }

    pub(crate) async fn start_monitoring(&mut self) -> Result<()> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();

        let monitor = tokio::spawn(standard::monitor_loop(
            self.inner.clone(),
            stop_rx.clone(),
            Some(trigger_tx),
        ));
        let worker = tokio::spawn(in_memory_worker(self.inner.clone(), stop_rx, trigger_rx));

        self.handle = Some(MonitorHandle::new(stop_tx, vec![monitor, worker]));
        Ok(())
    }

    pub(crate) fn take_handle(&mut self) -> Option<MonitorHandle> {
        self.handle.take()
    }
}

/// Serialized processing of in-memory triggers: one capture at a time, in
/// the order the bursts arrived.
async fn in_memory_worker(
    inner: Arc<SessionInner>,
    mut stop: watch::Receiver<bool>,
    mut triggers: mpsc::UnboundedReceiver<()>,
) {
    let mut last_signature: Option<(String, u32, u32)> = None;
    let mut capture_counter: u32 = 0;

    info!("👂 sony in-memory worker started");
    loop {
        tokio::select! {
            _ = wait_stop(&mut stop) => break,
            trigger = triggers.recv() => {
                if trigger.is_none() {
                    break;
                }
            }
        }

        match process_trigger(&inner, &mut stop, &mut last_signature).await {
            Ok(Some(object)) => {
                capture_counter += 1;
                let logical = SYNTHETIC_HANDLE_BASE | (capture_counter & SYNTHETIC_HANDLE_MASK);
                info!(
                    "📸 sony in-memory capture {} as logical handle 0x{:08X}",
                    object.filename, logical
                );
                inner.emit(SessionEvent::DidDetectPhoto {
                    handle: logical,
                    filename: object.filename.clone(),
                    capture_time: object.capture_time(),
                    size: object.object_compressed_size as u64,
                });
                inner.download_in_memory(&object, logical).await;
            }
            Ok(None) => {
                debug!("in-memory trigger matched the previous capture, dropped");
            }
            Err(CoreError::Cancelled) => break,
            Err(e) => {
                warn!("sony in-memory processing failed: {}", e);
                inner.emit(SessionEvent::DidFail { error: e });
            }
        }
    }
    debug!("sony in-memory worker stopped");
}

/// Wait out the safety gate, then decide whether this trigger is a new
/// capture or a re-emission of the last one.
async fn process_trigger(
    inner: &Arc<SessionInner>,
    stop: &mut watch::Receiver<bool>,
    last_signature: &mut Option<(String, u32, u32)>,
) -> Result<Option<ObjectInfo>> {
    let gate_wait = inner.config.sony_in_memory_max_wait();
    let gate_poll = Duration::from_millis(inner.config.sony_gate_poll_interval_ms);
    let deadline = Instant::now() + gate_wait;

    loop {
        let value = object_in_memory(inner).await?;
        if value >= SONY_IN_MEMORY_READY {
            debug!("objectInMemory gate open (0x{:04X})", value);
            break;
        }
        // Values below 0x8000 (0x0001 especially) mean the handle is not
        // safe to touch yet.
        if Instant::now() >= deadline {
            return Err(CoreError::SonyGateTimeout(
                inner.config.sony_in_memory_max_wait_s,
            ));
        }
        if sleep_or_stop(stop, gate_poll).await {
            return Err(CoreError::Cancelled);
        }
    }

    let polls = inner.config.sony_signature_polls.max(1);
    let poll_interval = Duration::from_millis(inner.config.sony_signature_poll_interval_ms);
    for attempt in 0..polls {
        let object = inner.get_object_info(SONY_IN_MEMORY_HANDLE).await?;
        let signature = object.signature();
        if last_signature.as_ref() != Some(&signature) {
            *last_signature = Some(signature);
            return Ok(Some(object));
        }
        if attempt + 1 < polls && sleep_or_stop(stop, poll_interval).await {
            return Err(CoreError::Cancelled);
        }
    }
    Ok(None)
}

async fn object_in_memory(inner: &Arc<SessionInner>) -> Result<u16> {
    let data = inner.get_device_prop_desc(prop::SONY_OBJECT_IN_MEMORY).await?;
    Ok(parse_prop_desc_current(&data)? as u16)
}
