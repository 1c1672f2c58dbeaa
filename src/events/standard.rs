//! Push-event monitor for standard PTP/IP vendors (Sony, Fuji, Olympus,
//! Panasonic and anything unrecognized).
//!
//! Owns the event channel for the life of the monitor. Timeouts on the
//! long read mean "no event yet"; transport or protocol failures on this
//! channel are terminal for the session.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::camera_session::SessionInner;
use crate::error::{CoreError, Result};
use crate::events::{wait_stop, MonitorHandle};
use crate::protocol::messages::Packet;
use crate::protocol::{event, SONY_IN_MEMORY_HANDLE};

pub(crate) struct StandardEventSource {
    inner: Arc<SessionInner>,
    handle: Option<MonitorHandle>,
}

impl StandardEventSource {
    pub(crate) fn new(inner: Arc<SessionInner>) -> Self {
        Self { inner, handle: None }
    }

    pub(crate) async fn start_monitoring(&mut self) -> Result<()> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(monitor_loop(self.inner.clone(), stop_rx, None));
        self.handle = Some(MonitorHandle::new(stop_tx, vec![task]));
        Ok(())
    }

    pub(crate) fn take_handle(&mut self) -> Option<MonitorHandle> {
        self.handle.take()
    }
}

/// Event-channel read loop, shared with the Sony source. When
/// `in_memory_triggers` is set, events for the Sony in-memory handle are
/// queued there instead of downloaded directly.
pub(crate) async fn monitor_loop(
    inner: Arc<SessionInner>,
    mut stop: watch::Receiver<bool>,
    in_memory_triggers: Option<mpsc::UnboundedSender<()>>,
) {
    let mut channel = match inner.evt.lock().await.take() {
        Some(channel) => channel,
        None => {
            warn!("event channel missing, monitor not started");
            return;
        }
    };
    let timeout = inner.config.event_recv_timeout();
    info!("👂 event-channel monitor started ({})", channel.peer());

    loop {
        let received = tokio::select! {
            _ = wait_stop(&mut stop) => break,
            received = channel.recv_packet_opt(timeout) => received,
        };

        match received {
            Ok(None) => continue, // quiet line, keep waiting
            Ok(Some(Packet::Event(evt))) => {
                handle_event(&inner, &evt, &in_memory_triggers).await;
            }
            Ok(Some(Packet::Ping)) => {
                debug!("answering ping on event channel");
                if let Err(e) = channel.send_packet(&Packet::Pong).await {
                    debug!("pong failed: {}", e);
                }
            }
            Ok(Some(Packet::Pong)) => {}
            Ok(Some(other)) => {
                debug!("ignoring packet type 0x{:02X} on event channel", other.packet_type());
            }
            Err(CoreError::Cancelled) => break,
            Err(e) => {
                channel.close().await;
                inner.fail_from_monitor(e).await;
                return;
            }
        }
    }

    // graceful stop: hand the channel back so teardown can close it
    *inner.evt.lock().await = Some(channel);
    debug!("event-channel monitor stopped");
}

async fn handle_event(
    inner: &Arc<SessionInner>,
    evt: &crate::protocol::messages::EventPacket,
    in_memory_triggers: &Option<mpsc::UnboundedSender<()>>,
) {
    match evt.event_code {
        event::OBJECT_ADDED | event::CANON_OBJECT_ADDED_EX | event::SONY_OBJECT_ADDED => {
            let Some(handle) = evt.object_handle() else {
                warn!("ObjectAdded event 0x{:04X} without a handle", evt.event_code);
                return;
            };
            if handle == SONY_IN_MEMORY_HANDLE {
                if let Some(triggers) = in_memory_triggers {
                    debug!("queueing sony in-memory trigger");
                    let _ = triggers.send(());
                    return;
                }
            }
            debug!("object added: 0x{:08X}", handle);
            inner.enqueue_for_download(handle).await;
        }
        other => {
            debug!("ignoring event 0x{:04X} {:?}", other, evt.params);
        }
    }
}
