//! One PTP/IP session: two channels, one transaction stream, one camera.
//!
//! The command channel is single-writer; every request/response pair runs
//! under the command lock, and polling event sources queue behind user
//! operations on the same lock (FIFO). The event channel belongs to the
//! event source once monitoring starts.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{CoreError, Result};
use crate::events::EventSource;
use crate::identity::ClientIdentity;
use crate::net::{CancelHandle, PtpChannel};
use crate::protocol::messages::{
    InitCommandAck, InitCommandRequest, InitEventRequest, OperationRequest, OperationResponse,
    Packet,
};
use crate::protocol::object_info::ObjectInfo;
use crate::protocol::{op, SONY_IN_MEMORY_HANDLE};
use crate::spool::CaptureSpool;
use crate::transaction::TransactionAllocator;
use crate::types::{SessionEvent, SessionState, SpoolItem, Vendor};

/// Send InitCommandRequest and wait for the ack; an InitFail aborts.
pub(crate) async fn init_command_handshake(
    channel: &mut PtpChannel,
    identity: &ClientIdentity,
    timeout: Duration,
) -> Result<InitCommandAck> {
    channel
        .send_packet(&Packet::InitCommandRequest(InitCommandRequest {
            client_guid: identity.guid,
            hostname: identity.hostname.clone(),
        }))
        .await?;

    match channel.recv_packet(timeout).await? {
        Packet::InitCommandAck(ack) => Ok(ack),
        Packet::InitFail(fail) => {
            warn!("camera rejected command-channel init: 0x{:08X}", fail.reason);
            Err(CoreError::InitFail(fail.reason))
        }
        other => {
            warn!("unexpected packet during command init: {:?}", other);
            Err(CoreError::Malformed("init command response"))
        }
    }
}

/// Bind the event channel to the session via the connection number.
pub(crate) async fn init_event_handshake(
    channel: &mut PtpChannel,
    connection_number: u32,
    timeout: Duration,
) -> Result<()> {
    channel
        .send_packet(&Packet::InitEventRequest(InitEventRequest { connection_number }))
        .await?;

    match channel.recv_packet(timeout).await? {
        Packet::InitEventAck => Ok(()),
        Packet::InitFail(fail) => {
            warn!("camera rejected event-channel init: 0x{:08X}", fail.reason);
            Err(CoreError::InitFail(fail.reason))
        }
        other => {
            warn!("unexpected packet during event init: {:?}", other);
            Err(CoreError::Malformed("init event response"))
        }
    }
}

#[derive(Debug, Default, Clone)]
struct CameraMeta {
    name: String,
    vendor: Option<Vendor>,
}

/// Shared command core: everything the event sources need to reach.
pub(crate) struct SessionInner {
    pub(crate) session_id: u32,
    pub(crate) config: SessionConfig,
    state: StdMutex<SessionState>,
    meta: StdMutex<CameraMeta>,
    pub(crate) cmd: Mutex<Option<PtpChannel>>,
    pub(crate) evt: Mutex<Option<PtpChannel>>,
    alloc: TransactionAllocator,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    pub(crate) spool: Arc<CaptureSpool>,
    seen_handles: StdMutex<HashSet<u32>>,
    pub(crate) cancel: CancelHandle,
}

impl SessionInner {
    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap();
        debug!("session {:08X}: {} -> {}", self.session_id, *state, next);
        *state = next;
    }

    pub(crate) fn vendor(&self) -> Option<Vendor> {
        self.meta.lock().unwrap().vendor
    }

    pub(crate) fn camera_name(&self) -> String {
        self.meta.lock().unwrap().name.clone()
    }

    fn set_camera(&self, name: &str, vendor: Vendor) {
        let mut meta = self.meta.lock().unwrap();
        meta.name = name.to_string();
        meta.vendor = Some(vendor);
    }

    /// Deliver a delegate notification; a gone receiver is a no-op.
    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Run one command transaction: request, optional data phase, response.
    ///
    /// Exactly one transaction is in flight per channel; the command lock
    /// enforces it and hands out turns in FIFO order.
    pub(crate) async fn execute(
        &self,
        opcode: u16,
        params: &[u32],
        read_timeout: Duration,
    ) -> Result<(OperationResponse, Vec<u8>)> {
        let mut guard = self.cmd.lock().await;
        let channel = guard.as_mut().ok_or(CoreError::NotConnected)?;

        let tx_id = self.alloc.reserve().take();
        channel
            .send_packet(&Packet::OperationRequest(OperationRequest::new(
                opcode, tx_id, params,
            )))
            .await?;

        let mut data = Vec::new();
        let mut announced: Option<u64> = None;

        loop {
            match channel.recv_packet(read_timeout).await? {
                Packet::StartData(start) => {
                    if start.transaction_id != tx_id {
                        return Err(CoreError::TransactionMismatch {
                            sent: tx_id,
                            received: start.transaction_id,
                        });
                    }
                    announced = Some(start.total_length);
                    if start.total_length > 0 {
                        data.reserve(start.total_length.min(64 * 1024 * 1024) as usize);
                    }
                }
                Packet::Data(chunk) => {
                    if chunk.transaction_id != tx_id {
                        return Err(CoreError::TransactionMismatch {
                            sent: tx_id,
                            received: chunk.transaction_id,
                        });
                    }
                    data.extend_from_slice(&chunk.payload);
                }
                // A bare EndDataPacket before the response is tolerated:
                // accumulate (its payload is the final chunk, possibly the
                // whole object) and keep reading for the response.
                Packet::EndData(end) => {
                    if end.transaction_id != tx_id {
                        return Err(CoreError::TransactionMismatch {
                            sent: tx_id,
                            received: end.transaction_id,
                        });
                    }
                    data.extend_from_slice(&end.payload);
                }
                Packet::OperationResponse(response) => {
                    if response.transaction_id != tx_id {
                        return Err(CoreError::TransactionMismatch {
                            sent: tx_id,
                            received: response.transaction_id,
                        });
                    }
                    if !response.ok() {
                        return Err(CoreError::ResponseCode {
                            opcode,
                            code: response.response_code,
                        });
                    }
                    if let Some(total) = announced {
                        if data.len() as u64 != total {
                            return Err(CoreError::SizeMismatch {
                                announced: total,
                                received: data.len() as u64,
                            });
                        }
                    }
                    return Ok((response, data));
                }
                other => {
                    debug!("ignoring {:?} on command channel", other.packet_type());
                }
            }
        }
    }

    async fn open_session(&self) -> Result<()> {
        self.execute(op::OPEN_SESSION, &[self.session_id], self.config.control_timeout())
            .await?;
        info!("📷 opened session {:08X} with {}", self.session_id, self.camera_name());
        Ok(())
    }

    pub(crate) async fn close_session(&self) -> Result<()> {
        self.execute(op::CLOSE_SESSION, &[], self.config.control_timeout())
            .await?;
        Ok(())
    }

    /// Best-effort GetDeviceInfo, for the logs only.
    async fn log_device_info(&self) {
        match self
            .execute(op::GET_DEVICE_INFO, &[], self.config.control_timeout())
            .await
        {
            Ok((_, data)) => debug!("device info dataset: {} bytes", data.len()),
            Err(e) => debug!("GetDeviceInfo not available: {}", e),
        }
    }

    /// Vendor setup that is safe to run on a camera someone may be using.
    async fn vendor_init(&self) -> Result<()> {
        match self.vendor() {
            Some(Vendor::Canon) => {
                // Without SetEventMode(1) every GetEvent returns a bare
                // terminator.
                match self
                    .execute(op::CANON_SET_EVENT_MODE, &[1], self.config.control_timeout())
                    .await
                {
                    Ok(_) => debug!("canon event mode enabled"),
                    Err(e @ CoreError::ResponseCode { .. }) => {
                        warn!("canon SetEventMode rejected, polling anyway: {}", e);
                    }
                    Err(e) => return Err(e),
                }
                // Flush whatever queued up before we attached.
                match self.canon_get_event().await {
                    Ok(blob) => debug!("flushed canon event queue ({} bytes)", blob.len()),
                    Err(e) => warn!("canon event flush failed: {}", e),
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub(crate) async fn get_object_info(&self, handle: u32) -> Result<ObjectInfo> {
        let (_, data) = self
            .execute(op::GET_OBJECT_INFO, &[handle], self.config.control_timeout())
            .await?;
        ObjectInfo::from_bytes(&data)
    }

    /// GetObject with reassembly and throughput logging.
    pub(crate) async fn fetch_object(&self, handle: u32) -> Result<Vec<u8>> {
        let started = Instant::now();
        let (_, data) = self
            .execute(op::GET_OBJECT, &[handle], self.config.command_timeout())
            .await?;
        log_throughput(handle, data.len(), started);
        Ok(data)
    }

    /// GetPartialObject from offset 0; Sony's in-memory path prefers it.
    pub(crate) async fn fetch_partial_object(&self, handle: u32, max_bytes: u32) -> Result<Vec<u8>> {
        let started = Instant::now();
        let (_, data) = self
            .execute(
                op::GET_PARTIAL_OBJECT,
                &[handle, 0, max_bytes],
                self.config.command_timeout(),
            )
            .await?;
        log_throughput(handle, data.len(), started);
        Ok(data)
    }

    pub(crate) async fn get_device_prop_desc(&self, prop: u16) -> Result<Vec<u8>> {
        let (_, data) = self
            .execute(
                op::GET_DEVICE_PROP_DESC,
                &[prop as u32],
                self.config.control_timeout(),
            )
            .await?;
        Ok(data)
    }

    pub(crate) async fn canon_get_event(&self) -> Result<Vec<u8>> {
        let (_, data) = self
            .execute(op::CANON_GET_EVENT, &[], self.config.control_timeout())
            .await?;
        Ok(data)
    }

    pub(crate) async fn nikon_get_event(&self) -> Result<Vec<u8>> {
        let (_, data) = self
            .execute(op::NIKON_GET_EVENT, &[], self.config.control_timeout())
            .await?;
        Ok(data)
    }

    /// Download a newly detected handle unless it was already delivered.
    pub(crate) async fn enqueue_for_download(&self, handle: u32) {
        {
            let mut seen = self.seen_handles.lock().unwrap();
            if !seen.insert(handle) {
                debug!("handle 0x{:08X} already handled, dropping duplicate", handle);
                return;
            }
        }
        self.download_photo(handle).await;
    }

    /// GetObjectInfo, classify, then skip RAW / download JPEG / best-effort
    /// download anything else. Failures surface as `DidFail`; the session
    /// stays connected and the caller may see the next event.
    pub(crate) async fn download_photo(&self, handle: u32) {
        let object = match self.get_object_info(handle).await {
            Ok(object) => object,
            Err(e) => {
                warn!("GetObjectInfo(0x{:08X}) failed: {}", handle, e);
                self.emit(SessionEvent::DidFail { error: e });
                return;
            }
        };

        self.emit(SessionEvent::DidDetectPhoto {
            handle,
            filename: object.filename.clone(),
            capture_time: object.capture_time(),
            size: object.object_compressed_size as u64,
        });

        if object.is_raw() {
            info!("⏭️ skipping RAW capture {}", object.filename);
            self.emit(SessionEvent::DidSkipRaw {
                filename: object.filename,
            });
            return;
        }
        if !object.is_jpeg() {
            debug!(
                "unclassified object {} (format 0x{:04X}), downloading anyway",
                object.filename, object.object_format
            );
        }

        match self.fetch_object(handle).await {
            Ok(bytes) => {
                if let Err(e) = self.complete_download(handle, &object, bytes).await {
                    warn!("spooling 0x{:08X} failed: {}", handle, e);
                    self.emit(SessionEvent::DidFail { error: e });
                }
            }
            Err(e) => {
                warn!("GetObject(0x{:08X}) failed: {}", handle, e);
                self.emit(SessionEvent::DidFail { error: e });
            }
        }
    }

    /// Sony in-memory variant: the wire handle is 0xFFFFC001 but the
    /// delegate sees the synthetic logical handle.
    pub(crate) async fn download_in_memory(&self, object: &ObjectInfo, logical_handle: u32) {
        let bytes = match self
            .fetch_partial_object(SONY_IN_MEMORY_HANDLE, object.object_compressed_size)
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("in-memory download of {} failed: {}", object.filename, e);
                self.emit(SessionEvent::DidFail { error: e });
                return;
            }
        };
        if let Err(e) = self.complete_download(logical_handle, object, bytes).await {
            warn!("spooling in-memory capture failed: {}", e);
            self.emit(SessionEvent::DidFail { error: e });
        }
    }

    async fn complete_download(
        &self,
        handle: u32,
        object: &ObjectInfo,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let item = self.store_bytes(&bytes, &object.filename, handle, object.content_type()).await?;
        self.emit(SessionEvent::DidCompleteDownload { handle, item, bytes });
        Ok(())
    }

    async fn store_bytes(
        &self,
        bytes: &[u8],
        filename: &str,
        handle: u32,
        content_type: &'static str,
    ) -> Result<SpoolItem> {
        self.spool
            .store(bytes, filename, Some(&format!("{handle:08x}")), content_type)
            .await
    }

    /// Terminal failure raised by a monitor task. There is no awaiting
    /// caller, so the error travels as events: DidFail, then DidDisconnect.
    pub(crate) async fn fail_from_monitor(&self, error: CoreError) {
        {
            let mut state = self.state.lock().unwrap();
            if matches!(*state, SessionState::Disconnecting | SessionState::Terminated) {
                return;
            }
            *state = SessionState::Disconnecting;
        }
        warn!("session {:08X} lost: {}", self.session_id, error);
        self.emit(SessionEvent::DidFail { error });

        self.cancel.cancel();
        if let Some(mut channel) = self.cmd.lock().await.take() {
            channel.close().await;
        }
        if let Some(mut channel) = self.evt.lock().await.take() {
            channel.close().await;
        }

        self.set_state(SessionState::Terminated);
        self.emit(SessionEvent::DidDisconnect);
    }
}

/// A connected (or prepared) camera session.
pub struct CameraSession {
    inner: Arc<SessionInner>,
    monitor: Option<EventSource>,
}

impl std::fmt::Debug for CameraSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSession")
            .field("session_id", &format_args!("{:08X}", self.inner.session_id))
            .field("state", &self.state().to_string())
            .field("camera", &self.camera_name())
            .finish()
    }
}

impl CameraSession {
    /// Create an idle session and the receiving end of its delegate events.
    pub fn new(
        config: SessionConfig,
        spool: Arc<CaptureSpool>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session_id = loop {
            let id: u32 = rand::random();
            if id != 0 {
                break id;
            }
        };
        let block = config.transaction_reserve_block.max(1);
        let inner = Arc::new(SessionInner {
            session_id,
            config,
            state: StdMutex::new(SessionState::Idle),
            meta: StdMutex::new(CameraMeta::default()),
            cmd: Mutex::new(None),
            evt: Mutex::new(None),
            alloc: TransactionAllocator::new(block),
            events_tx,
            spool,
            seen_handles: StdMutex::new(HashSet::new()),
            cancel: CancelHandle::default(),
        });
        (
            Self {
                inner,
                monitor: None,
            },
            events_rx,
        )
    }

    pub fn session_id(&self) -> u32 {
        self.inner.session_id
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn vendor(&self) -> Option<Vendor> {
        self.inner.vendor()
    }

    pub fn camera_name(&self) -> String {
        self.inner.camera_name()
    }

    /// Full connect: Init handshake on both channels, OpenSession, vendor
    /// init, then monitoring.
    pub async fn connect(
        &mut self,
        mut cmd: PtpChannel,
        mut evt: PtpChannel,
        identity: &ClientIdentity,
    ) -> Result<()> {
        if self.state() != SessionState::Idle {
            return Err(CoreError::AlreadyConnected);
        }
        let timeout = self.inner.config.control_timeout();

        let ack = init_command_handshake(&mut cmd, identity, timeout).await?;
        init_event_handshake(&mut evt, ack.connection_number, timeout).await?;

        self.prepare_session(cmd, evt, ack.connection_number, &ack.server_name)
            .await?;
        self.start_event_monitoring().await
    }

    /// Scanner variant: both channels are already past Init. Runs
    /// OpenSession and vendor init but leaves monitoring off.
    pub async fn prepare_session(
        &mut self,
        mut cmd: PtpChannel,
        mut evt: PtpChannel,
        connection_number: u32,
        camera_name: &str,
    ) -> Result<()> {
        if !matches!(self.state(), SessionState::Idle) {
            return Err(CoreError::AlreadyConnected);
        }
        self.inner.set_state(SessionState::Preparing);

        let vendor = Vendor::from_camera_name(camera_name);
        self.inner.set_camera(camera_name, vendor);
        info!(
            "🔧 preparing session {:08X} for {} ({}, connection {})",
            self.inner.session_id, camera_name, vendor, connection_number
        );

        // From here the channels live and die with the session, not with
        // whoever probed them.
        cmd.set_shutdown_signal(self.inner.cancel.subscribe());
        evt.set_shutdown_signal(self.inner.cancel.subscribe());
        *self.inner.cmd.lock().await = Some(cmd);
        *self.inner.evt.lock().await = Some(evt);

        match self.open_and_init().await {
            Ok(()) => {
                self.inner.set_state(SessionState::Prepared);
                Ok(())
            }
            Err(e) => {
                self.inner.set_state(SessionState::Terminated);
                if let Some(mut channel) = self.inner.cmd.lock().await.take() {
                    channel.close().await;
                }
                if let Some(mut channel) = self.inner.evt.lock().await.take() {
                    channel.close().await;
                }
                Err(e)
            }
        }
    }

    async fn open_and_init(&self) -> Result<()> {
        self.inner.open_session().await?;
        self.inner.log_device_info().await;
        self.inner.vendor_init().await
    }

    /// Start the vendor event source; photos flow after this.
    pub async fn start_event_monitoring(&mut self) -> Result<()> {
        if self.state() != SessionState::Prepared {
            return Err(CoreError::NotConnected);
        }
        let vendor = self.inner.vendor().unwrap_or(Vendor::Standard);
        let mut source = EventSource::for_vendor(vendor, self.inner.clone());
        source.start_monitoring().await?;
        self.monitor = Some(source);
        self.inner.set_state(SessionState::Connected);

        self.inner.emit(SessionEvent::DidConnect {
            camera_name: self.camera_name(),
            vendor,
        });
        info!("✅ session {:08X} connected ({})", self.inner.session_id, vendor);
        Ok(())
    }

    pub async fn get_object_info(&self, handle: u32) -> Result<ObjectInfo> {
        self.inner.get_object_info(handle).await
    }

    /// Download one object and stage it; emits `DidCompleteDownload`.
    pub async fn get_object(&self, handle: u32) -> Result<Vec<u8>> {
        let bytes = self.inner.fetch_object(handle).await?;
        let content_type = if bytes.starts_with(&[0xFF, 0xD8]) {
            "image/jpeg"
        } else {
            "application/octet-stream"
        };
        let item = self
            .inner
            .store_bytes(&bytes, "", handle, content_type)
            .await?;
        self.inner.emit(SessionEvent::DidCompleteDownload {
            handle,
            item,
            bytes: bytes.clone(),
        });
        Ok(bytes)
    }

    /// Detect-classify-download for one handle, same path the event
    /// sources use.
    pub async fn download_photo(&self, handle: u32) {
        self.inner.download_photo(handle).await
    }

    /// Ordered teardown. A session that is not connected or prepared is
    /// left alone; calling this twice is fine.
    pub async fn disconnect(&mut self) {
        match self.state() {
            SessionState::Connected | SessionState::Prepared => {}
            state => {
                debug!("disconnect in state {} is a no-op", state);
                return;
            }
        }
        self.inner.set_state(SessionState::Disconnecting);

        // Stop signal interrupts the monitor's long read, and this await is
        // what makes a second disconnect unnecessary.
        if let Some(mut source) = self.monitor.take() {
            source.stop_monitoring().await;
            source.cleanup().await;
        }

        if let Err(e) = self.inner.close_session().await {
            debug!("CloseSession failed during teardown (ignored): {}", e);
        }

        self.inner.cancel.cancel();
        if let Some(mut channel) = self.inner.cmd.lock().await.take() {
            channel.close().await;
        }
        if let Some(mut channel) = self.inner.evt.lock().await.take() {
            channel.close().await;
        }

        self.inner.set_state(SessionState::Terminated);
        self.inner.emit(SessionEvent::DidDisconnect);
        info!("👋 session {:08X} disconnected", self.inner.session_id);
    }

}

fn log_throughput(handle: u32, len: usize, started: Instant) {
    let secs = started.elapsed().as_secs_f64();
    if len >= 1024 * 1024 && secs > 0.0 {
        let mb = len as f64 / (1024.0 * 1024.0);
        info!(
            "⬇️ object 0x{:08X}: {:.1} MiB in {:.2}s ({:.1} MB/s)",
            handle,
            mb,
            secs,
            mb / secs
        );
    } else {
        debug!("⬇️ object 0x{:08X}: {} bytes", handle, len);
    }
}
