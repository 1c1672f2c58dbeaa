//! Framed TCP transport for one PTP/IP channel.
//!
//! A [`PtpChannel`] owns one socket (command or event) and speaks whole
//! frames. Every read and write races a shutdown signal so teardown never
//! waits out a long monitor read.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::error::{CoreError, Result};
use crate::protocol::binary::PacketHeader;
use crate::protocol::messages::Packet;

/// Frames larger than this are treated as corrupt rather than allocated.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Owner side of a channel's shutdown signal. Dropping it does NOT cancel;
/// call [`CancelHandle::cancel`].
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    /// Signal every read/write racing this handle to abort promptly.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new().0
    }
}

/// Resolves once the signal flips to cancelled; pends forever if the
/// handle side is gone (an orphaned receiver can no longer be cancelled).
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// One framed TCP connection to a camera.
pub struct PtpChannel {
    stream: TcpStream,
    peer: String,
    shutdown: watch::Receiver<bool>,
}

impl std::fmt::Debug for PtpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtpChannel").field("peer", &self.peer).finish()
    }
}

impl PtpChannel {
    /// Dial `addr` with a connect deadline, racing the shutdown signal.
    pub async fn connect(
        addr: &str,
        timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let mut rx = shutdown.clone();
        let connect = TcpStream::connect(addr);

        let stream = tokio::select! {
            _ = cancelled(&mut rx) => return Err(CoreError::Cancelled),
            result = tokio::time::timeout(timeout, connect) => match result {
                Err(_) => {
                    return Err(CoreError::Timeout {
                        what: "connect",
                        millis: timeout.as_millis() as u64,
                    })
                }
                Ok(Err(e)) => {
                    return Err(CoreError::ConnectFailed {
                        addr: addr.to_string(),
                        source: e,
                    })
                }
                Ok(Ok(stream)) => stream,
            },
        };

        stream.set_nodelay(true).ok();
        debug!("🔗 connected to {}", addr);
        Ok(Self {
            stream,
            peer: addr.to_string(),
            shutdown,
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Rebind the channel to a new owner's shutdown signal (used when the
    /// scanner hands a probed connection over to its session).
    pub fn set_shutdown_signal(&mut self, shutdown: watch::Receiver<bool>) {
        self.shutdown = shutdown;
    }

    /// Write one frame, racing the shutdown signal.
    pub async fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let frame = packet.encode();
        trace!("📤 {} <- {:?} ({} bytes)", self.peer, packet.packet_type(), frame.len());

        let mut rx = self.shutdown.clone();
        tokio::select! {
            _ = cancelled(&mut rx) => Err(CoreError::Cancelled),
            result = async {
                self.stream.write_all(&frame).await?;
                self.stream.flush().await
            } => result.map_err(CoreError::Io),
        }
    }

    /// Read one complete frame within `timeout`.
    ///
    /// A deadline that elapses before the first header byte arrives is the
    /// quiet-line case and returns `Ok(None)`; a deadline mid-frame leaves
    /// the stream unusable and is an error.
    pub async fn recv_packet_opt(&mut self, timeout: Duration) -> Result<Option<Packet>> {
        let deadline = tokio::time::Instant::now() + timeout;

        let mut header_bytes = [0u8; PacketHeader::SIZE];
        let mut got = 0usize;
        match self.recv_exact_until(&mut header_bytes, deadline, &mut got).await {
            Ok(()) => {}
            Err(CoreError::Timeout { .. }) if got == 0 => return Ok(None),
            Err(e) => return Err(e),
        }

        let (header, _) = PacketHeader::from_bytes(&header_bytes)?;
        let payload_len = header.payload_len();
        if payload_len > MAX_FRAME_BYTES {
            return Err(CoreError::Malformed("oversized frame"));
        }

        let mut payload = vec![0u8; payload_len];
        let mut got = 0usize;
        self.recv_exact_until(&mut payload, deadline, &mut got).await?;

        trace!("📥 {} -> type 0x{:02X} ({} bytes)", self.peer, header.packet_type, header.length);
        Packet::decode_payload(header.packet_type, &payload).map(Some)
    }

    /// Read one complete frame; the deadline elapsing is an error.
    pub async fn recv_packet(&mut self, timeout: Duration) -> Result<Packet> {
        match self.recv_packet_opt(timeout).await? {
            Some(packet) => Ok(packet),
            None => Err(CoreError::Timeout {
                what: "recv",
                millis: timeout.as_millis() as u64,
            }),
        }
    }

    /// Fill `buf` exactly, or fail by `deadline`. Races the shutdown
    /// signal; exactly one of {bytes, timeout, cancel, close} wins.
    async fn recv_exact_until(
        &mut self,
        buf: &mut [u8],
        deadline: tokio::time::Instant,
        progress: &mut usize,
    ) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let mut rx = self.shutdown.clone();

        while *progress < buf.len() {
            let filled = *progress;
            let read = self.stream.read(&mut buf[filled..]);
            let n = tokio::select! {
                _ = cancelled(&mut rx) => return Err(CoreError::Cancelled),
                result = tokio::time::timeout_at(deadline, read) => match result {
                    Err(_) => {
                        return Err(CoreError::Timeout {
                            what: "recv",
                            millis: 0,
                        })
                    }
                    Ok(Err(e)) => return Err(CoreError::Io(e)),
                    Ok(Ok(n)) => n,
                },
            };
            if n == 0 {
                return Err(CoreError::ConnectionClosed);
            }
            *progress += n;
        }
        Ok(())
    }

    /// Half-close the socket so any peer-side read returns.
    pub async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
        debug!("🔌 closed channel to {}", self.peer);
    }

}
