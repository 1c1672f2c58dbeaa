//! Camera discovery: parallel TCP probes over a candidate address set.
//!
//! The candidate list comes from the discovery front end (hotspot subnet,
//! vendor ranges); the scanner owns everything from the TCP dial to a
//! prepared session. Probes run in waves: every live candidate
//! concurrently, then a delay, then again, until something answers.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::camera_session::{init_command_handshake, init_event_handshake, CameraSession};
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::events::sleep_or_stop;
use crate::identity::client_identity;
use crate::net::{CancelHandle, PtpChannel};
use crate::protocol::PTP_OVER_IP_PORT;
use crate::spool::CaptureSpool;
use crate::types::{SessionEvent, SessionState};

/// A camera that answered the Init handshake on both channels and holds a
/// prepared session. Exactly one caller may extract the session; cameras
/// left in the pool are disconnected by [`CameraScanner::cleanup`].
pub struct DiscoveredCamera {
    pub name: String,
    pub ip: String,
    pub connection_number: u32,
    session: Option<CameraSession>,
    events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
}

impl std::fmt::Debug for DiscoveredCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveredCamera")
            .field("name", &self.name)
            .field("ip", &self.ip)
            .field("connection_number", &self.connection_number)
            .field("has_active_session", &self.has_active_session())
            .finish()
    }
}

impl DiscoveredCamera {
    pub fn has_active_session(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| matches!(s.state(), SessionState::Prepared | SessionState::Connected))
            .unwrap_or(false)
    }

    /// Take ownership of the prepared session and its event stream.
    /// Monitoring is not running yet; call `start_event_monitoring`.
    pub fn extract_session(
        &mut self,
    ) -> Option<(CameraSession, mpsc::UnboundedReceiver<SessionEvent>)> {
        match (self.session.take(), self.events.take()) {
            (Some(session), Some(events)) => Some((session, events)),
            _ => None,
        }
    }

    pub async fn disconnect(&mut self) {
        self.events.take();
        if let Some(mut session) = self.session.take() {
            session.disconnect().await;
        }
    }
}

enum ProbeResult {
    Found(Box<DiscoveredCamera>),
    /// Non-retryable transport failure; skip this IP in later waves.
    Dead(String),
    Failed,
}

pub struct CameraScanner {
    config: CoreConfig,
    caches_root: PathBuf,
    pool: Mutex<Vec<DiscoveredCamera>>,
    current_wave: StdMutex<Option<CancelHandle>>,
    stopped: AtomicBool,
    progress_tx: watch::Sender<f64>,
}

impl CameraScanner {
    pub fn new(config: CoreConfig, caches_root: PathBuf) -> Self {
        let (progress_tx, _) = watch::channel(0.0);
        Self {
            config,
            caches_root,
            pool: Mutex::new(Vec::new()),
            current_wave: StdMutex::new(None),
            stopped: AtomicBool::new(false),
            progress_tx,
        }
    }

    /// Fraction of the whole scan completed, `0.0..=1.0`.
    pub fn progress(&self) -> watch::Receiver<f64> {
        self.progress_tx.subscribe()
    }

    /// Probe the candidates in waves; returns how many cameras were found.
    /// Discovered cameras land in the pool for extraction.
    pub async fn scan(&self, candidates: Vec<String>) -> usize {
        if candidates.is_empty() {
            return 0;
        }
        self.stopped.store(false, Ordering::SeqCst);
        let _ = self.progress_tx.send(0.0);

        let max_waves = self.config.scan.max_waves.max(1);
        let mut dead: HashSet<String> = HashSet::new();
        let mut found_total = 0usize;

        for wave in 1..=max_waves {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }

            let wave_cancel = CancelHandle::default();
            *self.current_wave.lock().unwrap() = Some(wave_cancel.clone());
            let mut wave_rx = wave_cancel.subscribe();

            if wave > 1
                && sleep_or_stop(&mut wave_rx, self.config.scan.wave_delay()).await
            {
                break;
            }

            let remaining: Vec<String> = candidates
                .iter()
                .filter(|ip| !dead.contains(*ip))
                .cloned()
                .collect();
            if remaining.is_empty() {
                debug!("no candidates left to probe");
                break;
            }
            info!(
                "🔍 scan wave {}/{}: probing {} candidate(s)",
                wave,
                max_waves,
                remaining.len()
            );

            let total = remaining.len();
            let mut join_set = JoinSet::new();
            for ip in remaining {
                let cancel_rx = wave_cancel.subscribe();
                let config = self.config.clone();
                let caches_root = self.caches_root.clone();
                join_set.spawn(probe(ip, config, caches_root, cancel_rx));
            }

            let mut completed = 0usize;
            while let Some(joined) = join_set.join_next().await {
                completed += 1;
                let fraction =
                    ((wave - 1) as f64 + completed as f64 / total as f64) / max_waves as f64;
                let _ = self.progress_tx.send(fraction);

                match joined {
                    Ok(ProbeResult::Found(camera)) => {
                        info!("📷 discovered {} at {}", camera.name, camera.ip);
                        self.pool.lock().await.push(*camera);
                        found_total += 1;
                        // a camera in hand ends this wave early
                        wave_cancel.cancel();
                    }
                    Ok(ProbeResult::Dead(ip)) => {
                        debug!("{} is unreachable, dropping from later waves", ip);
                        dead.insert(ip);
                    }
                    Ok(ProbeResult::Failed) => {}
                    Err(e) => warn!("probe task panicked: {}", e),
                }
            }

            if found_total > 0 {
                break;
            }
        }

        *self.current_wave.lock().unwrap() = None;
        let _ = self.progress_tx.send(1.0);
        info!("scan finished: {} camera(s)", found_total);
        found_total
    }

    /// Cancel in-flight probes. Already-discovered sessions stay in the
    /// pool untouched; the caller owns them.
    pub fn stop_scan(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(handle) = self.current_wave.lock().unwrap().as_ref() {
            handle.cancel();
        }
    }

    /// Names and addresses of everything currently pooled.
    pub async fn discovered(&self) -> Vec<(String, String)> {
        self.pool
            .lock()
            .await
            .iter()
            .map(|c| (c.name.clone(), c.ip.clone()))
            .collect()
    }

    pub async fn take_first(&self) -> Option<DiscoveredCamera> {
        let mut pool = self.pool.lock().await;
        if pool.is_empty() {
            None
        } else {
            Some(pool.remove(0))
        }
    }

    pub async fn take_by_ip(&self, ip: &str) -> Option<DiscoveredCamera> {
        let mut pool = self.pool.lock().await;
        let index = pool.iter().position(|c| c.ip == ip)?;
        Some(pool.remove(index))
    }

    /// Stop scanning, disconnect every pooled session, clear the pool.
    pub async fn cleanup(&self) {
        self.stop_scan();
        let mut pool = self.pool.lock().await;
        for camera in pool.iter_mut() {
            camera.disconnect().await;
        }
        pool.clear();
        info!("🧹 scanner pool cleared");
    }
}

/// One candidate, five stages. Stages 1–4 honor cancellation; stage 5
/// (session preparation) runs to completion regardless — a session that
/// got this far is too valuable to throw away.
async fn probe(
    ip: String,
    config: CoreConfig,
    caches_root: PathBuf,
    cancel_rx: watch::Receiver<bool>,
) -> ProbeResult {
    // candidates are bare IPs; an explicit port is honored when present
    let addr = if ip.contains(':') {
        ip.clone()
    } else {
        format!("{}:{}", ip, PTP_OVER_IP_PORT)
    };
    let per_ip_timeout = config.scan.per_ip_timeout();
    let mut retry_rx = cancel_rx.clone();

    // Stage 1: command-channel TCP connect, with retries.
    let mut cmd = {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match PtpChannel::connect(&addr, per_ip_timeout, cancel_rx.clone()).await {
                Ok(channel) => break channel,
                Err(CoreError::Cancelled) => return ProbeResult::Failed,
                Err(e) if !e.is_retryable_connect() => {
                    debug!("{}: {}", addr, e);
                    return ProbeResult::Dead(ip);
                }
                Err(e) => {
                    debug!("{}: attempt {}/{} failed: {}", addr, attempt, config.scan.max_retries, e);
                    if attempt >= config.scan.max_retries {
                        return ProbeResult::Failed;
                    }
                    if sleep_or_stop(&mut retry_rx, config.scan.retry_delay()).await {
                        return ProbeResult::Failed;
                    }
                }
            }
        }
    };

    // Stage 2: Init Command handshake.
    let identity = client_identity(&caches_root);
    let ack = match init_command_handshake(&mut cmd, identity, per_ip_timeout).await {
        Ok(ack) => ack,
        Err(e) => {
            debug!("{}: command init failed: {}", addr, e);
            cmd.close().await;
            return ProbeResult::Failed;
        }
    };
    debug!(
        "{}: answered as {:?} (connection {})",
        addr, ack.server_name, ack.connection_number
    );

    // Stage 3: event-channel TCP connect.
    let mut evt = match PtpChannel::connect(&addr, per_ip_timeout, cancel_rx.clone()).await {
        Ok(channel) => channel,
        Err(e) => {
            debug!("{}: event channel connect failed: {}", addr, e);
            cmd.close().await;
            return ProbeResult::Failed;
        }
    };

    // Stage 4: Init Event handshake.
    if let Err(e) = init_event_handshake(&mut evt, ack.connection_number, per_ip_timeout).await {
        debug!("{}: event init failed: {}", addr, e);
        cmd.close().await;
        evt.close().await;
        return ProbeResult::Failed;
    }

    // Stage 5: commit point. prepare_session rebinds both sockets to the
    // session's own shutdown signal, so a scan cancellation arriving from
    // here on cannot tear them down.
    let spool = Arc::new(CaptureSpool::new(&caches_root));
    let (mut session, events) = CameraSession::new(config.session.clone(), spool);
    match session
        .prepare_session(cmd, evt, ack.connection_number, &ack.server_name)
        .await
    {
        Ok(()) => ProbeResult::Found(Box::new(DiscoveredCamera {
            name: ack.server_name,
            ip,
            connection_number: ack.connection_number,
            session: Some(session),
            events: Some(events),
        })),
        Err(e) => {
            warn!("{}: session preparation failed: {}", addr, e);
            ProbeResult::Failed
        }
    }
}
