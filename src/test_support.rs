//! Scriptable in-process PTP/IP camera for tests.
//!
//! Binds a loopback listener and plays the camera side of the protocol:
//! Init handshakes on both channels, canned operation responses, chunked
//! data phases, scheduled push events, and the Sony in-memory property
//! dance. Behavior is a table the test fills in.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::protocol::binary::PacketHeader;
use crate::protocol::messages::{
    EventPacket, InitCommandAck, OperationResponse, Packet,
};
use crate::protocol::object_info::ObjectInfo;
use crate::protocol::{format, op, rsp, SONY_IN_MEMORY_HANDLE};
use crate::types::SessionEvent;

#[derive(Debug, Clone)]
pub(crate) struct MockObject {
    pub info: ObjectInfo,
    pub data: Vec<u8>,
}

/// What the fake camera is scripted to do.
#[derive(Debug, Clone)]
pub(crate) struct MockCameraBehavior {
    pub name: String,
    pub connection_number: u32,
    pub objects: HashMap<u32, MockObject>,
    /// Served one per Canon_GetEvent; when empty, a bare terminator.
    pub canon_event_blobs: VecDeque<Vec<u8>>,
    /// Served one per Nikon_GetEvent; when empty, a zero-count payload.
    pub nikon_event_payloads: VecDeque<Vec<u8>>,
    /// `(delay_ms, event_code, handle)` pushed on the event channel.
    pub push_events: Vec<(u64, u16, u32)>,
    /// GetObjectInfo(0xFFFFC001) answers; the final entry repeats.
    pub in_memory_infos: VecDeque<ObjectInfo>,
    /// objectInMemory property values; the final entry repeats.
    pub prop_desc_currents: VecDeque<u16>,
    /// Opcodes answered with `transaction_id + 1` (mismatch injection).
    pub wrong_tx_opcodes: HashSet<u16>,
    pub refuse_set_event_mode: bool,
    pub data_chunk: usize,
}

impl Default for MockCameraBehavior {
    fn default() -> Self {
        Self {
            name: "MockCam".into(),
            connection_number: 7,
            objects: HashMap::new(),
            canon_event_blobs: VecDeque::new(),
            nikon_event_payloads: VecDeque::new(),
            push_events: Vec::new(),
            in_memory_infos: VecDeque::new(),
            prop_desc_currents: VecDeque::new(),
            wrong_tx_opcodes: HashSet::new(),
            refuse_set_event_mode: false,
            data_chunk: 64 * 1024,
        }
    }
}

pub(crate) struct MockCamera {
    pub addr: String,
    pub get_object_calls: Arc<AtomicUsize>,
}

impl MockCamera {
    pub(crate) async fn spawn(behavior: MockCameraBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::run(listener, behavior)
    }

    /// Bind a specific address (for scan-retry scenarios that pick the
    /// port before the camera exists).
    pub(crate) async fn spawn_on(addr: &str, behavior: MockCameraBehavior) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::run(listener, behavior))
    }

    fn run(listener: TcpListener, behavior: MockCameraBehavior) -> Self {
        let addr = listener.local_addr().unwrap().to_string();
        let get_object_calls = Arc::new(AtomicUsize::new(0));
        let counter = get_object_calls.clone();
        tokio::spawn(async move {
            if let Err(e) = serve(listener, behavior, counter).await {
                eprintln!("mock camera stopped: {e}");
            }
        });
        Self {
            addr,
            get_object_calls,
        }
    }
}

async fn serve(
    listener: TcpListener,
    behavior: MockCameraBehavior,
    get_object_calls: Arc<AtomicUsize>,
) -> std::io::Result<()> {
    // command channel first
    let (mut cmd, _) = listener.accept().await?;
    match read_frame(&mut cmd).await? {
        Some(Packet::InitCommandRequest(_)) => {
            write_packet(
                &mut cmd,
                &Packet::InitCommandAck(InitCommandAck {
                    connection_number: behavior.connection_number,
                    server_guid: [0x5A; 16],
                    server_name: behavior.name.clone(),
                }),
            )
            .await?;
        }
        other => panic!("expected InitCommandRequest, got {other:?}"),
    }

    // then the event channel
    let (mut evt, _) = listener.accept().await?;
    match read_frame(&mut evt).await? {
        Some(Packet::InitEventRequest(req)) => {
            assert_eq!(req.connection_number, behavior.connection_number);
            write_packet(&mut evt, &Packet::InitEventAck).await?;
        }
        other => panic!("expected InitEventRequest, got {other:?}"),
    }

    // pusher: scheduled events, then hold the socket open
    let push_events = behavior.push_events.clone();
    let (_evt_read, mut evt_write) = evt.into_split();
    tokio::spawn(async move {
        for (delay_ms, code, handle) in push_events {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            let frame = Packet::Event(EventPacket {
                event_code: code,
                transaction_id: 0,
                params: vec![handle],
            })
            .encode();
            if evt_write.write_all(&frame).await.is_err() {
                return;
            }
        }
        // keep the write half alive so the host's monitor sees a quiet
        // line, not a close
        std::future::pending::<()>().await;
    });

    let mut state = behavior;
    while let Some(packet) = read_frame(&mut cmd).await? {
        if let Packet::OperationRequest(request) = packet {
            handle_operation(&mut cmd, &mut state, &get_object_calls, request).await?;
        }
    }
    Ok(())
}

async fn handle_operation(
    cmd: &mut TcpStream,
    state: &mut MockCameraBehavior,
    get_object_calls: &AtomicUsize,
    request: crate::protocol::messages::OperationRequest,
) -> std::io::Result<()> {
    let opcode = request.op_code;
    let tx = if state.wrong_tx_opcodes.contains(&opcode) {
        request.transaction_id.wrapping_add(1)
    } else {
        request.transaction_id
    };

    match opcode {
        op::OPEN_SESSION | op::CLOSE_SESSION => respond_ok(cmd, tx).await,
        op::GET_DEVICE_INFO => {
            send_data_phase(cmd, tx, &[0u8; 16], state.data_chunk).await?;
            respond_ok(cmd, tx).await
        }
        op::CANON_SET_EVENT_MODE => {
            if state.refuse_set_event_mode {
                respond_code(cmd, tx, rsp::OPERATION_NOT_SUPPORTED).await
            } else {
                respond_ok(cmd, tx).await
            }
        }
        op::CANON_GET_EVENT => {
            let blob = state
                .canon_event_blobs
                .pop_front()
                .unwrap_or_else(canon_terminator_blob);
            send_data_phase(cmd, tx, &blob, state.data_chunk).await?;
            respond_ok(cmd, tx).await
        }
        op::NIKON_GET_EVENT => {
            let payload = state
                .nikon_event_payloads
                .pop_front()
                .unwrap_or_else(|| vec![0, 0]);
            send_data_phase(cmd, tx, &payload, state.data_chunk).await?;
            respond_ok(cmd, tx).await
        }
        op::GET_OBJECT_INFO => {
            let handle = request.params.first().copied().unwrap_or(0);
            let info = if handle == SONY_IN_MEMORY_HANDLE && !state.in_memory_infos.is_empty() {
                Some(pop_repeating(&mut state.in_memory_infos))
            } else {
                state.objects.get(&handle).map(|o| o.info.clone())
            };
            match info {
                Some(info) => {
                    if state.wrong_tx_opcodes.contains(&opcode) {
                        // mismatch scenario: bare response, no data phase
                        respond_ok(cmd, tx).await
                    } else {
                        send_data_phase(cmd, tx, &info.to_bytes().unwrap(), state.data_chunk)
                            .await?;
                        respond_ok(cmd, tx).await
                    }
                }
                None => respond_code(cmd, tx, rsp::INVALID_OBJECT_HANDLE).await,
            }
        }
        op::GET_OBJECT => {
            get_object_calls.fetch_add(1, Ordering::SeqCst);
            let handle = request.params.first().copied().unwrap_or(0);
            match state.objects.get(&handle) {
                Some(object) => {
                    let data = object.data.clone();
                    send_data_phase(cmd, tx, &data, state.data_chunk).await?;
                    respond_ok(cmd, tx).await
                }
                None => respond_code(cmd, tx, rsp::INVALID_OBJECT_HANDLE).await,
            }
        }
        op::GET_PARTIAL_OBJECT => {
            let handle = request.params.first().copied().unwrap_or(0);
            let max = request.params.get(2).copied().unwrap_or(0) as usize;
            let data = if handle == SONY_IN_MEMORY_HANDLE {
                vec![0xABu8; max]
            } else {
                match state.objects.get(&handle) {
                    Some(object) => object.data.iter().copied().take(max).collect(),
                    None => return respond_code(cmd, tx, rsp::INVALID_OBJECT_HANDLE).await,
                }
            };
            send_data_phase(cmd, tx, &data, state.data_chunk).await?;
            respond_ok(cmd, tx).await
        }
        op::GET_DEVICE_PROP_DESC => {
            let current = if state.prop_desc_currents.is_empty() {
                0
            } else {
                pop_repeating(&mut state.prop_desc_currents)
            };
            let prop = request.params.first().copied().unwrap_or(0) as u16;
            send_data_phase(cmd, tx, &prop_desc_u16(prop, current), state.data_chunk).await?;
            respond_ok(cmd, tx).await
        }
        _ => respond_code(cmd, tx, rsp::OPERATION_NOT_SUPPORTED).await,
    }
}

/// Pop the front, but keep the last element forever.
fn pop_repeating<T: Clone>(queue: &mut VecDeque<T>) -> T {
    if queue.len() > 1 {
        queue.pop_front().unwrap()
    } else {
        queue.front().cloned().unwrap()
    }
}

async fn respond_ok(cmd: &mut TcpStream, tx: u32) -> std::io::Result<()> {
    respond_code(cmd, tx, rsp::OK).await
}

async fn respond_code(cmd: &mut TcpStream, tx: u32, code: u16) -> std::io::Result<()> {
    write_packet(
        cmd,
        &Packet::OperationResponse(OperationResponse {
            response_code: code,
            transaction_id: tx,
            params: vec![],
        }),
    )
    .await
}

/// Start / Data* / End, per the wire discipline: small payloads ride in
/// the EndDataPacket alone, larger ones in full chunks with an empty End.
async fn send_data_phase(
    cmd: &mut TcpStream,
    tx: u32,
    data: &[u8],
    chunk: usize,
) -> std::io::Result<()> {
    write_packet(
        cmd,
        &Packet::StartData(crate::protocol::messages::StartDataPacket {
            transaction_id: tx,
            total_length: data.len() as u64,
        }),
    )
    .await?;

    if data.len() <= chunk {
        write_packet(
            cmd,
            &Packet::EndData(crate::protocol::messages::EndDataPacket {
                transaction_id: tx,
                payload: data.to_vec(),
            }),
        )
        .await
    } else {
        for piece in data.chunks(chunk) {
            write_packet(
                cmd,
                &Packet::Data(crate::protocol::messages::DataPacket {
                    transaction_id: tx,
                    payload: piece.to_vec(),
                }),
            )
            .await?;
        }
        write_packet(
            cmd,
            &Packet::EndData(crate::protocol::messages::EndDataPacket {
                transaction_id: tx,
                payload: vec![],
            }),
        )
        .await
    }
}

async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Option<Packet>> {
    let mut header = [0u8; PacketHeader::SIZE];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let (parsed, _) = PacketHeader::from_bytes(&header).expect("mock: bad header");
    let mut payload = vec![0u8; parsed.payload_len()];
    stream.read_exact(&mut payload).await?;
    Ok(Some(
        Packet::decode_payload(parsed.packet_type, &payload).expect("mock: bad packet"),
    ))
}

async fn write_packet(stream: &mut TcpStream, packet: &Packet) -> std::io::Result<()> {
    stream.write_all(&packet.encode()).await
}

// -- builders shared by scenario tests --

pub(crate) fn jpeg_info(filename: &str, size: u32) -> ObjectInfo {
    ObjectInfo {
        object_format: format::EXIF_JPEG,
        object_compressed_size: size,
        filename: filename.into(),
        capture_date: "20260131T120000".into(),
        ..ObjectInfo::default()
    }
}

pub(crate) fn raw_info(filename: &str, object_format: u16, size: u32) -> ObjectInfo {
    ObjectInfo {
        object_format,
        object_compressed_size: size,
        filename: filename.into(),
        ..ObjectInfo::default()
    }
}

pub(crate) fn canon_event_blob(records: &[(u32, u32)]) -> Vec<u8> {
    // records of (type, handle), each 16 bytes, plus terminator
    let mut blob = Vec::new();
    for (record_type, handle) in records {
        blob.extend_from_slice(&16u32.to_le_bytes());
        blob.extend_from_slice(&record_type.to_le_bytes());
        blob.extend_from_slice(&handle.to_le_bytes());
        blob.extend_from_slice(&[0u8; 4]);
    }
    blob.extend(canon_terminator_blob());
    blob
}

pub(crate) fn canon_terminator_blob() -> Vec<u8> {
    let mut blob = Vec::new();
    blob.extend_from_slice(&8u32.to_le_bytes());
    blob.extend_from_slice(&0u32.to_le_bytes());
    blob
}

pub(crate) fn nikon_event_payload(records: &[(u16, u32)]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(records.len() as u16).to_le_bytes());
    for (code, param) in records {
        payload.extend_from_slice(&code.to_le_bytes());
        payload.extend_from_slice(&param.to_le_bytes());
    }
    payload
}

pub(crate) fn prop_desc_u16(code: u16, current: u16) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&code.to_le_bytes());
    out.extend_from_slice(&0x0004u16.to_le_bytes()); // UINT16
    out.push(0);
    out.extend_from_slice(&0u16.to_le_bytes()); // factory default
    out.extend_from_slice(&current.to_le_bytes());
    out.push(0); // no form
    out
}

/// Await the next delegate event, with a hard cap so a hung test fails
/// instead of wedging the suite.
pub(crate) async fn next_event(
    rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    wait: Duration,
) -> Option<SessionEvent> {
    tokio::time::timeout(wait, rx.recv()).await.ok().flatten()
}

pub(crate) async fn expect_did_connect(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) {
    match next_event(rx, Duration::from_secs(5)).await {
        Some(SessionEvent::DidConnect { .. }) => {}
        other => panic!("expected DidConnect, got {other:?}"),
    }
}

/// Session tuning scaled down for tests.
pub(crate) fn fast_session_config() -> crate::config::SessionConfig {
    crate::config::SessionConfig {
        event_recv_timeout_s: 1,
        command_timeout_s: 5,
        control_timeout_s: 2,
        poll_interval_min_ms: 10,
        poll_interval_max_ms: 40,
        poll_interval_step_ms: 10,
        sony_in_memory_max_wait_s: 2,
        sony_gate_poll_interval_ms: 20,
        sony_signature_polls: 4,
        sony_signature_poll_interval_ms: 20,
        transaction_reserve_block: 32,
    }
}

pub(crate) fn test_identity() -> crate::identity::ClientIdentity {
    crate::identity::ClientIdentity {
        guid: [0x11; 16],
        hostname: "testhost".into(),
    }
}

/// Spawn the mock, dial both channels, and run a full connect.
pub(crate) async fn connect_session(
    behavior: MockCameraBehavior,
) -> (
    crate::camera_session::CameraSession,
    mpsc::UnboundedReceiver<SessionEvent>,
    MockCamera,
    tempfile::TempDir,
    Arc<crate::spool::CaptureSpool>,
) {
    let mock = MockCamera::spawn(behavior).await;
    let caches = tempfile::tempdir().unwrap();
    let spool = Arc::new(crate::spool::CaptureSpool::new(caches.path()));
    let (mut session, events) =
        crate::camera_session::CameraSession::new(fast_session_config(), spool.clone());

    let (_handle, cancel_rx) = crate::net::CancelHandle::new();
    let timeout = Duration::from_secs(2);
    let cmd = crate::net::PtpChannel::connect(&mock.addr, timeout, cancel_rx.clone())
        .await
        .unwrap();
    let evt = crate::net::PtpChannel::connect(&mock.addr, timeout, cancel_rx)
        .await
        .unwrap();

    session.connect(cmd, evt, &test_identity()).await.unwrap();
    (session, events, mock, caches, spool)
}
