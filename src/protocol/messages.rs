//! Typed packets for the fourteen PTP/IP frame types.

use bytes::{BufMut, BytesMut};

use crate::error::{CoreError, Result};
use crate::protocol::binary::{
    get_u16, get_u32, get_u64, get_utf16z, put_utf16z, PacketHeader,
};
use crate::protocol::packet_type;

/// Protocol version advertised in InitCommandRequest (1.0).
pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 0;

/// Opens the command channel: our identity, host name, protocol version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitCommandRequest {
    pub client_guid: [u8; 16],
    pub hostname: String,
}

/// Camera's answer on the command channel. The connection number binds the
/// event channel to this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitCommandAck {
    pub connection_number: u32,
    pub server_guid: [u8; 16],
    pub server_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitEventRequest {
    pub connection_number: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitFail {
    pub reason: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRequest {
    /// 1 = no data or data-in, 2 = data-out.
    pub data_phase: u32,
    pub op_code: u16,
    pub transaction_id: u32,
    /// Up to 5 parameters.
    pub params: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResponse {
    pub response_code: u16,
    pub transaction_id: u32,
    pub params: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPacket {
    pub event_code: u16,
    pub transaction_id: u32,
    /// Up to 3 parameters; parameter 0 is the object handle for the codes
    /// this core acts on.
    pub params: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartDataPacket {
    pub transaction_id: u32,
    /// Announced total payload length across the data phase.
    pub total_length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub transaction_id: u32,
    pub payload: Vec<u8>,
}

/// Closes a data phase; may carry the final payload chunk (for objects
/// smaller than one data packet it carries the whole object).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndDataPacket {
    pub transaction_id: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelTransaction {
    pub transaction_id: u32,
}

/// Any PTP/IP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    InitCommandRequest(InitCommandRequest),
    InitCommandAck(InitCommandAck),
    InitEventRequest(InitEventRequest),
    InitEventAck,
    InitFail(InitFail),
    OperationRequest(OperationRequest),
    OperationResponse(OperationResponse),
    Event(EventPacket),
    StartData(StartDataPacket),
    Data(DataPacket),
    CancelTransaction(CancelTransaction),
    EndData(EndDataPacket),
    Ping,
    Pong,
}

impl Packet {
    pub fn packet_type(&self) -> u32 {
        match self {
            Packet::InitCommandRequest(_) => packet_type::INIT_COMMAND_REQUEST,
            Packet::InitCommandAck(_) => packet_type::INIT_COMMAND_ACK,
            Packet::InitEventRequest(_) => packet_type::INIT_EVENT_REQUEST,
            Packet::InitEventAck => packet_type::INIT_EVENT_ACK,
            Packet::InitFail(_) => packet_type::INIT_FAIL,
            Packet::OperationRequest(_) => packet_type::OPERATION_REQUEST,
            Packet::OperationResponse(_) => packet_type::OPERATION_RESPONSE,
            Packet::Event(_) => packet_type::EVENT,
            Packet::StartData(_) => packet_type::START_DATA,
            Packet::Data(_) => packet_type::DATA,
            Packet::CancelTransaction(_) => packet_type::CANCEL_TRANSACTION,
            Packet::EndData(_) => packet_type::END_DATA,
            Packet::Ping => packet_type::PING,
            Packet::Pong => packet_type::PONG,
        }
    }

    /// Serialize to a complete frame, header included.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = BytesMut::new();
        match self {
            Packet::InitCommandRequest(p) => {
                payload.put_slice(&p.client_guid);
                put_utf16z(&mut payload, &p.hostname);
                payload.put_u16_le(VERSION_MINOR);
                payload.put_u16_le(VERSION_MAJOR);
            }
            Packet::InitCommandAck(p) => {
                payload.put_u32_le(p.connection_number);
                payload.put_slice(&p.server_guid);
                put_utf16z(&mut payload, &p.server_name);
                payload.put_u16_le(VERSION_MINOR);
                payload.put_u16_le(VERSION_MAJOR);
            }
            Packet::InitEventRequest(p) => payload.put_u32_le(p.connection_number),
            Packet::InitEventAck => {}
            Packet::InitFail(p) => payload.put_u32_le(p.reason),
            Packet::OperationRequest(p) => {
                payload.put_u32_le(p.data_phase);
                payload.put_u16_le(p.op_code);
                payload.put_u32_le(p.transaction_id);
                for param in &p.params {
                    payload.put_u32_le(*param);
                }
            }
            Packet::OperationResponse(p) => {
                payload.put_u16_le(p.response_code);
                payload.put_u32_le(p.transaction_id);
                for param in &p.params {
                    payload.put_u32_le(*param);
                }
            }
            Packet::Event(p) => {
                payload.put_u16_le(p.event_code);
                payload.put_u32_le(p.transaction_id);
                for param in &p.params {
                    payload.put_u32_le(*param);
                }
            }
            Packet::StartData(p) => {
                payload.put_u32_le(p.transaction_id);
                payload.put_u64_le(p.total_length);
            }
            Packet::Data(p) => {
                payload.put_u32_le(p.transaction_id);
                payload.put_slice(&p.payload);
            }
            Packet::CancelTransaction(p) => payload.put_u32_le(p.transaction_id),
            Packet::EndData(p) => {
                payload.put_u32_le(p.transaction_id);
                payload.put_slice(&p.payload);
            }
            Packet::Ping | Packet::Pong => {}
        }

        let header = PacketHeader::for_payload(self.packet_type(), payload.len());
        let mut frame = Vec::with_capacity(PacketHeader::SIZE + payload.len());
        frame.extend_from_slice(&header.to_bytes());
        frame.extend_from_slice(&payload);
        frame
    }

    /// Decode a frame payload for a known packet type tag.
    pub fn decode_payload(tag: u32, payload: &[u8]) -> Result<Packet> {
        let mut buf = payload;
        let packet = match tag {
            packet_type::INIT_COMMAND_REQUEST => {
                let guid = take_guid(&mut buf)?;
                let hostname = get_utf16z(&mut buf)?;
                // version trailer ignored
                Packet::InitCommandRequest(InitCommandRequest {
                    client_guid: guid,
                    hostname,
                })
            }
            packet_type::INIT_COMMAND_ACK => {
                let connection_number = get_u32(&mut buf, "init ack connection number")?;
                let server_guid = take_guid(&mut buf)?;
                let server_name = get_utf16z(&mut buf)?;
                // version and any vendor trailer tolerated
                Packet::InitCommandAck(InitCommandAck {
                    connection_number,
                    server_guid,
                    server_name,
                })
            }
            packet_type::INIT_EVENT_REQUEST => Packet::InitEventRequest(InitEventRequest {
                connection_number: get_u32(&mut buf, "init event connection number")?,
            }),
            packet_type::INIT_EVENT_ACK => Packet::InitEventAck,
            packet_type::INIT_FAIL => Packet::InitFail(InitFail {
                reason: get_u32(&mut buf, "init fail reason")?,
            }),
            packet_type::OPERATION_REQUEST => {
                let data_phase = get_u32(&mut buf, "request data phase")?;
                let op_code = get_u16(&mut buf, "request op code")?;
                let transaction_id = get_u32(&mut buf, "request transaction id")?;
                Packet::OperationRequest(OperationRequest {
                    data_phase,
                    op_code,
                    transaction_id,
                    params: take_params(&mut buf, 5),
                })
            }
            packet_type::OPERATION_RESPONSE => {
                let response_code = get_u16(&mut buf, "response code")?;
                let transaction_id = get_u32(&mut buf, "response transaction id")?;
                Packet::OperationResponse(OperationResponse {
                    response_code,
                    transaction_id,
                    params: take_params(&mut buf, 5),
                })
            }
            packet_type::EVENT => {
                let event_code = get_u16(&mut buf, "event code")?;
                let transaction_id = get_u32(&mut buf, "event transaction id")?;
                Packet::Event(EventPacket {
                    event_code,
                    transaction_id,
                    params: take_params(&mut buf, 3),
                })
            }
            packet_type::START_DATA => Packet::StartData(StartDataPacket {
                transaction_id: get_u32(&mut buf, "start data transaction id")?,
                total_length: get_u64(&mut buf, "start data total length")?,
            }),
            packet_type::DATA => Packet::Data(DataPacket {
                transaction_id: get_u32(&mut buf, "data transaction id")?,
                payload: buf.to_vec(),
            }),
            packet_type::CANCEL_TRANSACTION => Packet::CancelTransaction(CancelTransaction {
                transaction_id: get_u32(&mut buf, "cancel transaction id")?,
            }),
            packet_type::END_DATA => Packet::EndData(EndDataPacket {
                transaction_id: get_u32(&mut buf, "end data transaction id")?,
                payload: buf.to_vec(),
            }),
            packet_type::PING => Packet::Ping,
            packet_type::PONG => Packet::Pong,
            other => return Err(CoreError::UnknownPacketType(other)),
        };
        Ok(packet)
    }

    /// Decode a complete frame (header + payload).
    pub fn decode(frame: &[u8]) -> Result<Packet> {
        let (tag, payload) = crate::protocol::binary::split_frame(frame)?;
        Packet::decode_payload(tag, payload)
    }
}

fn take_guid(buf: &mut &[u8]) -> Result<[u8; 16]> {
    if buf.len() < 16 {
        return Err(CoreError::Malformed("guid"));
    }
    let mut guid = [0u8; 16];
    guid.copy_from_slice(&buf[..16]);
    *buf = &buf[16..];
    Ok(guid)
}

fn take_params(buf: &mut &[u8], max: usize) -> Vec<u32> {
    let mut params = Vec::new();
    while buf.len() >= 4 && params.len() < max {
        let mut word = [0u8; 4];
        word.copy_from_slice(&buf[..4]);
        *buf = &buf[4..];
        params.push(u32::from_le_bytes(word));
    }
    params
}

impl OperationRequest {
    pub fn new(op_code: u16, transaction_id: u32, params: &[u32]) -> Self {
        Self {
            data_phase: crate::protocol::DATA_PHASE_NONE_OR_IN,
            op_code,
            transaction_id,
            params: params.to_vec(),
        }
    }
}

impl OperationResponse {
    pub fn ok(&self) -> bool {
        self.response_code == crate::protocol::rsp::OK
    }
}

impl EventPacket {
    /// Parameter 0, the object handle for ObjectAdded-style events.
    pub fn object_handle(&self) -> Option<u32> {
        self.params.first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::op;

    fn round_trip(packet: Packet) {
        let frame = packet.encode();
        assert_eq!(Packet::decode(&frame).unwrap(), packet);
    }

    #[test]
    fn round_trip_all_types() {
        round_trip(Packet::InitCommandRequest(InitCommandRequest {
            client_guid: [7u8; 16],
            hostname: "sabaipics".into(),
        }));
        round_trip(Packet::InitCommandAck(InitCommandAck {
            connection_number: 3,
            server_guid: [9u8; 16],
            server_name: "Canon EOS R5".into(),
        }));
        round_trip(Packet::InitEventRequest(InitEventRequest { connection_number: 3 }));
        round_trip(Packet::InitEventAck);
        round_trip(Packet::InitFail(InitFail { reason: 0x0000_0001 }));
        round_trip(Packet::OperationRequest(OperationRequest::new(
            op::GET_OBJECT_INFO,
            7,
            &[0x0001_0001],
        )));
        round_trip(Packet::OperationResponse(OperationResponse {
            response_code: 0x2001,
            transaction_id: 7,
            params: vec![],
        }));
        round_trip(Packet::Event(EventPacket {
            event_code: 0x4002,
            transaction_id: 0,
            params: vec![0x55],
        }));
        round_trip(Packet::StartData(StartDataPacket {
            transaction_id: 8,
            total_length: 1_048_576,
        }));
        round_trip(Packet::Data(DataPacket {
            transaction_id: 8,
            payload: vec![0xFF, 0xD8, 0xFF],
        }));
        round_trip(Packet::CancelTransaction(CancelTransaction { transaction_id: 8 }));
        round_trip(Packet::EndData(EndDataPacket {
            transaction_id: 8,
            payload: vec![0xD9],
        }));
        round_trip(Packet::Ping);
        round_trip(Packet::Pong);
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let header = PacketHeader::for_payload(0x0F, 0);
        let frame = header.to_bytes();
        assert!(matches!(
            Packet::decode(&frame),
            Err(CoreError::UnknownPacketType(0x0F))
        ));
    }

    #[test]
    fn init_command_request_wire_layout() {
        let frame = Packet::InitCommandRequest(InitCommandRequest {
            client_guid: [0xAB; 16],
            hostname: "hi".into(),
        })
        .encode();

        // header
        assert_eq!(&frame[..4], &(8u32 + 16 + 6 + 4).to_le_bytes());
        assert_eq!(&frame[4..8], &1u32.to_le_bytes());
        // guid
        assert_eq!(&frame[8..24], &[0xAB; 16]);
        // "hi" UTF-16LE + NUL
        assert_eq!(&frame[24..30], &[b'h', 0, b'i', 0, 0, 0]);
        // version 1.0, minor first
        assert_eq!(&frame[30..34], &[0, 0, 1, 0]);
    }

    #[test]
    fn init_command_ack_tolerates_trailing_bytes() {
        let mut frame = Packet::InitCommandAck(InitCommandAck {
            connection_number: 42,
            server_guid: [1u8; 16],
            server_name: "NIKON Z 6".into(),
        })
        .encode();
        // vendor trailer after the version words
        frame.extend_from_slice(&[0xDE, 0xAD]);
        let len = frame.len() as u32;
        frame[0..4].copy_from_slice(&len.to_le_bytes());

        match Packet::decode(&frame).unwrap() {
            Packet::InitCommandAck(ack) => {
                assert_eq!(ack.connection_number, 42);
                assert_eq!(ack.server_name, "NIKON Z 6");
            }
            other => panic!("unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn camera_name_sits_at_offset_20() {
        let frame = Packet::InitCommandAck(InitCommandAck {
            connection_number: 1,
            server_guid: [0u8; 16],
            server_name: "A".into(),
        })
        .encode();
        // 8 header + 4 connection number + 16 guid = offset 28 in the frame,
        // offset 20 in the payload
        assert_eq!(&frame[28..32], &[b'A', 0, 0, 0]);
    }

    #[test]
    fn short_operation_response_fails() {
        let header = PacketHeader::for_payload(packet_type::OPERATION_RESPONSE, 2);
        let mut frame = header.to_bytes().to_vec();
        frame.extend_from_slice(&[0x01, 0x20]); // code only, no transaction id
        assert!(matches!(
            Packet::decode(&frame),
            Err(CoreError::Malformed(_))
        ));
    }

    #[test]
    fn end_data_may_carry_payload() {
        let packet = Packet::EndData(EndDataPacket {
            transaction_id: 5,
            payload: vec![0u8; 500],
        });
        let frame = packet.encode();
        assert_eq!(frame.len(), 8 + 4 + 500);
        round_trip(packet);
    }
}
