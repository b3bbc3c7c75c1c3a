use log::{debug, warn};

use super::*;
use crate::pdu::{exception_pdu, execute};

pub const MBAP_HEADER_LEN: usize = 7;

/// Unit id plus function code.
const MIN_MBAP_LENGTH: u16 = 2;
/// Unit id plus the 253-byte PDU limit.
const MAX_MBAP_LENGTH: u16 = 254;
/// Longest complete frame: the six header bytes before the length field
/// plus the largest length.
pub const MAX_ADU_LEN: usize = 6 + MAX_MBAP_LENGTH as usize;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn parse(frame: &[u8]) -> Option<Self> {
        if frame.len() < MBAP_HEADER_LEN {
            return None;
        }
        Some(MbapHeader {
            transaction_id: ((frame[0] as u16) << 8) | (frame[1] as u16),
            protocol_id: ((frame[2] as u16) << 8) | (frame[3] as u16),
            length: ((frame[4] as u16) << 8) | (frame[5] as u16),
            unit_id: frame[6],
        })
    }

    /// Builds a complete frame carrying `pdu` under this header's ids.
    pub fn wrap(&self, pdu: &[u8]) -> Vec<u8> {
        let length = (pdu.len() + 1) as u16;
        let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());

        frame.push((self.transaction_id >> 8) as u8);
        frame.push(self.transaction_id as u8);
        frame.push((self.protocol_id >> 8) as u8);
        frame.push(self.protocol_id as u8);
        frame.push((length >> 8) as u8);
        frame.push(length as u8);
        frame.push(self.unit_id);
        frame.extend_from_slice(pdu);

        frame
    }
}

/// Removes the first complete frame from `buf`.
///
/// `Ok(None)` means more bytes are needed. A length field that no valid frame
/// can carry is an error; the stream can't be resynchronised after it.
pub fn take_frame(buf: &mut Vec<u8>) -> Result<Option<Vec<u8>>, ModbusTransportError> {
    let Some(header) = MbapHeader::parse(buf) else {
        return Ok(None);
    };
    if header.length < MIN_MBAP_LENGTH || header.length > MAX_MBAP_LENGTH {
        return Err(ModbusTransportError::InvalidLength(header.length));
    }

    let frame_len = 6 + header.length as usize;
    if buf.len() < frame_len {
        return Ok(None);
    }
    Ok(Some(buf.drain(..frame_len).collect()))
}

/// True when `take_frame` would make progress on `buf` without more bytes.
pub fn frame_ready(buf: &[u8]) -> bool {
    match MbapHeader::parse(buf) {
        Some(header) if header.length < MIN_MBAP_LENGTH || header.length > MAX_MBAP_LENGTH => true,
        Some(header) => buf.len() >= 6 + header.length as usize,
        None => false,
    }
}

/// What happened to the receive buffer during one `ProtocolEngine::poll`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame was consumed and a reply written.
    Replied,
    /// A frame was consumed without reply.
    Dropped,
    /// A frame was consumed but its reply could not be written. The
    /// connection should be treated as dead.
    ReplyFailed,
    /// The buffer held garbage and was cleared.
    Flushed,
    /// No complete frame is buffered.
    Incomplete,
}

impl FrameStatus {
    pub fn consumed_frame(&self) -> bool {
        matches!(self, FrameStatus::Replied | FrameStatus::Dropped | FrameStatus::ReplyFailed)
    }
}

/// Modbus TCP request handler. Holds only the unit id settings; the
/// connection and the register store are passed in on every call.
#[derive(Copy, Clone, Debug)]
pub struct ProtocolEngine {
    unit_id: u8,
    unit_mismatch: UnitMismatchPolicy,
}

impl ProtocolEngine {
    pub fn new(unit_id: u8, unit_mismatch: UnitMismatchPolicy) -> Self {
        ProtocolEngine { unit_id, unit_mismatch }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.unit_id, config.unit_mismatch)
    }

    pub fn accepts_unit(&self, unit_id: u8) -> bool {
        self.unit_id == WILDCARD_UNIT_ID || unit_id == self.unit_id
    }

    /// Handles one complete request frame and returns the reply frame, or
    /// `None` when the request must go unanswered.
    pub fn handle_frame(&self, frame: &[u8], store: &mut RegisterStore) -> Option<Vec<u8>> {
        let header = MbapHeader::parse(frame)?;
        if header.protocol_id != 0 {
            warn!("Dropping frame with protocol ID {}", header.protocol_id);
            return None;
        }

        let pdu = &frame[MBAP_HEADER_LEN..];
        let function_code = pdu.first().copied().unwrap_or(0);

        if !self.accepts_unit(header.unit_id) {
            return match self.unit_mismatch {
                UnitMismatchPolicy::Drop => {
                    debug!("Dropping frame for unit {}", header.unit_id);
                    None
                }
                UnitMismatchPolicy::Exception => Some(header.wrap(&exception_pdu(
                    function_code,
                    ExceptionCode::GatewayTargetFailedToRespond,
                ))),
            };
        }

        let response = match execute(store, pdu) {
            Ok(response) => response,
            Err(code) => {
                debug!("Function {:#04x} failed with {:?}", function_code, code);
                exception_pdu(function_code, code)
            }
        };
        Some(header.wrap(&response))
    }

    /// Consumes at most one frame from `rx` and writes its reply to `conn`.
    ///
    /// A frame taken from `rx` has already been applied to `store`, so a
    /// failed reply write is still a consumed frame (`ReplyFailed`).
    pub fn poll<C: Connection>(
        &self,
        conn: &mut C,
        rx: &mut Vec<u8>,
        store: &mut RegisterStore,
    ) -> FrameStatus {
        let frame = match take_frame(rx) {
            Ok(Some(frame)) => frame,
            Ok(None) => return FrameStatus::Incomplete,
            Err(e) => {
                warn!("{} from {}, flushing {} bytes", e, conn.peer(), rx.len());
                rx.clear();
                return FrameStatus::Flushed;
            }
        };

        match self.handle_frame(&frame, store) {
            Some(reply) => match conn.write_all(&reply) {
                Ok(()) => FrameStatus::Replied,
                Err(e) => {
                    warn!("Reply to {} failed: {}", conn.peer(), e);
                    FrameStatus::ReplyFailed
                }
            },
            None => FrameStatus::Dropped,
        }
    }
}
