//! MS/TP frame codec (ASHRAE 135 Clause 9.3).
//!
//! ```text
//! +------+------+------+------+------+--------+--------+------+------------+--------+--------+
//! | 0x55 | 0xFF | type | dest | src  | len_hi | len_lo | hcrc | data (len) | dcrc_lo| dcrc_hi|
//! +------+------+------+------+------+--------+--------+------+------------+--------+--------+
//! ```
//!
//! The header CRC covers `type..len_lo`. Data and its CRC are present only
//! when `len > 0`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::trace;

use crate::datalink::crc;
use crate::datalink::FrameError;

pub const PREAMBLE_55: u8 = 0x55;
pub const PREAMBLE_FF: u8 = 0xFF;
pub const HEADER_SIZE: usize = 8;
pub const DATA_CRC_SIZE: usize = 2;

/// MS/TP frame types.
///
/// Types 8..=127 are reserved by ASHRAE and arrive as [`FrameType::Reserved`];
/// 128..=255 are vendor proprietary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Token,
    PollForMaster,
    ReplyToPollForMaster,
    TestRequest,
    TestResponse,
    BacnetDataExpectingReply,
    BacnetDataNotExpectingReply,
    ReplyPostponed,
    Reserved(u8),
    Proprietary(u8),
}

impl FrameType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Token,
            1 => Self::PollForMaster,
            2 => Self::ReplyToPollForMaster,
            3 => Self::TestRequest,
            4 => Self::TestResponse,
            5 => Self::BacnetDataExpectingReply,
            6 => Self::BacnetDataNotExpectingReply,
            7 => Self::ReplyPostponed,
            8..=127 => Self::Reserved(value),
            _ => Self::Proprietary(value),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Token => 0,
            Self::PollForMaster => 1,
            Self::ReplyToPollForMaster => 2,
            Self::TestRequest => 3,
            Self::TestResponse => 4,
            Self::BacnetDataExpectingReply => 5,
            Self::BacnetDataNotExpectingReply => 6,
            Self::ReplyPostponed => 7,
            Self::Reserved(v) | Self::Proprietary(v) => v,
        }
    }

    /// Frames whose payload is handed to the network layer.
    pub fn carries_pdu(self) -> bool {
        matches!(
            self,
            Self::BacnetDataExpectingReply
                | Self::BacnetDataNotExpectingReply
                | Self::TestRequest
                | Self::TestResponse
        )
    }

    /// Frame types the sender waits for an answer to.
    pub fn expects_reply(self) -> bool {
        matches!(self, Self::BacnetDataExpectingReply | Self::TestRequest)
    }

    /// Frame types allowed as an answer from ANSWER_DATA_REQUEST.
    pub fn is_reply(self) -> bool {
        matches!(
            self,
            Self::TestResponse | Self::BacnetDataNotExpectingReply | Self::Proprietary(_)
        )
    }
}

impl From<u8> for FrameType {
    fn from(value: u8) -> Self {
        Self::from_u8(value)
    }
}

/// A decoded or to-be-encoded MS/TP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub destination: u8,
    pub source: u8,
    pub data: Bytes,
}

impl Frame {
    pub fn new(frame_type: FrameType, destination: u8, source: u8, data: Bytes) -> Self {
        Self {
            frame_type,
            destination,
            source,
            data,
        }
    }

    /// A frame without data (Token, Poll-For-Master, ...).
    pub fn control(frame_type: FrameType, destination: u8, source: u8) -> Self {
        Self::new(frame_type, destination, source, Bytes::new())
    }

    /// Octets on the wire.
    pub fn encoded_len(&self) -> usize {
        if self.data.is_empty() {
            HEADER_SIZE
        } else {
            HEADER_SIZE + self.data.len() + DATA_CRC_SIZE
        }
    }

    /// Append the wire form of this frame to `buf`.
    ///
    /// The caller keeps `data` within the link MTU; the length field is 16 bits.
    pub fn encode(&self, buf: &mut BytesMut) {
        debug_assert!(self.data.len() <= u16::MAX as usize);
        let len = self.data.len() as u16;

        buf.reserve(self.encoded_len());
        buf.put_u8(PREAMBLE_55);
        buf.put_u8(PREAMBLE_FF);
        let header_start = buf.len();
        buf.put_u8(self.frame_type.as_u8());
        buf.put_u8(self.destination);
        buf.put_u8(self.source);
        buf.put_u16(len);
        let hcrc = crc::header_checksum(&buf[header_start..]);
        buf.put_u8(hcrc);

        if len > 0 {
            buf.put_slice(&self.data);
            buf.put_slice(&crc::data_checksum(&self.data));
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Incremental frame decoder.
///
/// Octets are pushed as they arrive from the line; complete frames and
/// framing errors are pulled with [`decode`](Self::decode). Octets that do not
/// start a preamble are skipped.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_data: usize,
}

impl FrameDecoder {
    pub fn new(max_data: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(HEADER_SIZE + max_data + DATA_CRC_SIZE),
            max_data,
        }
    }

    pub fn push(&mut self, octets: &[u8]) {
        self.buf.extend_from_slice(octets);
    }

    /// Octets held back waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Throw away a partially received frame.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Pull the next frame or framing error out of the buffered octets.
    ///
    /// Returns `None` when more octets are needed.
    pub fn decode(&mut self) -> Option<Result<Frame, FrameError>> {
        loop {
            // Look for preamble
            match self.buf.iter().position(|&b| b == PREAMBLE_55) {
                Some(0) => {}
                Some(pos) => {
                    trace!("RX_DISCARD: {} octets before preamble", pos);
                    self.buf.advance(pos);
                }
                None => {
                    if !self.buf.is_empty() {
                        trace!("RX_DISCARD: {} octets without preamble", self.buf.len());
                        self.buf.clear();
                    }
                    return None;
                }
            }

            if self.buf.len() < 2 {
                return None;
            }
            if self.buf[1] != PREAMBLE_FF {
                // A repeated 0x55 may still start the real preamble
                self.buf.advance(1);
                if self.buf[0] == PREAMBLE_55 {
                    continue;
                }
                return Some(Err(FrameError::Sync));
            }

            // Need at least header
            if self.buf.len() < HEADER_SIZE {
                return None;
            }

            if !crc::header_valid(&self.buf[2..7], self.buf[7]) {
                self.buf.advance(2); // Skip preamble and try again
                return Some(Err(FrameError::HeaderCrc));
            }

            let len = u16::from_be_bytes([self.buf[5], self.buf[6]]) as usize;
            if len > self.max_data {
                self.buf.advance(HEADER_SIZE);
                return Some(Err(FrameError::Oversize {
                    len,
                    max: self.max_data,
                }));
            }

            let total = if len == 0 {
                HEADER_SIZE
            } else {
                HEADER_SIZE + len + DATA_CRC_SIZE
            };
            if self.buf.len() < total {
                return None;
            }

            let mut raw = self.buf.split_to(total);
            let frame_type = FrameType::from_u8(raw[2]);
            let destination = raw[3];
            let source = raw[4];

            if len == 0 {
                return Some(Ok(Frame::control(frame_type, destination, source)));
            }

            raw.advance(HEADER_SIZE);
            let checksum = [raw[len], raw[len + 1]];
            raw.truncate(len);
            if !crc::data_valid(&raw, checksum) {
                return Some(Err(FrameError::DataCrc));
            }

            return Some(Ok(Frame::new(frame_type, destination, source, raw.freeze())));
        }
    }
}
