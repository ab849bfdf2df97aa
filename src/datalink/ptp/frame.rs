//! PTP frame codec (ASHRAE 135 Clause 10.3).
//!
//! ```text
//! +------+------+------+--------+--------+------+------------+--------+--------+
//! | 0x55 | 0xFF | type | len_hi | len_lo | hcrc | data (len) | dcrc_lo| dcrc_hi|
//! +------+------+------+--------+--------+------+------------+--------+--------+
//! ```
//!
//! On the wire every octet equal to DLE, XON or XOFF is replaced by DLE
//! followed by the octet with bit 7 set. CRCs are computed over the unstuffed
//! octets. Unescaped XON/XOFF octets seen by the decoder are out-of-band flow
//! control from the line driver and are dropped.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::trace;

use crate::datalink::crc;
use crate::datalink::FrameError;

pub const PREAMBLE_55: u8 = 0x55;
pub const PREAMBLE_FF: u8 = 0xFF;
pub const HEADER_SIZE: usize = 6;
pub const DATA_CRC_SIZE: usize = 2;

pub const DLE: u8 = 0x10;
pub const XON: u8 = 0x11;
pub const XOFF: u8 = 0x13;

/// Sent by a calling device to wake the answering half-router.
pub const TRIGGER_SEQUENCE: &[u8] = b"BACnet\r";

/// PTP frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PtpFrameType {
    HeartbeatXoff,
    HeartbeatXon,
    Data0,
    Data1,
    DataAck0Xoff,
    DataAck1Xoff,
    DataAck0Xon,
    DataAck1Xon,
    DataNak0Xoff,
    DataNak1Xoff,
    DataNak0Xon,
    DataNak1Xon,
    ConnectRequest,
    ConnectResponse,
    DisconnectRequest,
    DisconnectResponse,
    TestRequest,
    TestResponse,
    Unknown(u8),
}

impl PtpFrameType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::HeartbeatXoff,
            0x01 => Self::HeartbeatXon,
            0x02 => Self::Data0,
            0x03 => Self::Data1,
            0x04 => Self::DataAck0Xoff,
            0x05 => Self::DataAck1Xoff,
            0x06 => Self::DataAck0Xon,
            0x07 => Self::DataAck1Xon,
            0x08 => Self::DataNak0Xoff,
            0x09 => Self::DataNak1Xoff,
            0x0a => Self::DataNak0Xon,
            0x0b => Self::DataNak1Xon,
            0x0c => Self::ConnectRequest,
            0x0d => Self::ConnectResponse,
            0x0e => Self::DisconnectRequest,
            0x0f => Self::DisconnectResponse,
            0x14 => Self::TestRequest,
            0x15 => Self::TestResponse,
            other => Self::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::HeartbeatXoff => 0x00,
            Self::HeartbeatXon => 0x01,
            Self::Data0 => 0x02,
            Self::Data1 => 0x03,
            Self::DataAck0Xoff => 0x04,
            Self::DataAck1Xoff => 0x05,
            Self::DataAck0Xon => 0x06,
            Self::DataAck1Xon => 0x07,
            Self::DataNak0Xoff => 0x08,
            Self::DataNak1Xoff => 0x09,
            Self::DataNak0Xon => 0x0a,
            Self::DataNak1Xon => 0x0b,
            Self::ConnectRequest => 0x0c,
            Self::ConnectResponse => 0x0d,
            Self::DisconnectRequest => 0x0e,
            Self::DisconnectResponse => 0x0f,
            Self::TestRequest => 0x14,
            Self::TestResponse => 0x15,
            Self::Unknown(v) => v,
        }
    }

    /// Data frame for sequence bit `seq`.
    pub fn data(seq: u8) -> Self {
        if seq & 1 == 0 {
            Self::Data0
        } else {
            Self::Data1
        }
    }

    /// Acknowledgement of sequence bit `seq`, receiver ready.
    pub fn ack_xon(seq: u8) -> Self {
        if seq & 1 == 0 {
            Self::DataAck0Xon
        } else {
            Self::DataAck1Xon
        }
    }

    /// Sequence bit of a data frame.
    pub fn data_seq(self) -> Option<u8> {
        match self {
            Self::Data0 => Some(0),
            Self::Data1 => Some(1),
            _ => None,
        }
    }
}

impl From<u8> for PtpFrameType {
    fn from(value: u8) -> Self {
        Self::from_u8(value)
    }
}

fn needs_escape(octet: u8) -> bool {
    matches!(octet, DLE | XON | XOFF)
}

/// Append `octets` to `buf`, escaping DLE, XON and XOFF.
pub fn stuff(octets: &[u8], buf: &mut BytesMut) {
    for &c in octets {
        if needs_escape(c) {
            buf.put_u8(DLE);
            buf.put_u8(c | 0x80);
        } else {
            buf.put_u8(c);
        }
    }
}

/// Reverse [`stuff`] on a complete octet sequence.
pub fn destuff(octets: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(octets.len());
    let mut dle = false;
    for &c in octets {
        if dle {
            out.push(c & 0x7f);
            dle = false;
        } else if c == DLE {
            dle = true;
        } else {
            out.push(c);
        }
    }
    out
}

/// A decoded or to-be-encoded PTP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtpFrame {
    pub frame_type: PtpFrameType,
    pub data: Bytes,
}

impl PtpFrame {
    pub fn new(frame_type: PtpFrameType, data: Bytes) -> Self {
        Self { frame_type, data }
    }

    pub fn control(frame_type: PtpFrameType) -> Self {
        Self::new(frame_type, Bytes::new())
    }

    /// Append the stuffed wire form of this frame to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        debug_assert!(self.data.len() <= u16::MAX as usize);
        let len = self.data.len() as u16;

        let mut header = [0u8; HEADER_SIZE - 2];
        header[0] = self.frame_type.as_u8();
        header[1..3].copy_from_slice(&len.to_be_bytes());
        header[3] = crc::header_checksum(&header[..3]);

        buf.reserve(2 * (HEADER_SIZE + self.data.len() + DATA_CRC_SIZE));
        buf.put_u8(PREAMBLE_55);
        buf.put_u8(PREAMBLE_FF);
        stuff(&header, buf);
        if len > 0 {
            stuff(&self.data, buf);
            stuff(&crc::data_checksum(&self.data), buf);
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Incremental PTP frame decoder.
///
/// Octets are destuffed as they are pushed, so a DLE split across two reads
/// is handled. Framing then works on the clear octets.
#[derive(Debug)]
pub struct PtpDecoder {
    buf: BytesMut,
    dle: bool,
    max_data: usize,
}

impl PtpDecoder {
    pub fn new(max_data: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(HEADER_SIZE + max_data + DATA_CRC_SIZE),
            dle: false,
            max_data,
        }
    }

    pub fn push(&mut self, octets: &[u8]) {
        for &c in octets {
            if self.dle {
                self.buf.put_u8(c & 0x7f);
                self.dle = false;
            } else {
                match c {
                    DLE => self.dle = true,
                    XON | XOFF => trace!("RX_DISCARD: raw flow control {:02X}", c),
                    _ => self.buf.put_u8(c),
                }
            }
        }
    }

    /// Clear octets held back waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.dle = false;
    }

    /// Pull the next frame or framing error out of the buffered octets.
    pub fn decode(&mut self) -> Option<Result<PtpFrame, FrameError>> {
        loop {
            match self.buf.iter().position(|&b| b == PREAMBLE_55) {
                Some(0) => {}
                Some(pos) => {
                    trace!("RX_DISCARD: {} octets before preamble", pos);
                    self.buf.advance(pos);
                }
                None => {
                    self.buf.clear();
                    return None;
                }
            }

            if self.buf.len() < 2 {
                return None;
            }
            if self.buf[1] != PREAMBLE_FF {
                self.buf.advance(1);
                if self.buf[0] == PREAMBLE_55 {
                    continue;
                }
                return Some(Err(FrameError::Sync));
            }

            if self.buf.len() < HEADER_SIZE {
                return None;
            }
            if !crc::header_valid(&self.buf[2..5], self.buf[5]) {
                self.buf.advance(2);
                return Some(Err(FrameError::HeaderCrc));
            }

            let len = u16::from_be_bytes([self.buf[3], self.buf[4]]) as usize;
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
            let frame_type = PtpFrameType::from_u8(raw[2]);
            if len == 0 {
                return Some(Ok(PtpFrame::control(frame_type)));
            }

            raw.advance(HEADER_SIZE);
            let checksum = [raw[len], raw[len + 1]];
            raw.truncate(len);
            if !crc::data_valid(&raw, checksum) {
                return Some(Err(FrameError::DataCrc));
            }
            return Some(Ok(PtpFrame::new(frame_type, raw.freeze())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_connect_request_bytes() {
        let bytes = PtpFrame::control(PtpFrameType::ConnectRequest).to_bytes();
        assert_eq!(bytes.as_ref(), &[0x55, 0xFF, 0x0C, 0x00, 0x00, 0x44]);
    }

    #[test]
    fn test_escaped_octets() {
        let frame = PtpFrame::new(PtpFrameType::Data0, Bytes::from_static(&[0x10, 0x11, 0x13, 0x12]));
        assert_eq!(
            frame.to_bytes().as_ref(),
            &[
                0x55, 0xFF, 0x02, 0x00, 0x04, 0x20, // header
                0x10, 0x90, 0x10, 0x91, 0x10, 0x93, 0x12, // data
                0x5C, 0x6C, // crc
            ]
        );
    }

    #[test]
    fn test_length_field_is_escaped() {
        // len = 0x0010 collides with DLE
        let frame = PtpFrame::new(PtpFrameType::Data1, Bytes::from(vec![0xAA; 0x10]));
        let bytes = frame.to_bytes();
        assert_eq!(&bytes[..6], &[0x55, 0xFF, 0x03, 0x00, 0x10, 0x90]);

        let mut decoder = PtpDecoder::new(501);
        decoder.push(&bytes);
        assert_eq!(decoder.decode(), Some(Ok(frame)));
    }

    #[test]
    fn test_decode_split_escape() {
        let frame = PtpFrame::new(PtpFrameType::Data0, Bytes::from_static(&[0x11, 0x01, 0x02]));
        let bytes = frame.to_bytes();
        let mut decoder = PtpDecoder::new(501);
        for chunk in bytes.chunks(1) {
            decoder.push(chunk);
        }
        assert_eq!(decoder.decode(), Some(Ok(frame)));
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_trigger_and_raw_flow_control_skipped() {
        let mut decoder = PtpDecoder::new(501);
        decoder.push(TRIGGER_SEQUENCE);
        decoder.push(&[XOFF]);
        decoder.push(&PtpFrame::control(PtpFrameType::HeartbeatXon).to_bytes());
        decoder.push(&[XON]);
        assert_eq!(
            decoder.decode(),
            Some(Ok(PtpFrame::control(PtpFrameType::HeartbeatXon)))
        );
        assert_eq!(decoder.decode(), None);
    }

    #[test]
    fn test_corrupt_crcs() {
        let mut bytes = PtpFrame::control(PtpFrameType::DisconnectResponse).to_bytes().to_vec();
        bytes[5] ^= 0x01;
        let mut decoder = PtpDecoder::new(501);
        decoder.push(&bytes);
        assert_eq!(decoder.decode(), Some(Err(FrameError::HeaderCrc)));
        assert_eq!(decoder.decode(), None);

        let frame = PtpFrame::new(PtpFrameType::Data0, Bytes::from_static(&[0x01, 0x02]));
        let mut bytes = frame.to_bytes().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x20;
        decoder.reset();
        decoder.push(&bytes);
        assert_eq!(decoder.decode(), Some(Err(FrameError::DataCrc)));
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_bad_second_preamble() {
        let mut decoder = PtpDecoder::new(501);
        decoder.push(&[0x55, 0x01]);
        assert_eq!(decoder.decode(), Some(Err(FrameError::Sync)));
    }

    #[test]
    fn test_unknown_type_round_trip() {
        assert_eq!(PtpFrameType::from_u8(0x20), PtpFrameType::Unknown(0x20));
        assert_eq!(PtpFrameType::Unknown(0x20).as_u8(), 0x20);
        assert_eq!(PtpFrameType::data(3), PtpFrameType::Data1);
        assert_eq!(PtpFrameType::ack_xon(0), PtpFrameType::DataAck0Xon);
        assert_eq!(PtpFrameType::Data1.data_seq(), Some(1));
    }

    proptest! {
        #[test]
        fn prop_destuff_inverts_stuff(data in proptest::collection::vec(any::<u8>(), 0..300)) {
            let mut buf = BytesMut::new();
            stuff(&data, &mut buf);
            prop_assert!(!buf.iter().any(|&b| b == XON || b == XOFF));
            prop_assert_eq!(destuff(&buf), data);
        }

        #[test]
        fn prop_frames_survive_the_line(data in proptest::collection::vec(any::<u8>(), 1..200)) {
            let frame = PtpFrame::new(PtpFrameType::Data1, Bytes::from(data));
            let mut decoder = PtpDecoder::new(501);
            decoder.push(&frame.to_bytes());
            prop_assert_eq!(decoder.decode(), Some(Ok(frame)));
        }
    }
}
