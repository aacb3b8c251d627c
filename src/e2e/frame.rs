//! End-to-end wire frame header.
//!
//! 32-byte big-endian header, grounded on
//! `examples/original_source/src/base/target_pass_e2e_specific.c`'s
//! `xdd_e2e_src_send` framing: magic, sequence number, byte location,
//! payload length, and a reserved word kept for alignment.

use crate::error::{Result, XddError};

pub const HEADER_LEN: usize = 32;

/// Magic marking a data frame (ASCII "MAGI" in the original protocol).
pub const MAGIC_DATA: u32 = 0x4D41_4749;
/// Magic marking the final frame of a pass (ASCII "MAGQ").
pub const MAGIC_EOF: u32 = 0x4D41_4751;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u32,
    pub sequence_number: u64,
    pub byte_location: u64,
    pub length: u64,
    pub reserved: u32,
}

impl FrameHeader {
    pub fn data(sequence_number: u64, byte_location: u64, length: u64) -> Self {
        FrameHeader {
            magic: MAGIC_DATA,
            sequence_number,
            byte_location,
            length,
            reserved: 0,
        }
    }

    pub fn eof(sequence_number: u64) -> Self {
        FrameHeader {
            magic: MAGIC_EOF,
            sequence_number,
            byte_location: 0,
            length: 0,
            reserved: 0,
        }
    }

    pub fn is_eof(&self) -> bool {
        self.magic == MAGIC_EOF
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.magic.to_be_bytes());
        out[4..12].copy_from_slice(&self.sequence_number.to_be_bytes());
        out[12..20].copy_from_slice(&self.byte_location.to_be_bytes());
        out[20..28].copy_from_slice(&self.length.to_be_bytes());
        out[28..32].copy_from_slice(&self.reserved.to_be_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(XddError::E2eProtocol(format!(
                "short frame header: {} bytes, need {}",
                buf.len(),
                HEADER_LEN
            )));
        }
        let magic = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        if magic != MAGIC_DATA && magic != MAGIC_EOF {
            return Err(XddError::E2eProtocol(format!("bad frame magic: {magic:#x}")));
        }
        Ok(FrameHeader {
            magic,
            sequence_number: u64::from_be_bytes(buf[4..12].try_into().unwrap()),
            byte_location: u64::from_be_bytes(buf[12..20].try_into().unwrap()),
            length: u64::from_be_bytes(buf[20..28].try_into().unwrap()),
            reserved: u32::from_be_bytes(buf[28..32].try_into().unwrap()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_frame_round_trips() {
        let h = FrameHeader::data(7, 65536, 4096);
        let bytes = h.encode();
        assert_eq!(bytes.len(), HEADER_LEN);
        let decoded = FrameHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, h);
        assert!(!decoded.is_eof());
    }

    #[test]
    fn eof_frame_round_trips() {
        let h = FrameHeader::eof(42);
        let decoded = FrameHeader::decode(&h.encode()).unwrap();
        assert!(decoded.is_eof());
        assert_eq!(decoded.sequence_number, 42);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = FrameHeader::data(0, 0, 0).encode();
        bytes[0] = 0xFF;
        assert!(FrameHeader::decode(&bytes).is_err());
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(FrameHeader::decode(&[0u8; 10]).is_err());
    }
}
