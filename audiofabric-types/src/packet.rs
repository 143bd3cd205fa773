/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! On-wire packet layout.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  sender token |    channels   |  rate (kHz)   | encoder format|
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            sequence                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
//! |                            payload                            |
//! |                             ....                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Multi-byte fields are little-endian. One datagram carries exactly one
//! encoded period.

use crate::params::Bandwidth;
use serde::{Deserialize, Serialize};

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 16;

/// Upper bound on the encoded payload of a single period.
pub const MAX_PAYLOAD_LEN: usize = 6144;

/// Receive-buffer size: header plus the largest accepted payload.
pub const MAX_DATAGRAM_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN;

/// Payload encoding carried in the header. PCM is reserved in the format;
/// the engine emits OPUS only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EncoderFormat {
    Pcm = 0,
    Opus = 1,
}

impl EncoderFormat {
    pub fn from_u8(v: u8) -> Option<EncoderFormat> {
        match v {
            0 => Some(EncoderFormat::Pcm),
            1 => Some(EncoderFormat::Opus),
            _ => None,
        }
    }
}

/// The 16-byte datagram header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    pub sender: u8,
    pub channels: u8,
    pub rate_khz: u8,
    pub encoder: EncoderFormat,
    /// Strictly increasing per sender, wraps at 2^32.
    pub sequence: u32,
    /// Microseconds since the sender's process epoch, monotonic per sender.
    pub timestamp_us: u64,
}

impl PacketHeader {
    /// Serialize into the fixed little-endian layout.
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0] = self.sender;
        buf[1] = self.channels;
        buf[2] = self.rate_khz;
        buf[3] = self.encoder as u8;
        buf[4..8].copy_from_slice(&self.sequence.to_le_bytes());
        buf[8..16].copy_from_slice(&self.timestamp_us.to_le_bytes());
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        self.encode_into(&mut buf);
        buf
    }

    /// Parse and validate the header of a received datagram. Returns `None`
    /// for anything that fails the wire-format invariants; malformed packets
    /// are dropped silently by callers.
    pub fn parse(data: &[u8]) -> Option<PacketHeader> {
        if !Self::validate(data) {
            return None;
        }
        Some(PacketHeader {
            sender: data[0],
            channels: data[1],
            rate_khz: data[2],
            encoder: EncoderFormat::from_u8(data[3])?,
            sequence: u32::from_le_bytes(data[4..8].try_into().ok()?),
            timestamp_us: u64::from_le_bytes(data[8..16].try_into().ok()?),
        })
    }

    /// True iff `data` starts with a well-formed header and the payload
    /// length is within bounds.
    pub fn validate(data: &[u8]) -> bool {
        if data.len() < HEADER_LEN || data.len() - HEADER_LEN > MAX_PAYLOAD_LEN {
            return false;
        }
        if data[1] != 1 && data[1] != 2 {
            return false;
        }
        if Bandwidth::from_khz(data[2]).is_none() {
            return false;
        }
        EncoderFormat::from_u8(data[3]).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> PacketHeader {
        PacketHeader {
            sender: 66,
            channels: 2,
            rate_khz: 48,
            encoder: EncoderFormat::Opus,
            sequence: 0x0102_0304,
            timestamp_us: 0x0506_0708_090a_0b0c,
        }
    }

    #[test]
    fn header_round_trip_is_byte_identical() {
        let bytes = header().to_bytes();
        let parsed = PacketHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, header());
        assert_eq!(parsed.to_bytes(), bytes);
    }

    #[test]
    fn layout_is_little_endian() {
        let bytes = header().to_bytes();
        assert_eq!(&bytes[..4], &[66, 2, 48, 1]);
        assert_eq!(&bytes[4..8], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[8..16], &[0x0c, 0x0b, 0x0a, 0x09, 0x08, 0x07, 0x06, 0x05]);
    }

    #[test]
    fn rejects_short_buffers() {
        let bytes = header().to_bytes();
        assert!(!PacketHeader::validate(&bytes[..HEADER_LEN - 1]));
        assert!(PacketHeader::validate(&bytes));
    }

    #[test]
    fn rejects_bad_channel_count() {
        let mut bytes = header().to_bytes();
        for bad in [0u8, 3, 255] {
            bytes[1] = bad;
            assert!(!PacketHeader::validate(&bytes));
        }
    }

    #[test]
    fn rejects_bad_rate() {
        let mut bytes = header().to_bytes();
        for bad in [0u8, 12, 44, 96] {
            bytes[2] = bad;
            assert!(!PacketHeader::validate(&bytes));
        }
        for good in [8u8, 16, 24, 48] {
            bytes[2] = good;
            assert!(PacketHeader::validate(&bytes));
        }
    }

    #[test]
    fn rejects_unknown_encoder() {
        let mut bytes = header().to_bytes();
        bytes[3] = 2;
        assert!(!PacketHeader::validate(&bytes));
    }

    #[test]
    fn rejects_oversized_payload() {
        let mut datagram = header().to_bytes().to_vec();
        datagram.resize(HEADER_LEN + MAX_PAYLOAD_LEN, 0);
        assert!(PacketHeader::validate(&datagram));
        datagram.push(0);
        assert!(!PacketHeader::validate(&datagram));
    }
}
