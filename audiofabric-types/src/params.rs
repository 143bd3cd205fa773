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

use serde::{Deserialize, Serialize};

/// One-byte endpoint identity. Also selects the endpoint's UDP port, see
/// [`udp_port`].
pub type Token = u8;

/// UDP port an output stream (or the observer) listens on for a given token.
pub fn udp_port(token: Token) -> u16 {
    0xcc00 | token as u16
}

/// Stream sample rate. `Auto` defers to the playback device's native rate
/// and is only meaningful for output streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bandwidth {
    Auto,
    /// 8 kHz
    Narrow,
    /// 16 kHz
    Wide,
    /// 24 kHz
    SemiSuperWide,
    /// 48 kHz
    Full,
}

impl Bandwidth {
    pub const fn hz(self) -> u32 {
        match self {
            Bandwidth::Auto => 0,
            Bandwidth::Narrow => 8_000,
            Bandwidth::Wide => 16_000,
            Bandwidth::SemiSuperWide => 24_000,
            Bandwidth::Full => 48_000,
        }
    }

    /// Rate in kHz as carried in the packet header.
    pub fn khz(self) -> u8 {
        (self.hz() / 1000) as u8
    }

    pub fn from_khz(khz: u8) -> Option<Bandwidth> {
        match khz {
            8 => Some(Bandwidth::Narrow),
            16 => Some(Bandwidth::Wide),
            24 => Some(Bandwidth::SemiSuperWide),
            48 => Some(Bandwidth::Full),
            _ => None,
        }
    }

    pub fn from_hz(hz: u32) -> Option<Bandwidth> {
        match hz {
            8_000 => Some(Bandwidth::Narrow),
            16_000 => Some(Bandwidth::Wide),
            24_000 => Some(Bandwidth::SemiSuperWide),
            48_000 => Some(Bandwidth::Full),
            _ => None,
        }
    }
}

/// Duration of one audio period, i.e. of the PCM block delivered per device
/// callback and per network datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodSize {
    Ms5,
    Ms10,
    Ms20,
    Ms40,
}

impl PeriodSize {
    pub fn ms(self) -> u32 {
        match self {
            PeriodSize::Ms5 => 5,
            PeriodSize::Ms10 => 10,
            PeriodSize::Ms20 => 20,
            PeriodSize::Ms40 => 40,
        }
    }

    /// Frames per period at the given sample rate.
    pub fn frames(self, sample_rate: u32) -> usize {
        (sample_rate * self.ms() / 1000) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_is_token_offset_from_0xcc00() {
        assert_eq!(udp_port(0), 0xcc00);
        assert_eq!(udp_port(97), 0xcc61);
        assert_eq!(udp_port(255), 0xccff);
    }

    #[test]
    fn bandwidth_khz_round_trip() {
        for bw in [
            Bandwidth::Narrow,
            Bandwidth::Wide,
            Bandwidth::SemiSuperWide,
            Bandwidth::Full,
        ] {
            assert_eq!(Bandwidth::from_khz(bw.khz()), Some(bw));
            assert_eq!(Bandwidth::from_hz(bw.hz()), Some(bw));
        }
        assert_eq!(Bandwidth::from_khz(44), None);
        assert_eq!(Bandwidth::Auto.hz(), 0);
    }

    #[test]
    fn frames_per_period() {
        assert_eq!(PeriodSize::Ms10.frames(48_000), 480);
        assert_eq!(PeriodSize::Ms20.frames(16_000), 320);
        assert_eq!(PeriodSize::Ms40.frames(8_000), 320);
        assert_eq!(PeriodSize::Ms5.frames(24_000), 120);
    }
}
