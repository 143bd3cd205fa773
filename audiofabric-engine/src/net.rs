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

//! Wire-side encode and decode.
//!
//! [`NetEncoder`] turns one PCM period into one datagram (header + OPUS
//! payload). [`NetDecoder`] validates, decodes and rate-converts incoming
//! datagrams and keeps per-sender link-quality statistics: EWMAs of send
//! interval, receive interval and jitter, plus a cumulative loss counter,
//! published for readers every 200 sequences.

use std::sync::Mutex;

use audiofabric_types::{Bandwidth, EncoderFormat, PacketHeader, Token, HEADER_LEN, MAX_PAYLOAD_LEN};
use serde::Serialize;

use crate::clock;
use crate::error::{EngineError, Result};
use crate::resample::SincResampler;

/// Largest decodable burst: 120 ms at 48 kHz.
pub const DECODE_MAX_FRAMES: usize = 5760;

/// EWMA smoothing divisor for interval statistics.
const EWMA_DIV: f64 = 16.0;

/// Statistics snapshots are republished every this many sequences.
const PUBLISH_INTERVAL: u32 = 200;

const SINC_ORDER: usize = 16;
const SINC_PRECISION: usize = 64;
const SINC_CUTOFF: f64 = 0.95;

fn opus_channels(channels: u8) -> Result<opus::Channels> {
    match channels {
        1 => Ok(opus::Channels::Mono),
        2 => Ok(opus::Channels::Stereo),
        n => Err(EngineError::InvalidChannelCount(n)),
    }
}

/// Per-sender link quality snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LinkStats {
    pub token: Token,
    /// Percentage of sequence gaps over the published window.
    pub lost_rate: f64,
    /// EWMA of |receive interval - send interval| in microseconds.
    pub jitter_us: f64,
    pub recv_interval_us: f64,
    pub send_interval_us: f64,
}

/// Wraps each outgoing PCM period into one datagram.
pub struct NetEncoder {
    header: PacketHeader,
    period_frames: usize,
    encoder: opus::Encoder,
    payload: Vec<u8>,
    datagram: Vec<u8>,
}

impl NetEncoder {
    pub fn new(sender: Token, channels: u8, period_frames: usize, bandwidth: Bandwidth) -> Result<Self> {
        let encoder = opus::Encoder::new(
            bandwidth.hz(),
            opus_channels(channels)?,
            opus::Application::Audio,
        )
        .map_err(|e| EngineError::Codec(format!("opus encoder init: {e}")))?;
        let scratch = channels as usize * std::mem::size_of::<i16>() * period_frames;
        Ok(Self {
            header: PacketHeader {
                sender,
                channels,
                rate_khz: bandwidth.khz(),
                encoder: EncoderFormat::Opus,
                sequence: 0,
                timestamp_us: 0,
            },
            period_frames,
            encoder,
            payload: vec![0; scratch.min(MAX_PAYLOAD_LEN)],
            datagram: vec![0; HEADER_LEN + scratch.min(MAX_PAYLOAD_LEN)],
        })
    }

    pub fn sequence(&self) -> u32 {
        self.header.sequence
    }

    /// Encode one period of interleaved PCM into a ready-to-send datagram.
    /// Returns `None` and leaves the sequence untouched when OPUS rejects
    /// the frame; the caller drops it.
    pub fn prepare(&mut self, pcm: &[i16]) -> Option<&[u8]> {
        debug_assert_eq!(pcm.len(), self.period_frames * self.header.channels as usize);
        let bytes = match self.encoder.encode(pcm, &mut self.payload) {
            Ok(n) if n > 0 => n,
            Ok(_) => return None,
            Err(e) => {
                log::debug!("opus encode failed: {e}");
                return None;
            }
        };
        self.header.sequence = self.header.sequence.wrapping_add(1);
        self.header.timestamp_us = clock::now_micros();
        self.header.encode_into(&mut self.datagram[..HEADER_LEN]);
        self.datagram[HEADER_LEN..HEADER_LEN + bytes].copy_from_slice(&self.payload[..bytes]);
        Some(&self.datagram[..HEADER_LEN + bytes])
    }
}

/// Per-sender receive-side decoder with link statistics.
pub struct NetDecoder {
    token: Token,
    channels: u8,
    decoder: opus::Decoder,
    /// Rate the OPUS decoder runs at; the nearest legal rate at or above
    /// the stream rate.
    fsi: u32,
    /// Stream rate the owning output runs at.
    fso: u32,
    dec_buf: Vec<i16>,
    rsc_buf: Vec<i16>,
    resamplers: Vec<SincResampler>,
    ch_in: Vec<f64>,
    ch_out: Vec<f64>,

    iseq_last: u32,
    pack_lost: u32,
    rnow_last: u64,
    snow_last: u64,
    jitter: f64,
    recv_interv: f64,
    send_interv: f64,
    published: Mutex<LinkStats>,
}

/// Smallest OPUS-legal decoder rate at or above the stream rate. Output
/// streams running at a device-native rate (e.g. 44.1 kHz) decode at the
/// next rate up and resample down.
fn decoder_rate_for(stream_rate: u32) -> u32 {
    for rate in [8_000u32, 16_000, 24_000, 48_000] {
        if stream_rate <= rate {
            return rate;
        }
    }
    48_000
}

impl NetDecoder {
    pub fn new(token: Token, channels: u8, stream_rate: u32) -> Result<Self> {
        if stream_rate == 0 {
            return Err(EngineError::InvalidSampleRate(stream_rate));
        }
        let fsi = decoder_rate_for(stream_rate);
        let fso = stream_rate;
        let decoder = opus::Decoder::new(fsi, opus_channels(channels)?)
            .map_err(|e| EngineError::Codec(format!("opus decoder init: {e}")))?;
        let scratch = DECODE_MAX_FRAMES * channels as usize;
        let resamplers = if fsi != fso {
            (0..channels)
                .map(|_| SincResampler::new(SINC_ORDER, SINC_PRECISION, SINC_CUTOFF, fsi as f64 / fso as f64))
                .collect()
        } else {
            Vec::new()
        };
        Ok(Self {
            token,
            channels,
            decoder,
            fsi,
            fso,
            dec_buf: vec![0; scratch],
            rsc_buf: vec![0; scratch],
            resamplers,
            ch_in: vec![0.0; scratch],
            ch_out: vec![0.0; scratch],
            iseq_last: 0,
            pack_lost: 0,
            rnow_last: 0,
            snow_last: 0,
            jitter: 0.0,
            recv_interv: 0.0,
            send_interv: 0.0,
            published: Mutex::new(LinkStats {
                token,
                ..LinkStats::default()
            }),
        })
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Decode a validated datagram into interleaved PCM at the stream rate.
    /// `None` means the frame is dropped (codec failure or bad header);
    /// statistics are only advanced on successful decodes.
    pub fn commit(&mut self, datagram: &[u8]) -> Option<&[i16]> {
        self.commit_at(datagram, clock::now_micros())
    }

    fn commit_at(&mut self, datagram: &[u8], rnow: u64) -> Option<&[i16]> {
        let head = PacketHeader::parse(datagram)?;
        let frames = match self
            .decoder
            .decode(&datagram[HEADER_LEN..], &mut self.dec_buf, false)
        {
            Ok(n) if n > 0 => n,
            Ok(_) => return None,
            Err(e) => {
                log::debug!("opus decode failed (sender {}): {e}", self.token);
                return None;
            }
        };

        self.update_stats(&head, rnow);

        let ch = self.channels as usize;
        if self.fsi == self.fso {
            return Some(&self.dec_buf[..frames * ch]);
        }

        let out_frames = (frames as u64 * self.fso as u64 / self.fsi as u64) as usize;
        for c in 0..ch {
            for i in 0..frames {
                self.ch_in[i * ch + c] = self.dec_buf[i * ch + c] as f64;
            }
        }
        for (c, rs) in self.resamplers.iter_mut().enumerate() {
            rs.process(&self.ch_in[c..], frames, &mut self.ch_out[c..], out_frames, ch);
        }
        for i in 0..out_frames * ch {
            self.rsc_buf[i] = self.ch_out[i].clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        }
        Some(&self.rsc_buf[..out_frames * ch])
    }

    fn update_stats(&mut self, head: &PacketHeader, rnow: u64) {
        let snow = head.timestamp_us;
        let iseq = head.sequence;

        if self.iseq_last != 0 {
            let rinterv = if rnow > self.rnow_last {
                (rnow - self.rnow_last) as f64
            } else {
                0.0
            };
            let sinterv = if snow > self.snow_last {
                (snow - self.snow_last) as f64
            } else {
                0.0
            };
            self.recv_interv += (rinterv - self.recv_interv) / EWMA_DIV;
            self.send_interv += (sinterv - self.send_interv) / EWMA_DIV;
            self.jitter += ((rinterv - sinterv).abs() - self.jitter) / EWMA_DIV;
            if self.iseq_last.wrapping_add(1) != iseq {
                self.pack_lost += 1;
            }
        }

        if self.iseq_last != 0 && self.iseq_last % PUBLISH_INTERVAL == 0 {
            let mut snapshot = self.published.lock().unwrap();
            snapshot.lost_rate = 100.0 * self.pack_lost as f64 / self.iseq_last as f64;
            snapshot.jitter_us = self.jitter;
            snapshot.recv_interval_us = self.recv_interv;
            snapshot.send_interval_us = self.send_interv;
        }

        self.snow_last = snow;
        self.rnow_last = rnow;
        self.iseq_last = iseq;
    }

    /// Last published snapshot; refreshed every 200 sequences.
    pub fn stats(&self) -> LinkStats {
        *self.published.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const RATE: Bandwidth = Bandwidth::Full;
    const FRAMES: usize = 480; // 10 ms at 48 kHz

    fn tone(frames: usize, channels: usize) -> Vec<i16> {
        (0..frames * channels)
            .map(|i| ((i as f32 * 0.08).sin() * 12_000.0) as i16)
            .collect()
    }

    #[test]
    fn sequence_starts_at_one_and_increments() {
        let mut enc = NetEncoder::new(66, 1, FRAMES, RATE).unwrap();
        assert_eq!(enc.sequence(), 0);
        let pcm = tone(FRAMES, 1);
        let first = enc.prepare(&pcm).unwrap().to_vec();
        assert_eq!(PacketHeader::parse(&first).unwrap().sequence, 1);
        let second = enc.prepare(&pcm).unwrap().to_vec();
        assert_eq!(PacketHeader::parse(&second).unwrap().sequence, 2);
    }

    #[test]
    fn encode_decode_round_trip_frame_count() {
        let mut enc = NetEncoder::new(66, 2, FRAMES, RATE).unwrap();
        let mut dec = NetDecoder::new(66, 2, RATE.hz()).unwrap();
        let pcm = tone(FRAMES, 2);
        // Let the codec settle over a few packets.
        for _ in 0..4 {
            let datagram = enc.prepare(&pcm).unwrap().to_vec();
            let out = dec.commit(&datagram).unwrap();
            assert_eq!(out.len(), FRAMES * 2);
        }
    }

    #[test]
    fn malformed_datagrams_are_rejected() {
        let mut dec = NetDecoder::new(66, 1, RATE.hz()).unwrap();
        assert!(dec.commit(&[0u8; 4]).is_none());
        let mut bogus = [0u8; 32];
        bogus[1] = 9; // invalid channel count
        assert!(dec.commit(&bogus).is_none());
    }

    #[test]
    fn decode_resamples_to_non_opus_stream_rate() {
        let mut enc = NetEncoder::new(66, 1, FRAMES, RATE).unwrap();
        let mut dec = NetDecoder::new(66, 1, 44_100).unwrap();
        let pcm = tone(FRAMES, 1);
        let datagram = enc.prepare(&pcm).unwrap().to_vec();
        let out = dec.commit(&datagram).unwrap();
        // 480 frames at 48 kHz land as 441 frames at 44.1 kHz.
        assert_eq!(out.len(), 441);
    }

    /// Build a datagram with a hand-rolled header around a real OPUS payload.
    fn synthetic_datagram(enc: &mut opus::Encoder, pcm: &[i16], seq: u32, ts: u64) -> Vec<u8> {
        let mut payload = vec![0u8; 4000];
        let n = enc.encode(pcm, &mut payload).unwrap();
        let head = PacketHeader {
            sender: 66,
            channels: 1,
            rate_khz: 48,
            encoder: EncoderFormat::Opus,
            sequence: seq,
            timestamp_us: ts,
        };
        let mut datagram = head.to_bytes().to_vec();
        datagram.extend_from_slice(&payload[..n]);
        datagram
    }

    fn raw_encoder() -> opus::Encoder {
        opus::Encoder::new(48_000, opus::Channels::Mono, opus::Application::Audio).unwrap()
    }

    #[test]
    fn clean_sequence_reports_zero_loss() {
        let mut enc = raw_encoder();
        let mut dec = NetDecoder::new(66, 1, 48_000).unwrap();
        let pcm = tone(FRAMES, 1);
        let mut now = 1_000_000u64;
        for seq in 1..=201u32 {
            let dg = synthetic_datagram(&mut enc, &pcm, seq, now);
            assert!(dec.commit_at(&dg, now).is_some());
            now += 10_000;
        }
        let stats = dec.stats();
        assert_eq!(stats.lost_rate, 0.0);
        assert_eq!(dec.pack_lost, 0);
    }

    #[test]
    fn single_gap_counts_one_loss() {
        let mut enc = raw_encoder();
        let mut dec = NetDecoder::new(66, 1, 48_000).unwrap();
        let pcm = tone(FRAMES, 1);
        let mut now = 1_000_000u64;
        for seq in 1..=50u32 {
            if seq == 25 {
                continue; // dropped in flight
            }
            let dg = synthetic_datagram(&mut enc, &pcm, seq, now);
            dec.commit_at(&dg, now);
            now += 10_000;
        }
        assert_eq!(dec.pack_lost, 1);
    }

    #[test]
    fn periodic_loss_yields_ten_percent_rate() {
        let mut enc = raw_encoder();
        let mut dec = NetDecoder::new(66, 1, 48_000).unwrap();
        let pcm = tone(FRAMES, 1);
        let mut now = 1_000_000u64;
        // Drop every 10th packet (seq % 10 == 3) across the 200-window,
        // then step past the boundary so the snapshot refreshes.
        for seq in 1..=201u32 {
            now += 10_000;
            if seq % 10 == 3 {
                continue;
            }
            let dg = synthetic_datagram(&mut enc, &pcm, seq, now);
            dec.commit_at(&dg, now);
        }
        let stats = dec.stats();
        assert!(
            (stats.lost_rate - 10.0).abs() < 1.0,
            "lost_rate {}",
            stats.lost_rate
        );
    }

    #[test]
    fn jitter_statistics_converge() {
        let mut enc = raw_encoder();
        let mut dec = NetDecoder::new(66, 1, 48_000).unwrap();
        let pcm = tone(FRAMES, 1);
        let mut rng = StdRng::seed_from_u64(7);
        let mut send = 1_000_000u64;
        let mut recv = 2_000_000u64;
        for seq in 1..=201u32 {
            send += 10_000;
            recv += (10_000 + rng.gen_range(-500i64..=500)) as u64;
            let dg = synthetic_datagram(&mut enc, &pcm, seq, send);
            dec.commit_at(&dg, recv);
        }
        let stats = dec.stats();
        assert!((stats.send_interval_us - 10_000.0).abs() < 50.0);
        assert!((stats.recv_interval_us - 10_000.0).abs() < 200.0);
        assert!(stats.jitter_us < 700.0);
    }

    #[test]
    fn first_packet_sets_baseline_without_stats() {
        let mut enc = raw_encoder();
        let mut dec = NetDecoder::new(66, 1, 48_000).unwrap();
        let pcm = tone(FRAMES, 1);
        let dg = synthetic_datagram(&mut enc, &pcm, 1, 123);
        dec.commit_at(&dg, 456);
        assert_eq!(dec.recv_interv, 0.0);
        assert_eq!(dec.send_interv, 0.0);
        assert_eq!(dec.pack_lost, 0);
        assert_eq!(dec.iseq_last, 1);
    }

    #[test]
    fn non_monotonic_clocks_keep_ewma_unchanged() {
        let mut enc = raw_encoder();
        let mut dec = NetDecoder::new(66, 1, 48_000).unwrap();
        let pcm = tone(FRAMES, 1);
        let dg = synthetic_datagram(&mut enc, &pcm, 1, 10_000);
        dec.commit_at(&dg, 20_000);
        // Timestamps step backwards: intervals count as zero.
        let dg = synthetic_datagram(&mut enc, &pcm, 2, 5_000);
        dec.commit_at(&dg, 15_000);
        assert_eq!(dec.send_interv, 0.0);
        assert_eq!(dec.recv_interv, 0.0);
    }
}
