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

//! File-backed devices: WAV capture sources and raw-PCM playback sinks.
//! Both are clocked by the owning stream's periodic executor task.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::sync::Weak;

use super::{InputDevice, Negotiated, OutputDevice};
use crate::error::{EngineError, Result};
use crate::input::InputCore;
use crate::output::OutputCore;

/// Reads PCM periods out of a RIFF/WAVE file (integer 8/16/24/32-bit or
/// float, PCM only). EOF ends the owning stream.
pub(crate) struct WavInputDevice {
    reader: hound::WavReader<BufReader<File>>,
    target: Weak<InputCore>,
    file_rate: u32,
    channels: u8,
    bits: u16,
    float: bool,
    total_frames: u64,
    read_frames: u64,
    pick: Vec<i16>,
    ready: bool,
}

impl WavInputDevice {
    pub fn open(name: &str, target: Weak<InputCore>, neg: &mut Negotiated) -> Result<Self> {
        let reader =
            hound::WavReader::open(name).map_err(|e| EngineError::WavFile(e.to_string()))?;
        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(EngineError::InvalidChannelCount(0));
        }
        let channels = spec.channels.min(u8::MAX as u16) as u8;
        neg.channels = channels;
        neg.max_channels = channels;
        neg.period_frames = (neg.sample_rate * neg.period_ms / 1000) as usize;
        if spec.sample_rate != neg.sample_rate {
            log::info!(
                "require fs {}, resample from {}",
                neg.sample_rate,
                spec.sample_rate
            );
            neg.resample_from = Some(spec.sample_rate);
        }

        let total_frames = reader.duration() as u64;
        // Largest read one tick can demand at the file's own rate.
        let max_tick_frames = neg
            .period_frames
            .max((neg.period_frames as u64 * spec.sample_rate as u64 / neg.sample_rate as u64) as usize)
            + 16;
        log::info!(
            "file idevice: {name}, chan = {channels}, file fs = {}, frames = {total_frames}",
            spec.sample_rate
        );
        Ok(Self {
            reader,
            target,
            file_rate: spec.sample_rate,
            channels,
            bits: spec.bits_per_sample,
            float: spec.sample_format == hound::SampleFormat::Float,
            total_frames,
            read_frames: 0,
            pick: vec![0; max_tick_frames * channels as usize],
            ready: false,
        })
    }

    /// Read up to `frames` frames into the pick buffer as i16. Returns the
    /// frame count actually read.
    fn read_frames_i16(&mut self, frames: usize) -> Result<usize> {
        let wanted = frames * self.channels as usize;
        let pick = &mut self.pick;
        let mut got = 0usize;

        macro_rules! pull {
            ($ty:ty, $map:expr) => {{
                let map = $map;
                for sample in self.reader.samples::<$ty>().take(wanted) {
                    let v = sample.map_err(|e| EngineError::WavFile(e.to_string()))?;
                    pick[got] = map(v);
                    got += 1;
                }
            }};
        }

        if self.float {
            pull!(f32, |v: f32| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
        } else {
            match self.bits {
                8 => pull!(i16, |v: i16| v << 8),
                16 => pull!(i16, |v: i16| v),
                24 => pull!(i32, |v: i32| (v >> 8) as i16),
                32 => pull!(i32, |v: i32| (v >> 16) as i16),
                bits => {
                    return Err(EngineError::WavFile(format!(
                        "unsupported bit depth {bits}"
                    )))
                }
            }
        }
        Ok(got / self.channels as usize)
    }
}

impl InputDevice for WavInputDevice {
    fn start(&mut self) -> Result<()> {
        self.ready = true;
        Ok(())
    }

    fn stop(&mut self) -> bool {
        self.ready = false;
        true
    }

    fn async_task(&mut self, interval_ms: u32) -> bool {
        if !self.ready || self.read_frames >= self.total_frames {
            return false;
        }
        let tick = (interval_ms as u64 * self.file_rate as u64).div_ceil(1000) as usize;
        let tick = tick.min((self.total_frames - self.read_frames) as usize);
        let got = match self.read_frames_i16(tick) {
            Ok(n) => n,
            Err(e) => {
                log::warn!("wav read failed: {e}");
                return false;
            }
        };
        if got == 0 {
            return false;
        }
        self.read_frames += got as u64;
        if let Some(core) = self.target.upgrade() {
            core.capture_interleaved(&self.pick[..got * self.channels as usize], got);
        }
        true
    }

    fn needs_external_loop(&self) -> bool {
        true
    }
}

/// Writes the owning output stream's mix as raw little-endian 16-bit mono
/// PCM, one period per tick.
pub(crate) struct PcmOutputDevice {
    writer: BufWriter<File>,
    target: Weak<OutputCore>,
    rate: u32,
    scratch: Vec<i16>,
    bytes: Vec<u8>,
    ready: bool,
}

impl PcmOutputDevice {
    pub fn open(name: &str, target: Weak<OutputCore>, neg: &mut Negotiated) -> Result<Self> {
        let file = File::create(name).map_err(|e| EngineError::DeviceOpen(e.to_string()))?;
        neg.channels = 1;
        neg.max_channels = 1;
        if neg.sample_rate == 0 {
            neg.sample_rate = 48_000;
        }
        neg.period_frames = (neg.sample_rate * neg.period_ms / 1000) as usize;
        log::info!(
            "file odevice: {name}, chan = 1, fs = {}, ps = {}",
            neg.sample_rate,
            neg.period_frames
        );
        Ok(Self {
            writer: BufWriter::new(file),
            target,
            rate: neg.sample_rate,
            scratch: vec![0; neg.period_frames + 16],
            bytes: Vec::with_capacity((neg.period_frames + 16) * 2),
            ready: false,
        })
    }
}

impl OutputDevice for PcmOutputDevice {
    fn start(&mut self) -> Result<()> {
        self.ready = true;
        Ok(())
    }

    fn stop(&mut self) -> bool {
        self.ready = false;
        let _ = self.writer.flush();
        true
    }

    fn async_task(&mut self, interval_ms: u32) -> bool {
        if !self.ready {
            return false;
        }
        let frames = (interval_ms as u64 * self.rate as u64).div_ceil(1000) as usize;
        if frames > self.scratch.len() {
            self.scratch.resize(frames, 0);
        }
        let core = match self.target.upgrade() {
            Some(core) => core,
            None => return false,
        };
        core.fill(&mut self.scratch[..frames]);
        self.bytes.clear();
        for &s in &self.scratch[..frames] {
            self.bytes.extend_from_slice(&s.to_le_bytes());
        }
        if let Err(e) = self.writer.write_all(&self.bytes) {
            log::warn!("pcm write failed: {e}");
            return false;
        }
        true
    }

    fn needs_external_loop(&self) -> bool {
        true
    }
}
