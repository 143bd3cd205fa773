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

//! Multi-slot devices: a physical card opened at N channels of which two
//! slots carry the stereo stream. Capture picks slots L/R out of each
//! N-channel frame; playback deposits the stereo mix into slots L/R.

use std::sync::Weak;

use cpal::traits::DeviceTrait;
use cpal::{BufferSize, SampleRate, StreamConfig};

use super::physical::{build_capture_stream, build_playback_stream, find_device};
use super::{InputDevice, Negotiated, OutputDevice, StreamWorker};
use crate::config::MultiSlotLayout;
use crate::error::{EngineError, Result};
use crate::input::InputCore;
use crate::output::OutputCore;

fn open_card(name: &str, input: bool, slots: &MultiSlotLayout, l: usize, r: usize) -> Result<cpal::Device> {
    let base = match name.find(".multi") {
        Some(pos) => &name[..pos],
        None => return Err(EngineError::DeviceOpen(format!("invalid device name '{name}'"))),
    };
    if slots.width < 2 {
        return Err(EngineError::DeviceOpen("invalid total channel number".to_string()));
    }
    if l >= slots.width as usize || r >= slots.width as usize {
        return Err(EngineError::DeviceOpen("invalid channel slot".to_string()));
    }
    let host = cpal::default_host();
    find_device(&host, base, input)
}

pub(crate) struct MultiInputDevice {
    device: cpal::Device,
    config: StreamConfig,
    format: cpal::SampleFormat,
    left: usize,
    right: usize,
    width: usize,
    target: Weak<InputCore>,
    worker: Option<StreamWorker>,
}

impl MultiInputDevice {
    pub fn open(
        name: &str,
        target: Weak<InputCore>,
        slots: &MultiSlotLayout,
        neg: &mut Negotiated,
    ) -> Result<Self> {
        let device = open_card(name, true, slots, slots.input_left, slots.input_right)?;
        let default_cfg = device
            .default_input_config()
            .map_err(|e| EngineError::DeviceOpen(e.to_string()))?;
        if (default_cfg.channels() as usize) < slots.width as usize {
            return Err(EngineError::DeviceOpen("invalid total channel number".to_string()));
        }

        neg.channels = 2;
        neg.max_channels = slots.width.min(u8::MAX as u16) as u8;
        neg.period_frames = (neg.sample_rate * neg.period_ms / 1000) as usize;

        let config = StreamConfig {
            channels: slots.width,
            sample_rate: SampleRate(neg.sample_rate),
            buffer_size: BufferSize::Default,
        };
        log::info!(
            "open idevice: {}, chan = 2/{}, fs = {}, ps = {}",
            device.name().unwrap_or_default(),
            slots.width,
            neg.sample_rate,
            neg.period_frames
        );
        Ok(Self {
            device,
            config,
            format: default_cfg.sample_format(),
            left: slots.input_left,
            right: slots.input_right,
            width: slots.width as usize,
            target,
            worker: None,
        })
    }
}

impl InputDevice for MultiInputDevice {
    fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let device = self.device.clone();
        let config = self.config.clone();
        let format = self.format;
        let (left, right, width) = (self.left, self.right, self.width);
        let target = self.target.clone();
        let worker = StreamWorker::spawn(move || {
            let mut picked: Vec<i16> = Vec::with_capacity(1 << 13);
            build_capture_stream(&device, &config, format, move |data| {
                let frames = data.len() / width;
                picked.clear();
                for frame in data.chunks_exact(width) {
                    picked.push(frame[left]);
                    picked.push(frame[right]);
                }
                if let Some(core) = target.upgrade() {
                    core.capture_picked(data, &picked, frames);
                }
            })
        })?;
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) -> bool {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
        true
    }

    fn supports_reset(&self) -> bool {
        true
    }
}

pub(crate) struct MultiOutputDevice {
    device: cpal::Device,
    config: StreamConfig,
    format: cpal::SampleFormat,
    left: usize,
    right: usize,
    width: usize,
    target: Weak<OutputCore>,
    worker: Option<StreamWorker>,
}

impl MultiOutputDevice {
    pub fn open(
        name: &str,
        target: Weak<OutputCore>,
        slots: &MultiSlotLayout,
        neg: &mut Negotiated,
    ) -> Result<Self> {
        let device = open_card(name, false, slots, slots.output_left, slots.output_right)?;
        let default_cfg = device
            .default_output_config()
            .map_err(|e| EngineError::DeviceOpen(e.to_string()))?;
        if (default_cfg.channels() as usize) < slots.width as usize {
            return Err(EngineError::DeviceOpen("invalid total channel number".to_string()));
        }

        neg.channels = 2;
        neg.max_channels = slots.width.min(u8::MAX as u16) as u8;
        if neg.sample_rate == 0 {
            neg.sample_rate = default_cfg.sample_rate().0;
        }
        neg.period_frames = (neg.sample_rate * neg.period_ms / 1000) as usize;

        let config = StreamConfig {
            channels: slots.width,
            sample_rate: SampleRate(neg.sample_rate),
            buffer_size: BufferSize::Default,
        };
        log::info!(
            "open odevice: {}, chan = 2/{}, fs = {}, ps = {}",
            device.name().unwrap_or_default(),
            slots.width,
            neg.sample_rate,
            neg.period_frames
        );
        Ok(Self {
            device,
            config,
            format: default_cfg.sample_format(),
            left: slots.output_left,
            right: slots.output_right,
            width: slots.width as usize,
            target,
            worker: None,
        })
    }
}

impl OutputDevice for MultiOutputDevice {
    fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let device = self.device.clone();
        let config = self.config.clone();
        let format = self.format;
        let (left, right, width) = (self.left, self.right, self.width);
        let target = self.target.clone();
        let worker = StreamWorker::spawn(move || {
            let mut stereo: Vec<i16> = Vec::with_capacity(1 << 13);
            build_playback_stream(&device, &config, format, move |data| {
                let frames = data.len() / width;
                stereo.resize(frames * 2, 0);
                match target.upgrade() {
                    Some(core) => core.fill(&mut stereo),
                    None => stereo.fill(0),
                }
                data.fill(0);
                for (i, frame) in data.chunks_exact_mut(width).enumerate() {
                    frame[left] = stereo[2 * i];
                    frame[right] = stereo[2 * i + 1];
                }
            })
        })?;
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) -> bool {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
        true
    }
}
