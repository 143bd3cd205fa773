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

//! Hardware capture and playback through cpal.

use std::sync::Weak;

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};

use super::{InputDevice, Negotiated, OutputDevice, StreamWorker};
use crate::error::{EngineError, Result};
use crate::input::InputCore;
use crate::output::OutputCore;

/// Resolve a device name pattern against the host list. `<card>,<sub>`
/// requires both substrings to match.
pub(super) fn find_device(host: &cpal::Host, name: &str, input: bool) -> Result<cpal::Device> {
    match name {
        "default_input" => host
            .default_input_device()
            .ok_or_else(|| EngineError::DeviceOpen("no default input device".to_string())),
        "default_output" => host
            .default_output_device()
            .ok_or_else(|| EngineError::DeviceOpen("no default output device".to_string())),
        _ => {
            let (card, sub) = name.split_once(',').unwrap_or((name, ""));
            let devices = if input {
                host.input_devices()
            } else {
                host.output_devices()
            }
            .map_err(|e| EngineError::DeviceOpen(e.to_string()))?;
            for device in devices {
                let dev_name = match device.name() {
                    Ok(n) => n,
                    Err(_) => continue,
                };
                log::debug!("search snd card: {dev_name}");
                if dev_name.contains(card) && (sub.is_empty() || dev_name.contains(sub)) {
                    return Ok(device);
                }
            }
            Err(EngineError::DeviceOpen(format!("no device matches '{name}'")))
        }
    }
}

fn stream_err(e: cpal::StreamError) {
    log::warn!("device stream error: {e}");
}

/// Build a capture stream that hands interleaved i16 blocks to `on_frames`,
/// converting from the device's native sample format where needed.
pub(super) fn build_capture_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    format: cpal::SampleFormat,
    mut on_frames: impl FnMut(&[i16]) + Send + 'static,
) -> std::result::Result<cpal::Stream, String> {
    let result = match format {
        cpal::SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| on_frames(data),
            stream_err,
            None,
        ),
        cpal::SampleFormat::U16 => {
            let mut conv: Vec<i16> = Vec::with_capacity(1 << 14);
            device.build_input_stream(
                config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    conv.clear();
                    conv.extend(data.iter().map(|&s| (s as i32 - 0x8000) as i16));
                    on_frames(&conv);
                },
                stream_err,
                None,
            )
        }
        cpal::SampleFormat::F32 => {
            let mut conv: Vec<i16> = Vec::with_capacity(1 << 14);
            device.build_input_stream(
                config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    conv.clear();
                    conv.extend(
                        data.iter()
                            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16),
                    );
                    on_frames(&conv);
                },
                stream_err,
                None,
            )
        }
        other => return Err(format!("unsupported sample format {other:?}")),
    };
    result.map_err(|e| e.to_string())
}

/// Build a playback stream that pulls interleaved i16 blocks from `fill`.
pub(super) fn build_playback_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    format: cpal::SampleFormat,
    mut fill: impl FnMut(&mut [i16]) + Send + 'static,
) -> std::result::Result<cpal::Stream, String> {
    let result = match format {
        cpal::SampleFormat::I16 => device.build_output_stream(
            config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| fill(data),
            stream_err,
            None,
        ),
        cpal::SampleFormat::U16 => {
            let mut scratch: Vec<i16> = Vec::with_capacity(1 << 14);
            device.build_output_stream(
                config,
                move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0);
                    fill(&mut scratch);
                    for (out, &s) in data.iter_mut().zip(scratch.iter()) {
                        *out = (s as i32 + 0x8000) as u16;
                    }
                },
                stream_err,
                None,
            )
        }
        cpal::SampleFormat::F32 => {
            let mut scratch: Vec<i16> = Vec::with_capacity(1 << 14);
            device.build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0);
                    fill(&mut scratch);
                    for (out, &s) in data.iter_mut().zip(scratch.iter()) {
                        *out = s as f32 / -(i16::MIN as f32);
                    }
                },
                stream_err,
                None,
            )
        }
        other => return Err(format!("unsupported sample format {other:?}")),
    };
    result.map_err(|e| e.to_string())
}

pub(crate) struct PhysicalInputDevice {
    device: cpal::Device,
    config: StreamConfig,
    format: cpal::SampleFormat,
    channels: u8,
    target: Weak<InputCore>,
    worker: Option<StreamWorker>,
}

impl PhysicalInputDevice {
    pub fn open(name: &str, target: Weak<InputCore>, neg: &mut Negotiated) -> Result<Self> {
        let host = cpal::default_host();
        let device = find_device(&host, name, true)?;
        let default_cfg = device
            .default_input_config()
            .map_err(|e| EngineError::DeviceOpen(e.to_string()))?;

        let channels: u8 = if default_cfg.channels() > 1 { 2 } else { 1 };
        neg.channels = channels;
        neg.max_channels = channels;
        neg.period_frames = (neg.sample_rate * neg.period_ms / 1000) as usize;

        let requested = neg.sample_rate;
        let supported = device
            .supported_input_configs()
            .map(|mut ranges| {
                ranges.any(|r| {
                    r.channels() == channels as u16
                        && r.min_sample_rate().0 <= requested
                        && requested <= r.max_sample_rate().0
                })
            })
            .unwrap_or(false);
        let capture_rate = if supported {
            requested
        } else {
            let native = default_cfg.sample_rate().0;
            log::info!("require fs {requested}, resample from {native}");
            neg.resample_from = Some(native);
            native
        };

        let config = StreamConfig {
            channels: channels as u16,
            sample_rate: SampleRate(capture_rate),
            buffer_size: BufferSize::Default,
        };
        log::info!(
            "open idevice: {}, chan = {channels}, fs = {requested}, ps = {}",
            device.name().unwrap_or_default(),
            neg.period_frames
        );
        Ok(Self {
            device,
            config,
            format: default_cfg.sample_format(),
            channels,
            target,
            worker: None,
        })
    }
}

impl InputDevice for PhysicalInputDevice {
    fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let device = self.device.clone();
        let config = self.config.clone();
        let format = self.format;
        let channels = self.channels as usize;
        let target = self.target.clone();
        let worker = StreamWorker::spawn(move || {
            build_capture_stream(&device, &config, format, move |data| {
                if let Some(core) = target.upgrade() {
                    core.capture_interleaved(data, data.len() / channels);
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

pub(crate) struct PhysicalOutputDevice {
    device: cpal::Device,
    config: StreamConfig,
    format: cpal::SampleFormat,
    target: Weak<OutputCore>,
    worker: Option<StreamWorker>,
}

impl PhysicalOutputDevice {
    pub fn open(name: &str, target: Weak<OutputCore>, neg: &mut Negotiated) -> Result<Self> {
        let host = cpal::default_host();
        let device = find_device(&host, name, false)?;
        let default_cfg = device
            .default_output_config()
            .map_err(|e| EngineError::DeviceOpen(e.to_string()))?;

        let channels: u8 = if default_cfg.channels() > 1 { 2 } else { 1 };
        neg.channels = channels;
        neg.max_channels = channels;
        if neg.sample_rate == 0 {
            // The playback device's native rate is authoritative.
            neg.sample_rate = default_cfg.sample_rate().0;
        }
        neg.period_frames = (neg.sample_rate * neg.period_ms / 1000) as usize;

        let config = StreamConfig {
            channels: channels as u16,
            sample_rate: SampleRate(neg.sample_rate),
            buffer_size: BufferSize::Fixed(neg.period_frames as u32),
        };
        log::info!(
            "open odevice: {}, chan = {channels}, fs = {}, ps = {}",
            device.name().unwrap_or_default(),
            neg.sample_rate,
            neg.period_frames
        );
        Ok(Self {
            device,
            config,
            format: default_cfg.sample_format(),
            target,
            worker: None,
        })
    }
}

impl OutputDevice for PhysicalOutputDevice {
    fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let device = self.device.clone();
        let mut config = self.config.clone();
        let format = self.format;
        let target = self.target.clone();
        let worker = StreamWorker::spawn(move || {
            let build = |cfg: &StreamConfig| {
                let target = target.clone();
                build_playback_stream(&device, cfg, format, move |data| {
                    if let Some(core) = target.upgrade() {
                        core.fill(data);
                    } else {
                        data.fill(0);
                    }
                })
            };
            build(&config).or_else(|_| {
                // Some hosts refuse fixed buffer sizes; retry with the default.
                config.buffer_size = BufferSize::Default;
                build(&config)
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
