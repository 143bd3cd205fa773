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

//! Unified device abstraction.
//!
//! A stream owns exactly one device. Physical devices (cpal) clock the
//! stream from their own callback thread; file-backed devices have no clock
//! of their own and are driven by a periodic executor task through
//! [`InputDevice::async_task`] / [`OutputDevice::async_task`]. Devices reach
//! back into their owning stream through a `Weak` reference, so a dropped
//! stream silently quiesces its device callbacks.
//!
//! Selection is by name pattern: `*.wav` reads a WAV file, `*.pcm` writes
//! raw 16-bit PCM, a `.multi` suffix wraps the named card at N channels,
//! anything else matches the host device list (`default_input` /
//! `default_output` pick the host defaults).

pub(crate) mod file;
pub(crate) mod multi;
pub(crate) mod physical;
pub(crate) mod pipe;

use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;

use crate::config::MultiSlotLayout;
use crate::error::{EngineError, Result};
use crate::input::InputCore;
use crate::output::OutputCore;

/// Parameters negotiated between a stream and its device at open time.
/// The stream fills in its request; the device adjusts what it must.
#[derive(Debug, Clone)]
pub(crate) struct Negotiated {
    /// Requested stream rate in Hz; 0 means device-native (outputs only).
    /// After open this is the effective stream rate.
    pub sample_rate: u32,
    /// Requested period in milliseconds.
    pub period_ms: u32,
    /// Frames per period at the effective stream rate.
    pub period_frames: usize,
    pub channels: u8,
    pub max_channels: u8,
    /// Set when a capture device runs at a different native rate than the
    /// stream; the owning stream installs a resampler.
    pub resample_from: Option<u32>,
}

impl Negotiated {
    pub fn request(sample_rate: u32, period_ms: u32) -> Self {
        Self {
            sample_rate,
            period_ms,
            period_frames: 0,
            channels: 0,
            max_channels: 0,
            resample_from: None,
        }
    }
}

pub(crate) trait InputDevice: Send {
    fn start(&mut self) -> Result<()>;
    /// Idempotent.
    fn stop(&mut self) -> bool;
    /// One tick of a file-clocked device; false stops the owning stream.
    fn async_task(&mut self, _interval_ms: u32) -> bool {
        false
    }
    fn needs_external_loop(&self) -> bool {
        false
    }
    /// Whether the periodic-reset workaround applies (physical capture).
    fn supports_reset(&self) -> bool {
        false
    }
}

pub(crate) trait OutputDevice: Send {
    fn start(&mut self) -> Result<()>;
    /// Idempotent.
    fn stop(&mut self) -> bool;
    fn async_task(&mut self, _interval_ms: u32) -> bool {
        false
    }
    fn needs_external_loop(&self) -> bool {
        false
    }
}

pub(crate) fn open_input_device(
    name: &str,
    target: Weak<InputCore>,
    slots: &MultiSlotLayout,
    neg: &mut Negotiated,
) -> Result<Box<dyn InputDevice>> {
    if name.contains(".wav") {
        Ok(Box::new(file::WavInputDevice::open(name, target, neg)?))
    } else if name.contains(".multi") {
        Ok(Box::new(multi::MultiInputDevice::open(name, target, slots, neg)?))
    } else {
        Ok(Box::new(physical::PhysicalInputDevice::open(name, target, neg)?))
    }
}

pub(crate) fn open_output_device(
    name: &str,
    target: Weak<OutputCore>,
    slots: &MultiSlotLayout,
    neg: &mut Negotiated,
) -> Result<Box<dyn OutputDevice>> {
    if name.contains(".pcm") {
        Ok(Box::new(file::PcmOutputDevice::open(name, target, neg)?))
    } else if name.contains(".multi") {
        Ok(Box::new(multi::MultiOutputDevice::open(name, target, slots, neg)?))
    } else {
        Ok(Box::new(physical::PhysicalOutputDevice::open(name, target, neg)?))
    }
}

/// Owns a cpal stream on a dedicated thread.
///
/// `cpal::Stream` is not `Send`, so the stream object is built, played and
/// dropped on one thread; the owner only holds a stop latch and the join
/// handle. Spawning reports the build/play outcome synchronously.
pub(crate) struct StreamWorker {
    latch: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl StreamWorker {
    pub fn spawn<F>(build: F) -> Result<Self>
    where
        F: FnOnce() -> std::result::Result<cpal::Stream, String> + Send + 'static,
    {
        use cpal::traits::StreamTrait;

        let latch = Arc::new((Mutex::new(false), Condvar::new()));
        let latch_thread = Arc::clone(&latch);
        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<(), String>>();

        let handle = std::thread::Builder::new()
            .name("af-device".to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                let (stopped, cvar) = &*latch_thread;
                let mut guard = stopped.lock().unwrap();
                while !*guard {
                    guard = cvar.wait(guard).unwrap();
                }
                drop(guard);
                drop(stream);
            })
            .map_err(|e| EngineError::DeviceStart(e.to_string()))?;

        let mut worker = Self {
            latch,
            handle: Some(handle),
        };
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(worker),
            Ok(Err(e)) => {
                worker.stop();
                Err(EngineError::DeviceStart(e))
            }
            Err(_) => {
                worker.stop();
                Err(EngineError::DeviceStart("device thread exited".to_string()))
            }
        }
    }

    pub fn stop(&mut self) {
        let (stopped, cvar) = &*self.latch;
        *stopped.lock().unwrap() = true;
        cvar.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
