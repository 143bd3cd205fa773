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

//! Pipe input: a virtual capture device fed by an output stream's post-mix
//! delivery callback. It has no clock of its own; the sink's playback tick
//! drives the input stream's whole processing pipeline.

use std::sync::{Arc, Weak};

use super::{InputDevice, Negotiated};
use crate::error::{EngineError, Result};
use crate::input::InputCore;
use crate::output::OutputCore;

pub(crate) struct PipeInputDevice {
    sink: Weak<OutputCore>,
    target: Weak<InputCore>,
}

impl PipeInputDevice {
    pub fn open(sink: &Arc<OutputCore>, target: Weak<InputCore>, neg: &mut Negotiated) -> Self {
        neg.sample_rate = sink.sample_rate();
        neg.channels = sink.channels();
        neg.max_channels = sink.channels();
        neg.period_frames = sink.period_frames();
        log::info!(
            "pipe idevice from output {}: chan = {}, fs = {}, ps = {}",
            sink.token(),
            neg.channels,
            neg.sample_rate,
            neg.period_frames
        );
        Self {
            sink: Arc::downgrade(sink),
            target,
        }
    }
}

impl InputDevice for PipeInputDevice {
    fn start(&mut self) -> Result<()> {
        let sink = self
            .sink
            .upgrade()
            .ok_or_else(|| EngineError::DeviceStart("pipe sink is gone".to_string()))?;
        let target = self.target.clone();
        sink.set_delivery(Some(Box::new(move |data: &[i16], frames: usize| {
            if let Some(core) = target.upgrade() {
                core.capture_interleaved(data, frames);
            }
        })));
        Ok(())
    }

    fn stop(&mut self) -> bool {
        if let Some(sink) = self.sink.upgrade() {
            sink.set_delivery(None);
        }
        true
    }
}
