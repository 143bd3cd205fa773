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

//! Stream configuration.

use audiofabric_types::{Bandwidth, PeriodSize, Token};
use serde::{Deserialize, Serialize};

use crate::silence::DEFAULT_SILENCE_THRESHOLD;

/// Channel-slot layout for `.multi` devices: which slots of an N-channel
/// card carry the stereo pair. The device buffer is interleaved N-channel
/// frames; input picks slots `input_left`/`input_right` out of each frame,
/// output deposits into slots `output_left`/`output_right`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MultiSlotLayout {
    pub input_left: usize,
    pub input_right: usize,
    pub output_left: usize,
    pub output_right: usize,
    /// Total channels the card is opened with.
    pub width: u16,
}

impl Default for MultiSlotLayout {
    fn default() -> Self {
        Self {
            input_left: 0,
            input_right: 8,
            output_left: 3,
            output_right: 11,
            width: 16,
        }
    }
}

/// Configuration for an input (capture-side) stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    pub token: Token,
    /// Device name pattern: `default_input`, `<card>[,<sub>]`,
    /// `<card>.multi`, or `*.wav`.
    pub device: String,
    pub bandwidth: Bandwidth,
    pub period: PeriodSize,
    /// Encode periods with OPUS and send them to connected UDP endpoints.
    pub enable_network: bool,
    /// Stop/start a physical device every 30 minutes to shake off
    /// long-run driver drift.
    pub periodic_reset: bool,
    pub silence_threshold: f32,
    pub multi_slots: MultiSlotLayout,
}

impl InputConfig {
    pub fn new(token: Token) -> Self {
        Self {
            token,
            device: "default_input".to_string(),
            bandwidth: Bandwidth::Full,
            period: PeriodSize::Ms10,
            enable_network: false,
            periodic_reset: false,
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
            multi_slots: MultiSlotLayout::default(),
        }
    }

    pub fn device(mut self, name: impl Into<String>) -> Self {
        self.device = name.into();
        self
    }

    pub fn bandwidth(mut self, bandwidth: Bandwidth) -> Self {
        self.bandwidth = bandwidth;
        self
    }

    pub fn period(mut self, period: PeriodSize) -> Self {
        self.period = period;
        self
    }

    pub fn networked(mut self) -> Self {
        self.enable_network = true;
        self
    }

    pub fn periodic_reset(mut self) -> Self {
        self.periodic_reset = true;
        self
    }
}

/// Configuration for an output (playback-side) stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub token: Token,
    /// Device name pattern: `default_output`, `<card>[,<sub>]`,
    /// `<card>.multi`, or `*.pcm`.
    pub device: String,
    /// `Auto` adopts the playback device's native rate.
    pub bandwidth: Bandwidth,
    pub period: PeriodSize,
    /// Listen for datagrams on `udp_port(token)`.
    pub enable_network: bool,
    pub multi_slots: MultiSlotLayout,
}

impl OutputConfig {
    pub fn new(token: Token) -> Self {
        Self {
            token,
            device: "default_output".to_string(),
            bandwidth: Bandwidth::Auto,
            period: PeriodSize::Ms10,
            enable_network: false,
            multi_slots: MultiSlotLayout::default(),
        }
    }

    pub fn device(mut self, name: impl Into<String>) -> Self {
        self.device = name.into();
        self
    }

    pub fn bandwidth(mut self, bandwidth: Bandwidth) -> Self {
        self.bandwidth = bandwidth;
        self
    }

    pub fn period(mut self, period: PeriodSize) -> Self {
        self.period = period;
        self
    }

    pub fn networked(mut self) -> Self {
        self.enable_network = true;
        self
    }
}
