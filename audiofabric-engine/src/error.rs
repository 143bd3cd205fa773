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

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur inside the engine. These never cross into audio
/// callbacks; public lifecycle methods translate them into boolean returns
/// and log the cause.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("device open failed: {0}")]
    DeviceOpen(String),

    #[error("device start failed: {0}")]
    DeviceStart(String),

    #[error("socket bind failed: {0}")]
    SocketBind(String),

    #[error("address resolution failed: {0}")]
    Resolve(String),

    #[error("codec failure: {0}")]
    Codec(String),

    #[error("malformed packet")]
    MalformedPacket,

    #[error("wav file error: {0}")]
    WavFile(String),

    #[error("end of file")]
    FileEof,

    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("invalid channel count: {0}")]
    InvalidChannelCount(u8),

    #[error("audio service is not running")]
    ServiceNotRunning,
}
