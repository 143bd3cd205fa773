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

//! # audiofabric-engine
//!
//! A low-latency, many-to-many PCM routing fabric. Input streams (hardware
//! capture, multi-channel slots, WAV files) fan audio out to output streams
//! (hardware playback, raw-PCM files, multi-channel slots) either in-process
//! or over UDP with OPUS compression. Output streams keep one jitter session
//! per sender and mix at the playback clock; a shared executor clocks
//! file-backed devices and carries all network I/O.
//!
//! ```no_run
//! use audiofabric_engine::{start_service, stop_service, InputConfig, InputStream, OutputConfig, OutputStream};
//!
//! start_service();
//! {
//!     let sink = OutputStream::new(OutputConfig::new(97));
//!     let source = InputStream::new(InputConfig::new(66));
//!     source.connect(&sink);
//!     sink.start();
//!     source.start();
//!     // ... audio flows until the streams drop ...
//! }
//! stop_service();
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod input;
pub mod mixer;
pub mod net;
pub mod output;
pub mod player;
pub mod resample;
pub mod service;
pub mod session;
pub mod silence;

mod device;

pub use audiofabric_types as types;

pub use config::{InputConfig, MultiSlotLayout, OutputConfig};
pub use error::{EngineError, Result};
pub use input::{InputStream, DEFAULT_TAP_PERIOD};
pub use net::{LinkStats, NetDecoder, NetEncoder};
pub use output::OutputStream;
pub use player::{AudioPlayer, MAX_CONCURRENT_SOUNDS};
pub use service::{start_service, stop_service};
pub use session::SessionRing;
