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

//! # audiofabric-types
//!
//! Wire-format and stream-parameter types shared by the audiofabric engine,
//! the transceiver CLI and the `afprobe` observer. A stream endpoint is
//! identified by a one-byte token which also selects its UDP port; audio
//! moves as one datagram per period with a fixed 16-byte header.

pub mod packet;
pub mod params;

pub use packet::{EncoderFormat, PacketHeader, HEADER_LEN, MAX_DATAGRAM_LEN, MAX_PAYLOAD_LEN};
pub use params::{udp_port, Bandwidth, PeriodSize, Token};
