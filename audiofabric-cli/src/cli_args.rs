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

use audiofabric_types::{Bandwidth, PeriodSize};
use clap::{Args, Parser, Subcommand};

/// audiofabric transceiver
///
/// Routes PCM between capture devices, playback devices, WAV/PCM files and
/// UDP peers. An output stream listens on UDP port `0xCC00 | token`; senders
/// address it by IP and token.
#[derive(Parser, Debug)]
#[clap(name = "audiofabric", version)]
pub struct Opt {
    #[clap(subcommand)]
    pub mode: Mode,
}

#[derive(Subcommand, Debug)]
pub enum Mode {
    /// List capture and playback devices visible to the host.
    ListDevices,

    /// Capture from a device (or read a WAV file) and send OPUS datagrams
    /// to one or more peers.
    Send(SendArgs),

    /// Receive OPUS datagrams and play them on a device (or write a raw
    /// PCM file).
    Recv(RecvArgs),

    /// Route a capture device straight into a playback device in-process.
    Loopback(LoopbackArgs),

    /// Play a WAV file into a local playback device or to a remote peer.
    Play(PlayArgs),
}

fn parse_bandwidth(s: &str) -> Result<Bandwidth, String> {
    match s {
        "auto" => Ok(Bandwidth::Auto),
        _ => {
            let hz: u32 = s.parse().map_err(|_| format!("invalid sample rate '{s}'"))?;
            Bandwidth::from_hz(hz).ok_or_else(|| {
                format!("unsupported sample rate {hz}; pick 8000, 16000, 24000 or 48000")
            })
        }
    }
}

fn parse_period(s: &str) -> Result<PeriodSize, String> {
    match s {
        "5" => Ok(PeriodSize::Ms5),
        "10" => Ok(PeriodSize::Ms10),
        "20" => Ok(PeriodSize::Ms20),
        "40" => Ok(PeriodSize::Ms40),
        _ => Err(format!("unsupported period '{s}' ms; pick 5, 10, 20 or 40")),
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Capture device pattern or WAV file path.
    #[clap(long, default_value = "default_input")]
    pub input: String,

    /// This sender's token.
    #[clap(long, default_value_t = 66)]
    pub token: u8,

    /// Peer address, repeatable: `<ip>:<token>`.
    #[clap(long = "peer", required = true)]
    pub peers: Vec<String>,

    /// Stream sample rate in Hz.
    #[clap(long, default_value = "48000", value_parser = parse_bandwidth)]
    pub rate: Bandwidth,

    /// Period length in milliseconds.
    #[clap(long, default_value = "10", value_parser = parse_period)]
    pub period: PeriodSize,

    /// Cycle the capture device every 30 minutes (drift workaround).
    #[clap(long)]
    pub periodic_reset: bool,
}

#[derive(Args, Debug)]
pub struct RecvArgs {
    /// Playback device pattern or `.pcm` file path.
    #[clap(long, default_value = "default_output")]
    pub output: String,

    /// This receiver's token; the UDP port is `0xCC00 | token`.
    #[clap(long, default_value_t = 97)]
    pub token: u8,

    /// Stream sample rate in Hz, or `auto` for the device's native rate.
    #[clap(long, default_value = "auto", value_parser = parse_bandwidth)]
    pub rate: Bandwidth,

    /// Period length in milliseconds.
    #[clap(long, default_value = "10", value_parser = parse_period)]
    pub period: PeriodSize,

    /// Print per-sender link statistics at this interval (seconds); 0 off.
    #[clap(long, default_value_t = 2)]
    pub stats_interval: u64,
}

#[derive(Args, Debug)]
pub struct LoopbackArgs {
    /// Capture device pattern or WAV file path.
    #[clap(long, default_value = "default_input")]
    pub input: String,

    /// Playback device pattern or `.pcm` file path.
    #[clap(long, default_value = "default_output")]
    pub output: String,

    /// Stream sample rate in Hz.
    #[clap(long, default_value = "48000", value_parser = parse_bandwidth)]
    pub rate: Bandwidth,

    /// Period length in milliseconds.
    #[clap(long, default_value = "10", value_parser = parse_period)]
    pub period: PeriodSize,
}

#[derive(Args, Debug)]
pub struct PlayArgs {
    /// WAV file to play.
    pub file: String,

    /// Playback device pattern (ignored when --dest is given).
    #[clap(long, default_value = "default_output")]
    pub output: String,

    /// Remote peer `<ip>:<token>` instead of local playback.
    #[clap(long)]
    pub dest: Option<String>,

    /// Player token base.
    #[clap(long, default_value_t = 1)]
    pub token: u8,
}

/// Split `<ip>:<token>` into its parts.
pub fn parse_peer(s: &str) -> anyhow::Result<(String, u8)> {
    let (ip, token) = s
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("peer '{s}' is not <ip>:<token>"))?;
    let token: u8 = token
        .parse()
        .map_err(|_| anyhow::anyhow!("peer token in '{s}' is not a number 0-255"))?;
    Ok((ip.to_string(), token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bandwidth_parsing() {
        assert_eq!(parse_bandwidth("auto").unwrap(), Bandwidth::Auto);
        assert_eq!(parse_bandwidth("48000").unwrap(), Bandwidth::Full);
        assert_eq!(parse_bandwidth("8000").unwrap(), Bandwidth::Narrow);
        assert!(parse_bandwidth("44100").is_err());
        assert!(parse_bandwidth("fast").is_err());
    }

    #[test]
    fn peer_parsing() {
        let (ip, token) = parse_peer("192.168.1.20:97").unwrap();
        assert_eq!(ip, "192.168.1.20");
        assert_eq!(token, 97);
        assert!(parse_peer("192.168.1.20").is_err());
        assert!(parse_peer("host:big").is_err());
    }
}
