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

use std::time::Duration;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait};

use audiofabric_engine::{
    service, AudioPlayer, InputConfig, InputStream, OutputConfig, OutputStream,
};

use crate::cli_args::{parse_peer, LoopbackArgs, PlayArgs, RecvArgs, SendArgs};

/// Enumerate capture and playback devices the way the engine's substring
/// matcher will see them.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    println!("capture devices:");
    for device in host.input_devices().context("no capture devices")? {
        if let Ok(name) = device.name() {
            let rate = device
                .default_input_config()
                .map(|c| c.sample_rate().0)
                .unwrap_or(0);
            println!("  {name}  (native {rate} Hz)");
        }
    }
    println!("playback devices:");
    for device in host.output_devices().context("no playback devices")? {
        if let Ok(name) = device.name() {
            let rate = device
                .default_output_config()
                .map(|c| c.sample_rate().0)
                .unwrap_or(0);
            println!("  {name}  (native {rate} Hz)");
        }
    }
    Ok(())
}

pub fn send(args: SendArgs) -> Result<()> {
    let mut config = InputConfig::new(args.token)
        .device(&args.input)
        .bandwidth(args.rate)
        .period(args.period)
        .networked();
    config.periodic_reset = args.periodic_reset;

    let source = InputStream::new(config);
    for peer in &args.peers {
        let (ip, token) = parse_peer(peer)?;
        if !source.connect_remote(&ip, token) {
            anyhow::bail!("cannot reach peer {peer}");
        }
    }
    if !source.start() {
        anyhow::bail!("input stream failed to start");
    }
    println!("sending from '{}' as token {}; ctrl-c stops", args.input, args.token);
    wait_for_interrupt()?;
    source.stop();
    Ok(())
}

pub fn recv(args: RecvArgs) -> Result<()> {
    let sink = OutputStream::new(
        OutputConfig::new(args.token)
            .device(&args.output)
            .bandwidth(args.rate)
            .period(args.period)
            .networked(),
    );
    if !sink.start() {
        anyhow::bail!("output stream failed to start");
    }
    println!(
        "listening on udp port {:#06x} into '{}'; ctrl-c stops",
        audiofabric_engine::types::udp_port(args.token),
        args.output
    );

    let handle = service::handle().context("audio service not running")?;
    handle.block_on(async {
        loop {
            let wait = if args.stats_interval == 0 {
                Duration::from_secs(3600)
            } else {
                Duration::from_secs(args.stats_interval)
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = tokio::time::sleep(wait) => {
                    if args.stats_interval > 0 {
                        for s in sink.link_stats() {
                            println!(
                                "sender {:>3}  loss {:5.1}%  jitter {:7.0} us  send {:7.0} us  recv {:7.0} us",
                                s.token, s.lost_rate, s.jitter_us, s.send_interval_us, s.recv_interval_us
                            );
                        }
                    }
                }
            }
        }
    });
    sink.stop();
    Ok(())
}

pub fn loopback(args: LoopbackArgs) -> Result<()> {
    let sink = OutputStream::new(
        OutputConfig::new(97)
            .device(&args.output)
            .bandwidth(args.rate)
            .period(args.period),
    );
    let source = InputStream::new(
        InputConfig::new(66)
            .device(&args.input)
            .bandwidth(args.rate)
            .period(args.period),
    );
    source.connect(&sink);
    if !sink.start() || !source.start() {
        anyhow::bail!("loopback streams failed to start");
    }
    println!("looping '{}' into '{}'; ctrl-c stops", args.input, args.output);
    wait_for_interrupt()?;
    source.stop();
    sink.stop();
    Ok(())
}

pub fn play(args: PlayArgs) -> Result<()> {
    let player = AudioPlayer::new(args.token);
    let sink;
    let started = match &args.dest {
        Some(dest) => {
            let (ip, token) = parse_peer(dest)?;
            player.play_remote(&args.file, &ip, token)
        }
        None => {
            sink = OutputStream::new(OutputConfig::new(97).device(&args.output));
            if !sink.start() {
                anyhow::bail!("output stream failed to start");
            }
            player.play(&args.file, &sink)
        }
    };
    if !started {
        anyhow::bail!("cannot play '{}'", args.file);
    }
    println!("playing '{}'; ctrl-c stops early", args.file);

    let handle = service::handle().context("audio service not running")?;
    handle.block_on(async {
        loop {
            if player.live_sounds() == 0 {
                break;
            }
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    player.stop(&args.file);
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
        }
    });
    Ok(())
}

fn wait_for_interrupt() -> Result<()> {
    let handle = service::handle().context("audio service not running")?;
    handle.block_on(async {
        let _ = tokio::signal::ctrl_c().await;
    });
    Ok(())
}
