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

//! The transmit silence gate, observed from outside: a silent source emits
//! no datagrams at all, a tone emits them at the period rate.

use std::net::UdpSocket;
use std::path::Path;
use std::time::Duration;

use audiofabric_engine::types::{udp_port, Bandwidth, PacketHeader, PeriodSize};
use audiofabric_engine::{start_service, stop_service, InputConfig, InputStream};

fn write_wav(path: &Path, seconds: f32, amplitude: f32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 48_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let frames = (48_000.0 * seconds) as usize;
    for i in 0..frames {
        let t = i as f32 / 48_000.0;
        let s = (amplitude * (2.0 * std::f32::consts::PI * 440.0 * t).sin()) as i16;
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

fn datagrams_from(path: &Path, listen_token: u8) -> usize {
    let sock = UdpSocket::bind(("0.0.0.0", udp_port(listen_token))).unwrap();
    sock.set_read_timeout(Some(Duration::from_millis(200))).unwrap();

    let source = InputStream::new(
        InputConfig::new(66)
            .device(path.to_str().unwrap())
            .bandwidth(Bandwidth::Full)
            .period(PeriodSize::Ms10)
            .networked(),
    );
    assert!(source.connect_remote("127.0.0.1", listen_token));
    assert!(source.start());

    let mut buf = [0u8; 8192];
    let mut count = 0usize;
    let deadline = std::time::Instant::now() + Duration::from_millis(1500);
    while std::time::Instant::now() < deadline {
        match sock.recv_from(&mut buf) {
            Ok((len, _)) => {
                assert!(PacketHeader::validate(&buf[..len]), "invalid datagram");
                count += 1;
            }
            Err(_) => {}
        }
    }
    source.stop();
    count
}

#[test]
fn silent_input_emits_nothing_and_tone_streams() {
    let _ = env_logger::builder().is_test(true).try_init();
    assert!(start_service());

    let dir = tempfile::tempdir().unwrap();
    let silent = dir.path().join("silent.wav");
    let tone = dir.path().join("tone.wav");
    write_wav(&silent, 0.5, 0.0);
    write_wav(&tone, 0.5, 14_000.0);

    let silent_count = datagrams_from(&silent, 240);
    assert_eq!(silent_count, 0, "silence must not be transmitted");

    let tone_count = datagrams_from(&tone, 241);
    // 0.5 s at 10 ms per datagram is 50 periods; allow generous loss.
    assert!(
        tone_count >= 30,
        "tone should stream at the period rate, got {tone_count} datagrams"
    );

    stop_service();
}
