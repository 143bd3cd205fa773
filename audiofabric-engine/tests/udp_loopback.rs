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

//! End-to-end OPUS-over-UDP on localhost: WAV source stream encoding to a
//! networked PCM sink stream.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use audiofabric_engine::types::{Bandwidth, PeriodSize};
use audiofabric_engine::{
    start_service, stop_service, InputConfig, InputStream, OutputConfig, OutputStream,
};

fn write_sine_wav(path: &std::path::Path, seconds: f32) {
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
        let s = (11_000.0 * (2.0 * std::f32::consts::PI * 523.0 * t).sin()) as i16;
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn opus_datagrams_reach_a_networked_sink() {
    let _ = env_logger::builder().is_test(true).try_init();
    assert!(start_service());

    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("tone.wav");
    let pcm = dir.path().join("recv.pcm");
    write_sine_wav(&wav, 0.5);

    // Receiver: networked sink on port 0xcc00 | 251.
    let sink = OutputStream::new(
        OutputConfig::new(251)
            .device(pcm.to_str().unwrap())
            .bandwidth(Bandwidth::Full)
            .period(PeriodSize::Ms10)
            .networked(),
    );
    let delivered = Arc::new(AtomicUsize::new(0));
    {
        let delivered = Arc::clone(&delivered);
        sink.set_delivery_callback(move |mix, _frames| {
            let energetic = mix.iter().any(|&s| s.unsigned_abs() > 3_000);
            if energetic {
                delivered.fetch_add(1, Ordering::Relaxed);
            }
        });
    }
    assert!(sink.start());

    // Sender: WAV-clocked source, OPUS datagrams to localhost.
    let source = InputStream::new(
        InputConfig::new(66)
            .device(wav.to_str().unwrap())
            .bandwidth(Bandwidth::Full)
            .period(PeriodSize::Ms10)
            .networked(),
    );
    assert!(source.connect_remote("127.0.0.1", 251));
    assert!(source.start());

    // Wait until periods with signal come out of the receiver's mixer.
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(3) && delivered.load(Ordering::Relaxed) < 10 {
        std::thread::sleep(Duration::from_millis(50));
    }
    let periods = delivered.load(Ordering::Relaxed);
    assert!(periods >= 10, "only {periods} energetic periods received");

    // A clean localhost link loses nothing.
    for stats in sink.link_stats() {
        assert_eq!(stats.lost_rate, 0.0, "loss on loopback: {stats:?}");
    }

    source.stop();
    sink.stop();
    drop(source);
    drop(sink);
    stop_service();
}
