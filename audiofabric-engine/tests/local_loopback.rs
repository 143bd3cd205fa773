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

//! End-to-end local routing over file-backed devices: a WAV source stream
//! pushed in-process into a raw-PCM sink stream. No audio hardware needed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

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
        let s = (12_000.0 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()) as i16;
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn wav_source_mixes_into_pcm_sink() {
    let _ = env_logger::builder().is_test(true).try_init();
    assert!(start_service());

    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("tone.wav");
    let pcm = dir.path().join("mix.pcm");
    write_sine_wav(&wav, 0.5);

    let sink = OutputStream::new(
        OutputConfig::new(97)
            .device(pcm.to_str().unwrap())
            .bandwidth(Bandwidth::Full)
            .period(PeriodSize::Ms10),
    );
    let delivered = Arc::new(AtomicUsize::new(0));
    {
        let delivered = Arc::clone(&delivered);
        sink.set_delivery_callback(move |_mix, frames| {
            delivered.fetch_add(frames, Ordering::Relaxed);
        });
    }
    assert!(sink.start());

    let source = InputStream::new(
        InputConfig::new(66)
            .device(wav.to_str().unwrap())
            .bandwidth(Bandwidth::Full)
            .period(PeriodSize::Ms10),
    );
    source.connect(&sink);

    // A sink dropped before its source must only go quiet, never crash:
    // keep a dead weak destination in the fan-out list the whole time.
    {
        let doomed = OutputStream::new(
            OutputConfig::new(98)
                .device(dir.path().join("doomed.pcm").to_str().unwrap())
                .bandwidth(Bandwidth::Full)
                .period(PeriodSize::Ms10),
        );
        source.connect(&doomed);
    }

    assert!(source.start());

    // 0.5 s of audio plus slack for the file clocks.
    std::thread::sleep(Duration::from_millis(1200));

    source.stop();
    sink.stop();

    // The sink ticked for at least the duration of the file.
    let frames = delivered.load(Ordering::Relaxed);
    assert!(frames >= 24_000, "only {frames} frames delivered");

    // The mix actually contains the tone, not just silence.
    let bytes = std::fs::read(&pcm).unwrap();
    assert!(bytes.len() >= 2 * 24_000, "pcm file too short: {}", bytes.len());
    let peak = bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]).unsigned_abs())
        .max()
        .unwrap_or(0);
    assert!(peak > 6_000, "mix is near-silent, peak {peak}");

    drop(source);
    drop(sink);
    stop_service();
}
