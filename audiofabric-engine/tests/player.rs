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

//! Player lifecycle: EOF self-destruction and the bounded admission pool.

use std::path::Path;
use std::time::{Duration, Instant};

use audiofabric_engine::types::{Bandwidth, PeriodSize};
use audiofabric_engine::{
    start_service, stop_service, AudioPlayer, OutputConfig, OutputStream, MAX_CONCURRENT_SOUNDS,
};

fn write_sine_wav(path: &Path, seconds: f32) {
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
        let s = (10_000.0 * (2.0 * std::f32::consts::PI * 330.0 * t).sin()) as i16;
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

fn wait_for(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    cond()
}

#[test]
fn admission_pool_and_eof_cleanup() {
    let _ = env_logger::builder().is_test(true).try_init();
    assert!(start_service());

    let dir = tempfile::tempdir().unwrap();
    let sink = OutputStream::new(
        OutputConfig::new(200)
            .device(dir.path().join("sink.pcm").to_str().unwrap())
            .bandwidth(Bandwidth::Full)
            .period(PeriodSize::Ms10),
    );
    assert!(sink.start());

    let player = AudioPlayer::new(1);

    // A short sound plays to EOF and releases its slot by itself.
    let short = dir.path().join("short.wav");
    write_sine_wav(&short, 0.2);
    assert!(player.play(short.to_str().unwrap(), &sink));
    assert_eq!(player.live_sounds(), 1);
    assert!(
        wait_for(Duration::from_secs(3), || player.live_sounds() == 0),
        "sound did not self-destruct on EOF"
    );

    // Fill the pool with long sounds; the sixth play is refused.
    let mut names = Vec::new();
    for i in 0..MAX_CONCURRENT_SOUNDS {
        let path = dir.path().join(format!("long{i}.wav"));
        write_sine_wav(&path, 5.0);
        names.push(path.to_str().unwrap().to_string());
        assert!(player.play(&names[i], &sink), "play {i} refused");
    }
    assert_eq!(player.live_sounds(), MAX_CONCURRENT_SOUNDS);

    let overflow = dir.path().join("overflow.wav");
    write_sine_wav(&overflow, 5.0);
    assert!(
        !player.play(overflow.to_str().unwrap(), &sink),
        "sixth concurrent play must be refused"
    );

    // Stopping one sound frees a slot for the next play.
    player.stop(&names[0]);
    assert!(
        wait_for(Duration::from_secs(3), || player.live_sounds()
            < MAX_CONCURRENT_SOUNDS),
        "stopped sound did not release its slot"
    );
    assert!(player.play(overflow.to_str().unwrap(), &sink));

    for name in &names[1..] {
        player.stop(name);
    }
    player.stop(overflow.to_str().unwrap());
    assert!(
        wait_for(Duration::from_secs(3), || player.live_sounds() == 0),
        "stopped sounds did not drain"
    );

    sink.stop();
    drop(sink);
    stop_service();
}
