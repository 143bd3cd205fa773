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

// Minimal local routing demo: capture from the default input device and
// play it back on the default output device, in-process.
//
//   cargo run --example local_loopback

use std::time::Duration;

use audiofabric_engine::{
    start_service, stop_service, InputConfig, InputStream, OutputConfig, OutputStream,
};

fn main() {
    env_logger::init();
    if !start_service() {
        return;
    }
    {
        let sink = OutputStream::new(OutputConfig::new(97));
        let source = InputStream::new(InputConfig::new(66));
        source.connect(&sink);

        if !sink.start() || !source.start() {
            log::error!("failed to start streams");
        } else {
            println!("looping default input to default output for 10 s ...");
            std::thread::sleep(Duration::from_secs(10));
        }
        source.stop();
        sink.stop();
    }
    stop_service();
}
