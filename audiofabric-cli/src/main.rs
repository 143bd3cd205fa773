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

mod cli_args;
mod modes;

use anyhow::Result;
use clap::Parser;

use cli_args::{Mode, Opt};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let opt = Opt::parse();

    if let Mode::ListDevices = opt.mode {
        return modes::list_devices();
    }

    if !audiofabric_engine::start_service() {
        anyhow::bail!("audio service failed to start");
    }
    let outcome = match opt.mode {
        Mode::ListDevices => unreachable!("handled above"),
        Mode::Send(args) => modes::send(args),
        Mode::Recv(args) => modes::recv(args),
        Mode::Loopback(args) => modes::loopback(args),
        Mode::Play(args) => modes::play(args),
    };
    audiofabric_engine::stop_service();
    outcome
}
