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

//! afprobe: point a sender at this machine's token 255 port and watch the
//! stream live.

mod analysis;
mod observer;
mod ui;

use std::io::stdout;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;

use audiofabric_engine::types::{Bandwidth, PeriodSize};
use audiofabric_engine::{start_service, stop_service, OutputConfig, OutputStream};
use observer::{Observer, DEFAULT_OBSERVER_TOKEN};

/// audiofabric link probe
///
/// Subscribes to the UDP audio fabric as a passive receiver, decodes what
/// arrives and renders waveform, STFT-magnitude, cepstrum and link-quality
/// views in the terminal.
#[derive(Parser, Debug)]
#[clap(name = "afprobe", version)]
struct Args {
    /// Token to observe as; the UDP port is 0xCC00 | token.
    #[clap(long, default_value_t = DEFAULT_OBSERVER_TOKEN)]
    token: u8,

    /// Also play the watched sender on this output device.
    #[clap(long)]
    monitor: Option<String>,

    /// Periodically dump per-sender link statistics as JSON to this file.
    #[clap(long)]
    json_stats: Option<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if !start_service() {
        anyhow::bail!("audio service failed to start");
    }
    let outcome = run(args);
    stop_service();
    outcome
}

fn run(args: Args) -> Result<()> {
    let monitor = match args.monitor.as_deref() {
        Some(device) => {
            let sink = OutputStream::new(
                OutputConfig::new(254)
                    .device(device)
                    .bandwidth(Bandwidth::Full)
                    .period(PeriodSize::Ms40),
            );
            if !sink.start() {
                anyhow::bail!("monitor device '{device}' failed to start");
            }
            Some(sink)
        }
        None => None,
    };

    let observer = Observer::start(args.token, monitor, args.json_stats.clone())?;
    let shared = observer.shared();

    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let outcome = (|| -> Result<()> {
        loop {
            {
                let frame = shared.frame.lock().unwrap().clone();
                terminal.draw(|f| ui::draw(f, &frame))?;
            }
            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    let quit = matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
                        || (key.code == KeyCode::Char('c')
                            && key.modifiers.contains(KeyModifiers::CONTROL));
                    if quit {
                        break;
                    }
                }
            }
        }
        Ok(())
    })();

    observer.stop();
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    outcome
}
