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

//! Passive tap on the UDP audio fabric.
//!
//! The observer listens like any output stream would, keeps one deep
//! session per sender, and every refresh tick drains the first session,
//! optionally forwards it to a local monitor sink, and publishes an
//! analysis frame for the UI thread.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use audiofabric_engine::{service, LinkStats, NetDecoder, OutputStream, SessionRing};
use audiofabric_types::{udp_port, PacketHeader, Token, MAX_DATAGRAM_LEN};

use crate::analysis::{self, Analyzer};

/// The probe observes as the highest token by convention.
pub const DEFAULT_OBSERVER_TOKEN: Token = u8::MAX;

/// Observer sessions buffer much deeper than playback sessions; display is
/// tolerant of latency where a speaker is not.
const OBSERVER_SESSION_DEPTH: usize = 18;

/// Display refresh period.
pub const REFRESH_MS: u64 = 40;

/// The probe decodes at full bandwidth.
pub const OBSERVER_SAMPLE_RATE: u32 = 48_000;

/// Frames drained from the watched session per refresh.
pub const FRAMES_PER_REFRESH: usize = (OBSERVER_SAMPLE_RATE as usize * REFRESH_MS as usize) / 1000;

struct Peer {
    ring: SessionRing,
    decoder: NetDecoder,
}

/// One published analysis frame, owned by the UI after a lock-swap.
#[derive(Default, Clone)]
pub struct ProbeFrame {
    pub sender: Option<Token>,
    pub channels: u8,
    pub left: Vec<i16>,
    pub right: Vec<i16>,
    pub rms_db: [f32; 2],
    pub spectrum_db: Vec<f32>,
    pub cepstrum: Vec<f32>,
    pub stats: Vec<LinkStats>,
}

pub struct Shared {
    pub frame: Mutex<ProbeFrame>,
    pub stop: AtomicBool,
}

pub struct Observer {
    shared: Arc<Shared>,
}

impl Observer {
    /// Bind the observer port and launch the receive and refresh loops on
    /// the shared executor.
    pub fn start(
        token: Token,
        monitor: Option<OutputStream>,
        json_stats: Option<String>,
    ) -> Result<Observer> {
        let handle = service::handle().context("audio service is not running")?;
        let std_sock = std::net::UdpSocket::bind(("0.0.0.0", udp_port(token)))
            .with_context(|| format!("cannot bind udp port {:#06x}", udp_port(token)))?;
        std_sock.set_nonblocking(true)?;
        let sock = {
            let _guard = handle.enter();
            tokio::net::UdpSocket::from_std(std_sock)?
        };

        let shared = Arc::new(Shared {
            frame: Mutex::new(ProbeFrame::default()),
            stop: AtomicBool::new(false),
        });
        let sessions: Arc<Mutex<BTreeMap<Token, Peer>>> = Arc::new(Mutex::new(BTreeMap::new()));

        handle.spawn(receive_loop(Arc::clone(&shared), Arc::clone(&sessions), sock));
        handle.spawn(refresh_loop(
            Arc::clone(&shared),
            sessions,
            monitor,
            json_stats,
        ));
        log::info!("observer listening on udp port {:#06x}", udp_port(token));
        Ok(Observer { shared })
    }

    pub fn shared(&self) -> Arc<Shared> {
        Arc::clone(&self.shared)
    }

    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn receive_loop(
    shared: Arc<Shared>,
    sessions: Arc<Mutex<BTreeMap<Token, Peer>>>,
    sock: tokio::net::UdpSocket,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    loop {
        if shared.stop.load(Ordering::Acquire) {
            break;
        }
        let received = tokio::time::timeout(Duration::from_millis(250), sock.recv_from(&mut buf)).await;
        let len = match received {
            Ok(Ok((len, _from))) => len,
            Ok(Err(e)) => {
                log::debug!("udp receive failed: {e}");
                continue;
            }
            Err(_elapsed) => continue,
        };
        let data = &buf[..len];
        if !PacketHeader::validate(data) {
            continue;
        }
        let sender = data[0];
        let channels = data[1];
        let mut sessions = sessions.lock().unwrap();
        if !sessions.contains_key(&sender) {
            match NetDecoder::new(sender, channels, OBSERVER_SAMPLE_RATE) {
                Ok(decoder) => {
                    let ring = SessionRing::new(
                        FRAMES_PER_REFRESH * channels as usize,
                        OBSERVER_SESSION_DEPTH,
                        channels,
                    );
                    sessions.insert(sender, Peer { ring, decoder });
                    log::info!("observing sender {sender}");
                }
                Err(e) => {
                    log::warn!("sender {sender} rejected: {e}");
                    continue;
                }
            }
        }
        let peer = sessions.get_mut(&sender).expect("admitted above");
        if let Some(pcm) = peer.decoder.commit(data) {
            peer.ring.store(pcm);
        }
    }
}

async fn refresh_loop(
    shared: Arc<Shared>,
    sessions: Arc<Mutex<BTreeMap<Token, Peer>>>,
    monitor: Option<OutputStream>,
    json_stats: Option<String>,
) {
    let mut timer = tokio::time::interval(Duration::from_millis(REFRESH_MS));
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut analyzer = Analyzer::new();
    let mut pcm: Vec<i16> = Vec::new();
    let mut json_tick = 0u32;
    loop {
        timer.tick().await;
        if shared.stop.load(Ordering::Acquire) {
            break;
        }

        let mut sender = None;
        let mut channels = 1u8;
        let mut stats = Vec::new();
        {
            let mut sessions = sessions.lock().unwrap();
            stats.extend(sessions.values().map(|p| p.decoder.stats()));
            if let Some((&token, peer)) = sessions.iter_mut().next() {
                sender = Some(token);
                channels = peer.ring.channels();
                pcm.resize(FRAMES_PER_REFRESH * channels as usize, 0);
                peer.ring.load(&mut pcm);
            }
        }

        if sender.is_none() {
            let mut frame = shared.frame.lock().unwrap();
            frame.sender = None;
            frame.stats = stats;
            continue;
        }

        if let (Some(monitor), Some(token)) = (monitor.as_ref(), sender) {
            monitor.direct_push_pcm(
                token,
                channels,
                FRAMES_PER_REFRESH,
                OBSERVER_SAMPLE_RATE,
                &pcm,
            );
        }

        let (left, right): (Vec<i16>, Vec<i16>) = if channels == 2 {
            (
                pcm.iter().step_by(2).copied().collect(),
                pcm.iter().skip(1).step_by(2).copied().collect(),
            )
        } else {
            (pcm.clone(), pcm.clone())
        };

        let spectrum_db = analyzer.spectrum_db(&left);
        let cepstrum = analyzer.cepstrum(&left);
        let rms_db = [analysis::rms_dbfs(&left), analysis::rms_dbfs(&right)];

        if let Some(path) = json_stats.as_ref() {
            json_tick += 1;
            // Once a second is plenty for a dashboard file.
            if json_tick % (1000 / REFRESH_MS as u32) == 0 {
                write_json_stats(path, &stats);
            }
        }

        let mut frame = shared.frame.lock().unwrap();
        frame.sender = sender;
        frame.channels = channels;
        frame.left = left;
        frame.right = right;
        frame.rms_db = rms_db;
        frame.spectrum_db = spectrum_db;
        frame.cepstrum = cepstrum;
        frame.stats = stats;
    }
}

fn write_json_stats(path: &str, stats: &[LinkStats]) {
    let result = File::create(path).and_then(|mut f| {
        let body = serde_json::to_string_pretty(stats).unwrap_or_default();
        f.write_all(body.as_bytes())
    });
    if let Err(e) = result {
        log::warn!("cannot write stats file {path}: {e}");
    }
}
