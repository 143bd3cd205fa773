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

//! Output stream: one playback sink fed by any number of senders.
//!
//! Each remote sender gets a session ring plus a [`NetDecoder`]; each local
//! sender (an input stream pushing in-process) gets a session ring plus a
//! linear resampler. Every playback tick drains all sessions and mixes them
//! into the sink buffer; an optional delivery callback taps the mix.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use audiofabric_types::{udp_port, PacketHeader, Token, MAX_DATAGRAM_LEN};
use tokio::sync::watch;

use crate::config::OutputConfig;
use crate::device::{self, Negotiated, OutputDevice};
use crate::error::{EngineError, Result};
use crate::mixer;
use crate::net::{LinkStats, NetDecoder};
use crate::resample::LinearResampler;
use crate::service;
use crate::session::SessionRing;

/// Buffered periods per network session.
const NET_SESSION_DEPTH: usize = 6;
/// Buffered periods per local (in-process) session.
const LOCAL_SESSION_DEPTH: usize = 3;

pub(crate) type DeliveryFn = Box<dyn FnMut(&[i16], usize) + Send>;

struct NetPeer {
    ring: SessionRing,
    decoder: NetDecoder,
}

struct LocPeer {
    ring: SessionRing,
    resampler: LinearResampler,
}

pub(crate) struct OutputCore {
    token: Token,
    sample_rate: u32,
    period_frames: usize,
    channels: u8,
    enable_network: bool,
    ready: AtomicBool,
    device: Mutex<Option<Box<dyn OutputDevice>>>,
    net: Mutex<HashMap<Token, NetPeer>>,
    loc: Mutex<HashMap<Token, LocPeer>>,
    scratch: Mutex<Vec<i16>>,
    delivery: Mutex<Option<DeliveryFn>>,
    stop_tx: watch::Sender<bool>,
}

impl OutputCore {
    pub(crate) fn token(&self) -> Token {
        self.token
    }

    pub(crate) fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub(crate) fn channels(&self) -> u8 {
        self.channels
    }

    pub(crate) fn period_frames(&self) -> usize {
        self.period_frames
    }

    pub(crate) fn set_delivery(&self, cb: Option<DeliveryFn>) {
        *self.delivery.lock().unwrap() = cb;
    }

    /// Playback-tick entry point: zero the buffer, drain and mix every
    /// session, then hand the mix to the delivery tap. Runs on the device
    /// thread (or the file clock); keeps every lock brief.
    pub(crate) fn fill(&self, out: &mut [i16]) {
        out.fill(0);
        if !self.ready.load(Ordering::Acquire) {
            return;
        }
        let frames = out.len() / self.channels.max(1) as usize;
        let mut scratch = self.scratch.lock().unwrap();
        {
            let mut net = self.net.lock().unwrap();
            for peer in net.values_mut() {
                let ch = peer.ring.channels();
                let need = frames * ch as usize;
                if scratch.len() < need {
                    scratch.resize(need, 0);
                }
                peer.ring.load(&mut scratch[..need]);
                mixer::mix_into(&scratch[..need], out, frames, ch, self.channels);
            }
        }
        {
            let mut loc = self.loc.lock().unwrap();
            for peer in loc.values_mut() {
                let ch = peer.ring.channels();
                let need = frames * ch as usize;
                if scratch.len() < need {
                    scratch.resize(need, 0);
                }
                peer.ring.load(&mut scratch[..need]);
                mixer::mix_into(&scratch[..need], out, frames, ch, self.channels);
            }
        }
        drop(scratch);
        let mut delivery = self.delivery.lock().unwrap();
        if let Some(cb) = delivery.as_mut() {
            cb(out, frames);
        }
    }

    /// Network-receive entry point: validate, admit the sender on first
    /// contact, decode and enqueue. Malformed or undecodable datagrams are
    /// dropped without a trace.
    pub(crate) fn on_datagram(&self, data: &[u8]) {
        if !PacketHeader::validate(data) {
            return;
        }
        let sender = data[0];
        let channels = data[1];
        let mut net = self.net.lock().unwrap();
        if !net.contains_key(&sender) {
            match NetDecoder::new(sender, channels, self.sample_rate) {
                Ok(decoder) => {
                    let ring = SessionRing::new(
                        self.period_frames * channels as usize,
                        NET_SESSION_DEPTH,
                        channels,
                    );
                    net.insert(sender, NetPeer { ring, decoder });
                    log::info!("new connection: {sender}");
                }
                Err(e) => {
                    log::warn!("sender {sender} rejected: {e}");
                    return;
                }
            }
        }
        let peer = net.get_mut(&sender).expect("admitted above");
        if let Some(pcm) = peer.decoder.commit(data) {
            peer.ring.store(pcm);
        }
    }

    /// Locally injected source: admit on first push, resample to the stream
    /// rate and enqueue. The session's channel count is fixed by the first
    /// call.
    pub(crate) fn direct_push_pcm(
        &self,
        sender: Token,
        channels: u8,
        frames: usize,
        sample_rate: u32,
        data: &[i16],
    ) {
        let mut loc = self.loc.lock().unwrap();
        let peer = loc.entry(sender).or_insert_with(|| {
            log::info!("new connection: {sender}");
            LocPeer {
                ring: SessionRing::new(
                    self.period_frames * channels as usize,
                    LOCAL_SESSION_DEPTH,
                    channels,
                ),
                resampler: LinearResampler::new(sample_rate, self.sample_rate, channels),
            }
        });
        let (pcm, _) = peer.resampler.process(data, frames);
        peer.ring.store(pcm);
    }

    pub(crate) fn link_stats(&self) -> Vec<LinkStats> {
        self.net
            .lock()
            .unwrap()
            .values()
            .map(|peer| peer.decoder.stats())
            .collect()
    }

    pub(crate) fn shut_down(&self) {
        if self.ready.swap(false, Ordering::AcqRel) {
            log::info!("stop output stream {}", self.token);
        }
        let _ = self.stop_tx.send(true);
        if let Ok(mut device) = self.device.lock() {
            if let Some(device) = device.as_mut() {
                device.stop();
            }
        }
    }
}

impl Drop for OutputCore {
    fn drop(&mut self) {
        if let Ok(device) = self.device.get_mut() {
            if let Some(device) = device.as_mut() {
                device.stop();
            }
        }
    }
}

async fn run_receiver(core: Arc<OutputCore>, sock: tokio::net::UdpSocket) {
    let mut stop_rx = core.stop_tx.subscribe();
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    loop {
        if !core.ready.load(Ordering::Acquire) {
            break;
        }
        tokio::select! {
            _ = stop_rx.changed() => break,
            received = sock.recv_from(&mut buf) => match received {
                Ok((len, _from)) => core.on_datagram(&buf[..len]),
                Err(e) => log::debug!("udp receive failed: {e}"),
            },
        }
    }
}

async fn run_device_clock(core: Arc<OutputCore>) {
    let mut stop_rx = core.stop_tx.subscribe();
    let interval_ms =
        ((core.period_frames as u64 * 1000).div_ceil(core.sample_rate.max(1) as u64)).max(1);
    let tick = Duration::from_micros(interval_ms * 1000 - service::TIMER_SKEW_US);
    let mut timer = tokio::time::interval(tick);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = timer.tick() => {
                if !core.ready.load(Ordering::Acquire) {
                    break;
                }
                let alive = core
                    .device
                    .lock()
                    .unwrap()
                    .as_mut()
                    .map(|d| d.async_task(interval_ms as u32))
                    .unwrap_or(false);
                if !alive {
                    core.ready.store(false, Ordering::Release);
                    break;
                }
            }
        }
    }
}

/// A playback sink. Dropping the stream stops it; input streams referencing
/// it through weak handles go quiet without further coordination.
pub struct OutputStream {
    pub(crate) core: Arc<OutputCore>,
}

impl OutputStream {
    /// Open the sink device described by `config`. Failure leaves the
    /// stream in a not-ready state where every operation is a no-op and
    /// [`start`](Self::start) returns false.
    pub fn new(config: OutputConfig) -> OutputStream {
        let mut neg = Negotiated::request(config.bandwidth.hz(), config.period.ms());
        let mut open_error: Option<EngineError> = None;
        let slots = config.multi_slots;
        let device_name = config.device.clone();
        let core = Arc::new_cyclic(|weak: &Weak<OutputCore>| {
            let device =
                match device::open_output_device(&device_name, weak.clone(), &slots, &mut neg) {
                    Ok(device) => Some(device),
                    Err(e) => {
                        open_error = Some(e);
                        None
                    }
                };
            if neg.sample_rate == 0 {
                neg.sample_rate = 48_000;
            }
            if neg.channels == 0 {
                neg.channels = 1;
            }
            if neg.period_frames == 0 {
                neg.period_frames = config.period.frames(neg.sample_rate);
            }
            OutputCore {
                token: config.token,
                sample_rate: neg.sample_rate,
                period_frames: neg.period_frames,
                channels: neg.channels,
                enable_network: config.enable_network,
                ready: AtomicBool::new(false),
                device: Mutex::new(device),
                net: Mutex::new(HashMap::new()),
                loc: Mutex::new(HashMap::new()),
                scratch: Mutex::new(vec![0; (neg.period_frames + 16) * 2]),
                delivery: Mutex::new(None),
                stop_tx: watch::channel(false).0,
            }
        });
        if let Some(e) = open_error {
            log::error!("output stream {}: {e}", config.token);
        }
        OutputStream { core }
    }

    pub fn token(&self) -> Token {
        self.core.token
    }

    pub fn sample_rate(&self) -> u32 {
        self.core.sample_rate
    }

    pub fn channels(&self) -> u8 {
        self.core.channels
    }

    pub fn period_frames(&self) -> usize {
        self.core.period_frames
    }

    /// Start the device; when networked, also bind the UDP listener on
    /// `udp_port(token)` and post the receive loop.
    pub fn start(&self) -> bool {
        let core = &self.core;
        if core.ready.load(Ordering::Acquire) {
            return true;
        }
        {
            let mut device = core.device.lock().unwrap();
            let Some(device) = device.as_mut() else {
                log::error!("output stream {}: device was not created", core.token);
                return false;
            };
            if let Err(e) = device.start() {
                log::error!("output stream {}: {e}", core.token);
                return false;
            }
        }
        let _ = core.stop_tx.send(false);
        core.ready.store(true, Ordering::Release);

        if core.enable_network {
            if let Err(e) = self.bind_and_listen() {
                log::error!("output stream {}: {e}", core.token);
                core.shut_down();
                return false;
            }
        }

        let external = core
            .device
            .lock()
            .unwrap()
            .as_ref()
            .map(|d| d.needs_external_loop())
            .unwrap_or(false);
        if external {
            let Some(handle) = service::handle() else {
                log::error!("output stream {}: audio service is not running", core.token);
                core.shut_down();
                return false;
            };
            handle.spawn(run_device_clock(Arc::clone(core)));
        }
        log::info!("start output stream {}", core.token);
        true
    }

    /// Idempotent.
    pub fn stop(&self) {
        self.core.shut_down();
    }

    /// Locally inject one block of PCM from `sender`; creates the session
    /// and its resampler on first call.
    pub fn direct_push_pcm(
        &self,
        sender: Token,
        channels: u8,
        frames: usize,
        sample_rate: u32,
        data: &[i16],
    ) {
        self.core
            .direct_push_pcm(sender, channels, frames, sample_rate, data);
    }

    /// Install a post-mix tap invoked on every playback tick with the mixed
    /// buffer. Also the feeding mechanism for piped input streams.
    pub fn set_delivery_callback(&self, cb: impl FnMut(&[i16], usize) + Send + 'static) {
        self.core.set_delivery(Some(Box::new(cb)));
    }

    pub fn clear_delivery_callback(&self) {
        self.core.set_delivery(None);
    }

    /// Per-sender link statistics, refreshed every 200 sequences.
    pub fn link_stats(&self) -> Vec<LinkStats> {
        self.core.link_stats()
    }

    fn bind_and_listen(&self) -> Result<()> {
        let core = &self.core;
        let handle = service::handle().ok_or(EngineError::ServiceNotRunning)?;
        let std_sock = std::net::UdpSocket::bind(("0.0.0.0", udp_port(core.token)))
            .map_err(|e| EngineError::SocketBind(e.to_string()))?;
        std_sock
            .set_nonblocking(true)
            .map_err(|e| EngineError::SocketBind(e.to_string()))?;
        let sock = {
            let _guard = handle.enter();
            tokio::net::UdpSocket::from_std(std_sock)
                .map_err(|e| EngineError::SocketBind(e.to_string()))?
        };
        handle.spawn(run_receiver(Arc::clone(core), sock));
        Ok(())
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.core.shut_down();
    }
}
