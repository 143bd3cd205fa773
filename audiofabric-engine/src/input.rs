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

//! Input stream: one capture source fanned out to local sinks and UDP
//! endpoints.
//!
//! Each capture tick runs the same pipeline: silence gate, optional rate
//! bridge to the stream rate, staging into exact periods, then fan-out.
//! Local destinations are weak references to output streams, upgraded per
//! push so a dropped sink is garbage-collected on the next tick; network
//! destinations get one OPUS datagram per period, fire-and-forget.

use std::collections::VecDeque;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use audiofabric_types::{udp_port, Bandwidth, Token};
use tokio::sync::watch;

use crate::config::InputConfig;
use crate::device::{self, pipe::PipeInputDevice, InputDevice, Negotiated};
use crate::error::EngineError;
use crate::net::NetEncoder;
use crate::output::{OutputCore, OutputStream};
use crate::resample::LinearResampler;
use crate::service;
use crate::session::SessionRing;
use crate::silence::SilenceGate;

/// Raw-tap ring depth in tap periods.
const RAW_TAP_DEPTH: usize = 2;

/// Default user-tap period in frames.
pub const DEFAULT_TAP_PERIOD: usize = 1024;

/// Physical devices are cycled this often when periodic reset is enabled.
const RESET_INTERVAL: Duration = Duration::from_secs(30 * 60);

pub(crate) type TapFn = Box<dyn FnMut(&[i16], u8) + Send>;

struct TapState {
    cb: TapFn,
    period_frames: usize,
}

/// Partial-period staging buffer plus a reusable period scratch, so the
/// capture path never allocates once warmed up.
struct StageBuf {
    queue: VecDeque<i16>,
    period: Vec<i16>,
}

pub(crate) struct InputCore {
    token: Token,
    sample_rate: u32,
    period_frames: usize,
    channels: u8,
    max_channels: u8,
    enable_network: bool,
    periodic_reset: bool,
    ready: AtomicBool,
    muted: AtomicBool,
    gate: SilenceGate,
    device: Mutex<Option<Box<dyn InputDevice>>>,
    /// Device-rate to stream-rate bridge, present when the device could not
    /// honor the requested rate.
    bridge: Mutex<Option<LinearResampler>>,
    /// Partial-period staging so downstream always sees whole periods.
    stage: Mutex<StageBuf>,
    raw_ring: Mutex<Option<Arc<SessionRing>>>,
    raw_active: AtomicBool,
    tap: Mutex<Option<TapState>>,
    loc_dests: Mutex<Vec<Weak<OutputCore>>>,
    net_dests: Mutex<Vec<SocketAddr>>,
    encoder: Mutex<Option<NetEncoder>>,
    sock: Mutex<Option<Arc<tokio::net::UdpSocket>>>,
    destroy: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    stop_tx: watch::Sender<bool>,
}

impl InputCore {
    pub(crate) fn token(&self) -> Token {
        self.token
    }

    /// Capture-tick entry point for devices whose buffer layout already
    /// matches the stream (physical, WAV file, pipe).
    pub(crate) fn capture_interleaved(&self, data: &[i16], frames: usize) {
        if !self.ready.load(Ordering::Acquire) {
            return;
        }
        if self.gate.is_silent(data, self.channels) {
            return;
        }
        let mut bridge = self.bridge.lock().unwrap();
        match bridge.as_mut() {
            Some(resampler) => {
                let (pcm, out_frames) = resampler.process(data, frames);
                self.push_raw(pcm);
                self.stage_and_route(pcm, out_frames);
            }
            None => {
                drop(bridge);
                self.push_raw(data);
                self.stage_and_route(data, frames);
            }
        }
    }

    /// Capture-tick entry point for multi-slot devices: `full` is the
    /// N-channel device buffer (kept for the raw tap), `picked` the stereo
    /// pair routed downstream.
    pub(crate) fn capture_picked(&self, full: &[i16], picked: &[i16], frames: usize) {
        if !self.ready.load(Ordering::Acquire) {
            return;
        }
        if self.gate.is_silent(picked, self.channels) {
            return;
        }
        self.push_raw(full);
        self.stage_and_route(picked, frames);
    }

    fn push_raw(&self, data: &[i16]) {
        if !self.raw_active.load(Ordering::Relaxed) {
            return;
        }
        if let Some(ring) = self.raw_ring.lock().unwrap().as_ref() {
            ring.store(data);
        }
    }

    fn stage_and_route(&self, pcm: &[i16], frames: usize) {
        let ch = self.channels as usize;
        let period_samples = self.period_frames * ch;
        let mut stage = self.stage.lock().unwrap();
        let StageBuf { queue, period } = &mut *stage;
        queue.extend(pcm[..frames * ch].iter().copied());
        while queue.len() >= period_samples {
            period.clear();
            period.extend(queue.drain(..period_samples));
            self.route_period(period);
        }
    }

    fn route_period(&self, pcm: &[i16]) {
        if self.muted.load(Ordering::Relaxed) {
            return;
        }
        {
            let mut dests = self.loc_dests.lock().unwrap();
            dests.retain(|weak| match weak.upgrade() {
                Some(sink) => {
                    sink.direct_push_pcm(
                        self.token,
                        self.channels,
                        self.period_frames,
                        self.sample_rate,
                        pcm,
                    );
                    true
                }
                None => false,
            });
        }
        if !self.enable_network {
            return;
        }
        let sock = self.sock.lock().unwrap();
        let Some(sock) = sock.as_ref() else {
            return;
        };
        let mut encoder = self.encoder.lock().unwrap();
        let Some(encoder) = encoder.as_mut() else {
            return;
        };
        if let Some(datagram) = encoder.prepare(pcm) {
            let dests = self.net_dests.lock().unwrap();
            for dest in dests.iter() {
                // Fire and forget; send errors are not reported.
                let _ = sock.try_send_to(datagram, *dest);
            }
        }
    }

    pub(crate) fn shut_down(&self) {
        if self.ready.swap(false, Ordering::AcqRel) {
            log::info!("stop input stream {}", self.token);
        }
        let _ = self.stop_tx.send(true);
        if let Ok(mut device) = self.device.lock() {
            if let Some(device) = device.as_mut() {
                device.stop();
            }
        }
    }
}

impl Drop for InputCore {
    fn drop(&mut self) {
        if let Ok(device) = self.device.get_mut() {
            if let Some(device) = device.as_mut() {
                device.stop();
            }
        }
        if let Ok(slot) = self.destroy.get_mut() {
            if let Some(destroy) = slot.take() {
                destroy();
            }
        }
    }
}

/// File-clock loop. Holds a strong reference on purpose: a file-backed
/// stream keeps playing to EOF even after its handle is dropped, which is
/// what lets the player fire sounds and forget them.
async fn run_device_clock(core: Arc<InputCore>) {
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

/// User-tap loop: drains the raw-frame ring into the callback at the
/// requested period. Holds only a weak reference.
async fn run_tap(weak: Weak<InputCore>, ring: Arc<SessionRing>, period_frames: usize, rate: u32) {
    let stop_tx = match weak.upgrade() {
        Some(core) => core.stop_tx.clone(),
        None => return,
    };
    let mut stop_rx = stop_tx.subscribe();
    let channels = ring.channels();
    let mut buf = vec![0i16; period_frames * channels as usize];
    let tick = Duration::from_micros(period_frames as u64 * 1_000_000 / rate.max(1) as u64);
    let mut timer = tokio::time::interval(tick);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = timer.tick() => {
                let Some(core) = weak.upgrade() else { break };
                if !core.ready.load(Ordering::Acquire) {
                    break;
                }
                ring.load(&mut buf);
                let mut tap = core.tap.lock().unwrap();
                if let Some(tap) = tap.as_mut() {
                    (tap.cb)(&buf, channels);
                }
            }
        }
    }
}

/// Long-run workaround: cycle a physical capture device every 30 minutes to
/// shake off driver clock drift.
async fn run_periodic_reset(weak: Weak<InputCore>) {
    let stop_tx = match weak.upgrade() {
        Some(core) => core.stop_tx.clone(),
        None => return,
    };
    let mut stop_rx = stop_tx.subscribe();
    let mut timer = tokio::time::interval(RESET_INTERVAL);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    timer.tick().await; // first tick is immediate
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = timer.tick() => {
                let Some(core) = weak.upgrade() else { break };
                if !core.ready.load(Ordering::Acquire) {
                    break;
                }
                log::info!("input stream {}: periodic device reset", core.token);
                let mut device = core.device.lock().unwrap();
                if let Some(device) = device.as_mut() {
                    device.stop();
                    if let Err(e) = device.start() {
                        log::error!("input stream {}: reset failed: {e}", core.token);
                        core.ready.store(false, Ordering::Release);
                        break;
                    }
                }
            }
        }
    }
}

/// A capture source. Dropping the handle stops the stream, except for
/// player-detached streams which play out to EOF.
pub struct InputStream {
    pub(crate) core: Arc<InputCore>,
    detached: bool,
}

impl InputStream {
    /// Open the source device described by `config`. Failure leaves the
    /// stream not-ready; `start()` will return false.
    pub fn new(config: InputConfig) -> InputStream {
        let mut bandwidth = config.bandwidth;
        if bandwidth == Bandwidth::Auto {
            log::error!("sample rate auto is not allowed for input streams, using 48 kHz");
            bandwidth = Bandwidth::Full;
        }
        let mut neg = Negotiated::request(bandwidth.hz(), config.period.ms());
        let mut open_error: Option<EngineError> = None;
        let core = Arc::new_cyclic(|weak: &Weak<InputCore>| {
            let device = match device::open_input_device(
                &config.device,
                weak.clone(),
                &config.multi_slots,
                &mut neg,
            ) {
                Ok(device) => Some(device),
                Err(e) => {
                    open_error = Some(e);
                    None
                }
            };
            Self::build_core(&config, bandwidth, neg, device)
        });
        if let Some(e) = open_error {
            log::error!("input stream {}: {e}", config.token);
        }
        InputStream {
            core,
            detached: false,
        }
    }

    /// A virtual input fed by `sink`'s post-mix delivery callback. The
    /// sink's playback tick is the clock; parameters are copied from it.
    pub fn piped(token: Token, sink: &OutputStream, enable_network: bool) -> InputStream {
        let mut config = InputConfig::new(token);
        config.enable_network = enable_network;
        let mut neg = Negotiated::request(sink.sample_rate(), 10);
        let bandwidth = Bandwidth::from_hz(sink.sample_rate()).unwrap_or(Bandwidth::Full);
        let core = Arc::new_cyclic(|weak: &Weak<InputCore>| {
            let device: Option<Box<dyn InputDevice>> = Some(Box::new(PipeInputDevice::open(
                &sink.core,
                weak.clone(),
                &mut neg,
            )));
            Self::build_core(&config, bandwidth, neg, device)
        });
        InputStream {
            core,
            detached: false,
        }
    }

    fn build_core(
        config: &InputConfig,
        bandwidth: Bandwidth,
        mut neg: Negotiated,
        device: Option<Box<dyn InputDevice>>,
    ) -> InputCore {
        if neg.sample_rate == 0 {
            neg.sample_rate = bandwidth.hz();
        }
        if neg.channels == 0 {
            neg.channels = 1;
            neg.max_channels = 1;
        }
        if neg.period_frames == 0 {
            neg.period_frames = config.period.frames(neg.sample_rate);
        }
        let bridge = neg
            .resample_from
            .map(|native| LinearResampler::new(native, neg.sample_rate, neg.channels));
        let encoder = if config.enable_network && device.is_some() {
            match NetEncoder::new(config.token, neg.channels, neg.period_frames, bandwidth) {
                Ok(encoder) => Some(encoder),
                Err(e) => {
                    log::error!("input stream {}: {e}", config.token);
                    None
                }
            }
        } else {
            None
        };
        InputCore {
            token: config.token,
            sample_rate: neg.sample_rate,
            period_frames: neg.period_frames,
            channels: neg.channels,
            max_channels: neg.max_channels.max(neg.channels),
            enable_network: config.enable_network,
            periodic_reset: config.periodic_reset,
            ready: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            gate: SilenceGate::new(config.silence_threshold),
            device: Mutex::new(device),
            bridge: Mutex::new(bridge),
            stage: Mutex::new(StageBuf {
                queue: VecDeque::with_capacity((neg.period_frames + 1) * neg.channels as usize * 4),
                period: Vec::with_capacity(neg.period_frames * neg.channels as usize),
            }),
            raw_ring: Mutex::new(None),
            raw_active: AtomicBool::new(false),
            tap: Mutex::new(None),
            loc_dests: Mutex::new(Vec::new()),
            net_dests: Mutex::new(Vec::new()),
            encoder: Mutex::new(encoder),
            sock: Mutex::new(None),
            destroy: Mutex::new(None),
            stop_tx: watch::channel(false).0,
        }
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

    /// Start the device. Networked streams bind an ephemeral UDP port for
    /// sends first; file-backed devices arm the periodic clock.
    pub fn start(&self) -> bool {
        let core = &self.core;
        if core.ready.load(Ordering::Acquire) {
            return true;
        }
        if core.enable_network {
            if let Err(e) = self.bind_send_socket() {
                log::error!("input stream {}: {e}", core.token);
                return false;
            }
        }
        {
            let mut device = core.device.lock().unwrap();
            let Some(device) = device.as_mut() else {
                log::error!("input stream {}: device was not created", core.token);
                return false;
            };
            if let Err(e) = device.start() {
                log::error!("input stream {}: {e}", core.token);
                return false;
            }
        }
        let _ = core.stop_tx.send(false);
        core.ready.store(true, Ordering::Release);

        let device_guard = core.device.lock().unwrap();
        let external = device_guard
            .as_ref()
            .map(|d| d.needs_external_loop())
            .unwrap_or(false);
        let resettable = device_guard
            .as_ref()
            .map(|d| d.supports_reset())
            .unwrap_or(false);
        drop(device_guard);

        if external || core.tap.lock().unwrap().is_some() || (core.periodic_reset && resettable) {
            let Some(handle) = service::handle() else {
                log::error!("input stream {}: audio service is not running", core.token);
                core.shut_down();
                return false;
            };
            if external {
                handle.spawn(run_device_clock(Arc::clone(core)));
            }
            if core.tap.lock().unwrap().is_some() {
                self.spawn_tap(&handle);
            }
            if core.periodic_reset && resettable {
                handle.spawn(run_periodic_reset(Arc::downgrade(core)));
            }
        }
        log::info!("start input stream {}", core.token);
        true
    }

    /// Idempotent.
    pub fn stop(&self) {
        self.core.shut_down();
    }

    /// While muted the capture pipeline keeps running but no output leaves
    /// the stream.
    pub fn mute(&self) {
        self.core.muted.store(true, Ordering::Relaxed);
    }

    pub fn unmute(&self) {
        self.core.muted.store(false, Ordering::Relaxed);
    }

    /// Fan out to a local sink. The reference is weak: the sink may be
    /// dropped independently and is skipped, then collected, afterwards.
    pub fn connect(&self, sink: &OutputStream) {
        self.core
            .loc_dests
            .lock()
            .unwrap()
            .push(Arc::downgrade(&sink.core));
    }

    /// Fan out to `ip` at the UDP port derived from `token`. False when the
    /// stream is not networked or resolution fails.
    pub fn connect_remote(&self, ip: &str, token: Token) -> bool {
        if !self.core.enable_network {
            log::error!("input stream {}: net transport is disabled", self.core.token);
            return false;
        }
        let resolved = match (ip, udp_port(token)).to_socket_addrs() {
            Ok(addrs) => addrs.collect::<Vec<_>>(),
            Err(e) => {
                log::error!("input stream {}: {e}", self.core.token);
                return false;
            }
        };
        let addr = resolved
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| resolved.first())
            .copied();
        match addr {
            Some(addr) => {
                self.core.net_dests.lock().unwrap().push(addr);
                true
            }
            None => {
                log::error!("input stream {}: '{ip}' did not resolve", self.core.token);
                false
            }
        }
    }

    /// Install a user tap: `cb(frames, channels)` is invoked every
    /// `period_frames` frames with raw captured PCM drained from the tap
    /// ring. Runs on the executor, so blocking is tolerated.
    pub fn set_callback(
        &self,
        period_frames: usize,
        cb: impl FnMut(&[i16], u8) + Send + 'static,
    ) {
        let core = &self.core;
        let period_frames = period_frames.max(1);
        let ring = Arc::new(SessionRing::new(
            period_frames * core.max_channels as usize,
            RAW_TAP_DEPTH,
            core.max_channels,
        ));
        *core.raw_ring.lock().unwrap() = Some(ring);
        *core.tap.lock().unwrap() = Some(TapState {
            cb: Box::new(cb),
            period_frames,
        });
        core.raw_active.store(true, Ordering::Release);
        if core.ready.load(Ordering::Acquire) {
            if let Some(handle) = service::handle() {
                self.spawn_tap(&handle);
            }
        }
    }

    /// Invoked exactly once when the stream's core is torn down; the player
    /// uses this to release its registry slot.
    pub fn set_destroy_callback(&self, cb: impl FnOnce() + Send + 'static) {
        *self.core.destroy.lock().unwrap() = Some(Box::new(cb));
    }

    fn spawn_tap(&self, handle: &tokio::runtime::Handle) {
        let core = &self.core;
        let ring = core.raw_ring.lock().unwrap().clone();
        let period = core
            .tap
            .lock()
            .unwrap()
            .as_ref()
            .map(|t| t.period_frames)
            .unwrap_or(DEFAULT_TAP_PERIOD);
        if let Some(ring) = ring {
            handle.spawn(run_tap(
                Arc::downgrade(core),
                ring,
                period,
                core.sample_rate,
            ));
        }
    }

    fn bind_send_socket(&self) -> crate::error::Result<()> {
        let core = &self.core;
        let handle = service::handle().ok_or(EngineError::ServiceNotRunning)?;
        let std_sock = std::net::UdpSocket::bind(("0.0.0.0", 0))
            .map_err(|e| EngineError::SocketBind(e.to_string()))?;
        std_sock
            .set_nonblocking(true)
            .map_err(|e| EngineError::SocketBind(e.to_string()))?;
        let sock = {
            let _guard = handle.enter();
            tokio::net::UdpSocket::from_std(std_sock)
                .map_err(|e| EngineError::SocketBind(e.to_string()))?
        };
        *core.sock.lock().unwrap() = Some(Arc::new(sock));
        Ok(())
    }

    /// Consume the handle without stopping the stream; the file clock keeps
    /// it alive until EOF. Used by the player.
    pub(crate) fn detach(mut self) -> Weak<InputCore> {
        self.detached = true;
        Arc::downgrade(&self.core)
    }
}

impl Drop for InputStream {
    fn drop(&mut self) {
        if !self.detached {
            self.core.shut_down();
        }
    }
}
