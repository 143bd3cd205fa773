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

//! Fire-and-forget WAV playback.
//!
//! Each `play` spawns a transient file-backed input stream, wires it to its
//! destination and lets go: the stream's file clock keeps it alive until
//! EOF, at which point its destroy callback releases the registry slot. The
//! registry holds only weak references, so `stop` works while a sound plays
//! and a finished sound cleans up after itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use audiofabric_types::{PeriodSize, Token};

use crate::config::InputConfig;
use crate::input::{InputCore, InputStream};
use crate::output::OutputStream;

/// Admission bound: a sixth concurrent `play` is refused.
pub const MAX_CONCURRENT_SOUNDS: usize = 5;

pub struct AudioPlayer {
    token: Token,
    live: Arc<AtomicUsize>,
    sounds: Arc<Mutex<HashMap<String, Weak<InputCore>>>>,
}

impl AudioPlayer {
    pub fn new(token: Token) -> Self {
        Self {
            token,
            live: Arc::new(AtomicUsize::new(0)),
            sounds: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of sounds currently playing.
    pub fn live_sounds(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Play `name` (a WAV file) into a local sink.
    pub fn play(&self, name: &str, sink: &OutputStream) -> bool {
        self.play_inner(name, false, |stream| {
            stream.connect(sink);
            true
        })
    }

    /// Play `name` to a remote output stream at `ip` / `token`.
    pub fn play_remote(&self, name: &str, ip: &str, token: Token) -> bool {
        self.play_inner(name, true, |stream| stream.connect_remote(ip, token))
    }

    fn play_inner(
        &self,
        name: &str,
        networked: bool,
        wire: impl FnOnce(&InputStream) -> bool,
    ) -> bool {
        let slot = self.live.load(Ordering::Acquire);
        if slot >= MAX_CONCURRENT_SOUNDS {
            log::warn!("player {}: too many concurrent sounds", self.token);
            return false;
        }
        self.live.fetch_add(1, Ordering::AcqRel);

        let mut config = InputConfig::new(self.token.wrapping_add(slot as u8))
            .device(name)
            .period(PeriodSize::Ms20);
        config.enable_network = networked;
        let stream = InputStream::new(config);

        // Balance the admission count no matter how this sound ends:
        // natural EOF, explicit stop, or a failure below.
        let live = Arc::clone(&self.live);
        let sounds = Arc::clone(&self.sounds);
        let key = name.to_string();
        stream.set_destroy_callback(move || {
            live.fetch_sub(1, Ordering::AcqRel);
            sounds.lock().unwrap().remove(&key);
        });

        if !wire(&stream) {
            return false;
        }
        self.sounds
            .lock()
            .unwrap()
            .insert(name.to_string(), Arc::downgrade(&stream.core));
        if !stream.start() {
            return false;
        }
        stream.detach();
        true
    }

    /// Force-stop a playing sound; weak references in sinks go inert.
    pub fn stop(&self, name: &str) {
        let core = self
            .sounds
            .lock()
            .unwrap()
            .get(name)
            .and_then(Weak::upgrade);
        if let Some(core) = core {
            core.shut_down();
        }
    }
}
