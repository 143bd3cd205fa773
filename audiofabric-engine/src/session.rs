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

//! Per-sender receive ring.
//!
//! One `SessionRing` sits between exactly one producer (the network receive
//! loop or a local push) and exactly one consumer (the playback tick of the
//! owning output stream). Both sides run on periodic schedules and disagree
//! rarely, so mutual exclusion is a single atomic test-and-set flag held only
//! for the enqueue/dequeue copy. Neither side ever blocks: a write that does
//! not fit is dropped, a read that cannot be satisfied yields silence.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// Headroom above the drop threshold so a single oversized store never
/// reallocates. 5760 frames of stereo is the largest decodable burst.
const STORE_SLACK: usize = 2 * 5760;

pub struct SessionRing {
    channels: u8,
    capacity: usize,
    flag: AtomicBool,
    queue: UnsafeCell<VecDeque<i16>>,
}

// The UnsafeCell is only ever accessed under the spin flag.
unsafe impl Send for SessionRing {}
unsafe impl Sync for SessionRing {}

struct SpinGuard<'a> {
    ring: &'a SessionRing,
}

impl<'a> SpinGuard<'a> {
    fn queue(&mut self) -> &mut VecDeque<i16> {
        unsafe { &mut *self.ring.queue.get() }
    }
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.ring.flag.store(false, Ordering::Release);
    }
}

impl SessionRing {
    /// `period_samples` is one period of interleaved samples for this
    /// session's channel count; `depth` is the number of buffered periods.
    /// The drop threshold is `2 * period_samples * depth`.
    pub fn new(period_samples: usize, depth: usize, channels: u8) -> Self {
        let capacity = 2 * period_samples * depth;
        Self {
            channels,
            capacity,
            flag: AtomicBool::new(false),
            queue: UnsafeCell::new(VecDeque::with_capacity(capacity + STORE_SLACK)),
        }
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Interleaved samples currently buffered.
    pub fn fill(&self) -> usize {
        let mut guard = self.lock();
        guard.queue().len()
    }

    /// Append one block of interleaved samples. If the ring already holds
    /// more than its capacity the write is discarded whole: newer data is
    /// worth less than keeping the consumer's schedule.
    pub fn store(&self, samples: &[i16]) {
        let mut guard = self.lock();
        let queue = guard.queue();
        if queue.len() <= self.capacity {
            queue.extend(samples.iter().copied());
        }
    }

    /// Fill `dest` from the ring. `dest` is zeroed first; if the ring holds
    /// fewer samples than requested nothing is dequeued and the caller plays
    /// silence. A fill above capacity drains half as coarse back-pressure
    /// against a consumer that has fallen behind.
    pub fn load(&self, dest: &mut [i16]) {
        dest.fill(0);
        let mut guard = self.lock();
        let queue = guard.queue();
        if queue.len() >= dest.len() {
            for slot in dest.iter_mut() {
                // len checked above
                *slot = queue.pop_front().unwrap_or(0);
            }
        }
        if queue.len() > self.capacity {
            let excess = queue.len() / 2;
            queue.drain(..excess);
        }
    }

    fn lock(&self) -> SpinGuard<'_> {
        while self.flag.swap(true, Ordering::Acquire) {
            std::hint::spin_loop();
        }
        SpinGuard { ring: self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn underrun_yields_silence() {
        let ring = SessionRing::new(480, 3, 1);
        let mut out = [77i16; 480];
        ring.load(&mut out);
        assert!(out.iter().all(|&s| s == 0));
        assert_eq!(ring.fill(), 0);
    }

    #[test]
    fn partial_fill_is_not_dequeued() {
        let ring = SessionRing::new(480, 3, 1);
        ring.store(&[1i16; 100]);
        let mut out = [77i16; 480];
        ring.load(&mut out);
        // Not enough buffered: silence out, data retained.
        assert!(out.iter().all(|&s| s == 0));
        assert_eq!(ring.fill(), 100);
    }

    #[test]
    fn reads_never_exceed_writes() {
        let ring = SessionRing::new(16, 3, 1);
        let mut written = 0usize;
        let mut read = 0usize;
        let mut out = [0i16; 16];
        for round in 0..50 {
            if round % 3 != 0 {
                ring.store(&[round as i16; 16]);
                written += 16;
            }
            let before = ring.fill();
            ring.load(&mut out);
            if before >= out.len() {
                read += out.len();
            }
            assert!(read <= written);
        }
    }

    #[test]
    fn overflow_drops_the_incoming_write() {
        let ring = SessionRing::new(10, 1, 1); // capacity 20
        ring.store(&[1i16; 20]);
        ring.store(&[2i16; 8]); // fill == 20 <= capacity, accepted
        assert_eq!(ring.fill(), 28);
        ring.store(&[3i16; 8]); // fill 28 > capacity, dropped
        assert_eq!(ring.fill(), 28);
    }

    #[test]
    fn overfull_ring_drains_half_on_load() {
        let ring = SessionRing::new(10, 1, 1); // capacity 20
        ring.store(&[1i16; 20]);
        ring.store(&[2i16; 10]); // 30 buffered, above capacity
        let mut out = [0i16; 4];
        ring.load(&mut out);
        // 4 read, then half of the remaining 26 dropped
        assert_eq!(ring.fill(), 13);
    }

    #[test]
    fn preserves_fifo_order() {
        let ring = SessionRing::new(4, 2, 1);
        ring.store(&[1, 2, 3, 4]);
        ring.store(&[5, 6, 7, 8]);
        let mut out = [0i16; 4];
        ring.load(&mut out);
        assert_eq!(out, [1, 2, 3, 4]);
        ring.load(&mut out);
        assert_eq!(out, [5, 6, 7, 8]);
    }

    #[test]
    fn spsc_across_threads() {
        let ring = Arc::new(SessionRing::new(64, 6, 1));
        let producer = {
            let ring = ring.clone();
            std::thread::spawn(move || {
                for i in 0..1000i16 {
                    ring.store(&[i; 64]);
                    if i % 7 == 0 {
                        std::thread::yield_now();
                    }
                }
            })
        };
        let mut out = [0i16; 64];
        for _ in 0..1000 {
            ring.load(&mut out);
            // Each block is uniform: either silence or a stored value.
            let first = out[0];
            assert!(out.iter().all(|&s| s == first));
        }
        producer.join().unwrap();
    }
}
