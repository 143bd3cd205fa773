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

//! Process-wide executor and service lifecycle.
//!
//! One shared tokio runtime carries every receive loop, file clock and user
//! tap in the process. [`start_service`] must precede any stream
//! construction, [`stop_service`] must follow the last stream drop. The
//! runtime outlives every stream; stopping it cancels all pending work and
//! joins the workers.

use std::sync::Mutex;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};

/// Periodic device timers fire slightly early to absorb OS clock-service
/// latency: 40 us on Linux, 400 us on Windows.
pub(crate) const TIMER_SKEW_US: u64 = if cfg!(windows) { 400 } else { 40 };

const WORKER_THREADS: usize = 2;

static SERVICE: Mutex<Option<Runtime>> = Mutex::new(None);

/// Start the shared audio service. Idempotent; returns false only when the
/// runtime cannot be built.
pub fn start_service() -> bool {
    let mut guard = SERVICE.lock().unwrap();
    if guard.is_some() {
        return true;
    }
    raise_timer_resolution();
    match Builder::new_multi_thread()
        .worker_threads(WORKER_THREADS)
        .enable_all()
        .thread_name("af-io")
        .on_thread_start(elevate_io_priority)
        .build()
    {
        Ok(runtime) => {
            *guard = Some(runtime);
            log::info!("audio service started");
            true
        }
        Err(e) => {
            restore_timer_resolution();
            log::error!("audio service failed to start: {e}");
            false
        }
    }
}

/// Stop the shared service: cancel pending operations, join the workers and
/// restore platform timer state. Must not be called from an executor
/// thread.
pub fn stop_service() {
    let runtime = SERVICE.lock().unwrap().take();
    if let Some(runtime) = runtime {
        runtime.shutdown_timeout(Duration::from_millis(500));
        restore_timer_resolution();
        log::info!("audio service stopped");
    }
}

/// Handle to the shared runtime, if the service is running.
pub fn handle() -> Option<Handle> {
    SERVICE.lock().unwrap().as_ref().map(|rt| rt.handle().clone())
}

#[cfg(target_os = "linux")]
fn elevate_io_priority() {
    // Best effort; unprivileged processes typically may not use SCHED_RR.
    unsafe {
        let param = libc::sched_param { sched_priority: 10 };
        if libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_RR, &param) != 0 {
            log::debug!("SCHED_RR unavailable, keeping default thread priority");
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn elevate_io_priority() {}

#[cfg(windows)]
fn raise_timer_resolution() {
    unsafe {
        windows_sys::Win32::Media::timeBeginPeriod(1);
    }
}

#[cfg(not(windows))]
fn raise_timer_resolution() {}

#[cfg(windows)]
fn restore_timer_resolution() {
    unsafe {
        windows_sys::Win32::Media::timeEndPeriod(1);
    }
}

#[cfg(not(windows))]
fn restore_timer_resolution() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_is_idempotent() {
        assert!(start_service());
        assert!(start_service());

        let rt_handle = handle().expect("service running");
        let (tx, rx) = std::sync::mpsc::channel();
        rt_handle.spawn(async move {
            let _ = tx.send(21 * 2);
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 42);

        stop_service();
        stop_service();
        assert!(handle().is_none());

        // And the service can come back.
        assert!(start_service());
        stop_service();
    }
}
