// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Futex wait/wake on a word that lives in shared memory.
//!
//! # SHARED vs PRIVATE
//!
//! The notifier word is mapped by several processes, so only the shared
//! opcodes work here: `FUTEX_WAIT` (0) and `FUTEX_WAKE` (1). The `_PRIVATE`
//! variants (128/129) never wake a waiter in another process.

use std::sync::atomic::AtomicU32;
use std::time::Duration;

#[cfg(target_os = "linux")]
const FUTEX_WAIT: i32 = 0;
#[cfg(target_os = "linux")]
const FUTEX_WAKE: i32 = 1;

/// Why a [`futex_wait`] call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Woken by a waker, a signal, or spuriously
    Woken,
    /// The word no longer held the expected value
    Changed,
    /// The timeout expired
    TimedOut,
}

/// Block while `*addr == expected`, at most `timeout`.
///
/// The caller must re-check its condition after any outcome.
#[cfg(target_os = "linux")]
pub fn futex_wait(addr: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
    let ts = timeout.map(|d| libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    });
    let ts_ptr = ts
        .as_ref()
        .map_or(std::ptr::null(), |t| t as *const libc::timespec);

    // SAFETY:
    // - addr is a live reference, so the word stays mapped during the call
    // - FUTEX_WAIT (shared) takes uaddr, val and an optional relative timeout;
    //   uaddr2 and val3 are ignored
    let ret = unsafe {
        libc::syscall(
            libc::SYS_futex,
            addr as *const AtomicU32 as *const u32,
            FUTEX_WAIT,
            expected,
            ts_ptr,
            std::ptr::null::<u32>(),
            0i32,
        )
    };

    if ret == 0 {
        return WaitOutcome::Woken;
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::EAGAIN) => WaitOutcome::Changed,
        Some(libc::ETIMEDOUT) => WaitOutcome::TimedOut,
        _ => WaitOutcome::Woken,
    }
}

/// Wake every waiter blocked on `addr`. Returns the number woken.
#[cfg(target_os = "linux")]
pub fn futex_wake_all(addr: &AtomicU32) -> i32 {
    // SAFETY:
    // - addr is a live reference to the shared word waiters block on
    // - FUTEX_WAKE (shared) ignores timeout, uaddr2 and val3
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            addr as *const AtomicU32 as *const u32,
            FUTEX_WAKE,
            i32::MAX,
            std::ptr::null::<libc::timespec>(),
            std::ptr::null::<u32>(),
            0i32,
        ) as i32
    }
}

// Other platforms poll: sleep briefly and let the caller re-check.
#[cfg(not(target_os = "linux"))]
pub fn futex_wait(addr: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
    use std::sync::atomic::Ordering;
    if addr.load(Ordering::Acquire) != expected {
        return WaitOutcome::Changed;
    }
    let nap = timeout.unwrap_or(Duration::from_millis(1)).min(Duration::from_millis(1));
    std::thread::sleep(nap);
    WaitOutcome::Woken
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wake_all(_addr: &AtomicU32) -> i32 {
    0
}
