// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Id-only notification channel over shared memory.
//!
//! A [`Notifier`] announces "the store slot for this id is written" to any
//! number of [`NotifySubscriber`]s, in other processes or threads. Only the
//! id travels; the data stays in the [`RingStore`](crate::RingStore).
//!
//! # Memory Layout
//!
//! ```text
//! +-------------------------------------------------------------+
//! | NotifyControl (64 bytes): magic, version, capacity, head,   |
//! |                           wake (futex word)                 |
//! +-------------------------------------------------------------+
//! | NotifySlot[0] { seq: u64, id: u64 }                         |
//! | ...                                                         |
//! | NotifySlot[capacity-1]                                      |
//! +-------------------------------------------------------------+
//! ```
//!
//! # Protocol
//!
//! Sender, message `n`:
//! 1. Invalidate the slot: `seq = 0`
//! 2. Store the id
//! 3. Commit: `seq = n + 1` (Release)
//! 4. Publish: `head = n + 1` (Release)
//! 5. Bump `wake` and wake futex waiters
//!
//! Subscriber:
//! 1. Load `head` (Acquire); nothing new if `next == head`
//! 2. More than `capacity` behind: skip to the oldest retained message
//! 3. Read `seq`, id, `seq` again; accept only if both equal `next + 1`
//!
//! Everything the sender wrote before `send()` (the store slot) is visible to a
//! subscriber that received the id.

mod futex;

pub use futex::{futex_wait, futex_wake_all, WaitOutcome};

use crate::store::{Result, ShmSegment, StoreError};
use crate::ImageId;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const NOTIFY_MAGIC: u32 = 0x5344_4e54; // "SDNT"
const NOTIFY_VERSION: u32 = 1;

#[repr(C, align(64))]
struct NotifyControl {
    magic: AtomicU32,
    version: AtomicU32,
    capacity: AtomicU64,
    head: AtomicU64,
    wake: AtomicU32,
}

#[repr(C)]
struct NotifySlot {
    seq: AtomicU64,
    id: AtomicU64,
}

const _: () = assert!(std::mem::size_of::<NotifyControl>() == 64);
const _: () = assert!(std::mem::size_of::<NotifySlot>() == 16);

/// Segment size for a channel of `capacity` ids.
#[must_use]
pub const fn notify_segment_size(capacity: usize) -> usize {
    std::mem::size_of::<NotifyControl>() + capacity * std::mem::size_of::<NotifySlot>()
}

/// Typed access to the channel inside a mapped segment.
struct Channel {
    segment: ShmSegment,
    capacity: usize,
}

impl Channel {
    #[inline]
    fn control(&self) -> &NotifyControl {
        // SAFETY:
        // - the segment is at least notify_segment_size(capacity) bytes
        // - mmap returns page-aligned memory, satisfying align(64)
        // - every field is atomic, so shared access across processes is sound
        unsafe { &*(self.segment.as_ptr() as *const NotifyControl) }
    }

    #[inline]
    fn slot(&self, position: u64) -> &NotifySlot {
        let index = (position % self.capacity as u64) as usize;
        // SAFETY:
        // - index < capacity, and the slot array follows the 64-byte control block
        // - the offset is 8-byte aligned, as NotifySlot requires
        // - NotifySlot holds only atomics
        unsafe {
            &*(self
                .segment
                .as_ptr()
                .add(std::mem::size_of::<NotifyControl>())
                as *const NotifySlot)
                .add(index)
        }
    }
}

/// Sending side of an id channel. One per channel.
pub struct Notifier {
    channel: Channel,
    next: u64,
}

impl Notifier {
    /// Create the channel segment, or resume an existing one with the same capacity.
    ///
    /// # Errors
    ///
    /// Returns error if the segment cannot be created or an existing channel
    /// has a different capacity.
    pub fn create(name: &str, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(StoreError::InvalidGeometry("notifier capacity is zero".into()));
        }

        let segment = ShmSegment::create(name, notify_segment_size(capacity))?;
        let channel = Channel { segment, capacity };
        let control = channel.control();

        let next = if control.magic.load(Ordering::Acquire) == NOTIFY_MAGIC {
            let existing = control.capacity.load(Ordering::Relaxed);
            if existing != capacity as u64 {
                return Err(StoreError::InvalidGeometry(format!(
                    "notifier {} has capacity {existing}, expected {capacity}",
                    channel.segment.name()
                )));
            }
            let head = control.head.load(Ordering::Acquire);
            log::debug!("[NOTIFY] resuming {} at {}", channel.segment.name(), head);
            head
        } else {
            control.version.store(NOTIFY_VERSION, Ordering::Relaxed);
            control.capacity.store(capacity as u64, Ordering::Relaxed);
            control.head.store(0, Ordering::Relaxed);
            control.wake.store(0, Ordering::Relaxed);
            control.magic.store(NOTIFY_MAGIC, Ordering::Release);
            0
        };

        log::info!(
            "[NOTIFY] created {} capacity={}",
            channel.segment.name(),
            capacity
        );

        Ok(Self { channel, next })
    }

    /// Announce that the slot for `id` is written.
    pub fn send(&mut self, id: ImageId) {
        let n = self.next;
        let slot = self.channel.slot(n);

        slot.seq.store(0, Ordering::Relaxed);
        fence(Ordering::Release);
        slot.id.store(id, Ordering::Relaxed);
        slot.seq.store(n + 1, Ordering::Release);

        let control = self.channel.control();
        control.head.store(n + 1, Ordering::Release);
        control.wake.fetch_add(1, Ordering::Release);
        futex_wake_all(&control.wake);

        self.next = n + 1;
    }

    /// Number of ids sent on this channel since it was created.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.next
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.channel.segment.name()
    }

    /// Unmap the channel and remove its name.
    pub fn destroy(self) -> Result<()> {
        let name = self.channel.segment.name().to_string();
        drop(self.channel);
        ShmSegment::unlink(&name)
    }
}

/// Receiving side of an id channel. Any number per channel.
///
/// A new subscriber starts at the current head: it sees only ids sent after it
/// attached.
pub struct NotifySubscriber {
    channel: Channel,
    next: u64,
    lagged: u64,
}

impl NotifySubscriber {
    /// Attach to a channel created by a [`Notifier`].
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the channel does not exist yet, or
    /// `InvalidGeometry` if it is not initialized or has another capacity.
    pub fn attach(name: &str, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(StoreError::InvalidGeometry("notifier capacity is zero".into()));
        }

        let segment = ShmSegment::open(name, notify_segment_size(capacity))?;
        let channel = Channel { segment, capacity };
        let control = channel.control();

        if control.magic.load(Ordering::Acquire) != NOTIFY_MAGIC {
            return Err(StoreError::InvalidGeometry(format!(
                "notifier {} is not initialized",
                channel.segment.name()
            )));
        }
        if control.version.load(Ordering::Relaxed) != NOTIFY_VERSION {
            return Err(StoreError::InvalidGeometry(format!(
                "notifier {} has unsupported version",
                channel.segment.name()
            )));
        }
        let existing = control.capacity.load(Ordering::Relaxed);
        if existing != capacity as u64 {
            return Err(StoreError::InvalidGeometry(format!(
                "notifier {} has capacity {existing}, expected {capacity}",
                channel.segment.name()
            )));
        }

        let next = control.head.load(Ordering::Acquire);
        Ok(Self {
            channel,
            next,
            lagged: 0,
        })
    }

    /// Next id, if one was sent since the last call. Never blocks.
    pub fn try_recv(&mut self) -> Option<ImageId> {
        let capacity = self.channel.capacity as u64;

        loop {
            let head = self.channel.control().head.load(Ordering::Acquire);

            if head < self.next {
                // Sender restarted on a fresh segment
                log::info!(
                    "[NOTIFY] {} restarted, resetting cursor {} -> {}",
                    self.channel.segment.name(),
                    self.next,
                    head
                );
                self.next = head;
            }
            if self.next == head {
                return None;
            }

            let behind = head - self.next;
            if behind > capacity {
                let skipped = behind - capacity;
                log::warn!(
                    "[NOTIFY] {} subscriber lagged, skipped {} ids",
                    self.channel.segment.name(),
                    skipped
                );
                self.lagged += skipped;
                self.next = head - capacity;
            }

            let expected = self.next + 1;
            let slot = self.channel.slot(self.next);
            let seq_before = slot.seq.load(Ordering::Acquire);
            let id = slot.id.load(Ordering::Relaxed);
            fence(Ordering::Acquire);
            let seq_after = slot.seq.load(Ordering::Relaxed);

            self.next += 1;
            if seq_before == expected && seq_after == expected {
                return Some(id);
            }
            // Overwritten while reading
            self.lagged += 1;
        }
    }

    /// Next id, waiting up to `timeout` for one to be sent.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<ImageId> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(id) = self.try_recv() {
                return Some(id);
            }

            let snapshot = self.channel.control().wake.load(Ordering::Acquire);
            // Re-check after the snapshot so a send in between is not missed
            if let Some(id) = self.try_recv() {
                return Some(id);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            futex_wait(&self.channel.control().wake, snapshot, Some(remaining));
        }
    }

    /// Ids lost because this subscriber fell more than `capacity` behind.
    #[must_use]
    pub fn lagged(&self) -> u64 {
        self.lagged
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.channel.segment.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn unique_name() -> String {
        format!("stdaq_notify_test_{}_{}", std::process::id(), fastrand::u64(..))
    }

    #[test]
    fn test_send_then_receive_in_order() {
        let name = unique_name();
        let mut notifier = Notifier::create(&name, 8).unwrap();
        let mut sub = NotifySubscriber::attach(&name, 8).unwrap();

        assert_eq!(sub.try_recv(), None);
        notifier.send(10);
        notifier.send(11);
        notifier.send(9);
        assert_eq!(sub.try_recv(), Some(10));
        assert_eq!(sub.try_recv(), Some(11));
        assert_eq!(sub.try_recv(), Some(9));
        assert_eq!(sub.try_recv(), None);

        notifier.destroy().unwrap();
    }

    #[test]
    fn test_late_subscriber_starts_at_head() {
        let name = unique_name();
        let mut notifier = Notifier::create(&name, 8).unwrap();
        notifier.send(1);

        let mut sub = NotifySubscriber::attach(&name, 8).unwrap();
        assert_eq!(sub.try_recv(), None);
        notifier.send(2);
        assert_eq!(sub.try_recv(), Some(2));

        notifier.destroy().unwrap();
    }

    #[test]
    fn test_every_subscriber_sees_every_id() {
        let name = unique_name();
        let mut notifier = Notifier::create(&name, 8).unwrap();
        let mut a = NotifySubscriber::attach(&name, 8).unwrap();
        let mut b = NotifySubscriber::attach(&name, 8).unwrap();

        notifier.send(5);
        assert_eq!(a.try_recv(), Some(5));
        assert_eq!(b.try_recv(), Some(5));

        notifier.destroy().unwrap();
    }

    #[test]
    fn test_slow_subscriber_skips_to_oldest_retained() {
        let name = unique_name();
        let mut notifier = Notifier::create(&name, 4).unwrap();
        let mut sub = NotifySubscriber::attach(&name, 4).unwrap();

        for id in 0..10 {
            notifier.send(id);
        }
        let received: Vec<_> = std::iter::from_fn(|| sub.try_recv()).collect();
        assert_eq!(received, vec![6, 7, 8, 9]);
        assert_eq!(sub.lagged(), 6);

        notifier.destroy().unwrap();
    }

    #[test]
    fn test_recv_timeout_expires() {
        let name = unique_name();
        let notifier = Notifier::create(&name, 4).unwrap();
        let mut sub = NotifySubscriber::attach(&name, 4).unwrap();

        let start = Instant::now();
        assert_eq!(sub.recv_timeout(Duration::from_millis(30)), None);
        assert!(start.elapsed() >= Duration::from_millis(25));

        notifier.destroy().unwrap();
    }

    #[test]
    fn test_recv_timeout_wakes_on_send() {
        let name = unique_name();
        let mut notifier = Notifier::create(&name, 4).unwrap();
        let mut sub = NotifySubscriber::attach(&name, 4).unwrap();

        let waiter = thread::spawn(move || sub.recv_timeout(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        notifier.send(77);

        assert_eq!(waiter.join().unwrap(), Some(77));
        notifier.destroy().unwrap();
    }

    #[test]
    fn test_capacity_mismatch() {
        let name = unique_name();
        let notifier = Notifier::create(&name, 8).unwrap();
        assert!(matches!(
            NotifySubscriber::attach(&name, 16),
            Err(StoreError::SizeMismatch { .. })
        ));
        assert!(matches!(
            NotifySubscriber::attach(&name, 4),
            Err(StoreError::InvalidGeometry(_))
        ));
        notifier.destroy().unwrap();
    }

    #[test]
    fn test_recreate_resumes_sequence() {
        let name = unique_name();
        let mut first = Notifier::create(&name, 8).unwrap();
        first.send(1);
        first.send(2);
        drop(first);

        let mut second = Notifier::create(&name, 8).unwrap();
        assert_eq!(second.sent(), 2);
        let mut sub = NotifySubscriber::attach(&name, 8).unwrap();
        second.send(3);
        assert_eq!(sub.try_recv(), Some(3));

        second.destroy().unwrap();
    }

    #[test]
    fn test_attach_missing_channel() {
        assert!(matches!(
            NotifySubscriber::attach(&unique_name(), 4),
            Err(StoreError::NotFound(_))
        ));
    }
}
