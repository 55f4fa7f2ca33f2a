// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Periodic statistics in InfluxDB line protocol.
//!
//! Counter owners ([`FrameStats`](crate::FrameStats),
//! [`SyncStats`](crate::SyncStats)) implement [`StatsSource`]. A
//! [`PeriodicReporter`] owned by the loop that drives them turns one interval's
//! counters into a line such as
//!
//! ```text
//! std_udp_recv,detector_name=JF07T32V01,module_id=3 n_missed_packets=0i,n_corrupted_frames=0i,repetition_rate=100i 1700000000000000000
//! ```
//!
//! and hands it to a sink (by default `log::info!`).

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Something that can report one interval's worth of counters.
pub trait StatsSource: Send + Sync {
    /// Line protocol measurement name.
    fn measurement(&self) -> &'static str;

    /// Field values accumulated since the previous call. `elapsed` is the
    /// length of that interval, for rate fields.
    fn drain(&self, elapsed: Duration) -> Vec<(&'static str, u64)>;
}

/// Monotonic counter that also remembers what was already reported.
#[derive(Debug, Default)]
pub(crate) struct Counter {
    total: AtomicU64,
    reported: AtomicU64,
}

impl Counter {
    #[inline]
    pub(crate) fn add(&self, n: u64) {
        self.total.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn inc(&self) {
        self.add(1);
    }

    #[inline]
    pub(crate) fn get(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Increase since the previous call.
    pub(crate) fn take_delta(&self) -> u64 {
        let total = self.total.load(Ordering::Relaxed);
        let previous = self.reported.swap(total, Ordering::Relaxed);
        total.wrapping_sub(previous)
    }
}

/// Events per second over `elapsed`, rounded the way the dashboards expect
/// (`(count * 1000 + 250) / elapsed_ms`).
#[must_use]
pub fn repetition_rate(events: u64, elapsed: Duration) -> u64 {
    let elapsed_ms = elapsed.as_millis().max(1) as u64;
    (events.saturating_mul(1000).saturating_add(250)) / elapsed_ms
}

/// Emits a stats line whenever its interval has passed.
pub struct PeriodicReporter {
    tags: Vec<(String, String)>,
    interval: Duration,
    interval_start: Instant,
    sink: Box<dyn FnMut(&str) + Send>,
}

impl PeriodicReporter {
    /// Reporter that logs lines at `info` level.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            tags: Vec::new(),
            interval,
            interval_start: Instant::now(),
            sink: Box::new(|line: &str| log::info!("{}", line)),
        }
    }

    /// Add a tag to every line (e.g. `detector_name`, `module_id`).
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.tags.push((key.into(), value.to_string()));
        self
    }

    /// Send lines somewhere other than the log.
    #[must_use]
    pub fn with_sink(mut self, sink: impl FnMut(&str) + Send + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Report if the interval has passed. Returns whether a line was emitted.
    pub fn maybe_report(&mut self, source: &dyn StatsSource) -> bool {
        if self.interval_start.elapsed() < self.interval {
            return false;
        }
        self.report_now(source);
        true
    }

    /// Report immediately and start a new interval.
    pub fn report_now(&mut self, source: &dyn StatsSource) {
        let elapsed = self.interval_start.elapsed();
        let fields = source.drain(elapsed);
        let timestamp_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos() as u64);

        let line = format_line(source.measurement(), &self.tags, &fields, timestamp_ns);
        (self.sink)(&line);
        self.interval_start = Instant::now();
    }
}

impl std::fmt::Debug for PeriodicReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicReporter")
            .field("tags", &self.tags)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Format one line: `measurement,tag=v,... field=Ni,... timestamp`.
#[must_use]
pub fn format_line(
    measurement: &str,
    tags: &[(String, String)],
    fields: &[(&'static str, u64)],
    timestamp_ns: u64,
) -> String {
    let mut line = String::with_capacity(128);
    line.push_str(measurement);
    for (key, value) in tags {
        let _ = write!(line, ",{}={}", escape_tag(key), escape_tag(value));
    }
    for (i, (key, value)) in fields.iter().enumerate() {
        let sep = if i == 0 { ' ' } else { ',' };
        let _ = write!(line, "{sep}{key}={value}i");
    }
    let _ = write!(line, " {timestamp_ns}");
    line
}

fn escape_tag(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, ',' | ' ' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
