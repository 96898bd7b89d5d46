//! Process-lifetime cache counters

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Countable cache events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Get,
    LocalHit,
    RemoteHit,
    Miss,
    Put,
    Upload,
    FailedUpload,
    IgnoredUpload,
}

/// Monotonic counters shared by every request task
#[derive(Debug, Default)]
pub struct Metrics {
    gets: AtomicU64,
    local_hits: AtomicU64,
    remote_hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    uploads: AtomicU64,
    failed_uploads: AtomicU64,
    ignored_uploads: AtomicU64,
}

/// Point-in-time copy of [`Metrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub gets: u64,
    pub local_hits: u64,
    pub remote_hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub uploads: u64,
    pub failed_uploads: u64,
    pub ignored_uploads: u64,
}

impl Metrics {
    /// Count one event
    pub fn record(&self, event: Event) {
        let counter = match event {
            Event::Get => &self.gets,
            Event::LocalHit => &self.local_hits,
            Event::RemoteHit => &self.remote_hits,
            Event::Miss => &self.misses,
            Event::Put => &self.puts,
            Event::Upload => &self.uploads,
            Event::FailedUpload => &self.failed_uploads,
            Event::IgnoredUpload => &self.ignored_uploads,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            gets: self.gets.load(Ordering::Relaxed),
            local_hits: self.local_hits.load(Ordering::Relaxed),
            remote_hits: self.remote_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            uploads: self.uploads.load(Ordering::Relaxed),
            failed_uploads: self.failed_uploads.load(Ordering::Relaxed),
            ignored_uploads: self.ignored_uploads.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gets: {}, hits_local: {}, hits_remote: {}, misses: {}, puts: {}, uploads: {}, failed_uploads: {}, ignored_uploads: {}",
            self.gets,
            self.local_hits,
            self.remote_hits,
            self.misses,
            self.puts,
            self.uploads,
            self.failed_uploads,
            self.ignored_uploads
        )
    }
}
