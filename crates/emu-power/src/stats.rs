//! Session counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters updated by the read loop and by command submission.
#[derive(Debug)]
pub struct SessionStats {
    lines: AtomicU64,
    malformed_lines: AtomicU64,
    fragments: AtomicU64,
    dispatched: AtomicU64,
    failures: AtomicU64,
    commands: AtomicU64,
    start: Instant,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            lines: AtomicU64::new(0),
            malformed_lines: AtomicU64::new(0),
            fragments: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            commands: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    /// Record a line pulled from the transport.
    pub fn record_line(&self) {
        self.lines.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a line the tokenizer could not fully consume.
    pub fn record_malformed(&self) {
        self.malformed_lines.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed fragment, decoded or not.
    pub fn record_fragment(&self) {
        self.fragments.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command(&self) {
        self.commands.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the collected counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines: self.lines.load(Ordering::Relaxed),
            malformed_lines: self.malformed_lines.load(Ordering::Relaxed),
            fragments: self.fragments.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            commands: self.commands.load(Ordering::Relaxed),
            elapsed: self.start.elapsed().as_secs_f32(),
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable view of session statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StatsSnapshot {
    pub lines: u64,
    pub malformed_lines: u64,
    pub fragments: u64,
    pub dispatched: u64,
    pub failures: u64,
    pub commands: u64,
    /// Seconds since the session was built.
    pub elapsed: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_records() {
        let stats = SessionStats::new();
        stats.record_line();
        stats.record_line();
        stats.record_malformed();
        stats.record_fragment();
        stats.record_failure();
        stats.record_command();
        let snap = stats.snapshot();
        assert_eq!(snap.lines, 2);
        assert_eq!(snap.malformed_lines, 1);
        assert_eq!(snap.fragments, 1);
        assert_eq!(snap.dispatched, 0);
        assert_eq!(snap.failures, 1);
        assert_eq!(snap.commands, 1);
        assert!(snap.elapsed >= 0.0);
    }
}
