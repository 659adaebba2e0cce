//! Quiet-period batching of file-creation events.
//!
//! Paths accumulate in insertion order until no new path has arrived for the
//! quiet period, then the whole batch is handed out at once. A steady trickle
//! of arrivals spaced just under the quiet period postpones the flush
//! indefinitely; that is accepted behaviour.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

use super::RawEvent;

/// True when `path` ends in `.<extension>`, compared case-insensitively
pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

#[derive(Debug)]
pub struct Debouncer {
    quiet_period: Duration,
    extension: String,
    pending: Vec<PathBuf>,
    seen: HashSet<PathBuf>,
    last_arrival: Option<Instant>,
}

impl Debouncer {
    pub fn new(quiet_period: Duration, extension: impl Into<String>) -> Self {
        Self {
            quiet_period,
            extension: extension.into(),
            pending: Vec::new(),
            seen: HashSet::new(),
            last_arrival: None,
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Record an arrival. Returns false if the path has the wrong extension.
    ///
    /// A path already pending keeps its position; the arrival still pushes
    /// the flush back.
    pub fn push(&mut self, event: RawEvent) -> bool {
        if !has_extension(&event.path, &self.extension) {
            return false;
        }
        if self.seen.insert(event.path.clone()) {
            self.pending.push(event.path);
        }
        self.last_arrival = Some(match self.last_arrival {
            Some(prev) => prev.max(event.at),
            None => event.at,
        });
        true
    }

    /// Take the pending batch if it has been quiet for the full period
    pub fn take_ready(&mut self, now: Instant) -> Option<Vec<PathBuf>> {
        let last = self.last_arrival?;
        if self.pending.is_empty() || now.saturating_duration_since(last) < self.quiet_period {
            return None;
        }
        self.last_arrival = None;
        self.seen.clear();
        Some(std::mem::take(&mut self.pending))
    }

    /// Drop everything pending. Returns how many paths were dropped.
    pub fn discard(&mut self) -> usize {
        self.last_arrival = None;
        self.seen.clear();
        std::mem::take(&mut self.pending).len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
