//! Coalescing of directory change signals.
//!
//! Native sources fire many signals for one directory while a file is being
//! written. The settler collects them and releases the directory once it has
//! been quiet for the settle window, so a burst becomes a single diff. A
//! directory that never goes quiet is still released once `max_delay` has
//! passed since its first pending signal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Pending {
    first: Instant,
    last: Instant,
}

/// Settles directory signals by path.
#[derive(Debug)]
pub struct Settler {
    /// Pending directories: path -> first and last signal.
    pending: HashMap<PathBuf, Pending>,
    /// Quiet time required before a directory is released.
    window: Duration,
    /// Upper bound on how long a directory may stay pending.
    max_delay: Duration,
}

impl Settler {
    /// Create a settler. `max_delay` is raised to at least `window`.
    pub fn new(window: Duration, max_delay: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            window,
            max_delay: max_delay.max(window),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a change signal for a directory.
    pub fn record(&mut self, dir: PathBuf) {
        self.record_at(dir, Instant::now());
    }

    fn record_at(&mut self, dir: PathBuf, now: Instant) {
        self.pending
            .entry(dir)
            .and_modify(|p| p.last = now)
            .or_insert(Pending {
                first: now,
                last: now,
            });
    }

    /// Forget a pending directory.
    pub fn remove(&mut self, dir: &Path) {
        self.pending.remove(dir);
    }

    /// Take every directory that is ready for a diff, sorted by path.
    pub fn take_ready(&mut self) -> Vec<PathBuf> {
        self.take_ready_at(Instant::now())
    }

    fn take_ready_at(&mut self, now: Instant) -> Vec<PathBuf> {
        let window = self.window;
        let max_delay = self.max_delay;
        let mut ready = Vec::new();

        self.pending.retain(|dir, p| {
            let quiet = now.duration_since(p.last) >= window;
            let overdue = now.duration_since(p.first) >= max_delay;
            if quiet || overdue {
                ready.push(dir.clone());
                false
            } else {
                true
            }
        });

        // Parents sort before children, so a new directory is seen in its
        // parent's diff before its own
        ready.sort();
        ready
    }

    /// Take everything regardless of timing.
    pub fn drain(&mut self) -> Vec<PathBuf> {
        let mut all: Vec<PathBuf> = self.pending.drain().map(|(dir, _)| dir).collect();
        all.sort();
        all
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    #[allow(dead_code)]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
