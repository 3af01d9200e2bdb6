//! Per-filename event debouncing for watch mode.
//!
//! Filesystem watchers commonly report several raw events for one logical
//! change (create + write + close, or back-to-back writes). The debouncer
//! holds the most recent event per filename until the file has been quiet
//! for the configured window, so the pipeline sees one event per logical
//! change. Times are passed in explicitly; the caller owns the clock.

use super::FileEvent;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default quiet window before an event is released.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// Coalesces per-filename events closer together than a quiet window.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<String, (FileEvent, Instant)>,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_WINDOW)
    }
}

impl Debouncer {
    /// Creates a debouncer with the given quiet window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Offers an event observed at `now`.
    ///
    /// A later event for the same filename replaces the pending one and
    /// restarts its quiet window; the newest classification reflects the
    /// file's latest state.
    pub fn offer(&mut self, event: FileEvent, now: Instant) {
        self.pending.insert(event.filename.clone(), (event, now));
    }

    /// Removes and returns every event whose quiet window has elapsed at
    /// `now`, in filename order.
    pub fn take_ready(&mut self, now: Instant) -> Vec<FileEvent> {
        let mut ready: Vec<FileEvent> = Vec::new();
        self.pending.retain(|_, (event, seen)| {
            if now.duration_since(*seen) >= self.window {
                ready.push(event.clone());
                false
            } else {
                true
            }
        });
        ready.sort_by(|a, b| a.filename.cmp(&b.filename));
        ready
    }

    /// Number of events still waiting out their window.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether any event is still pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::FileStatus;

    fn event(name: &str, status: FileStatus) -> FileEvent {
        FileEvent {
            filename: name.to_string(),
            status,
        }
    }

    #[test]
    fn test_event_released_after_window() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let t0 = Instant::now();

        debouncer.offer(event("a.zip", FileStatus::Added), t0);
        assert!(debouncer.take_ready(t0 + Duration::from_millis(50)).is_empty());

        let ready = debouncer.take_ready(t0 + Duration::from_millis(100));
        assert_eq!(ready.len(), 1);
        assert!(debouncer.is_empty());
    }

    #[test]
    fn test_rapid_duplicates_coalesce_to_latest() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let t0 = Instant::now();

        debouncer.offer(event("a.zip", FileStatus::Added), t0);
        debouncer.offer(event("a.zip", FileStatus::Changed), t0 + Duration::from_millis(30));

        // The second offer restarted the window.
        assert!(debouncer
            .take_ready(t0 + Duration::from_millis(100))
            .is_empty());

        let ready = debouncer.take_ready(t0 + Duration::from_millis(130));
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].status, FileStatus::Changed);
    }

    #[test]
    fn test_distinct_filenames_are_independent() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let t0 = Instant::now();

        debouncer.offer(event("b.zip", FileStatus::Added), t0);
        debouncer.offer(event("a.zip", FileStatus::Added), t0);
        assert_eq!(debouncer.pending_len(), 2);

        let ready = debouncer.take_ready(t0 + Duration::from_millis(200));
        let names: Vec<_> = ready.iter().map(|e| e.filename.as_str()).collect();
        assert_eq!(names, vec!["a.zip", "b.zip"]);
    }
}
