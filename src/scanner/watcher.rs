//! Poll-driven continuous discovery.
//!
//! Watch mode rescans the working directory on an interval and forwards the
//! classified (and debounced) events to the same pipeline entry point used
//! by one-shot discovery. The loop respects cancellation so a torn-down
//! repository leaks no timers or pending rescans.

use super::{Debouncer, FileEvent, FileStatus, Ledger, ScanError, Scanner};
use crate::engine::FilePattern;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tuning for the watch loop.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Interval between rescans.
    pub poll_interval: Duration,
    /// Quiet window for per-filename debouncing.
    pub debounce_window: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            debounce_window: super::debounce::DEFAULT_DEBOUNCE_WINDOW,
        }
    }
}

/// A batch of debounced events together with the ledger snapshot that
/// produced them.
#[derive(Debug)]
pub struct WatchBatch {
    /// Events whose quiet window has elapsed.
    pub events: Vec<FileEvent>,
    /// Refreshed ledger after the scan that observed these events.
    pub ledger: Ledger,
}

/// Continuous scanner feeding a channel of event batches.
pub struct Watcher {
    scanner: Scanner,
    options: WatchOptions,
    dir: PathBuf,
    pattern: FilePattern,
}

impl Watcher {
    /// Creates a watcher over `dir` using the given scanner and options.
    pub fn new(scanner: Scanner, options: WatchOptions, dir: PathBuf, pattern: FilePattern) -> Self {
        Self {
            scanner,
            options,
            dir,
            pattern,
        }
    }

    /// Runs the watch loop until `token` is cancelled.
    ///
    /// Each tick rescans against the ledger carried over from the previous
    /// tick; non-unchanged events are debounced per filename and released
    /// as [`WatchBatch`]es on `sink`. Scan failures are logged and the loop
    /// keeps going (a transient I/O hiccup should not end watch mode).
    pub async fn run(
        mut self,
        mut ledger: Ledger,
        sink: mpsc::Sender<WatchBatch>,
        token: CancellationToken,
    ) -> Result<(), ScanError> {
        let mut interval = tokio::time::interval(self.options.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut debouncer = Debouncer::new(self.options.debounce_window);

        info!(dir = %self.dir.display(), "watch mode started");

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("watch mode cancelled");
                    return Ok(());
                }
                _ = interval.tick() => {}
            }

            let outcome = match self.scanner.scan(&self.dir, &ledger, &self.pattern).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "watch scan failed; will retry next tick");
                    continue;
                }
            };

            let now = Instant::now();
            for event in outcome.events {
                // Steady-state files produce no work; only real changes are
                // debounced and forwarded.
                if event.status != FileStatus::Unchanged {
                    debouncer.offer(event, now);
                }
            }
            ledger = outcome.ledger;

            // Release events that have been quiet for a full window. With a
            // poll interval above the window this is everything from the
            // previous tick.
            let ready = debouncer.take_ready(Instant::now());
            if !ready.is_empty() {
                let batch = WatchBatch {
                    events: ready,
                    ledger: ledger.clone(),
                };
                if sink.send(batch).await.is_err() {
                    debug!("watch sink closed; stopping");
                    return Ok(());
                }
            }
        }
    }
}
