//! Transfer speed measurement.

use std::time::Instant;

/// Tracks instantaneous and running-average transfer speed.
///
/// `record` takes the cumulative byte count received so far and returns
/// `(instantaneous, average)` in bytes per second. Instantaneous speed is
/// computed over the interval since the previous sample; the average over
/// the whole transfer.
#[derive(Debug)]
pub struct Speedometer {
    started: Instant,
    last_sample: Instant,
    last_received: u64,
}

impl Speedometer {
    /// Starts the clock.
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_sample: now,
            last_received: 0,
        }
    }

    /// Records a cumulative byte count and returns `(speed, average)` in
    /// bytes/second.
    pub fn record(&mut self, received: u64) -> (f64, f64) {
        let now = Instant::now();

        let delta_bytes = received.saturating_sub(self.last_received) as f64;
        let delta_secs = now.duration_since(self.last_sample).as_secs_f64();
        // Sub-millisecond intervals produce silly rates; fall back to the
        // running average for the instantaneous sample.
        let elapsed = now.duration_since(self.started).as_secs_f64();
        let average = if elapsed > 0.0 {
            received as f64 / elapsed
        } else {
            received as f64
        };
        let speed = if delta_secs > 0.001 {
            delta_bytes / delta_secs
        } else {
            average
        };

        self.last_sample = now;
        self.last_received = received;
        (speed, average)
    }
}
