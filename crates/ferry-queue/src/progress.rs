//! Progress smoothing and snapshot throttling.

use std::time::Duration;

use tokio::time::Instant;

/// EWA smoothing factor for speed calculation (2% of instant speed, 98% of previous).
const EWA_SMOOTHING: f64 = 0.02;

/// Derives a smoothed transfer rate from raw byte counts.
///
/// Used when a backend reports bytes without its own speed measurement.
#[derive(Debug, Clone)]
pub struct SpeedTracker {
    last_bytes: u64,
    last_time: Instant,
    ewa_speed: f64,
    first_update: bool,
}

impl SpeedTracker {
    /// Start tracking from `downloaded` bytes at `now`.
    pub const fn new(downloaded: u64, now: Instant) -> Self {
        Self {
            last_bytes: downloaded,
            last_time: now,
            ewa_speed: 0.0,
            first_update: true,
        }
    }

    /// Feed a sample and return the smoothed speed in bytes per second.
    pub fn sample(&mut self, downloaded: u64, now: Instant) -> f64 {
        let elapsed = now.duration_since(self.last_time).as_secs_f64();
        if elapsed <= 0.0 {
            return self.ewa_speed;
        }

        let bytes_delta = downloaded.saturating_sub(self.last_bytes);
        #[allow(clippy::cast_precision_loss)]
        let instant_speed = bytes_delta as f64 / elapsed;

        self.ewa_speed = if self.first_update {
            instant_speed
        } else {
            EWA_SMOOTHING.mul_add(instant_speed, (1.0 - EWA_SMOOTHING) * self.ewa_speed)
        };
        self.first_update = false;
        self.last_bytes = downloaded;
        self.last_time = now;

        self.ewa_speed
    }
}

/// Rate-limiter for periodic snapshots.
///
/// The periodic tick emits a snapshot every window, whether or not anything
/// changed, except right after an immediate snapshot: transitions call
/// [`SnapshotThrottle::emitted`] and the next tick inside the window is
/// skipped. Progress only marks the state as unsaved.
#[derive(Debug)]
pub struct SnapshotThrottle {
    last_immediate: Option<Instant>,
    min_interval: Duration,
    unsaved: bool,
}

impl SnapshotThrottle {
    pub const fn new(min_interval: Duration) -> Self {
        Self {
            last_immediate: None,
            min_interval,
            unsaved: false,
        }
    }

    /// Record a progress change not yet handed to the store.
    pub const fn mark_dirty(&mut self) {
        self.unsaved = true;
    }

    /// Take the unsaved flag, clearing it.
    pub const fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.unsaved, false)
    }

    /// Whether the periodic tick at `now` should emit a snapshot.
    pub fn should_emit(&self, now: Instant) -> bool {
        !matches!(
            self.last_immediate,
            Some(last) if now.saturating_duration_since(last) < self.min_interval
        )
    }

    /// An immediate snapshot went out at `now`. It also carries any unsaved
    /// progress.
    pub const fn emitted(&mut self, now: Instant) {
        self.last_immediate = Some(now);
        self.unsaved = false;
    }
}
