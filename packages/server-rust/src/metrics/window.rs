//! Sliding-window failure ratio over classify calls.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Width of one ring slot.
const SLOT: Duration = Duration::from_secs(10);

/// Failed and total classify calls observed inside the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ErrorRate {
    pub failed: u64,
    pub total: u64,
}

impl ErrorRate {
    /// Failure ratio in `[0, 1]`; zero when nothing was observed.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failed as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    /// Absolute slot number this entry holds counts for.
    epoch: u64,
    ok: u64,
    failed: u64,
}

/// Ring of fixed-width time slots covering `window`. Slots older than the
/// window are ignored on read and overwritten on write.
#[derive(Debug)]
pub struct ErrorWindow {
    origin: Instant,
    slots: Vec<Slot>,
}

impl ErrorWindow {
    #[must_use]
    pub fn new(window: Duration, origin: Instant) -> Self {
        let count = window.as_secs().div_ceil(SLOT.as_secs()).max(1);
        let count = usize::try_from(count).unwrap_or(usize::MAX);
        Self {
            origin,
            slots: vec![Slot::default(); count],
        }
    }

    fn epoch(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.origin).as_secs() / SLOT.as_secs()
    }

    fn len(&self) -> u64 {
        self.slots.len() as u64
    }

    pub fn record(&mut self, now: Instant, ok: u64, failed: u64) {
        let epoch = self.epoch(now);
        let len = self.len();
        #[allow(clippy::cast_possible_truncation)]
        let slot = &mut self.slots[(epoch % len) as usize];
        if slot.epoch != epoch {
            *slot = Slot {
                epoch,
                ok: 0,
                failed: 0,
            };
        }
        slot.ok += ok;
        slot.failed += failed;
    }

    #[must_use]
    pub fn rate(&self, now: Instant) -> ErrorRate {
        let current = self.epoch(now);
        let oldest = current.saturating_sub(self.len() - 1);
        self.slots
            .iter()
            .filter(|slot| slot.epoch >= oldest && slot.epoch <= current)
            .fold(ErrorRate::default(), |acc, slot| ErrorRate {
                failed: acc.failed + slot.failed,
                total: acc.total + slot.ok + slot.failed,
            })
    }
}
