// Progress reporting.
//
// A `Progress` handle maps a local 0..=100 scale onto a sub-range of the
// overall operation. All handles derived from one root share a floor, so the
// sink only ever sees strictly increasing percentages no matter which stage
// reports.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Receiver of overall progress percentages in `[0, 100]`.
pub trait ProgressSink: Send + Sync {
    fn raise(&self, percent: u8);
}

impl<F> ProgressSink for F
where
    F: Fn(u8) + Send + Sync,
{
    fn raise(&self, percent: u8) {
        self(percent)
    }
}

/// Sink that reports through the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn raise(&self, percent: u8) {
        log::info!("Progress: {percent}%.");
    }
}

#[derive(Clone)]
pub struct Progress {
    sink: Option<Arc<dyn ProgressSink>>,
    /// Last emitted overall percentage, -1 before the first report.
    floor: Arc<Mutex<i16>>,
    start: u8,
    end: u8,
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("has_sink", &self.sink.is_some())
            .field("start", &self.start)
            .field("end", &self.end)
            .field("current", &self.current())
            .finish()
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::none()
    }
}

impl Progress {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self::from_option(Some(sink))
    }

    /// Handle that reports nowhere.
    pub fn none() -> Self {
        Self::from_option(None)
    }

    pub fn from_option(sink: Option<Arc<dyn ProgressSink>>) -> Self {
        Self {
            sink,
            floor: Arc::new(Mutex::new(-1)),
            start: 0,
            end: 100,
        }
    }

    fn map(&self, local: u8) -> u8 {
        let local = u16::from(local.min(100));
        let span = u16::from(self.end - self.start);
        self.start + (span * local / 100) as u8
    }

    /// Report `percent` on this handle's local scale.
    ///
    /// Values at or below the last emitted percentage are dropped.
    pub fn report(&self, percent: u8) {
        let overall = self.map(percent);
        let mut floor = self.floor.lock().unwrap_or_else(|e| e.into_inner());
        if i16::from(overall) <= *floor {
            return;
        }
        *floor = i16::from(overall);
        if let Some(sink) = &self.sink {
            sink.raise(overall);
        }
    }

    /// Child handle whose 0..=100 covers `from..=to` of this handle.
    pub fn sub_range(&self, from: u8, to: u8) -> Progress {
        let from = self.map(from);
        let to = self.map(to).max(from);
        Progress {
            sink: self.sink.clone(),
            floor: Arc::clone(&self.floor),
            start: from,
            end: to,
        }
    }

    /// Child handle covering whatever is left between the last emitted
    /// percentage and the end of this handle's range.
    pub fn remaining(&self) -> Progress {
        let from = self.current().map_or(self.start, |c| c.clamp(self.start, self.end));
        Progress {
            sink: self.sink.clone(),
            floor: Arc::clone(&self.floor),
            start: from,
            end: self.end,
        }
    }

    /// Last emitted overall percentage.
    pub fn current(&self) -> Option<u8> {
        let floor = *self.floor.lock().unwrap_or_else(|e| e.into_inner());
        u8::try_from(floor).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Progress, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress = Progress::new(Arc::new(move |p: u8| sink.lock().unwrap().push(p)));
        (progress, seen)
    }

    #[test]
    fn reports_are_monotonic() {
        let (progress, seen) = recorder();
        for p in [0, 10, 5, 10, 50, 40, 100, 100] {
            progress.report(p);
        }
        assert_eq!(*seen.lock().unwrap(), [0, 10, 50, 100]);
    }

    #[test]
    fn sub_ranges_compose() {
        let (progress, seen) = recorder();
        let first = progress.sub_range(0, 50);
        first.report(0);
        first.report(100);
        let second = progress.sub_range(50, 100);
        second.report(50);
        second.report(100);
        assert_eq!(*seen.lock().unwrap(), [0, 50, 75, 100]);
    }

    #[test]
    fn remaining_starts_at_current() {
        let (progress, seen) = recorder();
        progress.sub_range(0, 70).report(60);
        let rest = progress.remaining();
        rest.report(0);
        rest.report(50);
        rest.report(100);
        assert_eq!(*seen.lock().unwrap(), [42, 71, 100]);
    }

    #[test]
    fn none_tracks_floor_without_sink() {
        let progress = Progress::none();
        assert_eq!(progress.current(), None);
        progress.report(30);
        assert_eq!(progress.current(), Some(30));
    }
}
