//! Per-copy cancellation flags and line counters.
//!
//! Both are written by the worker thread and read by the scheduler and
//! observers; stop requests are flag stores, never calls into the worker's
//! critical section.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Condvar, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use rowflow_types::{StepId, StepMetrics, StepStatus};

/// Cooperative stop, safe-stop and pause flags of one step copy.
#[derive(Debug, Default)]
pub struct StepControl {
    stopped: AtomicBool,
    safe_stop: AtomicBool,
    paused: Mutex<bool>,
    resumed: Condvar,
}

impl StepControl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hard stop. Also releases a paused worker so it can observe the flag.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.resume();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Ask the copy to finish soon without truncating in-flight rows.
    pub fn request_safe_stop(&self) {
        self.safe_stop.store(true, Ordering::Release);
        self.resume();
    }

    #[must_use]
    pub fn is_safe_stop(&self) -> bool {
        self.safe_stop.load(Ordering::Acquire)
    }

    pub fn pause(&self) {
        *self.paused.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    pub fn resume(&self) {
        *self.paused.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.resumed.notify_all();
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.paused.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block while paused, waking every `poll` to re-check the stop flag.
    ///
    /// Returns `true` if the caller actually waited.
    pub fn wait_while_paused(&self, poll: Duration) -> bool {
        let mut paused = self.paused.lock().unwrap_or_else(PoisonError::into_inner);
        let mut waited = false;
        while *paused && !self.is_stopped() {
            waited = true;
            paused = self
                .resumed
                .wait_timeout(paused, poll)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        waited
    }
}

/// Line counters, status and timing of one step copy.
#[derive(Debug, Default)]
pub struct StepCounters {
    lines_read: AtomicU64,
    lines_written: AtomicU64,
    lines_input: AtomicU64,
    lines_output: AtomicU64,
    lines_rejected: AtomicU64,
    errors: AtomicU64,
    status: AtomicU8,
    started: OnceLock<Instant>,
    elapsed: OnceLock<Duration>,
}

macro_rules! counter {
    ($inc:ident, $get:ident, $field:ident) => {
        pub fn $inc(&self, n: u64) {
            self.$field.fetch_add(n, Ordering::Relaxed);
        }

        #[must_use]
        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl StepCounters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    counter!(add_read, lines_read, lines_read);
    counter!(add_written, lines_written, lines_written);
    counter!(add_input, lines_input, lines_input);
    counter!(add_output, lines_output, lines_output);
    counter!(add_rejected, lines_rejected, lines_rejected);
    counter!(add_errors, errors, errors);

    #[must_use]
    pub fn status(&self) -> StepStatus {
        StepStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Store a new status, returning the previous one.
    pub fn set_status(&self, status: StepStatus) -> StepStatus {
        StepStatus::from_u8(self.status.swap(status as u8, Ordering::AcqRel))
    }

    pub fn mark_started(&self) {
        let _ = self.started.set(Instant::now());
    }

    pub fn mark_finished(&self) {
        let elapsed = self.started.get().map(Instant::elapsed).unwrap_or_default();
        let _ = self.elapsed.set(elapsed);
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        match (self.elapsed.get(), self.started.get()) {
            (Some(elapsed), _) => *elapsed,
            (None, Some(started)) => started.elapsed(),
            (None, None) => Duration::ZERO,
        }
    }

    #[must_use]
    pub fn snapshot(&self, id: &StepId, input_buffer_rows: usize, output_buffer_rows: usize) -> StepMetrics {
        StepMetrics {
            step: id.name.clone(),
            copy: id.copy,
            status: Some(self.status()),
            lines_read: self.lines_read(),
            lines_written: self.lines_written(),
            lines_input: self.lines_input(),
            lines_output: self.lines_output(),
            lines_rejected: self.lines_rejected(),
            errors: self.errors(),
            input_buffer_rows,
            output_buffer_rows,
            duration_secs: self.duration().as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn stop_releases_paused_worker() {
        let control = Arc::new(StepControl::new());
        control.pause();
        let waiter = {
            let control = Arc::clone(&control);
            std::thread::spawn(move || control.wait_while_paused(Duration::from_millis(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        control.stop();
        assert!(waiter.join().unwrap());
        assert!(control.is_stopped());
        assert!(!control.is_paused());
    }

    #[test]
    fn wait_returns_immediately_when_running() {
        let control = StepControl::new();
        assert!(!control.wait_while_paused(Duration::from_millis(5)));
    }

    #[test]
    fn counters_snapshot() {
        let counters = StepCounters::new();
        counters.add_read(3);
        counters.add_written(2);
        counters.add_rejected(1);
        counters.set_status(StepStatus::Running);
        let snap = counters.snapshot(&StepId::new("v", 1), 4, 0);
        assert_eq!(snap.lines_read, 3);
        assert_eq!(snap.lines_written, 2);
        assert_eq!(snap.lines_rejected, 1);
        assert_eq!(snap.status, Some(StepStatus::Running));
        assert_eq!(snap.input_buffer_rows, 4);
        assert_eq!(snap.copy, 1);
    }

    #[test]
    fn set_status_returns_previous() {
        let counters = StepCounters::new();
        assert_eq!(counters.set_status(StepStatus::Initializing), StepStatus::Idle);
        assert_eq!(counters.set_status(StepStatus::Running), StepStatus::Initializing);
    }
}
