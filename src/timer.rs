//! Pausable stopwatch used for dwell, restart, startup, sustain and pacing
//! delays.
//!
//! Time is passed in explicitly as milliseconds, the same convention the
//! control loop uses for every cycle. That keeps a recorded sensor trace
//! replayable: the same sequence of `now_ms` values always yields the same
//! transitions.
//!
//! # Example
//!
//! ```rust
//! use conveyor_fsm::Timer;
//!
//! let mut timer = Timer::new(1000);
//! timer.start(0);
//! timer.pause(400);
//! timer.unpause(900); // 500ms spent paused
//! assert_eq!(timer.elapsed_ms(1000), 500);
//! assert!(!timer.done(1400));
//! assert!(timer.done(1500));
//! ```

/// Stopwatch with pause/resume and a completion threshold.
///
/// All operations are total: pausing a stopped or already paused timer and
/// unpausing a running one are no-ops.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Timer {
    delay_ms: u64,
    started: bool,
    paused: bool,
    start_ms: u64,
    pause_start_ms: u64,
    paused_total_ms: u64,
}

impl Timer {
    /// Create a stopped timer that completes after `delay_ms` of running time.
    pub const fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            started: false,
            paused: false,
            start_ms: 0,
            pause_start_ms: 0,
            paused_total_ms: 0,
        }
    }

    /// Completion threshold in milliseconds.
    #[inline]
    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    /// Whether the timer has been started and not stopped since.
    #[inline]
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Whether the timer is currently paused.
    #[inline]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// (Re)arm the timer at `now_ms`, discarding any previous pause accounting.
    pub fn start(&mut self, now_ms: u64) {
        self.started = true;
        self.paused = false;
        self.start_ms = now_ms;
        self.pause_start_ms = 0;
        self.paused_total_ms = 0;
    }

    /// Freeze elapsed time. No-op unless started and not already paused.
    pub fn pause(&mut self, now_ms: u64) {
        if self.started && !self.paused {
            self.pause_start_ms = now_ms;
            self.paused = true;
        }
    }

    /// Resume after [`pause`](Self::pause). No-op unless paused.
    pub fn unpause(&mut self, now_ms: u64) {
        if self.paused {
            self.paused_total_ms += now_ms.saturating_sub(self.pause_start_ms);
            self.paused = false;
        }
    }

    /// Reset to the stopped state.
    pub fn stop(&mut self) {
        self.started = false;
        self.paused = false;
        self.start_ms = 0;
        self.pause_start_ms = 0;
        self.paused_total_ms = 0;
    }

    /// Running time since [`start`](Self::start), excluding paused spans.
    ///
    /// Returns 0 when the timer is not started.
    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        if !self.started {
            return 0;
        }
        let wall = now_ms.saturating_sub(self.start_ms);
        let in_progress = if self.paused {
            now_ms.saturating_sub(self.pause_start_ms)
        } else {
            0
        };
        wall.saturating_sub(self.paused_total_ms)
            .saturating_sub(in_progress)
    }

    /// Whether running time has reached the delay. False when not started.
    pub fn done(&self, now_ms: u64) -> bool {
        self.started && self.elapsed_ms(now_ms) >= self.delay_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_started_reports_zero_and_not_done() {
        let timer = Timer::new(0);
        assert_eq!(timer.elapsed_ms(5_000), 0);
        assert!(!timer.done(5_000));
    }

    #[test]
    fn done_at_exact_delay() {
        let mut timer = Timer::new(250);
        timer.start(1_000);
        assert!(!timer.done(1_249));
        assert!(timer.done(1_250));
        assert!(timer.done(9_999));
    }

    #[test]
    fn zero_delay_is_done_immediately_after_start() {
        let mut timer = Timer::new(0);
        timer.start(42);
        assert!(timer.done(42));
    }

    #[test]
    fn elapsed_excludes_completed_pauses() {
        let mut timer = Timer::new(10_000);
        timer.start(0);
        timer.pause(100);
        timer.unpause(300);
        timer.pause(500);
        timer.unpause(1_000);
        // 1_200 wall, 200 + 500 paused
        assert_eq!(timer.elapsed_ms(1_200), 500);
    }

    #[test]
    fn elapsed_frozen_while_paused() {
        let mut timer = Timer::new(10_000);
        timer.start(0);
        timer.pause(400);
        assert_eq!(timer.elapsed_ms(400), 400);
        assert_eq!(timer.elapsed_ms(5_000), 400);
        assert!(!timer.done(20_000));
    }

    #[test]
    fn pause_twice_is_idempotent() {
        let mut timer = Timer::new(10_000);
        timer.start(0);
        timer.pause(100);
        timer.pause(600);
        timer.unpause(700);
        assert_eq!(timer.elapsed_ms(800), 200);
    }

    #[test]
    fn pause_while_stopped_is_noop() {
        let mut timer = Timer::new(100);
        timer.pause(10);
        assert!(!timer.is_paused());
        timer.start(20);
        assert_eq!(timer.elapsed_ms(70), 50);
    }

    #[test]
    fn unpause_while_running_is_noop() {
        let mut timer = Timer::new(100);
        timer.start(0);
        timer.unpause(50);
        assert_eq!(timer.elapsed_ms(80), 80);
    }

    #[test]
    fn stop_resets_accumulators() {
        let mut timer = Timer::new(100);
        timer.start(0);
        timer.pause(10);
        timer.stop();
        assert!(!timer.is_started());
        assert!(!timer.is_paused());
        assert_eq!(timer.elapsed_ms(1_000), 0);

        timer.start(2_000);
        assert_eq!(timer.elapsed_ms(2_030), 30);
    }

    #[test]
    fn restart_clears_pause_accounting() {
        let mut timer = Timer::new(100);
        timer.start(0);
        timer.pause(10);
        timer.start(50);
        assert!(!timer.is_paused());
        assert_eq!(timer.elapsed_ms(150), 100);
        assert!(timer.done(150));
    }

    #[test]
    fn elapsed_is_monotonic_while_running() {
        let mut timer = Timer::new(1_000);
        timer.start(0);
        timer.pause(100);
        timer.unpause(200);
        let mut last = 0;
        for now in (200..2_000).step_by(37) {
            let elapsed = timer.elapsed_ms(now);
            assert!(elapsed >= last);
            last = elapsed;
        }
    }
}
