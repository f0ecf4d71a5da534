//! Frame admission and adaptive polling interval.
//!
//! The scheduler owns the interval band and the in-flight flag. Admission is
//! a pure test; `begin` and `release` bracket the single in-flight frame.

use crate::config::{DetectionMode, SchedulerSettings};
use crate::frame::FrameDefect;

/// Why a frame was not admitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    SessionInactive,
    InFlight,
    TooSoon { remaining_ms: u64 },
    InvalidFrame(FrameDefect),
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::SessionInactive => write!(f, "session inactive"),
            Rejection::InFlight => write!(f, "inference in flight"),
            Rejection::TooSoon { remaining_ms } => write!(f, "{} ms before next slot", remaining_ms),
            Rejection::InvalidFrame(defect) => write!(f, "invalid frame: {}", defect),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AdaptiveScheduler {
    settings: SchedulerSettings,
    last_processed_at_ms: Option<u64>,
    current_interval_ms: u64,
    in_flight: bool,
    consecutive_skips: u64,
    total_skips: u64,
}

impl AdaptiveScheduler {
    pub fn new(settings: SchedulerSettings, mode: DetectionMode) -> Self {
        let mut scheduler = Self {
            current_interval_ms: 0,
            settings,
            last_processed_at_ms: None,
            in_flight: false,
            consecutive_skips: 0,
            total_skips: 0,
        };
        scheduler.reset(mode);
        scheduler
    }

    /// Back to the mode's initial interval, nothing processed, no skips.
    pub fn reset(&mut self, mode: DetectionMode) {
        self.current_interval_ms = self.clamp(self.settings.initial_interval_ms(mode) as f64);
        self.last_processed_at_ms = None;
        self.in_flight = false;
        self.consecutive_skips = 0;
        self.total_skips = 0;
    }

    pub fn current_interval_ms(&self) -> u64 {
        self.current_interval_ms
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn consecutive_skips(&self) -> u64 {
        self.consecutive_skips
    }

    pub fn total_skips(&self) -> u64 {
        self.total_skips
    }

    pub fn last_processed_at_ms(&self) -> Option<u64> {
        self.last_processed_at_ms
    }

    /// Admission test. Does not change state.
    pub fn admission(
        &self,
        now_ms: u64,
        session_active: bool,
        frame: Result<(), FrameDefect>,
    ) -> Result<(), Rejection> {
        if !session_active {
            return Err(Rejection::SessionInactive);
        }
        if self.in_flight {
            return Err(Rejection::InFlight);
        }
        if let Some(last) = self.last_processed_at_ms {
            let elapsed = now_ms.saturating_sub(last);
            if elapsed < self.current_interval_ms {
                return Err(Rejection::TooSoon {
                    remaining_ms: self.current_interval_ms - elapsed,
                });
            }
        }
        frame.map_err(Rejection::InvalidFrame)
    }

    pub fn record_skip(&mut self) {
        self.consecutive_skips += 1;
        self.total_skips += 1;
    }

    /// Mark a frame admitted at `now_ms` and in flight.
    pub fn begin(&mut self, now_ms: u64) {
        self.in_flight = true;
        self.last_processed_at_ms = Some(now_ms);
        self.consecutive_skips = 0;
    }

    /// Feed the observed latency of the in-flight frame into the interval.
    pub fn adapt(&mut self, latency_ms: u64) -> u64 {
        let ceiling = self.settings.latency_ceiling_ms;
        let interval = self.current_interval_ms as f64;
        if latency_ms > ceiling {
            log::warn!("slow frame: {} ms (ceiling {} ms)", latency_ms, ceiling);
            self.set_interval(interval * self.settings.growth_factor);
        } else if latency_ms.saturating_mul(2) < ceiling
            && self.current_interval_ms > self.settings.min_interval_ms
        {
            self.set_interval(interval * self.settings.decay_factor);
        }
        self.current_interval_ms
    }

    /// Clear the in-flight flag once the frame's results are published.
    pub fn release(&mut self) {
        self.in_flight = false;
    }

    /// Apply the memory-pressure penalty when usage is above the warning level.
    pub fn apply_memory_pressure(&mut self, used_bytes: Option<u64>) -> bool {
        match used_bytes {
            Some(used) if used > self.settings.memory_warning_bytes => {
                log::warn!(
                    "memory pressure: {} MiB in use (warning at {} MiB)",
                    used / (1024 * 1024),
                    self.settings.memory_warning_bytes / (1024 * 1024)
                );
                let interval = self.current_interval_ms as f64;
                self.set_interval(interval * self.settings.memory_penalty_factor);
                true
            }
            _ => false,
        }
    }

    /// Back off after a resource-exhaustion outcome.
    pub fn back_off(&mut self) -> u64 {
        let interval = self.current_interval_ms as f64;
        self.set_interval(interval * self.settings.exhaustion_backoff_factor);
        self.current_interval_ms
    }

    fn set_interval(&mut self, value: f64) {
        let next = self.clamp(value);
        if next != self.current_interval_ms {
            log::debug!("interval {} ms -> {} ms", self.current_interval_ms, next);
        }
        self.current_interval_ms = next;
    }

    fn clamp(&self, value: f64) -> u64 {
        let (min, max) = (self.settings.min_interval_ms, self.settings.max_interval_ms);
        if !value.is_finite() {
            return max;
        }
        (value.round().max(0.0) as u64).clamp(min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> AdaptiveScheduler {
        AdaptiveScheduler::new(SchedulerSettings::default(), DetectionMode::Standard)
    }

    #[test]
    fn initial_interval_follows_mode() {
        assert_eq!(scheduler().current_interval_ms(), 500);
        let enhanced = AdaptiveScheduler::new(SchedulerSettings::default(), DetectionMode::Enhanced);
        assert_eq!(enhanced.current_interval_ms(), 300);
    }

    #[test]
    fn admission_rejects_in_order() {
        let mut s = scheduler();
        assert_eq!(s.admission(0, false, Ok(())), Err(Rejection::SessionInactive));
        assert_eq!(
            s.admission(0, true, Err(FrameDefect::Empty)),
            Err(Rejection::InvalidFrame(FrameDefect::Empty))
        );
        assert!(s.admission(0, true, Ok(())).is_ok());
        s.begin(1_000);
        assert_eq!(s.admission(1_600, true, Ok(())), Err(Rejection::InFlight));
        s.adapt(60);
        s.release();
        assert_eq!(
            s.admission(1_200, true, Ok(())),
            Err(Rejection::TooSoon { remaining_ms: 300 })
        );
        assert!(s.admission(1_500, true, Ok(())).is_ok());
    }

    #[test]
    fn skips_reset_on_admission() {
        let mut s = scheduler();
        s.record_skip();
        s.record_skip();
        assert_eq!(s.consecutive_skips(), 2);
        s.begin(0);
        assert_eq!(s.consecutive_skips(), 0);
        assert_eq!(s.total_skips(), 2);
    }

    #[test]
    fn latency_grows_and_decays_within_band() {
        let mut s = scheduler();
        assert_eq!(s.adapt(300), 600);
        assert_eq!(s.adapt(75), 600);
        assert_eq!(s.adapt(10), 540);

        for _ in 0..50 {
            s.adapt(10);
        }
        assert_eq!(s.current_interval_ms(), 200);
        for _ in 0..50 {
            s.adapt(1_000);
        }
        assert_eq!(s.current_interval_ms(), 5_000);
    }

    #[test]
    fn memory_pressure_and_backoff_apply_penalties() {
        let mut s = scheduler();
        assert!(!s.apply_memory_pressure(None));
        assert!(!s.apply_memory_pressure(Some(1024)));
        assert!(s.apply_memory_pressure(Some(60 * 1024 * 1024)));
        assert_eq!(s.current_interval_ms(), 750);
        assert_eq!(s.back_off(), 1_500);
    }
}
