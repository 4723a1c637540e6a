use std::time::{Duration, Instant, SystemTime};

use crate::time::MonotonicTime;

/// Paces a run against the wall clock.
///
/// The kernel calls [`synchronize()`](Clock::synchronize) after each interval
/// boundary has been fully processed, with the timestamp of that boundary.
/// Pacing therefore has the granularity of a synchronization interval.
pub trait Clock: Send {
    /// Blocks until the wall clock catches up with the deadline.
    fn synchronize(&mut self, deadline: MonotonicTime) -> SyncStatus;
}

/// Outcome of a clock synchronization.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    /// The deadline was met.
    Synchronized,
    /// The deadline had already elapsed; the run lags behind the wall clock by
    /// the given duration.
    OutOfSync(Duration),
}

/// A [`Clock`] that never blocks, letting the run go as fast as possible.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoClock {}

impl NoClock {
    /// Creates the clock.
    pub fn new() -> Self {
        Self {}
    }
}

impl Clock for NoClock {
    fn synchronize(&mut self, _: MonotonicTime) -> SyncStatus {
        SyncStatus::Synchronized
    }
}

/// A [`Clock`] keeping simulation time proportional to wall clock time.
///
/// The speed is the number of simulated seconds per wall clock second: a speed
/// of 1 runs in real time, a speed of 0.5 runs twice slower than real time.
///
/// Unless an explicit reference is given, the first synchronization defines
/// the reference and returns immediately, so that setup time does not count
/// against the run.
#[derive(Copy, Clone, Debug)]
pub struct RealTimeClock {
    speed: f64,
    reference: Option<(MonotonicTime, Instant)>,
}

impl RealTimeClock {
    /// Creates a real-time clock.
    pub fn new() -> Self {
        Self::with_speed(1.0)
    }

    /// Creates a clock running at the specified speed.
    ///
    /// # Panics
    ///
    /// This will panic if the speed is not strictly positive and finite.
    pub fn with_speed(speed: f64) -> Self {
        assert!(
            speed.is_finite() && speed > 0.0,
            "the clock speed must be strictly positive and finite"
        );

        Self {
            speed,
            reference: None,
        }
    }

    /// Matches the specified simulation time to a wall clock [`Instant`].
    ///
    /// The reference may lie in the past or in the future.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::{Duration, Instant};
    ///
    /// use spikegrid::time::{MonotonicTime, RealTimeClock};
    ///
    /// // Start the run 1s from now.
    /// let clock = RealTimeClock::new()
    ///     .starting_at(MonotonicTime::EPOCH, Instant::now() + Duration::from_secs(1));
    /// # let _ = clock;
    /// ```
    pub fn starting_at(mut self, simulation_ref: MonotonicTime, wall_clock_ref: Instant) -> Self {
        self.reference = Some((simulation_ref, wall_clock_ref));

        self
    }

    /// Matches the specified simulation time to a [`SystemTime`] timestamp.
    ///
    /// The system time is only used to compute the reference at construction
    /// time: pacing relies on the monotonic clock and ignores subsequent
    /// adjustments of the system time.
    pub fn starting_at_system_time(
        self,
        simulation_ref: MonotonicTime,
        wall_clock_ref: SystemTime,
    ) -> Self {
        let now = Instant::now();
        let instant = match wall_clock_ref.duration_since(SystemTime::now()) {
            Ok(ahead) => now.checked_add(ahead),
            Err(e) => now.checked_sub(e.duration()),
        };

        self.starting_at(simulation_ref, instant.unwrap_or(now))
    }

    /// Simulated seconds per wall clock second.
    pub fn speed(&self) -> f64 {
        self.speed
    }
}

impl Default for RealTimeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RealTimeClock {
    fn synchronize(&mut self, deadline: MonotonicTime) -> SyncStatus {
        let (simulation_ref, wall_clock_ref) = match self.reference {
            Some(reference) => reference,
            None => {
                self.reference = Some((deadline, Instant::now()));

                return SyncStatus::Synchronized;
            }
        };

        let target = if deadline >= simulation_ref {
            let ahead = deadline.duration_since(simulation_ref).div_f64(self.speed);
            match wall_clock_ref.checked_add(ahead) {
                Some(target) => target,
                // Unreachable in practice.
                None => return SyncStatus::Synchronized,
            }
        } else {
            let behind = simulation_ref.duration_since(deadline).div_f64(self.speed);
            match wall_clock_ref.checked_sub(behind) {
                Some(target) => target,
                None => return SyncStatus::OutOfSync(behind),
            }
        };

        let now = Instant::now();
        if now <= target {
            spin_sleep::sleep(target - now);

            return SyncStatus::Synchronized;
        }

        SyncStatus::OutOfSync(now - target)
    }
}
