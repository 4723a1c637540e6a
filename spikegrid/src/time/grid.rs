//! Uniform step grid.
use std::fmt;
use std::ops::Range;
use std::time::Duration;

use crate::config::ConfigError;
use crate::time::MonotonicTime;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Relative tolerance used when snapping a time expressed in seconds to the
/// grid.
const SECS_TOLERANCE: f64 = 1e-6;

/// Index of a simulation step.
///
/// Step `s` covers the simulation time range `[s·h, (s+1)·h)`, where `h` is
/// the resolution of the [`TimeGrid`].
pub type Step = u64;

/// A half-open range of steps `[start, end)` processed between two
/// consecutive collective exchanges.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Interval {
    start: Step,
    end: Step,
}

impl Interval {
    /// Creates a non-empty interval.
    pub(crate) fn new(start: Step, end: Step) -> Self {
        debug_assert!(start < end);

        Self { start, end }
    }

    /// First step of the interval.
    pub fn start(&self) -> Step {
        self.start
    }

    /// Step following the last step of the interval.
    pub fn end(&self) -> Step {
        self.end
    }

    /// Number of steps in the interval.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Always `false`: intervals are never empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Checks whether the step lies within the interval.
    pub fn contains(&self, step: Step) -> bool {
        (self.start..self.end).contains(&step)
    }

    /// Returns the steps of the interval in increasing order.
    pub fn steps(&self) -> Range<Step> {
        self.start..self.end
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// The uniform time grid of a simulation.
///
/// All simulation times handed to the kernel, as well as all connection
/// delays, must be integer multiples of the grid resolution.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimeGrid {
    resolution: Duration,
}

impl TimeGrid {
    /// Creates a grid with the specified step size.
    pub fn new(resolution: Duration) -> Result<Self, ConfigError> {
        if resolution.is_zero() {
            return Err(ConfigError::ZeroResolution);
        }

        Ok(Self { resolution })
    }

    /// Step size of the grid.
    pub fn resolution(&self) -> Duration {
        self.resolution
    }

    /// Converts a time to a step count, or returns `None` if the time is not
    /// a multiple of the resolution.
    pub fn steps(&self, time: Duration) -> Option<Step> {
        let h = self.resolution.as_nanos();
        let t = time.as_nanos();
        if t % h != 0 {
            return None;
        }

        Step::try_from(t / h).ok()
    }

    /// Converts a time to the index of the step boundary at or after that
    /// time, i.e. rounds up to the end of the step containing `time`.
    pub fn steps_ceil(&self, time: Duration) -> Step {
        let h = self.resolution.as_nanos();
        let t = time.as_nanos();

        Step::try_from(t.div_ceil(h)).unwrap_or(Step::MAX)
    }

    /// Converts a step count to a time.
    pub fn time(&self, step: Step) -> Duration {
        let nanos = self.resolution.as_nanos() * u128::from(step);

        Duration::new(
            (nanos / NANOS_PER_SEC) as u64,
            (nanos % NANOS_PER_SEC) as u32,
        )
    }

    /// Maps a step boundary to the monotonic timestamp used for clock
    /// synchronization, step 0 being [`MonotonicTime::EPOCH`].
    pub fn monotonic_time(&self, step: Step) -> MonotonicTime {
        MonotonicTime::EPOCH + self.time(step)
    }

    /// Converts a step count to seconds.
    ///
    /// This is a convenience for coupling adapters whose foreign peers
    /// timestamp data in seconds; the kernel never scales port data itself.
    pub fn step_to_secs(&self, step: Step) -> f64 {
        self.time(step).as_secs_f64()
    }

    /// Converts a time in seconds to a step count, or returns `None` if the
    /// time is negative, not finite, or does not lie on the grid.
    pub fn secs_to_step(&self, secs: f64) -> Option<Step> {
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        let steps = secs / self.resolution.as_secs_f64();
        let rounded = steps.round();
        if (steps - rounded).abs() > SECS_TOLERANCE * rounded.max(1.0) {
            return None;
        }

        Some(rounded as Step)
    }
}
