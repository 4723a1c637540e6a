//! Simulation time.
//!
//! This module provides most notably:
//!
//! * [`TimeGrid`]: the uniform step grid on which all simulation times and
//!   connection delays must lie,
//! * [`Interval`]: a half-open range of steps processed between two collective
//!   exchanges,
//! * [`Clock`]: a trait for types that can pace a simulation against the wall
//!   clock, implemented by [`NoClock`] and [`RealTimeClock`].
//!
//! Simulation time is measured as a [`Duration`](std::time::Duration) elapsed
//! since the simulation origin. It is mapped to a [`MonotonicTime`] only when a
//! clock needs to be synchronized, with step 0 corresponding to
//! [`MonotonicTime::EPOCH`].

mod clock;
mod grid;

pub use tai_time::MonotonicTime;

pub use clock::{Clock, NoClock, RealTimeClock, SyncStatus};
pub use grid::{Interval, Step, TimeGrid};
