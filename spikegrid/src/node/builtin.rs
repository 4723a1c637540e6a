//! Built-in node models.
//!
//! * [`InhomogeneousPoissonGenerator`]: stochastic spike source with a
//!   piecewise-constant rate,
//! * [`SpikeTrain`]: deterministic spike source emitting at listed steps,
//! * [`Parrot`]: relays its input,
//! * [`Recorder`]: records its input for later inspection.
use std::error::Error;
use std::fmt;
use std::time::Duration;

mod parrot;
mod poisson;
mod recorder;
mod spike_train;

pub use parrot::Parrot;
pub use poisson::InhomogeneousPoissonGenerator;
pub use recorder::{Record, Recorder, RecorderHandle};
pub use spike_train::SpikeTrain;

/// An invalid parameter of a built-in node.
#[derive(Clone, Debug, PartialEq)]
pub enum ParameterError {
    /// A time does not lie strictly after the current simulation time.
    NotInFuture {
        /// Offending time.
        time: Duration,
    },
    /// A time does not lie on the step grid and off-grid times are not
    /// allowed.
    NotOnGrid {
        /// Offending time.
        time: Duration,
    },
    /// A time is negative or not finite.
    InvalidTime(f64),
    /// Times are not strictly increasing, after alignment to the grid.
    NotIncreasing {
        /// Index of the first offending time.
        index: usize,
    },
    /// Times and values differ in length.
    LengthMismatch {
        /// Number of times.
        times: usize,
        /// Number of values.
        values: usize,
    },
    /// Flat (time, value) data has an odd length.
    OddLength(usize),
    /// The off-grid option was changed while rate times are set.
    OffgridLocked,
    /// A binary payload is not a whole number of `f64` values; its length in
    /// bytes is given.
    MalformedPayload(usize),
}

impl fmt::Display for ParameterError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInFuture { time } => {
                write!(fmt, "time {:?} does not lie strictly in the future", time)
            }
            Self::NotOnGrid { time } => write!(
                fmt,
                "time {:?} is not representable at the current resolution",
                time
            ),
            Self::InvalidTime(t) => write!(fmt, "invalid time {}", t),
            Self::NotIncreasing { index } => write!(
                fmt,
                "times must be strictly increasing (offending index: {})",
                index
            ),
            Self::LengthMismatch { times, values } => write!(
                fmt,
                "{} times were given for {} values; both must be set together and have the same size",
                times, values
            ),
            Self::OddLength(len) => write!(
                fmt,
                "(time, value) data must have an even length, found {}",
                len
            ),
            Self::OffgridLocked => write!(
                fmt,
                "the off-grid option can only be changed together with rate times or before any rate time is set"
            ),
            Self::MalformedPayload(len) => write!(
                fmt,
                "a payload of {} bytes is not a sequence of 8-byte floats",
                len
            ),
        }
    }
}

impl Error for ParameterError {}
