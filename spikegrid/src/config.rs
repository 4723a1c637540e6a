//! Kernel configuration.
//!
//! A [`KernelConfig`] is handed to
//! [`KernelInit::new()`](crate::kernel::KernelInit::new). It must be identical
//! on all ranks: the resolution and the delay overrides are cross-checked
//! during kernel initialization.
use std::error::Error;
use std::fmt;
use std::time::Duration;

use crate::comm::Rank;
use crate::coupling::PortError;
use crate::node::NodeAddr;
use crate::time::Step;

/// Configuration of a simulation kernel.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct KernelConfig {
    /// Step size of the time grid.
    pub resolution: Duration,
    /// Number of update threads per rank.
    pub num_threads: usize,
    /// Explicit minimum delay; defaults to the smallest connection delay.
    pub min_delay: Option<Duration>,
    /// Explicit maximum delay; defaults to the largest connection delay.
    pub max_delay: Option<Duration>,
    /// Explicit ring buffer capacity in steps; defaults to the maximum delay.
    pub ring_capacity: Option<Step>,
    /// Base seed of the per-thread random streams.
    pub seed: u64,
}

impl KernelConfig {
    /// Default grid resolution (0.1 ms).
    pub const DEFAULT_RESOLUTION: Duration = Duration::from_micros(100);

    /// Default base seed.
    pub const DEFAULT_SEED: u64 = 0x5eed_0f_5b1ce;

    /// Creates a configuration with the specified resolution, running on all
    /// available logical threads.
    pub fn new(resolution: Duration) -> Self {
        Self {
            resolution,
            num_threads: num_cpus::get(),
            min_delay: None,
            max_delay: None,
            ring_capacity: None,
            seed: Self::DEFAULT_SEED,
        }
    }

    /// Sets the number of update threads.
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;

        self
    }

    /// Sets an explicit minimum delay.
    ///
    /// The minimum delay determines the length of the synchronization
    /// interval. It may not exceed the delay of any connection.
    pub fn with_min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = Some(min_delay);

        self
    }

    /// Sets an explicit maximum delay.
    ///
    /// The maximum delay may not be lower than the delay of any connection.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);

        self
    }

    /// Sets an explicit ring buffer capacity in steps.
    pub fn with_ring_capacity(mut self, capacity: Step) -> Self {
        self.ring_capacity = Some(capacity);

        self
    }

    /// Sets the base seed of the per-thread random streams.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;

        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RESOLUTION)
    }
}

/// A configuration error.
///
/// Configuration errors are fatal: they are detected during kernel
/// initialization or at the first violation during a run, and are never
/// silently clamped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// The grid resolution is zero.
    ZeroResolution,
    /// The number of update threads is zero.
    ZeroThreads,
    /// A configured time does not lie on the grid.
    NotOnGrid {
        /// Name of the configuration parameter.
        what: &'static str,
        /// Offending time.
        time: Duration,
    },
    /// A connection delay is zero or is not a multiple of the resolution.
    InvalidDelay {
        /// Source of the connection.
        source: NodeAddr,
        /// Target of the connection.
        target: NodeAddr,
        /// Offending delay.
        delay: Duration,
    },
    /// A connection delay is too large to be represented.
    DelayOutOfRange {
        /// Source of the connection.
        source: NodeAddr,
        /// Target of the connection.
        target: NodeAddr,
        /// Offending delay, in steps.
        steps: Step,
    },
    /// The minimum delay is shorter than one step, which would make for a
    /// synchronization interval of zero steps.
    DegenerateInterval {
        /// Configured minimum delay.
        min_delay: Duration,
        /// Grid resolution.
        resolution: Duration,
    },
    /// The configured minimum delay exceeds the delay of a connection.
    MinDelayTooLarge {
        /// Configured minimum delay, in steps.
        configured: Step,
        /// Smallest connection delay, in steps.
        connection: Step,
    },
    /// The configured maximum delay is lower than the delay of a connection
    /// or than the minimum delay.
    MaxDelayTooSmall {
        /// Configured maximum delay, in steps.
        configured: Step,
        /// Largest delay that must be supported, in steps.
        required: Step,
    },
    /// The ring buffer capacity cannot hold the longest delay.
    CapacityTooSmall {
        /// Configured capacity, in steps.
        capacity: Step,
        /// Maximum delay, in steps.
        max_delay: Step,
    },
    /// A node address does not refer to an existing node.
    UnknownNode(NodeAddr),
    /// A rank does not exist.
    RankOutOfRange {
        /// Offending rank.
        rank: Rank,
        /// Number of ranks.
        num_ranks: usize,
    },
    /// The setup parameters of a rank differ from the local ones.
    InconsistentSetup {
        /// Rank with diverging parameters.
        rank: Rank,
        /// Name of the diverging parameter.
        what: &'static str,
    },
    /// A node emitted more events in one step than it declared.
    RateExceeded {
        /// Offending node.
        node: NodeAddr,
        /// Step at which the violation occurred.
        step: Step,
        /// Declared maximum number of events per step.
        declared: u32,
    },
    /// The number of events a rank may send to another rank over one interval
    /// does not fit the exchange frame format.
    SendBoundOverflow {
        /// Computed bound, in events per interval.
        bound: u64,
    },
    /// An external port accepts a latency below one synchronization interval.
    PortLatency {
        /// Port name.
        port: String,
        /// Declared latency.
        latency: Duration,
        /// Minimum delay of the network.
        min_delay: Duration,
    },
    /// Two external ports share the same name.
    DuplicatePort(String),
    /// The coupling adapter rejected the port negotiation.
    PortNegotiation(PortError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroResolution => write!(fmt, "the grid resolution cannot be zero"),
            Self::ZeroThreads => write!(fmt, "the number of update threads cannot be zero"),
            Self::NotOnGrid { what, time } => write!(
                fmt,
                "the {} ({:?}) is not a multiple of the grid resolution",
                what, time
            ),
            Self::InvalidDelay {
                source,
                target,
                delay,
            } => write!(
                fmt,
                "the delay of connection {} -> {} ({:?}) is not a positive multiple of the grid resolution",
                source, target, delay
            ),
            Self::DelayOutOfRange {
                source,
                target,
                steps,
            } => write!(
                fmt,
                "the delay of connection {} -> {} ({} steps) is out of range",
                source, target, steps
            ),
            Self::DegenerateInterval {
                min_delay,
                resolution,
            } => write!(
                fmt,
                "the minimum delay ({:?}) is shorter than the grid resolution ({:?})",
                min_delay, resolution
            ),
            Self::MinDelayTooLarge {
                configured,
                connection,
            } => write!(
                fmt,
                "the configured minimum delay ({} steps) exceeds the shortest connection delay ({} steps)",
                configured, connection
            ),
            Self::MaxDelayTooSmall {
                configured,
                required,
            } => write!(
                fmt,
                "the configured maximum delay ({} steps) is lower than the required {} steps",
                configured, required
            ),
            Self::CapacityTooSmall {
                capacity,
                max_delay,
            } => write!(
                fmt,
                "the ring buffer capacity ({} steps) cannot hold the maximum delay ({} steps)",
                capacity, max_delay
            ),
            Self::UnknownNode(addr) => write!(fmt, "node {} does not exist", addr),
            Self::RankOutOfRange { rank, num_ranks } => write!(
                fmt,
                "rank {} is out of range for a cluster of {} ranks",
                rank, num_ranks
            ),
            Self::InconsistentSetup { rank, what } => write!(
                fmt,
                "rank {} was set up with a different {}",
                rank, what
            ),
            Self::RateExceeded {
                node,
                step,
                declared,
            } => write!(
                fmt,
                "node {} emitted more than its declared {} events at step {}",
                node, declared, step
            ),
            Self::SendBoundOverflow { bound } => write!(
                fmt,
                "the per-interval send bound ({} events) exceeds the exchange frame capacity",
                bound
            ),
            Self::PortLatency {
                port,
                latency,
                min_delay,
            } => write!(
                fmt,
                "port '{}' accepts a latency of {:?}, below the minimum delay of {:?}",
                port, latency, min_delay
            ),
            Self::DuplicatePort(name) => write!(fmt, "port '{}' is declared twice", name),
            Self::PortNegotiation(e) => write!(fmt, "port negotiation failed: {}", e),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::PortNegotiation(e) => Some(e),
            _ => None,
        }
    }
}
