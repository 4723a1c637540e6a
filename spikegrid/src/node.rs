//! Node capability interface.
//!
//! A node is a process-local computational unit updated once per step by the
//! kernel. Concrete node models implement the [`Node`] trait; the kernel only
//! ever holds `Box<dyn Node>` trait objects.
//!
//! # Update contract
//!
//! For each step of a synchronization interval, the kernel calls on every node:
//!
//! 1. [`Node::refresh()`], an explicit pre-step phase in which a node can bring
//!    time-dependent parameters up to date (for instance a rate change that
//!    must take effect one step ahead of its use),
//! 2. [`Node::update()`], which receives the drained input slot of the node
//!    for that step through an [`UpdateContext`] and may emit events.
//!
//! An event emitted at step `t` reaches each target of the emitting node at
//! step `t + d`, where `d` is the delay of the connection.
//!
//! # Examples
//!
//! A node that relays its input multiplicity, scaled down by two:
//!
//! ```
//! use spikegrid::node::{Node, NodeError, UpdateContext};
//!
//! struct Halver;
//!
//! impl Node for Halver {
//!     fn model(&self) -> &'static str {
//!         "halver"
//!     }
//!
//!     fn update(&mut self, cx: &mut UpdateContext<'_>) -> Result<(), NodeError> {
//!         let count = cx.input().multiplicity() / 2;
//!         cx.emit(count as u32)
//!     }
//! }
//! ```
use std::any::Any;
use std::error::Error;
use std::fmt;
use std::time::Duration;

use rand_chacha::ChaCha8Rng;

use crate::comm::Rank;
use crate::ring_buffer::SlotInput;
use crate::time::{Interval, Step};

pub mod builtin;

/// Random number generator handed to nodes.
///
/// Each update thread owns one generator, seeded deterministically from the
/// kernel seed, the rank and the thread index.
pub type NodeRng = ChaCha8Rng;

/// Address of a node: the rank owning it and its rank-local index.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddr {
    rank: Rank,
    index: u32,
}

impl NodeAddr {
    /// Creates a node address.
    pub const fn new(rank: Rank, index: u32) -> Self {
        Self { rank, index }
    }

    /// Rank owning the node.
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Rank-local index of the node.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.rank, self.index)
    }
}

/// Trait implemented by all node models.
pub trait Node: Send + 'static {
    /// Name of the node model, used to identify failing nodes.
    fn model(&self) -> &'static str;

    /// Maximum number of events the node may emit in a single step.
    ///
    /// The declared rate sizes the collective exchange. Exceeding it is a
    /// configuration error which aborts the run.
    fn max_rate(&self) -> u32 {
        1
    }

    /// Refreshes time-dependent parameters before the update of `step`.
    fn refresh(&mut self, step: Step) {
        let _ = step;
    }

    /// Updates the node for the current step.
    fn update(&mut self, cx: &mut UpdateContext<'_>) -> Result<(), NodeError>;

    /// Returns the multiplicity delivered to `target` for an event emitted
    /// with the specified multiplicity.
    ///
    /// This is called once per outgoing connection of every emitted event,
    /// right after the update that emitted it. Device-like nodes can override
    /// it to draw an independent multiplicity for each target. A result of 0
    /// suppresses the delivery to that target.
    fn target_multiplicity(
        &mut self,
        multiplicity: u32,
        target: NodeAddr,
        rng: &mut NodeRng,
    ) -> u32 {
        let _ = (target, rng);

        multiplicity
    }
}

/// Collects the events emitted by a node during one update.
#[derive(Debug, Default)]
pub(crate) struct Emitter {
    declared: u32,
    emitted: Vec<u32>,
    exceeded: bool,
}

impl Emitter {
    /// Prepares the emitter for the update of a node with the specified
    /// declared rate.
    pub(crate) fn reset(&mut self, declared: u32) {
        self.declared = declared;
        self.emitted.clear();
        self.exceeded = false;
    }

    fn emit(&mut self, multiplicity: u32) -> Result<(), NodeError> {
        if multiplicity == 0 {
            return Ok(());
        }
        if self.emitted.len() >= self.declared as usize {
            self.exceeded = true;

            return Err(NodeError::RateExceeded {
                declared: self.declared,
            });
        }
        self.emitted.push(multiplicity);

        Ok(())
    }

    /// Checks whether the node tried to emit more than it declared.
    pub(crate) fn exceeded(&self) -> bool {
        self.exceeded
    }

    /// Returns the multiplicities of the events emitted since the last reset.
    pub(crate) fn emitted(&self) -> &[u32] {
        &self.emitted
    }
}

/// Context of a node update.
pub struct UpdateContext<'a> {
    pub(crate) addr: NodeAddr,
    pub(crate) step: Step,
    pub(crate) interval: Interval,
    pub(crate) resolution: Duration,
    pub(crate) input: &'a SlotInput,
    pub(crate) emitter: &'a mut Emitter,
    pub(crate) rng: &'a mut NodeRng,
}

impl<'a> UpdateContext<'a> {
    /// Address of the node being updated.
    pub fn addr(&self) -> NodeAddr {
        self.addr
    }

    /// Step being updated.
    pub fn step(&self) -> Step {
        self.step
    }

    /// Synchronization interval containing the current step.
    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// Grid resolution.
    pub fn resolution(&self) -> Duration {
        self.resolution
    }

    /// Spikes delivered to the node for the current step.
    pub fn input(&self) -> &SlotInput {
        self.input
    }

    /// Emits an event with the specified multiplicity to all targets of the
    /// node.
    ///
    /// Events with a multiplicity of zero are silently discarded. An error is
    /// returned if the node exceeds its declared rate; the violation is
    /// reported by the kernel even if the error is ignored.
    pub fn emit(&mut self, multiplicity: u32) -> Result<(), NodeError> {
        self.emitter.emit(multiplicity)
    }

    /// Random number generator of the current update thread.
    pub fn rng(&mut self) -> &mut NodeRng {
        self.rng
    }
}

impl fmt::Debug for UpdateContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateContext")
            .field("addr", &self.addr)
            .field("step", &self.step)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Error returned by a node update.
#[derive(Debug)]
pub enum NodeError {
    /// The node tried to emit more events than its declared rate.
    RateExceeded {
        /// Declared maximum number of events per step.
        declared: u32,
    },
    /// The node model failed.
    Failed(Box<dyn Error + Send + Sync + 'static>),
}

impl NodeError {
    /// Creates a model failure from a message.
    pub fn new(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into().into())
    }

    /// Creates a model failure from an arbitrary error.
    pub fn from_error(error: impl Error + Send + Sync + 'static) -> Self {
        Self::Failed(Box::new(error))
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateExceeded { declared } => write!(
                fmt,
                "the node emitted more than its declared {} events in one step",
                declared
            ),
            Self::Failed(e) => write!(fmt, "{}", e),
        }
    }
}

impl Error for NodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::RateExceeded { .. } => None,
            Self::Failed(e) => Some(e.as_ref()),
        }
    }
}

/// Cause of a node failure.
pub enum FailureCause {
    /// The update returned an error.
    Error(NodeError),
    /// The update panicked; the panic payload is provided.
    Panic(Box<dyn Any + Send + 'static>),
}

impl FailureCause {
    /// Returns the panic message, if the cause is a panic with a string
    /// payload.
    pub fn panic_message(&self) -> Option<&str> {
        match self {
            Self::Error(_) => None,
            Self::Panic(payload) => payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str)),
        }
    }
}

impl fmt::Debug for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(e) => f.debug_tuple("Error").field(e).finish(),
            Self::Panic(_) => f
                .debug_tuple("Panic")
                .field(&self.panic_message().unwrap_or("<non-string payload>"))
                .finish(),
        }
    }
}

/// A failed node update, identified by node, model and step.
#[derive(Debug)]
pub struct NodeFailure {
    /// Address of the failing node.
    pub node: NodeAddr,
    /// Model of the failing node.
    pub model: &'static str,
    /// Step at which the update failed.
    pub step: Step,
    /// Cause of the failure.
    pub cause: FailureCause,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            FailureCause::Error(e) => write!(
                fmt,
                "node {} ({}) failed at step {}: {}",
                self.node, self.model, self.step, e
            ),
            FailureCause::Panic(_) => write!(
                fmt,
                "node {} ({}) panicked at step {}: {}",
                self.node,
                self.model,
                self.step,
                self.cause.panic_message().unwrap_or("<non-string payload>")
            ),
        }
    }
}

impl Error for NodeFailure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            FailureCause::Error(e) => Some(e),
            FailureCause::Panic(_) => None,
        }
    }
}
