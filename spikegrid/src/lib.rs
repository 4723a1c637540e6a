//! A time-driven, distributed spike delivery and scheduling kernel.
//!
//! Spikegrid advances a network of point-like nodes on a fixed time grid. Nodes
//! are updated step by step by a pool of worker threads on each rank, emit
//! spike events, and receive the events of other nodes after the delay of the
//! connection that carries them. Networks may be spread over several ranks
//! (processes or threads), which exchange spikes collectively at the end of
//! each synchronization interval.
//!
//! The central observation behind the design is that no spike can take effect
//! sooner than the minimum connection delay `d_min`. Ranks and threads can
//! therefore update their nodes independently for `d_min` steps before they
//! need to communicate, which keeps synchronization costs proportional to the
//! number of intervals rather than to the number of steps.
//!
//! # A practical overview
//!
//! A simulation goes through three phases:
//!
//! 1. the network is declared on a [`KernelInit`] builder: nodes, connections
//!    and external coupling ports,
//! 2. [`KernelInit::init`] runs the setup collective with all other ranks and
//!    freezes the topology,
//! 3. the [`Kernel`] is advanced with [`Kernel::advance_to`] or
//!    [`Kernel::advance_by`].
//!
//! ## Authoring nodes
//!
//! Nodes implement the [`Node`](node::Node) trait. During its update, a node
//! reads the spikes delivered to it for the current step and may emit events
//! through its [`UpdateContext`](node::UpdateContext). A node declares the
//! maximum number of events it emits per step, which sizes the collective
//! exchange; exceeding it is a configuration error.
//!
//! Ready-made nodes are available in [`node::builtin`].
//!
//! ## Time and steps
//!
//! Time is discretized with a fixed resolution `h`. Step `s` covers
//! `[s·h, (s+1)·h)`. Connection delays are whole multiples of `h`: a spike
//! emitted at step `s` over a connection with a delay of `d` steps is seen by
//! its target during step `s + d`.
//!
//! ## Multi-rank runs
//!
//! Each rank builds its own [`KernelInit`] from a
//! [`Communicator`](comm::Communicator). All ranks must declare nodes in the
//! same order so that they agree on node addresses; nodes owned by other ranks
//! are declared with [`KernelInit::add_node_on`] without being instantiated.
//! [`LocalCluster`](comm::LocalCluster) provides an in-process communicator
//! running each rank on its own thread.
//!
//! ## External coupling
//!
//! Ports declared on the builder let foreign programs exchange continuous
//! data, events and messages with the network at interval boundaries. See the
//! [`coupling`] module.
//!
//! # Example
//!
//! A spike train drives a parrot node, whose output is recorded:
//!
//! ```
//! use std::time::Duration;
//!
//! use spikegrid::node::builtin::{Parrot, Recorder, SpikeTrain};
//! use spikegrid::routing::Payload;
//! use spikegrid::{KernelConfig, KernelInit};
//!
//! let config = KernelConfig::new(Duration::from_millis(1)).with_num_threads(2);
//! let mut init = KernelInit::new(config);
//!
//! let (recorder, records) = Recorder::new();
//! let train = init.add_node(SpikeTrain::new([0]).unwrap());
//! let parrot = init.add_node(Parrot::new());
//! let recorder = init.add_node(recorder);
//!
//! init.connect(train, parrot, Duration::from_millis(1), Payload::default())
//!     .unwrap();
//! init.connect(parrot, recorder, Duration::from_millis(2), Payload::new(0.5))
//!     .unwrap();
//!
//! let mut kernel = init.init().unwrap();
//! kernel.advance_to(Duration::from_millis(5)).unwrap();
//!
//! // The parrot relays at step 1, the recorder sees the spike at step 3.
//! assert_eq!(records.last_step(), Some(3));
//! assert_eq!(records.total(), 1);
//! ```
//!
//! # Logging
//!
//! The kernel reports setup summaries, interval boundaries and failures with
//! the [`tracing`] crate. Any subscriber may be installed by the application.
#![warn(missing_docs, missing_debug_implementations, unreachable_pub)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod comm;
pub mod config;
pub mod coupling;
mod delivery;
pub mod exchange;
mod kernel;
pub mod node;
pub mod ring_buffer;
pub mod routing;
mod scheduler;
pub mod time;

pub use config::{ConfigError, KernelConfig};
pub use kernel::{AbortHandle, Kernel, KernelError, KernelInit, KernelStats};
pub use node::{Node, NodeAddr};
