//! Network construction and run control.
//!
//! A run is set up with a [`KernelInit`] builder, on which nodes, connections
//! and external ports are declared. [`KernelInit::init`] performs the setup
//! collective with all other ranks, freezes the topology and returns a
//! [`Kernel`], which exposes no way to alter the network.
//!
//! # Run cycle
//!
//! [`Kernel::advance_to`] advances simulation time in synchronization
//! intervals whose length is the minimum connection delay. At the end of each
//! interval, strictly in this order:
//!
//! 1. all update threads reach the barrier,
//! 2. remote spikes are exchanged with all other ranks,
//! 3. external ports are serviced,
//! 4. local, remote and external deliveries are written into the ring
//!    buffers of their targets,
//! 5. the clock is synchronized with the interval boundary.
//!
//! Since every delay is at least one interval long, a spike emitted during an
//! interval is never due before the interval's boundary, which is why all
//! deliveries can be deferred to the boundary.
//!
//! # Multi-rank runs
//!
//! All ranks must run the same sequence of [`Kernel::advance_to`] calls. Any
//! fatal error on one rank is propagated to all other ranks, which fail with
//! [`KernelError::PeerAborted`] at their next exchange.
use std::error::Error;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::comm::{CommError, Communicator, Rank, SingleRank};
use crate::config::{ConfigError, KernelConfig};
use crate::coupling::{
    Adapter, ContinuousSink, ContinuousSource, Coupling, EventOutlet, MessageInbox, PortFailure,
    PortId, PortRegistry,
};
use crate::delivery::merge_lanes;
use crate::exchange::{self, Exchange, ExchangeError, SetupRecord};
use crate::node::{Node, NodeAddr, NodeFailure};
use crate::ring_buffer::{RingBufferError, SlotInput};
use crate::routing::{Connection, Payload, RoutingTable, RoutingTableBuilder};
use crate::scheduler::{PoolConfig, PoolError, UpdatePool};
use crate::time::{Clock, Interval, NoClock, Step, SyncStatus, TimeGrid};

/// Builder for the kernel of one rank.
pub struct KernelInit {
    config: KernelConfig,
    comm: Box<dyn Communicator>,
    next_index: Vec<u32>,
    nodes: Vec<Box<dyn Node>>,
    routing: RoutingTableBuilder,
    ports: PortRegistry,
    adapter: Option<Box<dyn Adapter>>,
    clock: Box<dyn Clock>,
}

impl KernelInit {
    /// Creates a builder for a single-rank run.
    pub fn new(config: KernelConfig) -> Self {
        Self::with_communicator(config, SingleRank::new())
    }

    /// Creates a builder for the rank of the provided communicator.
    pub fn with_communicator(config: KernelConfig, comm: impl Communicator + 'static) -> Self {
        let rank = comm.rank();
        let num_ranks = comm.num_ranks();

        Self {
            config,
            comm: Box::new(comm),
            next_index: vec![0; num_ranks],
            nodes: Vec::new(),
            routing: RoutingTableBuilder::new(rank),
            ports: PortRegistry::default(),
            adapter: None,
            clock: Box::new(NoClock::new()),
        }
    }

    /// Rank of this kernel.
    pub fn rank(&self) -> Rank {
        self.comm.rank()
    }

    /// Number of ranks of the run.
    pub fn num_ranks(&self) -> usize {
        self.comm.num_ranks()
    }

    /// Adds a node owned by this rank and returns its address.
    pub fn add_node(&mut self, node: impl Node) -> NodeAddr {
        let rank = self.rank();
        let index = self.next_index[rank];
        self.next_index[rank] += 1;
        self.nodes.push(Box::new(node));

        NodeAddr::new(rank, index)
    }

    /// Reserves the next node index of `rank` and returns its address.
    ///
    /// The node is only instantiated if `rank` is this rank, so that all ranks
    /// can run the same network construction code and agree on addresses.
    pub fn add_node_on<N, F>(&mut self, rank: Rank, f: F) -> Result<NodeAddr, ConfigError>
    where
        N: Node,
        F: FnOnce() -> N,
    {
        if rank >= self.num_ranks() {
            return Err(ConfigError::RankOutOfRange {
                rank,
                num_ranks: self.num_ranks(),
            });
        }
        if rank == self.rank() {
            return Ok(self.add_node(f()));
        }
        let index = self.next_index[rank];
        self.next_index[rank] += 1;

        Ok(NodeAddr::new(rank, index))
    }

    /// Connects two nodes with the specified delay.
    ///
    /// The delay must be a positive multiple of the grid resolution. The
    /// connection is only recorded if its source is owned by this rank; the
    /// rank owning the source is expected to declare it as well.
    pub fn connect(
        &mut self,
        source: NodeAddr,
        target: NodeAddr,
        delay: Duration,
        payload: Payload,
    ) -> Result<(), ConfigError> {
        let grid = TimeGrid::new(self.config.resolution)?;
        let num_ranks = self.num_ranks();
        for addr in [source, target] {
            if addr.rank() >= num_ranks {
                return Err(ConfigError::RankOutOfRange {
                    rank: addr.rank(),
                    num_ranks,
                });
            }
        }
        let steps = match grid.steps(delay) {
            Some(steps) if steps > 0 => steps,
            _ => {
                return Err(ConfigError::InvalidDelay {
                    source,
                    target,
                    delay,
                })
            }
        };
        let delay = u32::try_from(steps).map_err(|_| ConfigError::DelayOutOfRange {
            source,
            target,
            steps,
        })?;

        // Remote targets are checked once all ranks have been set up.
        let rank = self.rank();
        for addr in [source, target] {
            if addr.rank() == rank && addr.index() >= self.next_index[rank] {
                return Err(ConfigError::UnknownNode(addr));
            }
        }

        if source.rank() == rank {
            self.routing.add(Connection {
                source,
                target,
                delay,
                payload,
            });
        }

        Ok(())
    }

    /// Declares an outbound continuous port of the specified width.
    pub fn add_continuous_source(
        &mut self,
        name: impl Into<String>,
        width: usize,
    ) -> Result<ContinuousSource, ConfigError> {
        self.ports.add_continuous_source(name.into(), width)
    }

    /// Declares an inbound continuous port of the specified width.
    pub fn add_continuous_sink(
        &mut self,
        name: impl Into<String>,
        width: usize,
    ) -> Result<ContinuousSink, ConfigError> {
        self.ports.add_continuous_sink(name.into(), width)
    }

    /// Declares an outbound event port with `width` channels.
    pub fn add_event_outlet(
        &mut self,
        name: impl Into<String>,
        width: usize,
    ) -> Result<EventOutlet, ConfigError> {
        self.ports.add_event_outlet(name.into(), width)
    }

    /// Declares an inbound event port whose channel `i` feeds the `i`-th
    /// target, which must be owned by this rank.
    ///
    /// The accepted latency must be at least the minimum delay of the
    /// network; this is checked on initialization.
    pub fn add_event_inlet(
        &mut self,
        name: impl Into<String>,
        targets: impl IntoIterator<Item = (NodeAddr, Payload)>,
        latency: Duration,
    ) -> Result<PortId, ConfigError> {
        let rank = self.rank();
        let targets = targets
            .into_iter()
            .map(|(addr, payload)| {
                if addr.rank() != rank || addr.index() >= self.next_index[rank] {
                    return Err(ConfigError::UnknownNode(addr));
                }

                Ok((addr.index(), payload))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.ports.add_event_inlet(name.into(), targets, latency)
    }

    /// Declares a receive-only message port accepting payloads of at most
    /// `max_payload` bytes.
    pub fn add_message_inbox(
        &mut self,
        name: impl Into<String>,
        max_payload: usize,
    ) -> Result<MessageInbox, ConfigError> {
        self.ports.add_message_inbox(name.into(), max_payload)
    }

    /// Synchronizes the run with the provided [`Clock`].
    ///
    /// If the clock isn't explicitly set then the default [`NoClock`] is used,
    /// resulting in the run going as fast as possible.
    pub fn set_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);

        self
    }

    /// Sets the adapter servicing the external ports of this rank.
    pub fn set_adapter(mut self, adapter: impl Adapter + 'static) -> Self {
        self.adapter = Some(Box::new(adapter));

        self
    }

    /// Performs the setup collective with all other ranks and returns the
    /// kernel, positioned at step 0.
    ///
    /// On failure, all other ranks are notified so that their own setup or
    /// first interval fails as well.
    pub fn init(self) -> Result<Kernel, KernelError> {
        let KernelInit {
            config,
            mut comm,
            next_index: _,
            nodes,
            routing,
            ports,
            adapter,
            mut clock,
        } = self;
        let rank = comm.rank();
        let routing = routing.build(nodes.len());

        let setup = match negotiate(&config, comm.as_mut(), &nodes, &routing) {
            Ok(setup) => setup,
            Err(e) => {
                tracing::error!(rank, error = %e, "kernel setup failed");
                comm.abort();

                return Err(e);
            }
        };
        let min_delay = setup.grid.time(setup.interval_steps);
        let coupling = match ports.negotiate(adapter, &setup.grid, min_delay) {
            Ok(coupling) => coupling,
            Err(e) => {
                tracing::error!(rank, error = %e, "port negotiation failed");
                comm.abort();

                return Err(e.into());
            }
        };

        let num_nodes = nodes.len();
        let pool_config = PoolConfig {
            rank,
            num_ranks: comm.num_ranks(),
            num_threads: config.num_threads,
            resolution: setup.grid.resolution(),
            ring_capacity: setup.ring_capacity,
            seed: config.seed,
        };
        let pool = match UpdatePool::spawn(&pool_config, nodes, Arc::new(routing)) {
            Ok(pool) => pool,
            Err(e) => {
                comm.abort();

                return Err(KernelError::Spawn(e));
            }
        };
        let exchange = Exchange::new(comm, setup.bounds, num_nodes as u32);

        tracing::info!(
            rank,
            nodes = num_nodes,
            threads = pool.num_threads(),
            interval_steps = setup.interval_steps,
            max_delay_steps = setup.max_delay_steps,
            ring_capacity = setup.ring_capacity,
            send_bound = exchange.send_bound(),
            "kernel initialized"
        );

        clock.synchronize(setup.grid.monotonic_time(0));

        Ok(Kernel {
            grid: setup.grid,
            interval_steps: setup.interval_steps,
            max_delay_steps: setup.max_delay_steps,
            ring_capacity: setup.ring_capacity,
            current_step: 0,
            pool,
            exchange,
            coupling,
            clock,
            abort: AbortHandle::new(),
            poisoned: false,
            stats: KernelStats::default(),
        })
    }
}

impl fmt::Debug for KernelInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelInit")
            .field("rank", &self.rank())
            .field("nodes", &self.nodes.len())
            .field("connections", &self.routing.len())
            .finish_non_exhaustive()
    }
}

/// Global parameters agreed upon by all ranks.
struct Setup {
    grid: TimeGrid,
    interval_steps: Step,
    max_delay_steps: Step,
    ring_capacity: Step,
    bounds: Vec<u32>,
}

/// Runs the setup collective and validates the network against the agreed
/// parameters.
fn negotiate(
    config: &KernelConfig,
    comm: &mut dyn Communicator,
    nodes: &[Box<dyn Node>],
    routing: &RoutingTable,
) -> Result<Setup, KernelError> {
    let grid = TimeGrid::new(config.resolution)?;
    if config.num_threads == 0 {
        return Err(ConfigError::ZeroThreads.into());
    }
    let min_delay_override = match config.min_delay {
        Some(d) if d < grid.resolution() => {
            return Err(ConfigError::DegenerateInterval {
                min_delay: d,
                resolution: grid.resolution(),
            }
            .into())
        }
        Some(d) => Some(grid.steps(d).ok_or(ConfigError::NotOnGrid {
            what: "minimum delay",
            time: d,
        })?),
        None => None,
    };
    let max_delay_override = match config.max_delay {
        Some(d) => Some(grid.steps(d).ok_or(ConfigError::NotOnGrid {
            what: "maximum delay",
            time: d,
        })?),
        None => None,
    };

    // First round: grid, delays and node counts.
    let local = SetupRecord {
        resolution_nanos: u64::try_from(grid.resolution().as_nanos()).unwrap_or(u64::MAX),
        min_delay_override,
        max_delay_override,
        min_delay: routing.min_delay().map(u64::from),
        max_delay: routing.max_delay().map(u64::from),
        num_nodes: nodes.len() as u32,
    };
    let records = exchange::gather_setup(comm, &local)?;
    for (rank, record) in records.iter().enumerate() {
        let what = if record.resolution_nanos != local.resolution_nanos {
            "resolution"
        } else if record.min_delay_override != local.min_delay_override {
            "minimum delay"
        } else if record.max_delay_override != local.max_delay_override {
            "maximum delay"
        } else {
            continue;
        };

        return Err(ConfigError::InconsistentSetup { rank, what }.into());
    }

    let connection_min = records.iter().filter_map(|r| r.min_delay).min();
    let connection_max = records.iter().filter_map(|r| r.max_delay).max();
    let interval_steps = match (min_delay_override, connection_min) {
        (Some(configured), Some(connection)) if configured > connection => {
            return Err(ConfigError::MinDelayTooLarge {
                configured,
                connection,
            }
            .into())
        }
        (Some(configured), _) => configured,
        (None, Some(connection)) => connection,
        (None, None) => 1,
    };
    let required = connection_max.unwrap_or(0).max(interval_steps);
    let max_delay_steps = match max_delay_override {
        Some(configured) if configured < required => {
            return Err(ConfigError::MaxDelayTooSmall {
                configured,
                required,
            }
            .into())
        }
        Some(configured) => configured,
        None => required,
    };

    for route in routing.remote_routes() {
        let target = route.target.index();
        if target >= records[route.rank].num_nodes {
            return Err(ConfigError::UnknownNode(NodeAddr::new(route.rank, target)).into());
        }
    }

    let ring_capacity = config.ring_capacity.unwrap_or(max_delay_steps);
    if ring_capacity < max_delay_steps {
        return Err(ConfigError::CapacityTooSmall {
            capacity: ring_capacity,
            max_delay: max_delay_steps,
        }
        .into());
    }

    // Second round: send bounds.
    let rates: Vec<_> = nodes.iter().map(|n| n.max_rate()).collect();
    let bound = routing
        .traffic_bounds(&rates, interval_steps, comm.num_ranks())
        .into_iter()
        .max()
        .unwrap_or(0);
    let bound = u32::try_from(bound).map_err(|_| ConfigError::SendBoundOverflow { bound })?;
    let bounds = exchange::gather_bounds(comm, bound)?;

    Ok(Setup {
        grid,
        interval_steps,
        max_delay_steps,
        ring_capacity,
        bounds,
    })
}

/// The kernel of one rank, ready to run.
pub struct Kernel {
    grid: TimeGrid,
    interval_steps: Step,
    max_delay_steps: Step,
    ring_capacity: Step,
    current_step: Step,
    pool: UpdatePool,
    exchange: Exchange,
    coupling: Coupling,
    clock: Box<dyn Clock>,
    abort: AbortHandle,
    poisoned: bool,
    stats: KernelStats,
}

impl Kernel {
    /// Rank of this kernel.
    pub fn rank(&self) -> Rank {
        self.exchange.rank()
    }

    /// Number of ranks of the run.
    pub fn num_ranks(&self) -> usize {
        self.exchange.num_ranks()
    }

    /// Number of update threads of this rank.
    pub fn num_threads(&self) -> usize {
        self.pool.num_threads()
    }

    /// Step grid of the run.
    pub fn grid(&self) -> &TimeGrid {
        &self.grid
    }

    /// Current simulation time.
    pub fn time(&self) -> Duration {
        self.grid.time(self.current_step)
    }

    /// Next step to be updated.
    pub fn current_step(&self) -> Step {
        self.current_step
    }

    /// Length of a synchronization interval, i.e. the minimum delay in steps.
    pub fn interval_steps(&self) -> Step {
        self.interval_steps
    }

    /// Maximum delay in steps.
    pub fn max_delay_steps(&self) -> Step {
        self.max_delay_steps
    }

    /// Ring buffer capacity in steps.
    pub fn ring_capacity(&self) -> Step {
        self.ring_capacity
    }

    /// Returns a handle that can request the run to stop at the next interval
    /// boundary.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Run statistics of this rank.
    pub fn stats(&self) -> KernelStats {
        self.stats
    }

    /// Removes and returns the port failures recorded so far.
    pub fn take_port_errors(&mut self) -> Vec<PortFailure> {
        self.coupling.take_failures()
    }

    /// Returns a copy of the spikes pending for a node of this rank at the
    /// specified step.
    ///
    /// The result is empty for nodes of other ranks and for steps already
    /// updated.
    pub fn pending_input(&self, node: NodeAddr, step: Step) -> SlotInput {
        if node.rank() != self.rank() {
            return SlotInput::default();
        }

        self.pool.peek(node.index(), step)
    }

    /// Advances simulation time by the specified duration.
    pub fn advance_by(&mut self, duration: Duration) -> Result<(), KernelError> {
        self.advance_to(self.time() + duration)
    }

    /// Advances simulation time to the specified target time.
    ///
    /// The target must lie on the step grid and must not precede the current
    /// time. If it is not a multiple of the interval length, the last interval
    /// is shortened so that the run stops exactly at the target.
    ///
    /// Any other error is fatal: the run is aborted on all ranks and all
    /// subsequent calls return [`KernelError::Aborted`].
    pub fn advance_to(&mut self, time: Duration) -> Result<(), KernelError> {
        if self.poisoned {
            return Err(KernelError::Aborted);
        }
        let target = self.grid.steps(time).ok_or(KernelError::NotAligned {
            time,
            resolution: self.grid.resolution(),
        })?;
        if target < self.current_step {
            return Err(KernelError::Rewind {
                current: self.time(),
                target: time,
            });
        }

        while self.current_step < target {
            if self.abort.is_aborted() {
                return Err(self.fail(KernelError::Cancelled));
            }
            let end = (self.current_step + self.interval_steps).min(target);
            let interval = Interval::new(self.current_step, end);

            if let Err(e) = self.run_interval(interval) {
                return Err(self.fail(e));
            }
        }

        Ok(())
    }

    fn run_interval(&mut self, interval: Interval) -> Result<(), KernelError> {
        let lanes = self.pool.update(interval)?;
        let merged = merge_lanes(&lanes, self.num_ranks());
        let received = self.exchange.run(interval, &merged.partitions)?;

        let window = interval.end()..interval.end() + self.ring_capacity;
        let external = self.coupling.exchange(interval, window);

        let num_received = received.deliveries.len() as u64;
        let num_external = external.len() as u64;
        let mut deliveries = merged.local;
        deliveries.extend(received.deliveries);
        deliveries.extend(external);
        self.pool.deliver(deliveries)?;

        self.stats.intervals += 1;
        self.stats.emitted += merged.emitted;
        self.stats.sent += received.sent;
        self.stats.received += num_received;
        self.stats.external += num_external;
        self.current_step = interval.end();

        tracing::debug!(
            rank = self.rank(),
            %interval,
            emitted = merged.emitted,
            sent = received.sent,
            received = num_received,
            external = num_external,
            "interval completed"
        );

        if let SyncStatus::OutOfSync(lag) =
            self.clock.synchronize(self.grid.monotonic_time(interval.end()))
        {
            tracing::warn!(rank = self.rank(), ?lag, "clock out of sync");
        }

        Ok(())
    }

    fn fail(&mut self, error: KernelError) -> KernelError {
        tracing::error!(rank = self.rank(), %error, "run aborted");
        self.poisoned = true;
        self.exchange.abort();

        error
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("rank", &self.rank())
            .field("current_step", &self.current_step)
            .field("interval_steps", &self.interval_steps)
            .finish_non_exhaustive()
    }
}

/// A handle requesting a run to stop.
///
/// The request is honoured at the next interval boundary, never in the middle
/// of an interval.
#[derive(Clone, Debug, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    fn new() -> Self {
        Self::default()
    }

    /// Requests the run to stop.
    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Checks whether a stop was requested.
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Cumulated statistics of a rank.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct KernelStats {
    /// Completed intervals.
    pub intervals: u64,
    /// Events emitted by local nodes.
    pub emitted: u64,
    /// Spikes sent to other ranks.
    pub sent: u64,
    /// Spikes received from other ranks.
    pub received: u64,
    /// Spikes received through inbound event ports.
    pub external: u64,
}

/// An error returned by the kernel.
#[derive(Debug)]
pub enum KernelError {
    /// The configuration or the network is invalid.
    Config(ConfigError),
    /// A node update failed.
    Node(NodeFailure),
    /// The collective exchange failed.
    Exchange(ExchangeError),
    /// A spike could not be written into the ring buffer of its target.
    Delivery {
        /// Target of the spike.
        node: NodeAddr,
        /// Ring buffer error.
        error: RingBufferError,
    },
    /// The target time does not lie on the step grid.
    NotAligned {
        /// Requested time.
        time: Duration,
        /// Grid resolution.
        resolution: Duration,
    },
    /// The target time precedes the current time.
    Rewind {
        /// Current simulation time.
        current: Duration,
        /// Requested time.
        target: Duration,
    },
    /// Another rank aborted the run.
    PeerAborted {
        /// Rank that aborted.
        rank: Rank,
    },
    /// The run was stopped through an [`AbortHandle`].
    Cancelled,
    /// The run was aborted by an earlier error.
    Aborted,
    /// An update thread could not be spawned.
    Spawn(io::Error),
    /// An update thread terminated unexpectedly.
    WorkerLost {
        /// Index of the thread.
        worker: usize,
    },
}

impl fmt::Display for KernelError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(fmt, "configuration error: {}", e),
            Self::Node(e) => write!(fmt, "{}", e),
            Self::Exchange(e) => write!(fmt, "{}", e),
            Self::Delivery { node, error } => {
                write!(fmt, "delivery to node {} failed: {}", node, error)
            }
            Self::NotAligned { time, resolution } => write!(
                fmt,
                "the time {:?} is not a multiple of the resolution {:?}",
                time, resolution
            ),
            Self::Rewind { current, target } => write!(
                fmt,
                "cannot go back from {:?} to {:?}",
                current, target
            ),
            Self::PeerAborted { rank } => write!(fmt, "rank {} aborted the run", rank),
            Self::Cancelled => write!(fmt, "the run was cancelled"),
            Self::Aborted => write!(fmt, "the run was aborted by an earlier error"),
            Self::Spawn(e) => write!(fmt, "failed to spawn an update thread: {}", e),
            Self::WorkerLost { worker } => {
                write!(fmt, "update thread {} terminated unexpectedly", worker)
            }
        }
    }
}

impl Error for KernelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Node(e) => Some(e),
            Self::Exchange(e) => Some(e),
            Self::Delivery { error, .. } => Some(error),
            Self::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for KernelError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<ExchangeError> for KernelError {
    fn from(e: ExchangeError) -> Self {
        match e {
            ExchangeError::Comm(CommError::Aborted { rank }) => Self::PeerAborted { rank },
            e => Self::Exchange(e),
        }
    }
}

impl From<PoolError> for KernelError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Node(failure) => Self::Node(failure),
            PoolError::RateExceeded {
                node,
                step,
                declared,
            } => Self::Config(ConfigError::RateExceeded {
                node,
                step,
                declared,
            }),
            PoolError::Buffer { node, error } => Self::Delivery { node, error },
            PoolError::UnknownNode(node) => Self::Config(ConfigError::UnknownNode(node)),
            PoolError::WorkerLost(worker) => Self::WorkerLost { worker },
        }
    }
}
