//! Static pool of update threads.
//!
//! Local nodes are assigned to worker threads once, at setup: node `i` is
//! owned by worker `i % n` where `n` is the number of workers. Each worker
//! owns its nodes together with their ring buffers, a delivery lane and a
//! random number generator, so no state is shared between workers during an
//! interval.
//!
//! Workers are persistent threads driven through command channels. The
//! controlling thread sends one command to every worker and then waits for
//! one reply from each of them, which acts as the barrier between the update
//! phase and the exchange phase.
//!
//! Within an interval, the workers of a rank also meet at a barrier before
//! each step. A failure at step `t` is therefore seen by all workers before
//! any of them starts step `t + 1`.
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use crossbeam_utils::CachePadded;
use rand::SeedableRng;

use crate::comm::Rank;
use crate::delivery::{Delivery, DeliveryLane, Event};
use crate::node::{Emitter, FailureCause, Node, NodeAddr, NodeFailure, NodeRng, UpdateContext};
use crate::ring_buffer::{RingBuffer, RingBufferError, SlotInput};
use crate::routing::RoutingTable;
use crate::time::{Interval, Step};

/// Parameters shared by all workers of a rank.
#[derive(Clone, Debug)]
pub(crate) struct PoolConfig {
    pub(crate) rank: Rank,
    pub(crate) num_ranks: usize,
    pub(crate) num_threads: usize,
    pub(crate) resolution: Duration,
    pub(crate) ring_capacity: Step,
    pub(crate) seed: u64,
}

/// A failure reported by the pool.
#[derive(Debug)]
pub(crate) enum PoolError {
    /// A node update failed.
    Node(NodeFailure),
    /// A node emitted more events than declared.
    RateExceeded {
        node: NodeAddr,
        step: Step,
        declared: u32,
    },
    /// A ring buffer rejected a read or a write.
    Buffer {
        node: NodeAddr,
        error: RingBufferError,
    },
    /// A delivery targets a node that does not exist.
    UnknownNode(NodeAddr),
    /// A worker thread terminated unexpectedly.
    WorkerLost(usize),
}

impl PoolError {
    // Key used to select the earliest failure of an interval.
    fn sort_key(&self) -> (Step, u32) {
        match self {
            Self::Node(failure) => (failure.step, failure.node.index()),
            Self::RateExceeded { node, step, .. } => (*step, node.index()),
            Self::Buffer { node, .. } | Self::UnknownNode(node) => (0, node.index()),
            Self::WorkerLost(_) => (0, 0),
        }
    }
}

enum Command {
    Update(Interval),
    Deliver(Vec<Delivery>),
    Peek { position: usize, step: Step },
}

enum Reply {
    Updated(Result<DeliveryLane, PoolError>),
    Delivered(Result<(), PoolError>),
    Peeked(SlotInput),
}

struct LocalNode {
    addr: NodeAddr,
    node: Box<dyn Node>,
    ring: RingBuffer,
}

struct Worker {
    nodes: Vec<LocalNode>,
    routing: Arc<RoutingTable>,
    num_ranks: usize,
    num_threads: usize,
    resolution: Duration,
    emitter: Emitter,
    rng: NodeRng,
    halt: Arc<CachePadded<AtomicU64>>,
    barrier: Arc<Barrier>,
}

impl Worker {
    fn run(mut self, commands: Receiver<Command>, replies: Sender<Reply>) {
        // The loop ends when the pool is dropped.
        while let Ok(command) = commands.recv() {
            let reply = match command {
                Command::Update(interval) => Reply::Updated(self.update(interval)),
                Command::Deliver(deliveries) => Reply::Delivered(self.deliver(deliveries)),
                Command::Peek { position, step } => Reply::Peeked(
                    self.nodes
                        .get(position)
                        .map(|n| n.ring.peek(step))
                        .unwrap_or_default(),
                ),
            };
            if replies.send(reply).is_err() {
                return;
            }
        }
    }

    fn update(&mut self, interval: Interval) -> Result<DeliveryLane, PoolError> {
        let mut lane = DeliveryLane::new(self.num_ranks);
        let mut failure = None;

        for step in interval.steps() {
            // All workers must wait the same number of times, so failures do
            // not return early.
            if step != interval.start() {
                self.barrier.wait();
            }
            // A worker failed at an earlier step.
            if self.halt.load(Ordering::Relaxed) < step {
                break;
            }

            for local in &mut self.nodes {
                let input = match local.ring.take(step) {
                    Ok(input) => input,
                    Err(error) => {
                        failure = Some(PoolError::Buffer {
                            node: local.addr,
                            error,
                        });
                        break;
                    }
                };

                let declared = local.node.max_rate();
                self.emitter.reset(declared);
                let mut cx = UpdateContext {
                    addr: local.addr,
                    step,
                    interval,
                    resolution: self.resolution,
                    input: &input,
                    emitter: &mut self.emitter,
                    rng: &mut self.rng,
                };
                let node = &mut local.node;
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    node.refresh(step);
                    node.update(&mut cx)
                }));
                local.ring.recycle(input);

                if self.emitter.exceeded() {
                    failure = Some(PoolError::RateExceeded {
                        node: local.addr,
                        step,
                        declared,
                    });
                    break;
                }
                let cause = match result {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(FailureCause::Error(e)),
                    Err(payload) => Some(FailureCause::Panic(payload)),
                };
                if let Some(cause) = cause {
                    failure = Some(PoolError::Node(NodeFailure {
                        node: local.addr,
                        model: local.node.model(),
                        step,
                        cause,
                    }));
                    break;
                }

                let rng = &mut self.rng;
                for &multiplicity in self.emitter.emitted() {
                    let event = Event {
                        origin: local.addr,
                        step,
                        multiplicity,
                    };
                    lane.route(event, &self.routing, |multiplicity, target| {
                        local.node.target_multiplicity(multiplicity, target, rng)
                    });
                }
            }

            if failure.is_some() {
                self.halt.fetch_min(step, Ordering::Relaxed);
            }
        }

        match failure {
            Some(failure) => Err(failure),
            None => Ok(lane),
        }
    }

    fn deliver(&mut self, deliveries: Vec<Delivery>) -> Result<(), PoolError> {
        for delivery in deliveries {
            let position = delivery.target as usize / self.num_threads;
            let local = match self.nodes.get_mut(position) {
                Some(local) if local.addr.index() == delivery.target => local,
                _ => {
                    let rank = self.nodes.first().map(|n| n.addr.rank()).unwrap_or(0);

                    return Err(PoolError::UnknownNode(NodeAddr::new(rank, delivery.target)));
                }
            };
            local
                .ring
                .write(delivery.step, delivery.spike)
                .map_err(|error| PoolError::Buffer {
                    node: local.addr,
                    error,
                })?;
        }

        Ok(())
    }
}

struct WorkerHandle {
    commands: Option<Sender<Command>>,
    replies: Receiver<Reply>,
    thread: Option<JoinHandle<()>>,
}

/// The update threads of a rank.
pub(crate) struct UpdatePool {
    rank: Rank,
    workers: Vec<WorkerHandle>,
    num_nodes: usize,
}

impl UpdatePool {
    /// Spawns the workers and hands them their nodes, given in local index
    /// order.
    ///
    /// At most one worker per node is spawned.
    pub(crate) fn spawn(
        config: &PoolConfig,
        nodes: Vec<Box<dyn Node>>,
        routing: Arc<RoutingTable>,
    ) -> io::Result<Self> {
        let num_nodes = nodes.len();
        let num_threads = config.num_threads.min(num_nodes).max(1);
        let halt = Arc::new(CachePadded::new(AtomicU64::new(u64::MAX)));
        let barrier = Arc::new(Barrier::new(num_threads));

        let mut assigned: Vec<Vec<LocalNode>> = (0..num_threads).map(|_| Vec::new()).collect();
        for (index, node) in nodes.into_iter().enumerate() {
            assigned[index % num_threads].push(LocalNode {
                addr: NodeAddr::new(config.rank, index as u32),
                node,
                ring: RingBuffer::new(config.ring_capacity),
            });
        }

        let mut workers = Vec::with_capacity(num_threads);
        for (id, nodes) in assigned.into_iter().enumerate() {
            let mut rng = NodeRng::seed_from_u64(config.seed);
            rng.set_stream(((config.rank as u64) << 32) | id as u64);

            let worker = Worker {
                nodes,
                routing: routing.clone(),
                num_ranks: config.num_ranks,
                num_threads,
                resolution: config.resolution,
                emitter: Emitter::default(),
                rng,
                halt: halt.clone(),
                barrier: barrier.clone(),
            };
            let (command_tx, command_rx) = crossbeam_channel::unbounded();
            let (reply_tx, reply_rx) = crossbeam_channel::unbounded();

            let thread = thread::Builder::new()
                .name(format!("spikegrid-r{}-w{}", config.rank, id))
                .spawn(move || worker.run(command_rx, reply_tx))?;

            workers.push(WorkerHandle {
                commands: Some(command_tx),
                replies: reply_rx,
                thread: Some(thread),
            });
        }

        Ok(Self {
            rank: config.rank,
            workers,
            num_nodes,
        })
    }

    /// Number of worker threads.
    pub(crate) fn num_threads(&self) -> usize {
        self.workers.len()
    }

    fn send(&self, id: usize, command: Command) -> Result<(), PoolError> {
        self.workers[id]
            .commands
            .as_ref()
            .and_then(|tx| tx.send(command).ok())
            .ok_or(PoolError::WorkerLost(id))
    }

    fn receive(&self, id: usize) -> Result<Reply, PoolError> {
        self.workers[id]
            .replies
            .recv()
            .map_err(|_| PoolError::WorkerLost(id))
    }

    /// Updates all nodes over the interval and returns the lanes of all
    /// workers in worker order.
    ///
    /// If several nodes fail, the failure with the earliest step is reported,
    /// ties being broken by node index.
    pub(crate) fn update(&self, interval: Interval) -> Result<Vec<DeliveryLane>, PoolError> {
        for id in 0..self.workers.len() {
            self.send(id, Command::Update(interval))?;
        }

        let mut lanes = Vec::with_capacity(self.workers.len());
        let mut failure: Option<PoolError> = None;
        for id in 0..self.workers.len() {
            let result = match self.receive(id)? {
                Reply::Updated(result) => result,
                _ => Err(PoolError::WorkerLost(id)),
            };
            match result {
                Ok(lane) => lanes.push(lane),
                Err(e) => {
                    if failure
                        .as_ref()
                        .map_or(true, |f| e.sort_key() < f.sort_key())
                    {
                        failure = Some(e);
                    }
                }
            }
        }

        match failure {
            Some(failure) => Err(failure),
            None => Ok(lanes),
        }
    }

    /// Writes the deliveries into the ring buffers of their targets.
    pub(crate) fn deliver(&self, deliveries: Vec<Delivery>) -> Result<(), PoolError> {
        let num_threads = self.workers.len();
        let mut batches: Vec<Vec<Delivery>> = (0..num_threads).map(|_| Vec::new()).collect();
        for delivery in deliveries {
            if delivery.target as usize >= self.num_nodes {
                return Err(PoolError::UnknownNode(NodeAddr::new(
                    self.rank,
                    delivery.target,
                )));
            }
            batches[delivery.target as usize % num_threads].push(delivery);
        }

        let mut pending = Vec::new();
        for (id, batch) in batches.into_iter().enumerate() {
            if !batch.is_empty() {
                self.send(id, Command::Deliver(batch))?;
                pending.push(id);
            }
        }

        let mut failure = None;
        for id in pending {
            let result = match self.receive(id)? {
                Reply::Delivered(result) => result,
                _ => Err(PoolError::WorkerLost(id)),
            };
            if let Err(e) = result {
                failure.get_or_insert(e);
            }
        }

        failure.map_or(Ok(()), Err)
    }

    /// Returns a copy of the spikes pending for a local node at the specified
    /// step.
    pub(crate) fn peek(&self, index: u32, step: Step) -> SlotInput {
        let index = index as usize;
        if index >= self.num_nodes {
            return SlotInput::default();
        }
        let id = index % self.workers.len();
        let position = index / self.workers.len();
        if self.send(id, Command::Peek { position, step }).is_err() {
            return SlotInput::default();
        }

        match self.receive(id) {
            Ok(Reply::Peeked(input)) => input,
            _ => SlotInput::default(),
        }
    }
}

impl Drop for UpdatePool {
    fn drop(&mut self) {
        // Closing the command channels terminates the workers.
        for worker in &mut self.workers {
            worker.commands.take();
        }
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }
}
