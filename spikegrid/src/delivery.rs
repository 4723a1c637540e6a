//! Interval-scoped buffering of emitted events.
//!
//! Each update thread owns a [`DeliveryLane`] in which it resolves the events
//! emitted by its nodes through the routing table. Deliveries to nodes of the
//! same rank are kept as ready-to-apply ring buffer writes, while deliveries to
//! other ranks are appended to per-rank pending lists. At the end of an
//! interval the lanes of all threads are merged into one [`RankPartition`] per
//! destination rank.
use crate::comm::Rank;
use crate::node::NodeAddr;
use crate::ring_buffer::{Origin, Spike};
use crate::routing::{Payload, RoutingTable, Target};
use crate::time::Step;

/// An event emitted by a local node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Event {
    /// Emitting node.
    pub(crate) origin: NodeAddr,
    /// Emission step.
    pub(crate) step: Step,
    /// Number of spikes represented by the event.
    pub(crate) multiplicity: u32,
}

/// A spike ready to be written into the ring buffer of a local node.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct Delivery {
    /// Local index of the target.
    pub(crate) target: u32,
    /// Step at which the target reads the spike.
    pub(crate) step: Step,
    pub(crate) spike: Spike,
}

/// A spike bound for a node owned by another rank.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct RemoteSpike {
    /// Index of the target on its rank.
    pub(crate) target: u32,
    pub(crate) source: NodeAddr,
    pub(crate) emitted_at: Step,
    pub(crate) delay: u32,
    pub(crate) multiplicity: u32,
    pub(crate) payload: Payload,
}

impl RemoteSpike {
    /// Turns a received spike into a local delivery.
    pub(crate) fn into_delivery(self) -> Delivery {
        Delivery {
            target: self.target,
            step: self.emitted_at + u64::from(self.delay),
            spike: Spike {
                origin: Origin::Node(self.source),
                emitted_at: self.emitted_at,
                multiplicity: self.multiplicity,
                weight: self.payload.weight,
                receptor: self.payload.receptor,
            },
        }
    }
}

/// Thread-local buffer of the deliveries resolved during one interval.
#[derive(Debug)]
pub(crate) struct DeliveryLane {
    local: Vec<Delivery>,
    remote: Vec<Vec<RemoteSpike>>,
    emitted: u64,
}

impl DeliveryLane {
    pub(crate) fn new(num_ranks: usize) -> Self {
        Self {
            local: Vec::new(),
            remote: (0..num_ranks).map(|_| Vec::new()).collect(),
            emitted: 0,
        }
    }

    /// Resolves the destinations of an event and buffers one delivery per
    /// route.
    ///
    /// The multiplicity carried over each route is given by `per_target`,
    /// called with the emitted multiplicity and the target address; routes
    /// for which it returns 0 are skipped.
    ///
    /// Deliveries are buffered in route order, so the deliveries of a given
    /// event keep their relative order in the merged partitions.
    pub(crate) fn route<F>(&mut self, event: Event, table: &RoutingTable, mut per_target: F)
    where
        F: FnMut(u32, NodeAddr) -> u32,
    {
        self.emitted += 1;

        for route in table.routes(event.origin.index()) {
            let target = NodeAddr::new(route.rank, route.target.index());
            let multiplicity = per_target(event.multiplicity, target);
            if multiplicity == 0 {
                continue;
            }

            match route.target {
                Target::Local(target) => self.local.push(Delivery {
                    target,
                    step: event.step + u64::from(route.delay),
                    spike: Spike {
                        origin: Origin::Node(event.origin),
                        emitted_at: event.step,
                        multiplicity,
                        weight: route.payload.weight,
                        receptor: route.payload.receptor,
                    },
                }),
                Target::Remote(target) => self.remote[route.rank].push(RemoteSpike {
                    target,
                    source: event.origin,
                    emitted_at: event.step,
                    delay: route.delay,
                    multiplicity,
                    payload: route.payload,
                }),
            }
        }
    }

    /// Number of events routed through this lane.
    pub(crate) fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Deliveries to local nodes.
    pub(crate) fn local(&self) -> &[Delivery] {
        &self.local
    }

    /// Spikes pending for the specified rank.
    pub(crate) fn remote(&self, rank: Rank) -> &[RemoteSpike] {
        &self.remote[rank]
    }
}

/// The spikes sent to one rank over one interval.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct RankPartition {
    pub(crate) spikes: Vec<RemoteSpike>,
}

impl RankPartition {
    pub(crate) fn len(&self) -> usize {
        self.spikes.len()
    }
}

/// Result of merging the lanes of all update threads.
#[derive(Debug, Default)]
pub(crate) struct MergedLanes {
    /// Deliveries to local nodes.
    pub(crate) local: Vec<Delivery>,
    /// One partition per rank; the partition of the local rank stays empty.
    pub(crate) partitions: Vec<RankPartition>,
    /// Number of events emitted by local nodes.
    pub(crate) emitted: u64,
}

/// Merges thread lanes in thread order.
///
/// Each lane is copied to a disjoint range of the destination buffers, whose
/// offsets follow from the per-lane counts.
pub(crate) fn merge_lanes(lanes: &[DeliveryLane], num_ranks: usize) -> MergedLanes {
    let local_len = lanes.iter().map(|l| l.local.len()).sum();
    let mut local = Vec::with_capacity(local_len);
    for lane in lanes {
        local.extend_from_slice(lane.local());
    }

    let partitions = (0..num_ranks)
        .map(|rank| {
            let len = lanes.iter().map(|l| l.remote(rank).len()).sum();
            let mut spikes = Vec::with_capacity(len);
            for lane in lanes {
                spikes.extend_from_slice(lane.remote(rank));
            }

            RankPartition { spikes }
        })
        .collect();

    MergedLanes {
        local,
        partitions,
        emitted: lanes.iter().map(|l| l.emitted()).sum(),
    }
}
