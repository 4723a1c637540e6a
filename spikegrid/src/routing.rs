//! Per-source routing of emitted events.
//!
//! The routing table of a rank holds every connection whose source is owned
//! by that rank. Connections are stored in a single arena sorted by source
//! index, with an offset table pointing to the first connection of each
//! source, so that the destinations of a source are resolved in time
//! proportional to its out-degree, independently of the network size.
//!
//! The table is assembled with a [`RoutingTableBuilder`] during network
//! construction. [`RoutingTable`] itself has no mutation API: once the kernel
//! is initialized, the topology can no longer change.
use std::iter::FusedIterator;
use std::slice;

use crate::comm::Rank;
use crate::node::NodeAddr;

/// Opaque connection payload forwarded to the target with each spike.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Payload {
    /// Connection weight.
    pub weight: f64,
    /// Receptor port of the target.
    pub receptor: u32,
}

impl Payload {
    /// Creates a payload with the specified weight, targeting receptor 0.
    pub fn new(weight: f64) -> Self {
        Self {
            weight,
            receptor: 0,
        }
    }

    /// Sets the receptor port.
    pub fn with_receptor(mut self, receptor: u32) -> Self {
        self.receptor = receptor;

        self
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// A directed connection with a fixed delay expressed in steps.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Connection {
    /// Emitting node.
    pub source: NodeAddr,
    /// Receiving node.
    pub target: NodeAddr,
    /// Delay in steps, at least 1.
    pub delay: u32,
    /// Payload forwarded with each spike.
    pub payload: Payload,
}

/// Destination of a route, as seen from the source rank.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    /// A node owned by the source rank, given by its local index.
    Local(u32),
    /// A node owned by another rank, given by its index on that rank.
    Remote(u32),
}

impl Target {
    /// Index of the target on the rank owning it.
    pub fn index(&self) -> u32 {
        match self {
            Self::Local(index) | Self::Remote(index) => *index,
        }
    }
}

/// A resolved destination of a source node.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Route {
    /// Rank owning the target.
    pub rank: Rank,
    /// Target handle.
    pub target: Target,
    /// Delay in steps.
    pub delay: u32,
    /// Connection payload.
    pub payload: Payload,
}

/// Mutable collection of connections, turned into a [`RoutingTable`] once the
/// network is complete.
#[derive(Clone, Debug)]
pub struct RoutingTableBuilder {
    rank: Rank,
    connections: Vec<Connection>,
}

impl RoutingTableBuilder {
    /// Creates an empty builder for the specified rank.
    pub fn new(rank: Rank) -> Self {
        Self {
            rank,
            connections: Vec::new(),
        }
    }

    /// Adds a connection.
    ///
    /// # Panics
    ///
    /// This will panic if the source is not owned by the builder's rank or if
    /// the delay is zero.
    pub fn add(&mut self, connection: Connection) {
        assert_eq!(
            connection.source.rank(),
            self.rank,
            "connections must be added to the rank owning their source"
        );
        assert!(connection.delay > 0, "connection delays must be positive");

        self.connections.push(connection);
    }

    /// Number of connections added so far.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Checks whether no connection was added.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Builds the routing table for `num_sources` local nodes.
    ///
    /// Connections of a given source keep their insertion order.
    ///
    /// # Panics
    ///
    /// This will panic if a connection refers to a source index greater than
    /// or equal to `num_sources`.
    pub fn build(mut self, num_sources: usize) -> RoutingTable {
        self.connections.sort_by_key(|c| c.source.index());

        let mut offsets = vec![0; num_sources + 1];
        for c in &self.connections {
            let source = c.source.index() as usize;
            assert!(source < num_sources, "unknown source node {}", c.source);
            offsets[source + 1] += 1;
        }
        for i in 0..num_sources {
            offsets[i + 1] += offsets[i];
        }

        let rank = self.rank;
        let routes = self
            .connections
            .iter()
            .map(|c| Route {
                rank: c.target.rank(),
                target: if c.target.rank() == rank {
                    Target::Local(c.target.index())
                } else {
                    Target::Remote(c.target.index())
                },
                delay: c.delay,
                payload: c.payload,
            })
            .collect();

        RoutingTable {
            rank,
            routes,
            offsets: offsets.into_boxed_slice(),
        }
    }
}

/// Immutable routing table of a rank.
#[derive(Clone, Debug)]
pub struct RoutingTable {
    rank: Rank,
    routes: Box<[Route]>,
    offsets: Box<[usize]>,
}

impl RoutingTable {
    /// Rank owning all sources of the table.
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Number of source nodes covered by the table.
    pub fn num_sources(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Total number of connections.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Checks whether the table holds no connection.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Returns the routes of the specified local source, in insertion order.
    ///
    /// An unknown source yields no route.
    pub fn routes(&self, source: u32) -> Routes<'_> {
        let source = source as usize;
        let routes = match (self.offsets.get(source), self.offsets.get(source + 1)) {
            (Some(&start), Some(&end)) => &self.routes[start..end],
            _ => &[],
        };

        Routes {
            inner: routes.iter(),
        }
    }

    /// Out-degree of the specified local source.
    pub fn out_degree(&self, source: u32) -> usize {
        self.routes(source).len()
    }

    /// Smallest delay of the table, if any.
    pub fn min_delay(&self) -> Option<u32> {
        self.routes.iter().map(|r| r.delay).min()
    }

    /// Largest delay of the table, if any.
    pub fn max_delay(&self) -> Option<u32> {
        self.routes.iter().map(|r| r.delay).max()
    }

    /// Iterates over all remote routes.
    pub(crate) fn remote_routes(&self) -> impl Iterator<Item = &Route> {
        self.routes
            .iter()
            .filter(|r| matches!(r.target, Target::Remote(_)))
    }

    /// Computes, for each destination rank, the largest number of records the
    /// rank may have to send over an interval of `interval_len` steps, given
    /// the declared per-step rate of each local source.
    pub(crate) fn traffic_bounds(
        &self,
        rates: &[u32],
        interval_len: u64,
        num_ranks: usize,
    ) -> Vec<u64> {
        let mut bounds = vec![0u64; num_ranks];
        for (source, rate) in rates.iter().enumerate() {
            for route in self.routes(source as u32) {
                if let Target::Remote(_) = route.target {
                    bounds[route.rank] = bounds[route.rank]
                        .saturating_add(u64::from(*rate).saturating_mul(interval_len));
                }
            }
        }

        bounds
    }
}

/// Iterator over the routes of a source node.
#[derive(Clone, Debug)]
pub struct Routes<'a> {
    inner: slice::Iter<'a, Route>,
}

impl<'a> Iterator for Routes<'a> {
    type Item = Route;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().copied()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Routes<'_> {}
impl FusedIterator for Routes<'_> {}
