//! Collective exchange of remote spikes at interval boundaries.
//!
//! Every rank sends to every other rank one fixed-size frame per interval.
//! The number of record slots of the frames sent by a rank is its send bound,
//! negotiated once during setup from the declared rates and fan-out of its
//! nodes, so no per-interval size negotiation is needed. Actual traffic
//! exceeding the bound is a fatal error and is never truncated.
//!
//! The exchange is total: [`Communicator::all_to_all`] returns only once every
//! frame of the round was received, and any failure aborts the run on all
//! ranks.
use std::error::Error;
use std::fmt;

use bytes::Bytes;

use crate::comm::{CommError, Communicator, Rank};
use crate::delivery::{Delivery, RankPartition};
use crate::node::NodeAddr;
use crate::time::Interval;

mod codec;

pub use codec::FrameError;
pub(crate) use codec::SetupRecord;

/// Exchanges the setup record of this rank for the records of all ranks.
pub(crate) fn gather_setup(
    comm: &mut dyn Communicator,
    record: &SetupRecord,
) -> Result<Vec<SetupRecord>, ExchangeError> {
    let num_ranks = comm.num_ranks();
    let frames = comm
        .all_to_all(vec![record.encode(); num_ranks])
        .map_err(ExchangeError::Comm)?;

    frames
        .into_iter()
        .enumerate()
        .map(|(rank, data)| {
            SetupRecord::decode(data).map_err(|error| ExchangeError::Frame { rank, error })
        })
        .collect()
}

/// Exchanges the send bound of this rank for the bounds of all ranks.
pub(crate) fn gather_bounds(
    comm: &mut dyn Communicator,
    bound: u32,
) -> Result<Vec<u32>, ExchangeError> {
    let num_ranks = comm.num_ranks();
    let frames = comm
        .all_to_all(vec![codec::encode_bound(bound); num_ranks])
        .map_err(ExchangeError::Comm)?;

    frames
        .into_iter()
        .enumerate()
        .map(|(rank, data)| {
            codec::decode_bound(data).map_err(|error| ExchangeError::Frame { rank, error })
        })
        .collect()
}

/// Spikes received during one exchange.
#[derive(Debug, Default)]
pub(crate) struct Received {
    pub(crate) deliveries: Vec<Delivery>,
    pub(crate) sent: u64,
}

/// The exchange endpoint of a rank.
pub(crate) struct Exchange {
    comm: Box<dyn Communicator>,
    send_bound: u32,
    recv_bounds: Vec<u32>,
    num_nodes: u32,
}

impl Exchange {
    /// Creates the endpoint from the negotiated bounds, indexed by rank, and
    /// the number of nodes owned by this rank.
    pub(crate) fn new(comm: Box<dyn Communicator>, bounds: Vec<u32>, num_nodes: u32) -> Self {
        Self {
            send_bound: bounds[comm.rank()],
            recv_bounds: bounds,
            comm,
            num_nodes,
        }
    }

    pub(crate) fn rank(&self) -> Rank {
        self.comm.rank()
    }

    pub(crate) fn num_ranks(&self) -> usize {
        self.comm.num_ranks()
    }

    /// Negotiated number of record slots of the frames sent by this rank.
    pub(crate) fn send_bound(&self) -> u32 {
        self.send_bound
    }

    /// Sends the partitions of the interval, indexed by destination rank, and
    /// returns the deliveries received from all other ranks.
    pub(crate) fn run(
        &mut self,
        interval: Interval,
        partitions: &[RankPartition],
    ) -> Result<Received, ExchangeError> {
        let rank = self.rank();

        let mut sent = 0;
        let mut frames = Vec::with_capacity(partitions.len());
        for (to, partition) in partitions.iter().enumerate() {
            if to == rank {
                frames.push(Bytes::new());
                continue;
            }
            if partition.len() > self.send_bound as usize {
                return Err(ExchangeError::SendBoundExceeded {
                    rank: to,
                    count: partition.len(),
                    bound: self.send_bound,
                });
            }
            sent += partition.len() as u64;
            frames.push(codec::encode_frame(
                interval,
                self.send_bound,
                &partition.spikes,
            ));
        }

        let frames = self.comm.all_to_all(frames).map_err(ExchangeError::Comm)?;

        let mut deliveries = Vec::new();
        for (from, data) in frames.into_iter().enumerate() {
            if from == rank {
                continue;
            }
            let spikes = codec::decode_frame(data, from, interval, self.recv_bounds[from])
                .map_err(|error| ExchangeError::Frame { rank: from, error })?;
            deliveries.reserve(spikes.len());
            for spike in spikes {
                if spike.target >= self.num_nodes {
                    return Err(ExchangeError::UnknownTarget {
                        rank: from,
                        target: NodeAddr::new(rank, spike.target),
                    });
                }
                deliveries.push(spike.into_delivery());
            }
        }

        Ok(Received { deliveries, sent })
    }

    /// Notifies all other ranks that this rank aborted the run.
    pub(crate) fn abort(&mut self) {
        self.comm.abort();
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("rank", &self.rank())
            .field("send_bound", &self.send_bound)
            .field("recv_bounds", &self.recv_bounds)
            .finish_non_exhaustive()
    }
}

/// A fatal failure of the collective exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExchangeError {
    /// The transport failed.
    Comm(CommError),
    /// A frame received from a rank is malformed.
    Frame {
        /// Sender of the frame.
        rank: Rank,
        /// Defect of the frame.
        error: FrameError,
    },
    /// The traffic to a rank exceeds the negotiated send bound.
    SendBoundExceeded {
        /// Destination rank.
        rank: Rank,
        /// Number of spikes to send.
        count: usize,
        /// Negotiated bound.
        bound: u32,
    },
    /// A rank sent a spike to a node that does not exist.
    UnknownTarget {
        /// Sender of the spike.
        rank: Rank,
        /// Address of the missing node.
        target: NodeAddr,
    },
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Comm(e) => write!(fmt, "the collective exchange failed: {}", e),
            Self::Frame { rank, error } => {
                write!(fmt, "malformed frame received from rank {}: {}", rank, error)
            }
            Self::SendBoundExceeded { rank, count, bound } => write!(
                fmt,
                "{} spikes are pending for rank {}, above the negotiated bound of {}",
                count, rank, bound
            ),
            Self::UnknownTarget { rank, target } => write!(
                fmt,
                "rank {} sent a spike to unknown node {}",
                rank, target
            ),
        }
    }
}

impl Error for ExchangeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Comm(e) => Some(e),
            Self::Frame { error, .. } => Some(error),
            _ => None,
        }
    }
}
