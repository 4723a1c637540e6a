//! Collective communication between ranks.
//!
//! The exchange protocol only needs one collective operation: an all-to-all
//! exchange in which every rank sends one buffer to every rank and receives
//! one buffer from every rank. The [`Communicator`] trait abstracts this
//! operation together with an abort primitive, so that the kernel can run over
//! any transport providing them.
//!
//! Two implementations are provided:
//!
//! * [`SingleRank`], the trivial communicator of a single-process run,
//! * [`LocalCluster`], which connects several ranks living in the same process
//!   (typically one thread per rank) through channels.
use std::error::Error;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

/// Identifier of a worker process participating in the collective exchange.
pub type Rank = usize;

/// A transport able to perform the collective exchange of a run.
pub trait Communicator: Send {
    /// Rank of the caller.
    fn rank(&self) -> Rank;

    /// Number of ranks participating in the run.
    fn num_ranks(&self) -> usize;

    /// Sends `frames[r]` to each rank `r` and returns the frames received from
    /// every rank, indexed by sender.
    ///
    /// The call returns only once all frames of the round were received, or
    /// after a failure. A failed communicator keeps failing.
    fn all_to_all(&mut self, frames: Vec<Bytes>) -> Result<Vec<Bytes>, CommError>;

    /// Notifies every other rank that this rank has aborted the run.
    ///
    /// Ranks blocked in, or later entering, an exchange with this rank fail
    /// with [`CommError::Aborted`].
    fn abort(&mut self);
}

/// Communicator of a run with a single rank.
#[derive(Debug, Default)]
pub struct SingleRank {
    aborted: bool,
}

impl SingleRank {
    /// Creates the communicator.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Communicator for SingleRank {
    fn rank(&self) -> Rank {
        0
    }

    fn num_ranks(&self) -> usize {
        1
    }

    fn all_to_all(&mut self, frames: Vec<Bytes>) -> Result<Vec<Bytes>, CommError> {
        if self.aborted {
            return Err(CommError::Aborted { rank: 0 });
        }
        if frames.len() != 1 {
            return Err(CommError::ArityMismatch {
                expected: 1,
                found: frames.len(),
            });
        }

        Ok(frames)
    }

    fn abort(&mut self) {
        self.aborted = true;
    }
}

#[derive(Debug)]
enum Frame {
    Data(Bytes),
    Abort,
}

/// Builder for a set of in-process ranks connected by channels.
#[derive(Debug)]
pub struct LocalCluster {
    num_ranks: usize,
    timeout: Option<Duration>,
}

impl LocalCluster {
    /// Creates a cluster of `num_ranks` ranks.
    ///
    /// # Panics
    ///
    /// This will panic if `num_ranks` is zero.
    pub fn new(num_ranks: usize) -> Self {
        assert!(num_ranks > 0, "a cluster must have at least one rank");

        Self {
            num_ranks,
            timeout: None,
        }
    }

    /// Sets the time after which a rank waiting for a peer gives up.
    ///
    /// By default ranks wait indefinitely; a lost peer is nevertheless
    /// detected as soon as its communicator is dropped.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);

        self
    }

    /// Creates one communicator per rank, ordered by rank.
    pub fn build(self) -> Vec<LocalComm> {
        let n = self.num_ranks;

        // `channels[sender][receiver]`.
        let mut senders: Vec<Vec<Option<Sender<Frame>>>> = (0..n).map(|_| Vec::new()).collect();
        let mut receivers: Vec<Vec<Option<Receiver<Frame>>>> =
            (0..n).map(|_| (0..n).map(|_| None).collect()).collect();
        for (from, row) in senders.iter_mut().enumerate() {
            for (to, inbox) in receivers.iter_mut().enumerate() {
                if from == to {
                    row.push(None);
                } else {
                    let (tx, rx) = crossbeam_channel::unbounded();
                    row.push(Some(tx));
                    inbox[from] = Some(rx);
                }
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (peers_tx, peers_rx))| LocalComm {
                rank,
                peers_tx,
                peers_rx,
                timeout: self.timeout,
                failure: None,
            })
            .collect()
    }
}

/// Communicator of one rank of a [`LocalCluster`].
#[derive(Debug)]
pub struct LocalComm {
    rank: Rank,
    peers_tx: Vec<Option<Sender<Frame>>>,
    peers_rx: Vec<Option<Receiver<Frame>>>,
    timeout: Option<Duration>,
    failure: Option<CommError>,
}

impl LocalComm {
    fn receive(&self, from: Rank, rx: &Receiver<Frame>) -> Result<Bytes, CommError> {
        let frame = match self.timeout {
            Some(timeout) => rx.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => CommError::Timeout { rank: from },
                RecvTimeoutError::Disconnected => CommError::PeerLost { rank: from },
            })?,
            None => rx.recv().map_err(|_| CommError::PeerLost { rank: from })?,
        };

        match frame {
            Frame::Data(data) => Ok(data),
            Frame::Abort => Err(CommError::Aborted { rank: from }),
        }
    }

    fn exchange(&self, frames: Vec<Bytes>, received: &mut [Bytes]) -> Result<(), CommError> {
        for (to, (tx, frame)) in self.peers_tx.iter().zip(frames).enumerate() {
            if let Some(tx) = tx {
                tx.send(Frame::Data(frame))
                    .map_err(|_| CommError::PeerLost { rank: to })?;
            }
        }
        for (from, rx) in self.peers_rx.iter().enumerate() {
            if let Some(rx) = rx {
                received[from] = self.receive(from, rx)?;
            }
        }

        Ok(())
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.peers_tx.len()
    }

    fn all_to_all(&mut self, mut frames: Vec<Bytes>) -> Result<Vec<Bytes>, CommError> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        if frames.len() != self.num_ranks() {
            return Err(CommError::ArityMismatch {
                expected: self.num_ranks(),
                found: frames.len(),
            });
        }

        let mut received = vec![Bytes::new(); frames.len()];
        received[self.rank] = std::mem::take(&mut frames[self.rank]);

        match self.exchange(frames, &mut received) {
            Ok(()) => Ok(received),
            Err(e) => {
                self.failure = Some(e.clone());

                Err(e)
            }
        }
    }

    fn abort(&mut self) {
        for tx in self.peers_tx.iter().flatten() {
            // Peers that are already gone need no notification.
            let _ = tx.send(Frame::Abort);
        }
        if self.failure.is_none() {
            self.failure = Some(CommError::Aborted { rank: self.rank });
        }
    }
}

/// An error returned by a collective exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommError {
    /// A rank aborted the run.
    Aborted {
        /// Rank that aborted.
        rank: Rank,
    },
    /// A rank disconnected without aborting.
    PeerLost {
        /// Lost rank.
        rank: Rank,
    },
    /// A rank did not answer in time.
    Timeout {
        /// Unresponsive rank.
        rank: Rank,
    },
    /// The number of frames does not match the number of ranks.
    ArityMismatch {
        /// Number of ranks.
        expected: usize,
        /// Number of frames provided.
        found: usize,
    },
}

impl fmt::Display for CommError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aborted { rank } => write!(fmt, "rank {} aborted the run", rank),
            Self::PeerLost { rank } => write!(fmt, "the connection to rank {} was lost", rank),
            Self::Timeout { rank } => write!(fmt, "rank {} did not answer in time", rank),
            Self::ArityMismatch { expected, found } => write!(
                fmt,
                "expected one frame for each of the {} ranks but got {}",
                expected, found
            ),
        }
    }
}

impl Error for CommError {}
