//! Wire format of the exchange.
//!
//! All integers are little endian.
//!
//! An interval frame sent by one rank to another is made of a 16-byte header
//! followed by a fixed number of 36-byte record slots:
//!
//! ```text
//! header: | start: u64 | count: u32 | capacity: u32 |
//! record: | target: u32 | source rank: u32 | source index: u32 | lag: u32 |
//!         | delay: u32 | receptor: u32 | multiplicity: u32 | weight: f64 |
//! ```
//!
//! `start` is the first step of the interval, `capacity` the number of record
//! slots, which is the sender's negotiated send bound, and `count` the number
//! of slots in use. Unused slots are zeroed. The lag is the emission step
//! relative to `start`.
use std::error::Error;
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::comm::Rank;
use crate::delivery::RemoteSpike;
use crate::node::NodeAddr;
use crate::routing::Payload;
use crate::time::{Interval, Step};

pub(crate) const HEADER_LEN: usize = 16;
pub(crate) const RECORD_LEN: usize = 36;
pub(crate) const SETUP_LEN: usize = 48;

/// Serializes the spikes sent to one rank over an interval.
///
/// The caller must ensure that `spikes.len() <= capacity`.
pub(crate) fn encode_frame(interval: Interval, capacity: u32, spikes: &[RemoteSpike]) -> Bytes {
    debug_assert!(spikes.len() <= capacity as usize);

    let len = HEADER_LEN + capacity as usize * RECORD_LEN;
    let mut buf = BytesMut::with_capacity(len);
    buf.put_u64_le(interval.start());
    buf.put_u32_le(spikes.len() as u32);
    buf.put_u32_le(capacity);
    for spike in spikes {
        buf.put_u32_le(spike.target);
        buf.put_u32_le(spike.source.rank() as u32);
        buf.put_u32_le(spike.source.index());
        buf.put_u32_le((spike.emitted_at - interval.start()) as u32);
        buf.put_u32_le(spike.delay);
        buf.put_u32_le(spike.payload.receptor);
        buf.put_u32_le(spike.multiplicity);
        buf.put_f64_le(spike.payload.weight);
    }
    buf.put_bytes(0, len - buf.len());

    buf.freeze()
}

/// Deserializes a frame received from `sender`, checking it against the
/// interval and the sender's advertised capacity.
pub(crate) fn decode_frame(
    mut data: Bytes,
    sender: Rank,
    interval: Interval,
    capacity: u32,
) -> Result<Vec<RemoteSpike>, FrameError> {
    if data.len() < HEADER_LEN {
        return Err(FrameError::Truncated { len: data.len() });
    }
    let start = data.get_u64_le();
    let count = data.get_u32_le();
    let found_capacity = data.get_u32_le();

    if found_capacity != capacity {
        return Err(FrameError::CapacityMismatch {
            advertised: capacity,
            found: found_capacity,
        });
    }
    if data.len() != capacity as usize * RECORD_LEN {
        return Err(FrameError::Truncated {
            len: data.len() + HEADER_LEN,
        });
    }
    if count > capacity {
        return Err(FrameError::CountOverflow { count, capacity });
    }
    if start != interval.start() {
        return Err(FrameError::OutOfStep {
            expected: interval.start(),
            found: start,
        });
    }

    let mut spikes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let target = data.get_u32_le();
        let source_rank = data.get_u32_le() as Rank;
        let source_index = data.get_u32_le();
        let lag = data.get_u32_le();
        let delay = data.get_u32_le();
        let receptor = data.get_u32_le();
        let multiplicity = data.get_u32_le();
        let weight = data.get_f64_le();

        if source_rank != sender {
            return Err(FrameError::ForeignSource { found: source_rank });
        }
        if u64::from(lag) >= interval.len() {
            return Err(FrameError::LagOutOfRange {
                lag,
                len: interval.len(),
            });
        }

        spikes.push(RemoteSpike {
            target,
            source: NodeAddr::new(source_rank, source_index),
            emitted_at: start + u64::from(lag),
            delay,
            multiplicity,
            payload: Payload { weight, receptor },
        });
    }

    Ok(spikes)
}

/// Setup parameters advertised by each rank before the first interval.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct SetupRecord {
    pub(crate) resolution_nanos: u64,
    pub(crate) min_delay_override: Option<Step>,
    pub(crate) max_delay_override: Option<Step>,
    /// Shortest delay among the connections of the rank.
    pub(crate) min_delay: Option<Step>,
    /// Longest delay among the connections of the rank.
    pub(crate) max_delay: Option<Step>,
    pub(crate) num_nodes: u32,
}

fn put_opt(buf: &mut BytesMut, value: Option<u64>) {
    match value {
        Some(v) => {
            buf.put_u8(1);
            buf.put_u64_le(v);
        }
        None => {
            buf.put_u8(0);
            buf.put_u64_le(0);
        }
    }
}

fn get_opt(data: &mut Bytes) -> Option<u64> {
    let flag = data.get_u8();
    let value = data.get_u64_le();

    (flag != 0).then_some(value)
}

impl SetupRecord {
    pub(crate) fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SETUP_LEN);
        buf.put_u64_le(self.resolution_nanos);
        put_opt(&mut buf, self.min_delay_override);
        put_opt(&mut buf, self.max_delay_override);
        put_opt(&mut buf, self.min_delay);
        put_opt(&mut buf, self.max_delay);
        buf.put_u32_le(self.num_nodes);

        buf.freeze()
    }

    pub(crate) fn decode(mut data: Bytes) -> Result<Self, FrameError> {
        if data.len() != SETUP_LEN {
            return Err(FrameError::Truncated { len: data.len() });
        }

        Ok(Self {
            resolution_nanos: data.get_u64_le(),
            min_delay_override: get_opt(&mut data),
            max_delay_override: get_opt(&mut data),
            min_delay: get_opt(&mut data),
            max_delay: get_opt(&mut data),
            num_nodes: data.get_u32_le(),
        })
    }
}

pub(crate) fn encode_bound(bound: u32) -> Bytes {
    Bytes::copy_from_slice(&bound.to_le_bytes())
}

pub(crate) fn decode_bound(mut data: Bytes) -> Result<u32, FrameError> {
    if data.len() != 4 {
        return Err(FrameError::Truncated { len: data.len() });
    }

    Ok(data.get_u32_le())
}

/// A malformed exchange frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameError {
    /// The frame length does not match its header.
    Truncated {
        /// Length of the frame in bytes.
        len: usize,
    },
    /// The number of record slots differs from the sender's advertised bound.
    CapacityMismatch {
        /// Advertised bound.
        advertised: u32,
        /// Slot count found in the frame.
        found: u32,
    },
    /// More records are in use than there are slots.
    CountOverflow {
        /// Records in use.
        count: u32,
        /// Slot count.
        capacity: u32,
    },
    /// The frame belongs to another interval.
    OutOfStep {
        /// First step of the local interval.
        expected: Step,
        /// First step found in the frame.
        found: Step,
    },
    /// A record claims to originate from a rank other than the sender.
    ForeignSource {
        /// Source rank found in the record.
        found: Rank,
    },
    /// A record was emitted outside the interval.
    LagOutOfRange {
        /// Offending lag.
        lag: u32,
        /// Interval length.
        len: u64,
    },
}

impl fmt::Display for FrameError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { len } => write!(fmt, "unexpected frame length ({} bytes)", len),
            Self::CapacityMismatch { advertised, found } => write!(
                fmt,
                "the frame has {} slots but the sender advertised {}",
                found, advertised
            ),
            Self::CountOverflow { count, capacity } => write!(
                fmt,
                "the frame uses {} records out of {} slots",
                count, capacity
            ),
            Self::OutOfStep { expected, found } => write!(
                fmt,
                "the frame starts at step {} instead of step {}",
                found, expected
            ),
            Self::ForeignSource { found } => {
                write!(fmt, "a record originates from unexpected rank {}", found)
            }
            Self::LagOutOfRange { lag, len } => write!(
                fmt,
                "a record was emitted at lag {} of an interval of {} steps",
                lag, len
            ),
        }
    }
}

impl Error for FrameError {}
