//! Step-indexed inbound spike storage.
//!
//! Each local node owns a [`RingBuffer`] holding the spikes that will be
//! delivered to it during the next `capacity` steps. A slot is indexed by
//! `step mod capacity` and tagged with the step it currently holds, so that
//! any attempt to reuse a slot before it was drained is detected instead of
//! silently merging spikes that belong to different steps.
//!
//! All writes happen at interval boundaries, after every node of the rank has
//! read its slots for the interval. The range of steps that may be written
//! is therefore `[cursor, cursor + capacity)`, where `cursor` is the next step
//! to be read.
use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::mem;

use crate::coupling::PortId;
use crate::node::NodeAddr;
use crate::time::Step;

/// Origin of a delivered spike.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Origin {
    /// The spike was emitted by a node.
    Node(NodeAddr),
    /// The spike was injected through an inbound external event port.
    Port(PortId),
}

/// A spike delivered to a node.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Spike {
    /// Emitter of the spike.
    pub origin: Origin,
    /// Step at which the spike was emitted.
    pub emitted_at: Step,
    /// Number of spikes represented by this record.
    pub multiplicity: u32,
    /// Weight of the connection.
    pub weight: f64,
    /// Receptor port of the target.
    pub receptor: u32,
}

impl Spike {
    // Total order used to store spikes canonically within a slot.
    fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.origin
            .cmp(&other.origin)
            .then(self.emitted_at.cmp(&other.emitted_at))
            .then(self.receptor.cmp(&other.receptor))
            .then(self.multiplicity.cmp(&other.multiplicity))
            .then(self.weight.total_cmp(&other.weight))
    }
}

/// Spikes delivered to a node for one step.
///
/// Spikes are kept in a canonical order, so the content of a slot does not
/// depend on the order in which the spikes arrived. Aggregates are computed
/// over that order and are therefore bit-for-bit reproducible.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SlotInput {
    spikes: Vec<Spike>,
}

impl SlotInput {
    /// Spikes of the slot in canonical order.
    pub fn spikes(&self) -> &[Spike] {
        &self.spikes
    }

    /// Number of spike records.
    pub fn len(&self) -> usize {
        self.spikes.len()
    }

    /// Checks whether the slot is empty.
    pub fn is_empty(&self) -> bool {
        self.spikes.is_empty()
    }

    /// Total multiplicity of the slot.
    pub fn multiplicity(&self) -> u64 {
        self.spikes.iter().map(|s| u64::from(s.multiplicity)).sum()
    }

    /// Sum of `weight × multiplicity` over all spikes.
    pub fn weighted_input(&self) -> f64 {
        self.spikes
            .iter()
            .map(|s| s.weight * f64::from(s.multiplicity))
            .sum()
    }

    /// Sum of `weight × multiplicity` over the spikes targeting a receptor.
    pub fn receptor_input(&self, receptor: u32) -> f64 {
        self.spikes
            .iter()
            .filter(|s| s.receptor == receptor)
            .map(|s| s.weight * f64::from(s.multiplicity))
            .sum()
    }

    /// Inserts a spike at its canonical position.
    pub(crate) fn insert(&mut self, spike: Spike) {
        let pos = self
            .spikes
            .partition_point(|s| s.canonical_cmp(&spike) != Ordering::Greater);
        self.spikes.insert(pos, spike);
    }

    fn clear(&mut self) {
        self.spikes.clear();
    }
}

#[derive(Debug, Default)]
struct Slot {
    step: Option<Step>,
    input: SlotInput,
}

/// Fixed-capacity circular buffer of inbound spikes, one slot per step.
#[derive(Debug)]
pub struct RingBuffer {
    slots: Box<[Slot]>,
    cursor: Step,
}

impl RingBuffer {
    /// Creates a ring buffer holding `capacity` steps, with a read cursor at
    /// step 0.
    ///
    /// # Panics
    ///
    /// This will panic if the capacity is zero.
    pub fn new(capacity: Step) -> Self {
        assert!(capacity > 0, "ring buffers must hold at least one step");

        Self {
            slots: (0..capacity).map(|_| Slot::default()).collect(),
            cursor: 0,
        }
    }

    /// Number of steps the buffer can hold.
    pub fn capacity(&self) -> Step {
        self.slots.len() as Step
    }

    /// Next step to be read.
    pub fn cursor(&self) -> Step {
        self.cursor
    }

    /// Adds a spike to the slot of the specified step.
    pub fn write(&mut self, step: Step, spike: Spike) -> Result<(), RingBufferError> {
        if step < self.cursor {
            return Err(RingBufferError::PastStep {
                step,
                cursor: self.cursor,
            });
        }
        let capacity = self.capacity();
        if step - self.cursor >= capacity {
            return Err(RingBufferError::BeyondCapacity {
                step,
                cursor: self.cursor,
                capacity,
            });
        }

        let slot = &mut self.slots[(step % capacity) as usize];
        match slot.step {
            Some(pending) if pending != step => {
                return Err(RingBufferError::SlotCollision { step, pending });
            }
            _ => slot.step = Some(step),
        }
        slot.input.insert(spike);

        Ok(())
    }

    /// Drains the slot of the specified step, which must be the cursor, and
    /// advances the cursor.
    pub fn take(&mut self, step: Step) -> Result<SlotInput, RingBufferError> {
        if step != self.cursor {
            return Err(RingBufferError::OutOfOrderRead {
                expected: self.cursor,
                found: step,
            });
        }
        let capacity = self.capacity();
        let slot = &mut self.slots[(step % capacity) as usize];
        let input = match slot.step.take() {
            None => SlotInput::default(),
            Some(pending) if pending == step => mem::take(&mut slot.input),
            Some(pending) => {
                slot.step = Some(pending);

                return Err(RingBufferError::SlotCollision { step, pending });
            }
        };
        self.cursor += 1;

        Ok(input)
    }

    /// Returns a drained slot so its allocation can be reused.
    pub fn recycle(&mut self, mut input: SlotInput) {
        let capacity = self.capacity();
        // The slot of the last drained step.
        let Some(last) = self.cursor.checked_sub(1) else {
            return;
        };
        let slot = &mut self.slots[(last % capacity) as usize];
        if slot.step.is_none() && slot.input.spikes.capacity() == 0 {
            input.clear();
            slot.input = input;
        }
    }

    /// Returns a copy of the spikes pending for the specified step.
    ///
    /// An empty slot is returned for steps that were already drained or lie
    /// beyond the buffer's reach.
    pub fn peek(&self, step: Step) -> SlotInput {
        let capacity = self.capacity();
        if step < self.cursor || step - self.cursor >= capacity {
            return SlotInput::default();
        }
        let slot = &self.slots[(step % capacity) as usize];
        match slot.step {
            Some(pending) if pending == step => slot.input.clone(),
            _ => SlotInput::default(),
        }
    }
}

/// An error related to the capacity invariant of a ring buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RingBufferError {
    /// The step was already read.
    PastStep {
        /// Step of the write.
        step: Step,
        /// Next step to be read.
        cursor: Step,
    },
    /// The step lies beyond the reach of the buffer.
    BeyondCapacity {
        /// Step of the write.
        step: Step,
        /// Next step to be read.
        cursor: Step,
        /// Capacity of the buffer.
        capacity: Step,
    },
    /// The slot still holds undrained spikes for another step.
    SlotCollision {
        /// Step of the access.
        step: Step,
        /// Step currently held by the slot.
        pending: Step,
    },
    /// Slots were not read in step order.
    OutOfOrderRead {
        /// Next step to be read.
        expected: Step,
        /// Step that was requested.
        found: Step,
    },
}

impl fmt::Display for RingBufferError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PastStep { step, cursor } => write!(
                fmt,
                "spike delivered for step {} but the buffer was already read up to step {}",
                step, cursor
            ),
            Self::BeyondCapacity {
                step,
                cursor,
                capacity,
            } => write!(
                fmt,
                "spike delivered for step {} lies beyond the {} steps reachable from step {}",
                step, capacity, cursor
            ),
            Self::SlotCollision { step, pending } => write!(
                fmt,
                "the slot of step {} still holds undrained spikes for step {}",
                step, pending
            ),
            Self::OutOfOrderRead { expected, found } => write!(
                fmt,
                "attempted to read step {} while step {} is next",
                found, expected
            ),
        }
    }
}

impl Error for RingBufferError {}
