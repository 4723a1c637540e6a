//! Kernel-side port handles.
//!
//! Handles are cheap to clone and may be moved into nodes, so that node
//! updates can feed outbound ports or read inbound ones.
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::time::Step;

use super::{PortError, PortEvent, PortId, PortMessage};

/// Outbound continuous port.
///
/// The last vector set during an interval is published at the end of that
/// interval. Nothing is published for an interval during which no vector was
/// set.
#[derive(Clone)]
pub struct ContinuousSource {
    id: PortId,
    width: usize,
    value: Arc<Mutex<Option<Vec<f64>>>>,
}

impl ContinuousSource {
    pub(super) fn new(id: PortId, width: usize, value: Arc<Mutex<Option<Vec<f64>>>>) -> Self {
        Self { id, width, value }
    }

    /// Port identifier.
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Vector length.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Sets the vector to be published at the end of the current interval.
    pub fn set(&self, values: Vec<f64>) -> Result<(), PortError> {
        if values.len() != self.width {
            return Err(PortError::WidthMismatch {
                expected: self.width,
                found: values.len(),
            });
        }
        *self.value.lock().unwrap() = Some(values);

        Ok(())
    }
}

impl fmt::Debug for ContinuousSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuousSource")
            .field("id", &self.id)
            .field("width", &self.width)
            .finish_non_exhaustive()
    }
}

/// Inbound continuous port.
#[derive(Clone)]
pub struct ContinuousSink {
    id: PortId,
    width: usize,
    value: Arc<Mutex<Option<Vec<f64>>>>,
}

impl ContinuousSink {
    pub(super) fn new(id: PortId, width: usize, value: Arc<Mutex<Option<Vec<f64>>>>) -> Self {
        Self { id, width, value }
    }

    /// Port identifier.
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Vector length.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns the most recently received vector, if any.
    pub fn latest(&self) -> Option<Vec<f64>> {
        self.value.lock().unwrap().clone()
    }
}

impl fmt::Debug for ContinuousSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuousSink")
            .field("id", &self.id)
            .field("width", &self.width)
            .finish_non_exhaustive()
    }
}

/// Outbound event port.
///
/// Events pushed during an interval are published at the end of that
/// interval, possibly as an empty batch. Published events are ordered by step,
/// then by channel.
#[derive(Clone)]
pub struct EventOutlet {
    id: PortId,
    width: usize,
    events: Arc<Mutex<Vec<PortEvent>>>,
}

impl EventOutlet {
    pub(super) fn new(id: PortId, width: usize, events: Arc<Mutex<Vec<PortEvent>>>) -> Self {
        Self { id, width, events }
    }

    /// Port identifier.
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Channel count.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Queues an event with unit weight.
    pub fn push(&self, channel: u32, step: Step, multiplicity: u32) -> Result<(), PortError> {
        if channel as usize >= self.width {
            return Err(PortError::ChannelOutOfRange {
                channel,
                width: self.width,
            });
        }
        self.events.lock().unwrap().push(PortEvent {
            channel,
            step,
            multiplicity,
            weight: 1.0,
        });

        Ok(())
    }
}

impl fmt::Debug for EventOutlet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventOutlet")
            .field("id", &self.id)
            .field("width", &self.width)
            .finish_non_exhaustive()
    }
}

/// Inbound message port.
#[derive(Clone)]
pub struct MessageInbox {
    id: PortId,
    max_payload: usize,
    queue: Arc<Mutex<VecDeque<PortMessage>>>,
}

impl MessageInbox {
    pub(super) fn new(
        id: PortId,
        max_payload: usize,
        queue: Arc<Mutex<VecDeque<PortMessage>>>,
    ) -> Self {
        Self {
            id,
            max_payload,
            queue,
        }
    }

    /// Port identifier.
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Maximum payload size in bytes.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Removes and returns all received messages, oldest first.
    pub fn drain(&self) -> Vec<PortMessage> {
        self.queue.lock().unwrap().drain(..).collect()
    }
}

impl fmt::Debug for MessageInbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageInbox")
            .field("id", &self.id)
            .field("max_payload", &self.max_payload)
            .finish_non_exhaustive()
    }
}
