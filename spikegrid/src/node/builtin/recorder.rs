use std::sync::{Arc, Mutex};

use crate::node::{Node, NodeError, UpdateContext};
use crate::ring_buffer::Spike;
use crate::time::Step;

/// Spikes received by a [`Recorder`] for one step.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// Step at which the spikes were delivered.
    pub step: Step,
    /// Delivered spikes, in canonical order.
    pub spikes: Vec<Spike>,
}

impl Record {
    /// Total multiplicity of the record.
    pub fn multiplicity(&self) -> u64 {
        self.spikes.iter().map(|s| u64::from(s.multiplicity)).sum()
    }
}

/// Node recording the spikes it receives.
///
/// Only steps with a non-empty input are recorded. Records are read through
/// the [`RecorderHandle`] returned at construction, which remains valid after
/// the node was moved into a kernel.
#[derive(Debug)]
pub struct Recorder {
    records: Arc<Mutex<Vec<Record>>>,
}

impl Recorder {
    /// Creates a recorder and a handle to its records.
    pub fn new() -> (Self, RecorderHandle) {
        let records = Arc::new(Mutex::new(Vec::new()));

        (
            Self {
                records: records.clone(),
            },
            RecorderHandle { records },
        )
    }
}

impl Node for Recorder {
    fn model(&self) -> &'static str {
        "recorder"
    }

    fn max_rate(&self) -> u32 {
        0
    }

    fn update(&mut self, cx: &mut UpdateContext<'_>) -> Result<(), NodeError> {
        let input = cx.input();
        if !input.is_empty() {
            self.records.lock().unwrap().push(Record {
                step: cx.step(),
                spikes: input.spikes().to_vec(),
            });
        }

        Ok(())
    }
}

/// Read access to the records of a [`Recorder`].
#[derive(Clone, Debug)]
pub struct RecorderHandle {
    records: Arc<Mutex<Vec<Record>>>,
}

impl RecorderHandle {
    /// Returns a copy of all records so far.
    pub fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }

    /// Removes and returns all records so far.
    pub fn take(&self) -> Vec<Record> {
        std::mem::take(&mut *self.records.lock().unwrap())
    }

    /// Total multiplicity received so far.
    pub fn total(&self) -> u64 {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(Record::multiplicity)
            .sum()
    }

    /// Last step with a non-empty input, if any.
    pub fn last_step(&self) -> Option<Step> {
        self.records.lock().unwrap().last().map(|r| r.step)
    }
}
