use crate::node::builtin::ParameterError;
use crate::node::{Node, NodeError, UpdateContext};
use crate::time::Step;

/// Spike source emitting at a fixed list of steps.
#[derive(Clone, Debug)]
pub struct SpikeTrain {
    steps: Vec<Step>,
    multiplicity: u32,
    next: usize,
}

impl SpikeTrain {
    /// Creates a spike train emitting one spike at each of the specified
    /// steps, which must be strictly increasing.
    pub fn new(steps: impl Into<Vec<Step>>) -> Result<Self, ParameterError> {
        let steps = steps.into();
        if let Some(index) = steps.windows(2).position(|w| w[0] >= w[1]) {
            return Err(ParameterError::NotIncreasing { index: index + 1 });
        }

        Ok(Self {
            steps,
            multiplicity: 1,
            next: 0,
        })
    }

    /// Sets the multiplicity of the emitted events.
    pub fn with_multiplicity(mut self, multiplicity: u32) -> Self {
        self.multiplicity = multiplicity;

        self
    }

    /// Steps at which spikes are emitted.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

impl Node for SpikeTrain {
    fn model(&self) -> &'static str {
        "spike_train"
    }

    fn refresh(&mut self, step: Step) {
        while self.next < self.steps.len() && self.steps[self.next] < step {
            self.next += 1;
        }
    }

    fn update(&mut self, cx: &mut UpdateContext<'_>) -> Result<(), NodeError> {
        if self.steps.get(self.next) == Some(&cx.step()) {
            self.next += 1;
            cx.emit(self.multiplicity)?;
        }

        Ok(())
    }
}
