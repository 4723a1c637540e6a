use std::time::Duration;

use rand::Rng;

use crate::coupling::MessageInbox;
use crate::node::builtin::ParameterError;
use crate::node::{Node, NodeAddr, NodeError, NodeRng, UpdateContext};
use crate::time::{Step, TimeGrid};

// Largest mean drawn in one go; larger means are split to keep `exp(-mean)`
// well above the smallest positive `f64`.
const MAX_CHUNK_MEAN: f64 = 30.0;

/// Spike source following an inhomogeneous Poisson process with a
/// piecewise-constant rate.
///
/// The rate, in spikes per second, is given by a list of strictly increasing
/// rate times with their values. Spikes are considered to occur at the end of
/// the step that generates them, so the rate set at time `t` takes effect
/// from the step ending at `t`.
///
/// At each active step with a positive rate, the generator emits one event.
/// For each target, the number of spikes it carries is drawn independently
/// from a Poisson distribution with mean `rate · h`, where `h` is the
/// resolution. Targets drawing zero receive nothing.
///
/// Rates can also be appended during a run through a [`MessageInbox`], see
/// [`with_stimulation_inbox()`](Self::with_stimulation_inbox).
#[derive(Clone, Debug)]
pub struct InhomogeneousPoissonGenerator {
    grid: TimeGrid,
    rate_steps: Vec<Step>,
    rate_values: Vec<f64>,
    allow_offgrid_times: bool,
    start: Step,
    stop: Option<Step>,
    next_rate: usize,
    rate: f64,
    // Mean spike count per target for the current step.
    mean: f64,
    // First step that is not updated yet.
    now: Step,
    inbox: Option<MessageInbox>,
}

impl InhomogeneousPoissonGenerator {
    /// Creates a silent generator on the specified grid.
    pub fn new(grid: TimeGrid) -> Self {
        Self {
            grid,
            rate_steps: Vec::new(),
            rate_values: Vec::new(),
            allow_offgrid_times: false,
            start: 0,
            stop: None,
            next_rate: 0,
            rate: 0.0,
            mean: 0.0,
            now: 0,
            inbox: None,
        }
    }

    /// Allows rate times that do not lie on the grid; such times are moved to
    /// the end of the step containing them.
    ///
    /// The option can only be changed while no rate time is set.
    pub fn set_allow_offgrid_times(&mut self, allow: bool) -> Result<(), ParameterError> {
        if allow != self.allow_offgrid_times && !self.rate_steps.is_empty() {
            return Err(ParameterError::OffgridLocked);
        }
        self.allow_offgrid_times = allow;

        Ok(())
    }

    /// Reads rate updates from the specified inbox.
    ///
    /// Each message carries `(time, rate)` pairs encoded as consecutive
    /// little-endian `f64` values, with times in milliseconds and rates in
    /// spikes per second. Messages are read before the first step following
    /// their reception and applied as by
    /// [`extend_from_pairs()`](Self::extend_from_pairs). A rejected message
    /// is logged and leaves the rates unchanged.
    ///
    /// The generator drains the inbox, so it should not be shared with other
    /// readers.
    pub fn with_stimulation_inbox(mut self, inbox: MessageInbox) -> Self {
        self.inbox = Some(inbox);

        self
    }

    /// Restricts spike generation to the steps of `[start, stop)`.
    pub fn with_window(mut self, start: Duration, stop: Option<Duration>) -> Self {
        self.start = self.grid.steps_ceil(start);
        self.stop = stop.map(|t| self.grid.steps_ceil(t));

        self
    }

    /// Replaces all rate times and values.
    ///
    /// Times must lie strictly after the current simulation time and be
    /// strictly increasing once aligned to the grid. An empty list leaves the
    /// rates unchanged. On error, the rates are left unchanged as well.
    pub fn set_rates(&mut self, times: &[Duration], values: &[f64]) -> Result<(), ParameterError> {
        self.set_rates_with_offgrid(times, values, self.allow_offgrid_times)
    }

    /// Replaces all rate times and values and sets the off-grid option in a
    /// single update.
    ///
    /// The times are validated with the new option. With an empty list, this
    /// is equivalent to [`set_allow_offgrid_times()`](Self::set_allow_offgrid_times).
    pub fn set_rates_with_offgrid(
        &mut self,
        times: &[Duration],
        values: &[f64],
        allow_offgrid_times: bool,
    ) -> Result<(), ParameterError> {
        if times.len() != values.len() {
            return Err(ParameterError::LengthMismatch {
                times: times.len(),
                values: values.len(),
            });
        }
        if times.is_empty() {
            return self.set_allow_offgrid_times(allow_offgrid_times);
        }

        let mut rate_steps = Vec::with_capacity(times.len());
        for (index, &time) in times.iter().enumerate() {
            let step = self.align(time, allow_offgrid_times)?;
            if rate_steps.last().is_some_and(|&prev| prev >= step) {
                return Err(ParameterError::NotIncreasing { index });
            }
            rate_steps.push(step);
        }

        self.rate_steps = rate_steps;
        self.rate_values = values.to_vec();
        self.allow_offgrid_times = allow_offgrid_times;
        self.next_rate = 0;

        Ok(())
    }

    /// Appends `(time, rate)` pairs given as flat data `[t0, r0, t1, r1, ...]`,
    /// with times in milliseconds and rates in spikes per second.
    ///
    /// Appended times must lie strictly after the current simulation time and
    /// after the last rate time already set. The update is all-or-nothing.
    pub fn extend_from_pairs(&mut self, data: &[f64]) -> Result<(), ParameterError> {
        if data.len() % 2 != 0 {
            return Err(ParameterError::OddLength(data.len()));
        }

        let mut rate_steps = self.rate_steps.clone();
        let mut rate_values = self.rate_values.clone();
        for pair in data.chunks_exact(2) {
            let time = millis_to_duration(pair[0])?;
            let step = self.align(time, self.allow_offgrid_times)?;
            if rate_steps.last().is_some_and(|&prev| prev >= step) {
                return Err(ParameterError::NotIncreasing {
                    index: rate_steps.len(),
                });
            }
            rate_steps.push(step);
            rate_values.push(pair[1]);
        }

        // Existing times are unchanged, so the index of the next rate stays
        // valid.
        self.rate_steps = rate_steps;
        self.rate_values = rate_values;

        Ok(())
    }

    /// Appends the `(time, rate)` pairs encoded in a stimulation message.
    ///
    /// See [`with_stimulation_inbox()`](Self::with_stimulation_inbox) for the
    /// encoding.
    pub fn apply_stimulation(&mut self, payload: &[u8]) -> Result<(), ParameterError> {
        if payload.len() % 8 != 0 {
            return Err(ParameterError::MalformedPayload(payload.len()));
        }
        let data: Vec<f64> = payload
            .chunks_exact(8)
            .map(|chunk| {
                let mut bytes = [0; 8];
                bytes.copy_from_slice(chunk);
                f64::from_le_bytes(bytes)
            })
            .collect();

        self.extend_from_pairs(&data)
    }

    /// Rate times, aligned to the grid.
    pub fn rate_times(&self) -> Vec<Duration> {
        self.rate_steps.iter().map(|&s| self.grid.time(s)).collect()
    }

    /// Rate values, in spikes per second.
    pub fn rate_values(&self) -> &[f64] {
        &self.rate_values
    }

    /// Rate currently in effect, in spikes per second.
    pub fn current_rate(&self) -> f64 {
        self.rate
    }

    fn is_active(&self, step: Step) -> bool {
        step >= self.start && self.stop.map_or(true, |stop| step < stop)
    }

    // Checks that a time lies in the future and returns its step.
    fn align(&self, time: Duration, allow_offgrid_times: bool) -> Result<Step, ParameterError> {
        if time <= self.grid.time(self.now) {
            return Err(ParameterError::NotInFuture { time });
        }

        match self.grid.steps(time) {
            Some(step) => Ok(step),
            None if allow_offgrid_times => Ok(self.grid.steps_ceil(time)),
            None => Err(ParameterError::NotOnGrid { time }),
        }
    }
}

impl Node for InhomogeneousPoissonGenerator {
    fn model(&self) -> &'static str {
        "inhomogeneous_poisson_generator"
    }

    fn refresh(&mut self, step: Step) {
        self.now = step;
        let messages = self.inbox.as_ref().map(MessageInbox::drain).unwrap_or_default();
        for message in messages {
            if let Err(error) = self.apply_stimulation(&message.payload) {
                tracing::warn!(step, %error, "stimulation update rejected");
            }
        }

        // Rate changes due at or before this step were missed.
        while self.next_rate < self.rate_steps.len() && self.rate_steps[self.next_rate] <= step {
            self.next_rate += 1;
        }
        if self.next_rate < self.rate_steps.len() && step + 1 == self.rate_steps[self.next_rate] {
            self.rate = self.rate_values[self.next_rate];
            self.next_rate += 1;
        }
        self.now = step + 1;
    }

    fn update(&mut self, cx: &mut UpdateContext<'_>) -> Result<(), NodeError> {
        if self.rate <= 0.0 || !self.is_active(cx.step()) {
            return Ok(());
        }
        self.mean = self.rate * cx.resolution().as_secs_f64();

        cx.emit(1)
    }

    fn target_multiplicity(&mut self, _: u32, _: NodeAddr, rng: &mut NodeRng) -> u32 {
        u32::try_from(sample_poisson(rng, self.mean)).unwrap_or(u32::MAX)
    }
}

fn millis_to_duration(ms: f64) -> Result<Duration, ParameterError> {
    if !ms.is_finite() || ms < 0.0 {
        return Err(ParameterError::InvalidTime(ms));
    }
    let nanos = (ms * 1e6).round();
    if nanos > u64::MAX as f64 {
        return Err(ParameterError::InvalidTime(ms));
    }

    Ok(Duration::from_nanos(nanos as u64))
}

/// Draws from a Poisson distribution with Knuth's multiplication method.
fn sample_poisson(rng: &mut NodeRng, mean: f64) -> u64 {
    let mut remaining = mean;
    let mut count = 0;
    while remaining > 0.0 {
        let chunk = remaining.min(MAX_CHUNK_MEAN);
        remaining -= chunk;

        let limit = (-chunk).exp();
        let mut p: f64 = rng.gen();
        while p > limit {
            count += 1;
            p *= rng.gen::<f64>();
        }
    }

    count
}
