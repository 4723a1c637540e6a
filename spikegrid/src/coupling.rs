//! External synchronized-coupling ports.
//!
//! Ports connect a rank to a foreign application through an [`Adapter`]. They
//! are declared on [`KernelInit`](crate::KernelInit), negotiated once with the
//! adapter when the kernel is initialized, and then serviced once per
//! synchronization interval, at the interval boundary and right after the
//! internal exchange.
//!
//! Three kinds of ports exist:
//!
//! * continuous ports carry a fixed-width vector of samples per interval,
//! * event ports carry timestamped spike-like events,
//! * message ports carry timestamped opaque payloads and are receive-only.
//!
//! Port data is passed through unscaled. Adapters whose foreign peers use
//! another time unit can convert step stamps with
//! [`TimeGrid::step_to_secs`] and [`TimeGrid::secs_to_step`].
//!
//! Failures at the adapter boundary never abort a run: the offending port
//! contributes nothing for the interval and the error is logged and recorded,
//! see [`Kernel::take_port_errors`](crate::Kernel::take_port_errors).
use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::ops::Range;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use crate::config::ConfigError;
use crate::delivery::Delivery;
use crate::ring_buffer::{Origin, Spike};
use crate::routing::Payload;
use crate::time::{Interval, Step, TimeGrid};

mod channel;
mod ports;

pub use channel::{channel_adapter, ChannelAdapter, ForeignEndpoint, Published};
pub use ports::{ContinuousSink, ContinuousSource, EventOutlet, MessageInbox};

/// Identifier of a port, unique within a rank.
pub type PortId = usize;

/// Kind of data carried by a port.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PortKind {
    /// Timestamped events.
    Event,
    /// Fixed-width sample vectors.
    Continuous,
    /// Timestamped opaque payloads.
    Message,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Event => "event",
            Self::Continuous => "continuous",
            Self::Message => "message",
        })
    }
}

/// Direction of a port, as seen from the kernel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// From the foreign application to the kernel.
    Inbound,
    /// From the kernel to the foreign application.
    Outbound,
}

/// Negotiated description of a port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortSpec {
    /// Port identifier.
    pub id: PortId,
    /// Port name, unique within a rank.
    pub name: String,
    /// Data kind.
    pub kind: PortKind,
    /// Data direction.
    pub direction: Direction,
    /// Vector length for continuous ports, channel count for event ports and
    /// maximum payload size in bytes for message ports.
    pub width: usize,
    /// Accepted latency of inbound event ports.
    pub latency: Option<Duration>,
}

/// An event crossing an event port.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PortEvent {
    /// Channel of the port.
    pub channel: u32,
    /// Absolute step of the event.
    pub step: Step,
    /// Number of spikes represented by the event.
    pub multiplicity: u32,
    /// Weight applied on delivery, for inbound events.
    pub weight: f64,
}

/// A message received through a message port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortMessage {
    /// Absolute step of the message.
    pub step: Step,
    /// Opaque payload.
    pub payload: Bytes,
}

/// Data exchanged through a port over one interval.
#[derive(Clone, Debug, PartialEq)]
pub enum PortData {
    /// Samples of a continuous port.
    Continuous(Vec<f64>),
    /// Events of an event port.
    Events(Vec<PortEvent>),
    /// Messages of a message port.
    Messages(Vec<PortMessage>),
}

impl PortData {
    /// Kind of port able to carry this data.
    pub fn kind(&self) -> PortKind {
        match self {
            Self::Continuous(_) => PortKind::Continuous,
            Self::Events(_) => PortKind::Event,
            Self::Messages(_) => PortKind::Message,
        }
    }
}

/// Bridge between the kernel ports of a rank and a foreign application.
pub trait Adapter: Send {
    /// Negotiates the ports before the first interval.
    ///
    /// Returning an error aborts the kernel initialization.
    fn negotiate(&mut self, ports: &[PortSpec], grid: &TimeGrid) -> Result<(), PortError>;

    /// Hands the data of an outbound port for the completed interval to the
    /// foreign application.
    fn publish(&mut self, interval: Interval, port: &PortSpec, data: PortData)
        -> Result<(), PortError>;

    /// Fetches the data of an inbound port for the completed interval.
    ///
    /// `Ok(None)` signals that no data is available this interval.
    fn poll(&mut self, interval: Interval, port: &PortSpec) -> Result<Option<PortData>, PortError>;
}

/// An error at the adapter boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PortError {
    /// The port is not known to the adapter or to the foreign application.
    UnknownPort(String),
    /// The data kind does not match the port kind.
    KindMismatch {
        /// Kind of the port.
        expected: PortKind,
        /// Kind of the data.
        found: PortKind,
    },
    /// The data size does not match the port width.
    WidthMismatch {
        /// Width of the port.
        expected: usize,
        /// Size of the data.
        found: usize,
    },
    /// An event refers to a channel the port does not have.
    ChannelOutOfRange {
        /// Offending channel.
        channel: u32,
        /// Channel count of the port.
        width: usize,
    },
    /// An inbound event cannot be delivered at its step.
    OutOfWindow {
        /// Step of the event.
        step: Step,
        /// First step that can still be delivered.
        start: Step,
        /// First step beyond reach.
        end: Step,
    },
    /// The adapter refused the port.
    Rejected(String),
    /// The foreign application is gone.
    Disconnected,
}

impl fmt::Display for PortError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPort(name) => write!(fmt, "unknown port '{}'", name),
            Self::KindMismatch { expected, found } => write!(
                fmt,
                "{} data received on a {} port",
                found, expected
            ),
            Self::WidthMismatch { expected, found } => write!(
                fmt,
                "data of size {} does not match the port width {}",
                found, expected
            ),
            Self::ChannelOutOfRange { channel, width } => write!(
                fmt,
                "channel {} is out of range for a port with {} channels",
                channel, width
            ),
            Self::OutOfWindow { step, start, end } => write!(
                fmt,
                "event at step {} is outside the deliverable range [{}, {})",
                step, start, end
            ),
            Self::Rejected(reason) => write!(fmt, "the adapter rejected the port: {}", reason),
            Self::Disconnected => write!(fmt, "the foreign application disconnected"),
        }
    }
}

impl Error for PortError {}

/// A port error recorded during a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortFailure {
    /// Name of the port.
    pub port: String,
    /// Interval whose contribution was dropped.
    pub interval: Interval,
    /// Cause of the failure.
    pub error: PortError,
}

impl fmt::Display for PortFailure {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "port '{}' failed over interval {}: {}",
            self.port, self.interval, self.error
        )
    }
}

impl Error for PortFailure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

pub(crate) enum PortState {
    ContinuousSource(Arc<Mutex<Option<Vec<f64>>>>),
    ContinuousSink(Arc<Mutex<Option<Vec<f64>>>>),
    EventOutlet(Arc<Mutex<Vec<PortEvent>>>),
    EventInlet(Vec<(u32, Payload)>),
    MessageInbox(Arc<Mutex<VecDeque<PortMessage>>>),
}

pub(crate) struct Port {
    spec: PortSpec,
    state: PortState,
}

/// Port declarations collected before initialization.
#[derive(Default)]
pub(crate) struct PortRegistry {
    ports: Vec<Port>,
}

impl PortRegistry {
    fn add(
        &mut self,
        name: String,
        kind: PortKind,
        direction: Direction,
        width: usize,
        latency: Option<Duration>,
        state: PortState,
    ) -> Result<PortId, ConfigError> {
        if self.ports.iter().any(|p| p.spec.name == name) {
            return Err(ConfigError::DuplicatePort(name));
        }
        let id = self.ports.len();
        self.ports.push(Port {
            spec: PortSpec {
                id,
                name,
                kind,
                direction,
                width,
                latency,
            },
            state,
        });

        Ok(id)
    }

    pub(crate) fn add_continuous_source(
        &mut self,
        name: String,
        width: usize,
    ) -> Result<ContinuousSource, ConfigError> {
        let value = Arc::new(Mutex::new(None));
        let id = self.add(
            name,
            PortKind::Continuous,
            Direction::Outbound,
            width,
            None,
            PortState::ContinuousSource(value.clone()),
        )?;

        Ok(ContinuousSource::new(id, width, value))
    }

    pub(crate) fn add_continuous_sink(
        &mut self,
        name: String,
        width: usize,
    ) -> Result<ContinuousSink, ConfigError> {
        let value = Arc::new(Mutex::new(None));
        let id = self.add(
            name,
            PortKind::Continuous,
            Direction::Inbound,
            width,
            None,
            PortState::ContinuousSink(value.clone()),
        )?;

        Ok(ContinuousSink::new(id, width, value))
    }

    pub(crate) fn add_event_outlet(
        &mut self,
        name: String,
        width: usize,
    ) -> Result<EventOutlet, ConfigError> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let id = self.add(
            name,
            PortKind::Event,
            Direction::Outbound,
            width,
            None,
            PortState::EventOutlet(events.clone()),
        )?;

        Ok(EventOutlet::new(id, width, events))
    }

    /// Declares an inbound event port whose channel `i` feeds local node
    /// `targets[i]`.
    pub(crate) fn add_event_inlet(
        &mut self,
        name: String,
        targets: Vec<(u32, Payload)>,
        latency: Duration,
    ) -> Result<PortId, ConfigError> {
        let width = targets.len();
        self.add(
            name,
            PortKind::Event,
            Direction::Inbound,
            width,
            Some(latency),
            PortState::EventInlet(targets),
        )
    }

    pub(crate) fn add_message_inbox(
        &mut self,
        name: String,
        max_payload: usize,
    ) -> Result<MessageInbox, ConfigError> {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let id = self.add(
            name,
            PortKind::Message,
            Direction::Inbound,
            max_payload,
            None,
            PortState::MessageInbox(queue.clone()),
        )?;

        Ok(MessageInbox::new(id, max_payload, queue))
    }

    /// Checks the port latencies and negotiates the ports with the adapter.
    pub(crate) fn negotiate(
        self,
        adapter: Option<Box<dyn Adapter>>,
        grid: &TimeGrid,
        min_delay: Duration,
    ) -> Result<Coupling, ConfigError> {
        for port in &self.ports {
            if let Some(latency) = port.spec.latency {
                if latency < min_delay {
                    return Err(ConfigError::PortLatency {
                        port: port.spec.name.clone(),
                        latency,
                        min_delay,
                    });
                }
            }
        }

        let adapter = match adapter {
            Some(mut adapter) => {
                let specs: Vec<_> = self.ports.iter().map(|p| p.spec.clone()).collect();
                adapter
                    .negotiate(&specs, grid)
                    .map_err(ConfigError::PortNegotiation)?;

                Some(adapter)
            }
            None if self.ports.is_empty() => None,
            None => {
                return Err(ConfigError::PortNegotiation(PortError::Rejected(
                    "ports were declared without a coupling adapter".into(),
                )))
            }
        };

        Ok(Coupling {
            adapter,
            ports: self.ports,
            failures: Vec::new(),
        })
    }
}

/// Per-interval servicing of the negotiated ports.
pub(crate) struct Coupling {
    adapter: Option<Box<dyn Adapter>>,
    ports: Vec<Port>,
    failures: Vec<PortFailure>,
}

impl Coupling {
    /// Services all ports at the end of `interval` and returns the deliveries
    /// of inbound events.
    ///
    /// Inbound events must target a step within `window`, the steps that the
    /// ring buffers can still accept.
    pub(crate) fn exchange(&mut self, interval: Interval, window: Range<Step>) -> Vec<Delivery> {
        let Some(adapter) = self.adapter.as_mut() else {
            return Vec::new();
        };

        let mut deliveries = Vec::new();
        for port in &self.ports {
            let result = match &port.state {
                PortState::ContinuousSource(value) => {
                    let value = value.lock().unwrap().take();
                    match value {
                        Some(samples) => {
                            adapter.publish(interval, &port.spec, PortData::Continuous(samples))
                        }
                        None => Ok(()),
                    }
                }
                PortState::EventOutlet(events) => {
                    let mut events = std::mem::take(&mut *events.lock().unwrap());
                    // Workers push in any order.
                    events.sort_by_key(|e| (e.step, e.channel, e.multiplicity));
                    adapter.publish(interval, &port.spec, PortData::Events(events))
                }
                PortState::ContinuousSink(value) => {
                    adapter.poll(interval, &port.spec).and_then(|data| match data {
                        None => Ok(()),
                        Some(data) => {
                            let samples = continuous_samples(&port.spec, data)?;
                            *value.lock().unwrap() = Some(samples);

                            Ok(())
                        }
                    })
                }
                PortState::EventInlet(targets) => {
                    adapter.poll(interval, &port.spec).and_then(|data| match data {
                        None => Ok(()),
                        Some(data) => {
                            inlet_deliveries(&port.spec, targets, data, &window, &mut deliveries)
                        }
                    })
                }
                PortState::MessageInbox(queue) => {
                    adapter.poll(interval, &port.spec).and_then(|data| match data {
                        None => Ok(()),
                        Some(data) => {
                            let messages = inbox_messages(&port.spec, data)?;
                            queue.lock().unwrap().extend(messages);

                            Ok(())
                        }
                    })
                }
            };

            if let Err(error) = result {
                tracing::warn!(
                    port = %port.spec.name,
                    %interval,
                    %error,
                    "port contribution dropped"
                );
                self.failures.push(PortFailure {
                    port: port.spec.name.clone(),
                    interval,
                    error,
                });
            }
        }

        deliveries
    }

    /// Removes and returns the failures recorded so far.
    pub(crate) fn take_failures(&mut self) -> Vec<PortFailure> {
        std::mem::take(&mut self.failures)
    }
}

fn kind_mismatch(spec: &PortSpec, data: &PortData) -> PortError {
    PortError::KindMismatch {
        expected: spec.kind,
        found: data.kind(),
    }
}

fn continuous_samples(spec: &PortSpec, data: PortData) -> Result<Vec<f64>, PortError> {
    let samples = match data {
        PortData::Continuous(samples) => samples,
        other => return Err(kind_mismatch(spec, &other)),
    };
    if samples.len() != spec.width {
        return Err(PortError::WidthMismatch {
            expected: spec.width,
            found: samples.len(),
        });
    }

    Ok(samples)
}

// The events of a poll are either all delivered or all dropped.
fn inlet_deliveries(
    spec: &PortSpec,
    targets: &[(u32, Payload)],
    data: PortData,
    window: &Range<Step>,
    deliveries: &mut Vec<Delivery>,
) -> Result<(), PortError> {
    let events = match data {
        PortData::Events(events) => events,
        other => return Err(kind_mismatch(spec, &other)),
    };

    for event in &events {
        if event.channel as usize >= targets.len() {
            return Err(PortError::ChannelOutOfRange {
                channel: event.channel,
                width: targets.len(),
            });
        }
        if !window.contains(&event.step) {
            return Err(PortError::OutOfWindow {
                step: event.step,
                start: window.start,
                end: window.end,
            });
        }
    }

    deliveries.extend(events.into_iter().filter(|e| e.multiplicity > 0).map(|event| {
        let (target, payload) = targets[event.channel as usize];
        Delivery {
            target,
            step: event.step,
            spike: Spike {
                origin: Origin::Port(spec.id),
                emitted_at: event.step,
                multiplicity: event.multiplicity,
                weight: event.weight * payload.weight,
                receptor: payload.receptor,
            },
        }
    }));

    Ok(())
}

fn inbox_messages(spec: &PortSpec, data: PortData) -> Result<Vec<PortMessage>, PortError> {
    let messages = match data {
        PortData::Messages(messages) => messages,
        other => return Err(kind_mismatch(spec, &other)),
    };
    if let Some(m) = messages.iter().find(|m| m.payload.len() > spec.width) {
        return Err(PortError::WidthMismatch {
            expected: spec.width,
            found: m.payload.len(),
        });
    }

    Ok(messages)
}
