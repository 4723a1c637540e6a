//! External coupling through ports.

use std::time::Duration;

use bytes::Bytes;

use spikegrid::coupling::{
    channel_adapter, ContinuousSource, EventOutlet, ForeignEndpoint, PortData, PortError,
    PortEvent, PortId, PortKind, PortMessage, Published,
};
use spikegrid::node::builtin::{Recorder, RecorderHandle};
use spikegrid::node::{Node, NodeError, UpdateContext};
use spikegrid::ring_buffer::Origin;
use spikegrid::routing::Payload;
use spikegrid::{ConfigError, Kernel, KernelConfig, KernelError, KernelInit, NodeAddr};

const H: Duration = Duration::from_millis(1);

fn steps(n: u64) -> Duration {
    H * n as u32
}

/// Publishes a fixed vector on a continuous port at its first update.
struct Sampler {
    port: ContinuousSource,
    values: Vec<f64>,
    done: bool,
}
impl Node for Sampler {
    fn model(&self) -> &'static str {
        "sampler"
    }

    fn max_rate(&self) -> u32 {
        0
    }

    fn update(&mut self, _cx: &mut UpdateContext<'_>) -> Result<(), NodeError> {
        if !self.done {
            self.done = true;
            self.port.set(self.values.clone()).map_err(NodeError::from_error)?;
        }

        Ok(())
    }
}

/// Forwards every third step to an event port.
struct Ticker {
    outlet: EventOutlet,
}
impl Node for Ticker {
    fn model(&self) -> &'static str {
        "ticker"
    }

    fn update(&mut self, cx: &mut UpdateContext<'_>) -> Result<(), NodeError> {
        if cx.step() % 3 == 0 {
            self.outlet
                .push(0, cx.step(), 1)
                .map_err(NodeError::from_error)?;
        }

        Ok(())
    }
}

/// Pushes one event per step on its own channel of an event port.
struct Beacon {
    outlet: EventOutlet,
    channel: u32,
}
impl Node for Beacon {
    fn model(&self) -> &'static str {
        "beacon"
    }

    fn update(&mut self, cx: &mut UpdateContext<'_>) -> Result<(), NodeError> {
        self.outlet
            .push(self.channel, cx.step(), 1)
            .map_err(NodeError::from_error)
    }
}

// Builds a recorder with self-connections setting the interval to 2 steps and
// the ring capacity to 4 steps.
fn add_recorder(init: &mut KernelInit) -> (NodeAddr, RecorderHandle) {
    let (recorder, handle) = Recorder::new();
    let addr = init.add_node(recorder);
    init.connect(addr, addr, steps(2), Payload::default()).unwrap();
    init.connect(addr, addr, steps(4), Payload::default()).unwrap();

    (addr, handle)
}

/// A continuous source set during the first interval is published at the end
/// of that interval, and only then.
#[test]
fn continuous_source_publication() {
    let (adapter, endpoint) = channel_adapter();
    let mut init = KernelInit::new(KernelConfig::new(H).with_num_threads(2));
    add_recorder(&mut init);
    let port = init.add_continuous_source("rates", 3).unwrap();
    init.add_node(Sampler {
        port,
        values: vec![0.0, 1.0, 2.0],
        done: false,
    });

    let mut kernel = init.set_adapter(adapter).init().unwrap();
    let ports = endpoint.ports();
    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].name, "rates");
    assert_eq!(ports[0].width, 3);

    kernel.advance_to(steps(2)).unwrap();
    let published: Published = endpoint.try_recv().unwrap();
    assert_eq!(published.port, "rates");
    assert_eq!(published.data, PortData::Continuous(vec![0.0, 1.0, 2.0]));
    assert_eq!((published.interval.start(), published.interval.end()), (0, 2));

    kernel.advance_to(steps(6)).unwrap();
    assert!(endpoint.try_recv().is_none());
}

/// Outbound events are published at the end of the interval in which they
/// were pushed.
#[test]
fn event_outlet_publication() {
    let (adapter, endpoint) = channel_adapter();
    let mut init = KernelInit::new(KernelConfig::new(H).with_num_threads(1));
    add_recorder(&mut init);
    let outlet = init.add_event_outlet("ticks", 1).unwrap();
    init.add_node(Ticker { outlet });

    let mut kernel = init.set_adapter(adapter).init().unwrap();
    kernel.advance_to(steps(6)).unwrap();

    let published = endpoint.drain();
    assert_eq!(published.len(), 3);
    let ticks: Vec<_> = published
        .iter()
        .map(|p| match &p.data {
            PortData::Events(events) => events.iter().map(|e| e.step).collect::<Vec<_>>(),
            other => panic!("unexpected data: {:?}", other),
        })
        .collect();
    assert_eq!(ticks, vec![vec![0], vec![3], vec![]]);
}

/// Events pushed concurrently by several workers are published in step and
/// channel order.
#[test]
fn event_outlet_ordering() {
    const WIDTH: u32 = 4;

    let (adapter, endpoint) = channel_adapter();
    let mut init = KernelInit::new(KernelConfig::new(H).with_num_threads(4));
    add_recorder(&mut init);
    let outlet = init.add_event_outlet("beacons", WIDTH as usize).unwrap();
    for channel in (0..WIDTH).rev() {
        init.add_node(Beacon {
            outlet: outlet.clone(),
            channel,
        });
    }

    let mut kernel = init.set_adapter(adapter).init().unwrap();
    kernel.advance_to(steps(4)).unwrap();

    let published = endpoint.drain();
    assert_eq!(published.len(), 2);
    for (batch, start) in published.iter().zip([0, 2]) {
        let events: Vec<_> = match &batch.data {
            PortData::Events(events) => events.iter().map(|e| (e.step, e.channel)).collect(),
            other => panic!("unexpected data: {:?}", other),
        };
        let expected: Vec<_> = (start..start + 2)
            .flat_map(|step| (0..WIDTH).map(move |channel| (step, channel)))
            .collect();
        assert_eq!(events, expected);
    }
}

type InletRun = (Kernel, NodeAddr, RecorderHandle, ForeignEndpoint, PortId);

fn inlet_run() -> InletRun {
    let (adapter, endpoint) = channel_adapter();
    let mut init = KernelInit::new(KernelConfig::new(H).with_num_threads(1));
    let (addr, handle) = add_recorder(&mut init);
    let port = init
        .add_event_inlet("stimulus", [(addr, Payload::new(2.0).with_receptor(3))], steps(2))
        .unwrap();

    let kernel = init.set_adapter(adapter).init().unwrap();

    (kernel, addr, handle, endpoint, port)
}

/// Inbound events are delivered to the port's targets at their step.
#[test]
fn event_inlet_delivery() {
    let (mut kernel, addr, handle, endpoint, port) = inlet_run();
    kernel.advance_to(steps(2)).unwrap();

    endpoint
        .send(
            "stimulus",
            PortData::Events(vec![
                PortEvent {
                    channel: 0,
                    step: 5,
                    multiplicity: 2,
                    weight: 1.5,
                },
                PortEvent {
                    channel: 0,
                    step: 6,
                    multiplicity: 0,
                    weight: 1.0,
                },
            ]),
        )
        .unwrap();
    kernel.advance_to(steps(4)).unwrap();
    assert_eq!(kernel.pending_input(addr, 5).multiplicity(), 2);
    assert!(kernel.pending_input(addr, 6).is_empty());
    assert_eq!(kernel.stats().external, 1);

    kernel.advance_to(steps(8)).unwrap();
    let records = handle.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].step, 5);
    let spike = records[0].spikes[0];
    assert_eq!(spike.origin, Origin::Port(port));
    assert_eq!(spike.multiplicity, 2);
    assert_eq!(spike.weight, 3.0);
    assert_eq!(spike.receptor, 3);
    assert!(kernel.take_port_errors().is_empty());
}

/// Invalid inbound events are dropped as a whole without stopping the run.
#[test]
fn event_inlet_rejection() {
    let (mut kernel, _, handle, endpoint, _) = inlet_run();

    let event = |channel, step| PortEvent {
        channel,
        step,
        multiplicity: 1,
        weight: 1.0,
    };
    // Beyond the ring buffer window [2, 6).
    endpoint
        .send("stimulus", PortData::Events(vec![event(0, 3), event(0, 6)]))
        .unwrap();
    kernel.advance_to(steps(2)).unwrap();
    // No such channel.
    endpoint
        .send("stimulus", PortData::Events(vec![event(1, 5)]))
        .unwrap();
    kernel.advance_to(steps(4)).unwrap();
    // Wrong kind.
    endpoint
        .send("stimulus", PortData::Continuous(vec![1.0]))
        .unwrap();
    kernel.advance_to(steps(10)).unwrap();

    assert!(handle.records().is_empty());
    let errors: Vec<_> = kernel
        .take_port_errors()
        .into_iter()
        .map(|f| {
            assert_eq!(f.port, "stimulus");
            f.error
        })
        .collect();
    assert_eq!(
        errors,
        vec![
            PortError::OutOfWindow {
                step: 6,
                start: 2,
                end: 6
            },
            PortError::ChannelOutOfRange {
                channel: 1,
                width: 1
            },
            PortError::KindMismatch {
                expected: PortKind::Event,
                found: PortKind::Continuous
            },
        ]
    );
    assert!(kernel.take_port_errors().is_empty());
}

#[test]
fn continuous_sink_and_inbox() {
    let (adapter, endpoint) = channel_adapter();
    let mut init = KernelInit::new(KernelConfig::new(H).with_num_threads(1));
    add_recorder(&mut init);
    let sink = init.add_continuous_sink("feedback", 2).unwrap();
    let inbox = init.add_message_inbox("commands", 8).unwrap();
    let mut kernel = init.set_adapter(adapter).init().unwrap();

    assert_eq!(sink.latest(), None);
    endpoint
        .send("feedback", PortData::Continuous(vec![0.5, 1.5]))
        .unwrap();
    endpoint
        .send("feedback", PortData::Continuous(vec![1.0, 2.0]))
        .unwrap();
    endpoint
        .send(
            "commands",
            PortData::Messages(vec![PortMessage {
                step: 1,
                payload: Bytes::from_static(b"start"),
            }]),
        )
        .unwrap();
    kernel.advance_to(steps(2)).unwrap();

    assert_eq!(sink.latest(), Some(vec![1.0, 2.0]));
    let messages = inbox.drain();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].payload, Bytes::from_static(b"start"));
    assert!(inbox.drain().is_empty());

    endpoint
        .send("feedback", PortData::Continuous(vec![3.0]))
        .unwrap();
    endpoint
        .send(
            "commands",
            PortData::Messages(vec![PortMessage {
                step: 3,
                payload: Bytes::from_static(b"far too long"),
            }]),
        )
        .unwrap();
    kernel.advance_to(steps(4)).unwrap();

    // The previous sample is kept.
    assert_eq!(sink.latest(), Some(vec![1.0, 2.0]));
    assert!(inbox.drain().is_empty());
    let errors = kernel.take_port_errors();
    assert_eq!(errors.len(), 2);
    assert!(errors
        .iter()
        .all(|f| matches!(f.error, PortError::WidthMismatch { .. })));

    assert_eq!(
        endpoint.send("unknown", PortData::Continuous(vec![])),
        Err(PortError::UnknownPort("unknown".into()))
    );
}

#[test]
fn port_negotiation_errors() {
    // Latency below the minimum delay.
    let (adapter, _endpoint) = channel_adapter();
    let mut init = KernelInit::new(KernelConfig::new(H));
    let (addr, _) = add_recorder(&mut init);
    init.add_event_inlet("stimulus", [(addr, Payload::default())], steps(1))
        .unwrap();
    assert!(matches!(
        init.set_adapter(adapter).init(),
        Err(KernelError::Config(ConfigError::PortLatency { .. }))
    ));

    // Port rejected by the adapter.
    let (adapter, endpoint) = channel_adapter();
    let mut init = KernelInit::new(KernelConfig::new(H));
    add_recorder(&mut init);
    init.add_continuous_source("wide", 64).unwrap();
    assert!(matches!(
        init.set_adapter(adapter.with_max_width(16)).init(),
        Err(KernelError::Config(ConfigError::PortNegotiation(
            PortError::Rejected(_)
        )))
    ));
    assert!(endpoint.ports().is_empty());

    // Inlet feeding an unknown node.
    let mut init = KernelInit::new(KernelConfig::new(H));
    let ghost = NodeAddr::new(0, 1);
    assert_eq!(
        init.add_event_inlet("stimulus", [(ghost, Payload::default())], steps(2)),
        Err(ConfigError::UnknownNode(ghost))
    );
}
