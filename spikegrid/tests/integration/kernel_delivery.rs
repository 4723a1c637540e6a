//! Spike delivery on a single rank.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use spikegrid::node::builtin::{Parrot, Recorder, SpikeTrain};
use spikegrid::node::{Node, NodeError, UpdateContext};
use spikegrid::ring_buffer::Origin;
use spikegrid::routing::Payload;
use spikegrid::time::Step;
use spikegrid::{ConfigError, KernelConfig, KernelError, KernelInit};

const MT_NUM_THREADS: usize = 4;
const H: Duration = Duration::from_millis(1);

fn steps(n: u64) -> Duration {
    H * n as u32
}

/// Records the interval boundaries seen by a node.
struct IntervalWatch {
    intervals: Arc<Mutex<Vec<(Step, Step)>>>,
}
impl Node for IntervalWatch {
    fn model(&self) -> &'static str {
        "interval_watch"
    }

    fn update(&mut self, cx: &mut UpdateContext<'_>) -> Result<(), NodeError> {
        let interval = (cx.interval().start(), cx.interval().end());
        let mut intervals = self.intervals.lock().unwrap();
        if intervals.last() != Some(&interval) {
            intervals.push(interval);
        }

        Ok(())
    }
}

/// A spike emitted at step 0 over a one-step connection is due at step 1.
fn single_hop(num_threads: usize) {
    let mut init = KernelInit::new(KernelConfig::new(H).with_num_threads(num_threads));
    let source = init.add_node(SpikeTrain::new([0]).unwrap());
    let target = init.add_node(Parrot::new());
    init.connect(source, target, H, Payload::new(2.5).with_receptor(1))
        .unwrap();

    let mut kernel = init.init().unwrap();
    assert_eq!(kernel.interval_steps(), 1);
    kernel.advance_to(H).unwrap();

    let input = kernel.pending_input(target, 1);
    assert_eq!(input.len(), 1);
    let spike = input.spikes()[0];
    assert_eq!(spike.origin, Origin::Node(source));
    assert_eq!(spike.emitted_at, 0);
    assert_eq!(spike.multiplicity, 1);
    assert_eq!(spike.weight, 2.5);
    assert_eq!(spike.receptor, 1);

    assert!(kernel.pending_input(target, 0).is_empty());
    assert!(kernel.pending_input(target, 2).is_empty());
}

#[test]
fn single_hop_st() {
    single_hop(1);
}

#[test]
fn single_hop_mt() {
    single_hop(MT_NUM_THREADS);
}

/// Every spike is received exactly once, at emission step plus delay.
fn exactly_once(num_threads: usize) {
    const DELAYS: [u64; 3] = [2, 3, 7];
    const EMISSIONS: [Step; 4] = [0, 1, 5, 11];

    let mut init = KernelInit::new(KernelConfig::new(H).with_num_threads(num_threads));
    let source = init.add_node(SpikeTrain::new(EMISSIONS).unwrap().with_multiplicity(3));
    let mut handles = Vec::new();
    for delay in DELAYS {
        let (recorder, handle) = Recorder::new();
        let target = init.add_node(recorder);
        init.connect(source, target, steps(delay), Payload::default())
            .unwrap();
        handles.push((delay, handle));
    }

    let mut kernel = init.init().unwrap();
    assert_eq!(kernel.interval_steps(), 2);
    assert_eq!(kernel.max_delay_steps(), 7);
    kernel.advance_to(steps(20)).unwrap();

    for (delay, handle) in handles {
        let records = handle.records();
        let received: Vec<Step> = records.iter().map(|r| r.step).collect();
        let expected: Vec<Step> = EMISSIONS.iter().map(|s| s + delay).collect();
        assert_eq!(received, expected);
        for record in records {
            assert_eq!(record.spikes.len(), 1);
            assert_eq!(record.spikes[0].multiplicity, 3);
            assert_eq!(record.spikes[0].emitted_at + delay, record.step);
        }
    }

    let stats = kernel.stats();
    assert_eq!(stats.intervals, 10);
    assert_eq!(stats.emitted, EMISSIONS.len() as u64);
    assert_eq!(stats.sent, 0);
}

#[test]
fn exactly_once_st() {
    exactly_once(1);
}

#[test]
fn exactly_once_mt() {
    exactly_once(MT_NUM_THREADS);
}

/// Spikes travel along a chain of parrots, one hop per delay.
fn parrot_chain(num_threads: usize) {
    const CHAIN_LEN: usize = 6;

    let mut init = KernelInit::new(KernelConfig::new(H).with_num_threads(num_threads));
    let mut previous = init.add_node(SpikeTrain::new([0, 1]).unwrap());
    for _ in 0..CHAIN_LEN {
        let parrot = init.add_node(Parrot::new());
        init.connect(previous, parrot, steps(2), Payload::default())
            .unwrap();
        previous = parrot;
    }
    let (recorder, handle) = Recorder::new();
    let recorder = init.add_node(recorder);
    init.connect(previous, recorder, steps(3), Payload::default())
        .unwrap();

    let mut kernel = init.init().unwrap();
    kernel.advance_to(steps(30)).unwrap();

    let last = 2 * CHAIN_LEN as Step + 3;
    let received: Vec<Step> = handle.records().iter().map(|r| r.step).collect();
    assert_eq!(received, vec![last, last + 1]);
}

#[test]
fn parrot_chain_st() {
    parrot_chain(1);
}

#[test]
fn parrot_chain_mt() {
    parrot_chain(MT_NUM_THREADS);
}

/// Spikes from several sources converging on a target are merged into a
/// canonical order regardless of the thread count.
#[test]
fn convergent_input_is_canonical() {
    let run = |num_threads| {
        let mut init = KernelInit::new(KernelConfig::new(H).with_num_threads(num_threads));
        let sources: Vec<_> = (0..5)
            .map(|_| init.add_node(SpikeTrain::new([3]).unwrap()))
            .collect();
        let (recorder, handle) = Recorder::new();
        let target = init.add_node(recorder);
        for (i, &source) in sources.iter().enumerate().rev() {
            init.connect(source, target, steps(2), Payload::new(i as f64))
                .unwrap();
        }
        let mut kernel = init.init().unwrap();
        kernel.advance_to(steps(8)).unwrap();

        handle.records()
    };

    let reference = run(1);
    assert_eq!(reference.len(), 1);
    assert_eq!(reference[0].step, 5);
    assert_eq!(reference[0].spikes.len(), 5);
    for num_threads in [2, 3, MT_NUM_THREADS] {
        assert_eq!(run(num_threads), reference);
    }
}

/// The interval length is the minimum delay and the last interval is
/// shortened to stop exactly at the target time.
#[test]
fn interval_partition() {
    let intervals = Arc::new(Mutex::new(Vec::new()));
    let mut init = KernelInit::new(KernelConfig::new(H).with_num_threads(1));
    let a = init.add_node(IntervalWatch {
        intervals: intervals.clone(),
    });
    let b = init.add_node(Parrot::new());
    init.connect(a, b, steps(5), Payload::default()).unwrap();
    init.connect(b, a, steps(3), Payload::default()).unwrap();

    let mut kernel = init.init().unwrap();
    assert_eq!(kernel.interval_steps(), 3);
    assert_eq!(kernel.ring_capacity(), 5);

    kernel.advance_to(steps(7)).unwrap();
    assert_eq!(kernel.current_step(), 7);
    kernel.advance_by(steps(3)).unwrap();
    assert_eq!(kernel.time(), steps(10));
    // No-op.
    kernel.advance_to(steps(10)).unwrap();

    assert_eq!(
        *intervals.lock().unwrap(),
        vec![(0, 3), (3, 6), (6, 7), (7, 10)]
    );
}

#[test]
fn time_control_errors() {
    let mut init = KernelInit::new(KernelConfig::new(H));
    let a = init.add_node(Parrot::new());
    init.connect(a, a, steps(2), Payload::default()).unwrap();
    let mut kernel = init.init().unwrap();

    kernel.advance_to(steps(4)).unwrap();
    assert!(matches!(
        kernel.advance_to(Duration::from_micros(4500)),
        Err(KernelError::NotAligned { .. })
    ));
    assert!(matches!(
        kernel.advance_to(steps(2)),
        Err(KernelError::Rewind { .. })
    ));

    // Both errors leave the kernel usable.
    kernel.advance_to(steps(6)).unwrap();
    assert_eq!(kernel.current_step(), 6);
}

#[test]
fn invalid_connections() {
    let mut init = KernelInit::new(KernelConfig::new(H));
    let a = init.add_node(Parrot::new());
    let b = init.add_node(Parrot::new());

    assert!(matches!(
        init.connect(a, b, Duration::ZERO, Payload::default()),
        Err(ConfigError::InvalidDelay { .. })
    ));
    assert!(matches!(
        init.connect(a, b, Duration::from_micros(1500), Payload::default()),
        Err(ConfigError::InvalidDelay { .. })
    ));
    let ghost = spikegrid::NodeAddr::new(0, 7);
    assert_eq!(
        init.connect(a, ghost, H, Payload::default()),
        Err(ConfigError::UnknownNode(ghost))
    );
    let remote = spikegrid::NodeAddr::new(1, 0);
    assert!(matches!(
        init.connect(a, remote, H, Payload::default()),
        Err(ConfigError::RankOutOfRange { rank: 1, .. })
    ));
}

#[test]
fn ring_capacity_must_hold_max_delay() {
    let mut init = KernelInit::new(KernelConfig::new(H).with_ring_capacity(3));
    let a = init.add_node(Parrot::new());
    let b = init.add_node(Parrot::new());
    init.connect(a, b, steps(4), Payload::default()).unwrap();

    assert!(matches!(
        init.init(),
        Err(KernelError::Config(ConfigError::CapacityTooSmall {
            capacity: 3,
            max_delay: 4
        }))
    ));
}
