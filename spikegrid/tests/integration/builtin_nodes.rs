//! Built-in node models within a running kernel.

use std::time::Duration;

use bytes::Bytes;

use spikegrid::coupling::{channel_adapter, PortData, PortMessage};
use spikegrid::node::builtin::{InhomogeneousPoissonGenerator, Record, Recorder};
use spikegrid::routing::Payload;
use spikegrid::time::TimeGrid;
use spikegrid::{KernelConfig, KernelInit};

const MT_NUM_THREADS: usize = 4;
const H: Duration = Duration::from_micros(100);

// Runs a generator feeding two recorders over one second and returns their
// records.
fn poisson_run(
    num_threads: usize,
    seed: u64,
    configure: impl FnOnce(&mut InhomogeneousPoissonGenerator),
) -> (Vec<Record>, Vec<Record>) {
    let config = KernelConfig::new(H)
        .with_num_threads(num_threads)
        .with_seed(seed);
    let mut init = KernelInit::new(config);

    let mut generator = InhomogeneousPoissonGenerator::new(TimeGrid::new(H).unwrap());
    configure(&mut generator);
    let generator = init.add_node(generator);
    let (recorder_a, handle_a) = Recorder::new();
    let (recorder_b, handle_b) = Recorder::new();
    let a = init.add_node(recorder_a);
    let b = init.add_node(recorder_b);
    init.connect(generator, a, H, Payload::default()).unwrap();
    init.connect(generator, b, H * 3, Payload::default()).unwrap();

    let mut kernel = init.init().unwrap();
    kernel.advance_to(Duration::from_secs(1)).unwrap();

    (handle_a.take(), handle_b.take())
}

/// The spike count follows the rate schedule and each target receives its
/// own draw.
fn poisson_rate_schedule(num_threads: usize) {
    const RATE: f64 = 2000.0;

    let (a, b) = poisson_run(num_threads, 7, |generator| {
        generator
            .set_rates(
                &[Duration::from_millis(100), Duration::from_millis(600)],
                &[RATE, 0.0],
            )
            .unwrap();
    });

    // Rate changes take effect from the step ending at the rate time, and
    // spikes arrive one step after emission.
    let first = a.first().unwrap().step;
    let last = a.last().unwrap().step;
    assert!(first >= 999 + 1);
    assert!(last <= 5998 + 1);

    let first = b.first().unwrap().step;
    let last = b.last().unwrap().step;
    assert!(first >= 999 + 3);
    assert!(last <= 5998 + 3);

    // Five standard deviations around the expected count, for each target.
    let expected = RATE * 0.5;
    for records in [&a, &b] {
        let total: u64 = records.iter().map(Record::multiplicity).sum();
        assert!((total as f64 - expected).abs() < 5.0 * expected.sqrt());
    }

    // The draws of both targets are independent.
    let shifted: Vec<_> = a.iter().map(|r| (r.step + 2, r.multiplicity())).collect();
    let delayed: Vec<_> = b.iter().map(|r| (r.step, r.multiplicity())).collect();
    assert_ne!(shifted, delayed);
}

#[test]
fn poisson_rate_schedule_st() {
    poisson_rate_schedule(1);
}

#[test]
fn poisson_rate_schedule_mt() {
    poisson_rate_schedule(MT_NUM_THREADS);
}

/// Runs with the same seed and thread count are identical.
#[test]
fn poisson_reproducibility() {
    let configure = |generator: &mut InhomogeneousPoissonGenerator| {
        generator
            .extend_from_pairs(&[10.0, 500.0, 400.0, 1500.0])
            .unwrap();
    };

    let (reference, _) = poisson_run(2, 11, configure);
    assert!(!reference.is_empty());
    assert_eq!(poisson_run(2, 11, configure).0, reference);
    assert_ne!(poisson_run(2, 12, configure).0, reference);
}

/// Rates appended through the stimulation inbox apply from their time on;
/// rejected updates leave the rates unchanged.
#[test]
fn poisson_stimulation_update() {
    const STEP: Duration = Duration::from_millis(1);

    let encode = |data: &[f64]| -> Bytes {
        data.iter().flat_map(|x| x.to_le_bytes()).collect()
    };

    let (adapter, endpoint) = channel_adapter();
    let mut init = KernelInit::new(KernelConfig::new(STEP).with_num_threads(2));
    let inbox = init.add_message_inbox("stimulation", 64).unwrap();
    let generator = InhomogeneousPoissonGenerator::new(TimeGrid::new(STEP).unwrap())
        .with_stimulation_inbox(inbox);
    let generator = init.add_node(generator);
    let (recorder, handle) = Recorder::new();
    let recorder = init.add_node(recorder);
    init.connect(generator, recorder, STEP * 2, Payload::default())
        .unwrap();

    let mut kernel = init.set_adapter(adapter).init().unwrap();
    kernel.advance_to(STEP * 2).unwrap();

    // Read at step 4: the first update lies partly in the past and is
    // rejected as a whole, the second one is applied.
    endpoint
        .send(
            "stimulation",
            PortData::Messages(vec![
                PortMessage {
                    step: 2,
                    payload: encode(&[3.0, 1e6, 5.0, 1e6]),
                },
                PortMessage {
                    step: 3,
                    payload: encode(&[7.0, 1e6, 9.0, 0.0]),
                },
            ]),
        )
        .unwrap();
    kernel.advance_to(STEP * 14).unwrap();

    // Emission at steps 6 and 7, delivery two steps later.
    let steps: Vec<_> = handle.records().iter().map(|r| r.step).collect();
    assert_eq!(steps, vec![8, 9]);
    assert!(handle.records().iter().all(|r| r.multiplicity() > 0));
    assert!(kernel.take_port_errors().is_empty());
}

#[test]
fn poisson_activity_window() {
    let (a, _) = poisson_run(1, 3, |generator| {
        generator
            .set_rates(&[Duration::from_millis(1)], &[5000.0])
            .unwrap();
        *generator = generator.clone().with_window(
            Duration::from_millis(200),
            Some(Duration::from_millis(300)),
        );
    });

    assert!(!a.is_empty());
    assert!(a.iter().all(|r| (2000 + 1..3000 + 1).contains(&r.step)));
}
