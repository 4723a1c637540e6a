//! Runs spread over several ranks.

use std::thread;
use std::time::Duration;

use spikegrid::comm::{Communicator, LocalCluster, LocalComm};
use spikegrid::node::builtin::{Parrot, Recorder, RecorderHandle, SpikeTrain};
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

/// Runs `f` on each rank of a local cluster, each on its own thread, and
/// returns the results ordered by rank.
fn run_cluster<R, F>(num_ranks: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(LocalComm) -> R + Sync,
{
    let comms = LocalCluster::new(num_ranks)
        .with_timeout(Duration::from_secs(10))
        .build();
    let f = &f;

    thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| s.spawn(move || f(comm)))
            .collect();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Fails its update at the specified step.
struct FailAt(Step);
impl Node for FailAt {
    fn model(&self) -> &'static str {
        "fail_at"
    }

    fn update(&mut self, cx: &mut UpdateContext<'_>) -> Result<(), NodeError> {
        if cx.step() == self.0 {
            return Err(NodeError::new("scheduled failure"));
        }

        Ok(())
    }
}

/// Three ranks with one node each, all-to-all connected with a two-step
/// delay; each node receives the spikes of its two peers at step 2.
fn all_to_all(num_threads: usize) {
    const NUM_RANKS: usize = 3;

    let results = run_cluster(NUM_RANKS, |comm| {
        let config = KernelConfig::new(H).with_num_threads(num_threads);
        let mut init = KernelInit::with_communicator(config, comm);
        let addrs: Vec<_> = (0..NUM_RANKS)
            .map(|rank| {
                init.add_node_on(rank, || SpikeTrain::new([0]).unwrap())
                    .unwrap()
            })
            .collect();
        for &source in &addrs {
            for &target in &addrs {
                if source != target {
                    init.connect(source, target, steps(2), Payload::default())
                        .unwrap();
                }
            }
        }

        let mut kernel = init.init().unwrap();
        kernel.advance_to(steps(2)).unwrap();

        let own = addrs[kernel.rank()];
        let input = kernel.pending_input(own, 2);
        let mut origins: Vec<_> = input.spikes().iter().map(|s| s.origin).collect();
        origins.sort();
        let expected: Vec<_> = addrs
            .iter()
            .filter(|&&a| a != own)
            .map(|&a| Origin::Node(a))
            .collect();
        assert_eq!(origins, expected);
        assert!(input.spikes().iter().all(|s| s.emitted_at == 0));

        kernel.stats()
    });

    for stats in results {
        assert_eq!(stats.intervals, 1);
        assert_eq!(stats.emitted, 1);
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.received, 2);
    }
}

#[test]
fn all_to_all_st() {
    all_to_all(1);
}

#[test]
fn all_to_all_mt() {
    all_to_all(MT_NUM_THREADS);
}

enum Kind {
    Train(&'static [Step]),
    Parrot,
    Recorder,
}

const NETWORK: [Kind; 9] = [
    Kind::Train(&[0, 4, 9]),
    Kind::Train(&[1, 2, 3]),
    Kind::Train(&[5]),
    Kind::Parrot,
    Kind::Parrot,
    Kind::Parrot,
    Kind::Parrot,
    Kind::Recorder,
    Kind::Recorder,
];

// (source, target, delay in steps, weight)
const EDGES: [(usize, usize, u64, f64); 11] = [
    (0, 3, 2, 1.0),
    (1, 4, 3, 1.0),
    (2, 5, 2, 1.0),
    (0, 5, 4, 1.0),
    (3, 6, 4, 1.0),
    (4, 6, 2, 1.0),
    (5, 6, 5, 1.0),
    (6, 7, 2, 0.5),
    (3, 8, 3, -1.0),
    (5, 8, 2, 2.0),
    (6, 3, 6, 1.0),
];

/// Builds the test network with node `i` placed on rank `i % num_ranks`, and
/// returns the handles of the local recorders with their node identifier.
fn build_network(init: &mut KernelInit) -> Vec<(usize, RecorderHandle)> {
    let num_ranks = init.num_ranks();
    let mut handles = Vec::new();
    let mut addrs = Vec::new();
    for (id, kind) in NETWORK.iter().enumerate() {
        let rank = id % num_ranks;
        let addr = match kind {
            Kind::Train(train) => init.add_node_on(rank, || SpikeTrain::new(train.to_vec()).unwrap()),
            Kind::Parrot => init.add_node_on(rank, Parrot::new),
            Kind::Recorder => init.add_node_on(rank, || {
                let (recorder, handle) = Recorder::new();
                handles.push((id, handle));
                recorder
            }),
        };
        addrs.push(addr.unwrap());
    }
    for (source, target, delay, weight) in EDGES {
        init.connect(addrs[source], addrs[target], steps(delay), Payload::new(weight))
            .unwrap();
    }

    handles
}

/// Received `(step, multiplicity, weighted input)` per recorder.
type Trace = Vec<(usize, Vec<(Step, u64, f64)>)>;

fn run_network(num_ranks: usize, num_threads: usize) -> Trace {
    let traces = run_cluster(num_ranks, |comm| {
        let config = KernelConfig::new(H).with_num_threads(num_threads);
        let mut init = KernelInit::with_communicator(config, comm);
        let handles = build_network(&mut init);

        let mut kernel = init.init().unwrap();
        assert_eq!(kernel.interval_steps(), 2);
        kernel.advance_to(steps(13)).unwrap();
        kernel.advance_to(steps(40)).unwrap();

        handles
            .into_iter()
            .map(|(id, handle)| {
                let records = handle
                    .records()
                    .iter()
                    .map(|r| {
                        let weighted = r
                            .spikes
                            .iter()
                            .map(|s| s.weight * f64::from(s.multiplicity))
                            .sum();
                        (r.step, r.multiplicity(), weighted)
                    })
                    .collect();
                (id, records)
            })
            .collect::<Trace>()
    });

    let mut trace: Trace = traces.into_iter().flatten().collect();
    trace.sort_by_key(|(id, _)| *id);

    trace
}

/// The received spikes do not depend on how the network is distributed over
/// ranks and threads.
#[test]
fn decomposition_independence() {
    let reference = run_network(1, 1);
    assert_eq!(reference.len(), 2);
    assert!(reference.iter().all(|(_, records)| !records.is_empty()));

    for (num_ranks, num_threads) in [(1, MT_NUM_THREADS), (2, 1), (3, 2), (4, MT_NUM_THREADS)] {
        assert_eq!(run_network(num_ranks, num_threads), reference);
    }
}

/// A node failure on one rank aborts the run on all ranks.
fn abort_propagation(num_threads: usize) {
    let results = run_cluster(2, |comm| {
        let config = KernelConfig::new(H).with_num_threads(num_threads);
        let mut init = KernelInit::with_communicator(config, comm);
        let a = init.add_node_on(0, Parrot::new).unwrap();
        let b = init.add_node_on(1, || FailAt(3)).unwrap();
        init.connect(a, b, steps(2), Payload::default()).unwrap();
        init.connect(b, a, steps(2), Payload::default()).unwrap();

        let mut kernel = init.init().unwrap();
        let first = kernel.advance_to(steps(10));
        let second = kernel.advance_to(steps(12));

        (kernel.rank(), kernel.current_step(), first, second)
    });

    for (rank, current_step, first, second) in results {
        // The failure happens during interval [2, 4).
        assert_eq!(current_step, 2);
        match (rank, first) {
            (0, Err(KernelError::PeerAborted { rank: 1 })) => {}
            (1, Err(KernelError::Node(failure))) => {
                assert_eq!(failure.step, 3);
                assert_eq!(failure.model, "fail_at");
            }
            (rank, result) => panic!("unexpected result on rank {}: {:?}", rank, result),
        }
        assert!(matches!(second, Err(KernelError::Aborted)));
    }
}

#[test]
fn abort_propagation_st() {
    abort_propagation(1);
}

#[test]
fn abort_propagation_mt() {
    abort_propagation(MT_NUM_THREADS);
}

#[test]
fn inconsistent_resolution() {
    let results = run_cluster(2, |comm| {
        let resolution = if comm.rank() == 0 {
            H
        } else {
            Duration::from_micros(500)
        };
        let mut init = KernelInit::with_communicator(KernelConfig::new(resolution), comm);
        init.add_node_on(0, Parrot::new).unwrap();
        init.add_node_on(1, Parrot::new).unwrap();

        init.init().map(|_| ())
    });

    for result in results {
        assert!(matches!(
            result,
            Err(KernelError::Config(ConfigError::InconsistentSetup {
                what: "resolution",
                ..
            }))
        ));
    }
}

/// A connection to a node index that the owning rank never declared is
/// detected during setup.
#[test]
fn unknown_remote_target() {
    let results = run_cluster(2, |comm| {
        let rank = comm.rank();
        let mut init = KernelInit::with_communicator(KernelConfig::new(H), comm);
        let a = init.add_node_on(0, Parrot::new).unwrap();
        let b = init.add_node_on(1, Parrot::new).unwrap();
        init.connect(a, b, steps(2), Payload::default()).unwrap();
        if rank == 0 {
            let ghost = spikegrid::NodeAddr::new(1, 5);
            init.connect(a, ghost, steps(2), Payload::default()).unwrap();
        }

        init.init().map(|_| ())
    });

    assert!(matches!(
        &results[0],
        Err(KernelError::Config(ConfigError::UnknownNode(addr))) if addr.index() == 5
    ));
    assert!(matches!(
        &results[1],
        Err(KernelError::PeerAborted { rank: 0 })
    ));
}
