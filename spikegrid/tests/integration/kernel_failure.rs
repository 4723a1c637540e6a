//! Node failures, rate violations and cancellation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use spikegrid::node::builtin::{Parrot, SpikeTrain};
use spikegrid::node::{FailureCause, Node, NodeError, UpdateContext};
use spikegrid::routing::Payload;
use spikegrid::time::Step;
use spikegrid::{ConfigError, KernelConfig, KernelError, KernelInit};

const MT_NUM_THREADS: usize = 4;
const H: Duration = Duration::from_millis(1);

fn steps(n: u64) -> Duration {
    H * n as u32
}

/// Keeps track of the latest step at which it was updated.
struct StepWatch {
    latest: Arc<AtomicU64>,
}
impl Node for StepWatch {
    fn model(&self) -> &'static str {
        "step_watch"
    }

    fn update(&mut self, cx: &mut UpdateContext<'_>) -> Result<(), NodeError> {
        self.latest.fetch_max(cx.step(), Ordering::Relaxed);

        Ok(())
    }
}

enum Failure {
    Error,
    Panic,
    Burst,
    Stalled,
}

/// Fails in the specified manner at the specified step.
struct FailAt {
    step: Step,
    failure: Failure,
}
impl Node for FailAt {
    fn model(&self) -> &'static str {
        "fail_at"
    }

    fn update(&mut self, cx: &mut UpdateContext<'_>) -> Result<(), NodeError> {
        if cx.step() != self.step {
            return Ok(());
        }
        match self.failure {
            Failure::Error => Err(NodeError::new("scheduled failure")),
            Failure::Panic => panic!("scheduled panic"),
            Failure::Burst => {
                cx.emit(1)?;
                cx.emit(1)
            }
            Failure::Stalled => {
                thread::sleep(Duration::from_millis(200));

                Err(NodeError::new("stalled failure"))
            }
        }
    }
}

// Builds a network of watchers with a faulty node, all connected in a ring
// with two-step delays, and runs it up to step 20.
//
// Returns the latest step seen by each watcher, the current step and the
// result of the run.
fn faulty_run(num_threads: usize, failure: Failure) -> (Vec<Step>, Step, Result<(), KernelError>) {
    const NUM_NODES: usize = 7;
    const FAULTY: usize = 3;

    let mut init = KernelInit::new(KernelConfig::new(H).with_num_threads(num_threads));
    let mut failure = Some(failure);
    let mut watches = Vec::new();
    let mut addrs = Vec::new();
    for i in 0..NUM_NODES {
        let addr = if i == FAULTY {
            let failure = failure.take().unwrap();
            init.add_node(FailAt { step: 5, failure })
        } else {
            let latest = Arc::new(AtomicU64::new(0));
            watches.push(latest.clone());
            init.add_node(StepWatch { latest })
        };
        addrs.push(addr);
    }
    for (i, &source) in addrs.iter().enumerate() {
        let target = addrs[(i + 1) % addrs.len()];
        init.connect(source, target, steps(2), Payload::default())
            .unwrap();
    }

    let mut kernel = init.init().unwrap();
    let result = kernel.advance_to(steps(20));
    let latest = watches.iter().map(|w| w.load(Ordering::Relaxed)).collect();

    (latest, kernel.current_step(), result)
}

/// A node failing at step 5, the last step of interval [4, 6), stops the
/// run before any node is updated past that interval.
fn node_error(num_threads: usize) {
    let (latest, current_step, result) = faulty_run(num_threads, Failure::Error);

    assert!(latest.iter().all(|&step| step <= 5));
    assert_eq!(current_step, 4);
    match result {
        Err(KernelError::Node(failure)) => {
            assert_eq!(failure.step, 5);
            assert_eq!(failure.node.index(), 3);
            assert_eq!(failure.model, "fail_at");
            assert!(matches!(failure.cause, FailureCause::Error(_)));
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn node_error_st() {
    node_error(1);
}

#[test]
fn node_error_mt() {
    node_error(MT_NUM_THREADS);
}

fn node_panic(num_threads: usize) {
    let (latest, current_step, result) = faulty_run(num_threads, Failure::Panic);

    assert!(latest.iter().all(|&step| step <= 5));
    assert_eq!(current_step, 4);
    match result {
        Err(KernelError::Node(failure)) => {
            assert_eq!(failure.step, 5);
            assert_eq!(failure.cause.panic_message(), Some("scheduled panic"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn node_panic_st() {
    node_panic(1);
}

#[test]
fn node_panic_mt() {
    node_panic(MT_NUM_THREADS);
}

fn rate_exceeded(num_threads: usize) {
    let (latest, _, result) = faulty_run(num_threads, Failure::Burst);

    assert!(latest.iter().all(|&step| step <= 5));
    match result {
        Err(KernelError::Config(ConfigError::RateExceeded {
            node,
            step: 5,
            declared: 1,
        })) => assert_eq!(node.index(), 3),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn rate_exceeded_st() {
    rate_exceeded(1);
}

#[test]
fn rate_exceeded_mt() {
    rate_exceeded(MT_NUM_THREADS);
}

/// A failure in the middle of an interval stops the other workers at the
/// failing step, even when the failing worker lags behind.
#[test]
fn mid_interval_failure_mt() {
    let mut init = KernelInit::new(KernelConfig::new(H).with_num_threads(2));
    init.add_node(FailAt {
        step: 5,
        failure: Failure::Stalled,
    });
    let latest = Arc::new(AtomicU64::new(0));
    let watch = init.add_node(StepWatch {
        latest: latest.clone(),
    });
    let train = init.add_node(SpikeTrain::new([2]).unwrap());
    init.connect(train, watch, steps(4), Payload::default())
        .unwrap();

    let mut kernel = init.init().unwrap();
    let result = kernel.advance_to(steps(12));

    // Interval [4, 8): the watcher runs on the other worker.
    assert!((4..=5).contains(&latest.load(Ordering::Relaxed)));
    assert_eq!(kernel.current_step(), 4);
    match result {
        Err(KernelError::Node(failure)) => {
            assert_eq!(failure.step, 5);
            assert_eq!(failure.node.index(), 0);
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn failed_kernel_stays_aborted() {
    let mut init = KernelInit::new(KernelConfig::new(H).with_num_threads(1));
    let a = init.add_node(FailAt {
        step: 0,
        failure: Failure::Error,
    });
    init.connect(a, a, steps(1), Payload::default()).unwrap();
    let mut kernel = init.init().unwrap();

    assert!(matches!(
        kernel.advance_to(steps(3)),
        Err(KernelError::Node(_))
    ));
    assert!(matches!(
        kernel.advance_to(steps(3)),
        Err(KernelError::Aborted)
    ));
    assert_eq!(kernel.current_step(), 0);
}

/// A cancellation request is honoured at the next interval boundary.
#[test]
fn cancellation() {
    let mut init = KernelInit::new(KernelConfig::new(H).with_num_threads(2));
    let train = init.add_node(SpikeTrain::new([0, 1, 2]).unwrap());
    let parrot = init.add_node(Parrot::new());
    init.connect(train, parrot, steps(2), Payload::default())
        .unwrap();

    let mut kernel = init.init().unwrap();
    let handle = kernel.abort_handle();
    kernel.advance_to(steps(4)).unwrap();

    handle.abort();
    assert!(handle.is_aborted());
    assert!(matches!(
        kernel.advance_to(steps(10)),
        Err(KernelError::Cancelled)
    ));
    assert_eq!(kernel.current_step(), 4);
    assert!(matches!(
        kernel.advance_to(steps(10)),
        Err(KernelError::Aborted)
    ));
}
