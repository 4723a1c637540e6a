//! Example: a chain of relay nodes driven by Poisson noise and spread over
//! two ranks.
//!
//! This example demonstrates in particular:
//!
//! * multi-rank runs within a single process,
//! * built-in node models,
//! * publication of data to the external world through a coupling port.
//!
//! ```text
//!  ┌─────────┐
//!  │ noise 0 ├──┐   ┌──────────┐     ┌──────────┐           ┌──────────┐     ┌───────┐ "activity"
//!  └─────────┘  ├──►│ parrot 0 ├────►│ parrot 1 ├──► ··· ───►│ parrot 5 ├────►│ meter ├────────────►
//!  ┌─────────┐  │   └──────────┘     └──────────┘           └──────────┘     └───────┘
//!  │ noise 1 ├──┘
//!  └─────────┘
//! ```
//!
//! Node `i` of each kind lives on rank `i mod 2`, so that every hop of the
//! chain crosses ranks.
//!
//! Set `RUST_LOG=spikegrid=debug` to trace interval boundaries.

use std::thread;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use spikegrid::comm::{LocalCluster, LocalComm};
use spikegrid::coupling::{channel_adapter, ChannelAdapter, ContinuousSource, PortData};
use spikegrid::node::builtin::{InhomogeneousPoissonGenerator, Parrot};
use spikegrid::node::{Node, NodeError, UpdateContext};
use spikegrid::routing::Payload;
use spikegrid::time::{Step, TimeGrid};
use spikegrid::{KernelConfig, KernelError, KernelInit, KernelStats};

const NUM_RANKS: usize = 2;
const NUM_THREADS: usize = 2;
const CHAIN_LEN: usize = 6;
const RESOLUTION: Duration = Duration::from_micros(100);
const NOISE_DELAY: Duration = Duration::from_millis(1);
const CHAIN_DELAY: Duration = Duration::from_micros(1500);
const METER_WINDOW: Step = 1000;
const DURATION: Duration = Duration::from_secs(1);

/// Rate schedule of the noise generators, as (time in ms, rate in Hz) pairs.
const NOISE_RATES: [f64; 8] = [0.1, 50.0, 250.0, 200.0, 500.0, 20.0, 750.0, 100.0];

/// Measures the input rate over a sliding window and publishes it.
struct RateMeter {
    port: ContinuousSource,
    window: Step,
    count: u64,
}

impl RateMeter {
    fn new(port: ContinuousSource, window: Step) -> Self {
        Self {
            port,
            window,
            count: 0,
        }
    }
}

impl Node for RateMeter {
    fn model(&self) -> &'static str {
        "rate_meter"
    }

    fn max_rate(&self) -> u32 {
        0
    }

    fn update(&mut self, cx: &mut UpdateContext<'_>) -> Result<(), NodeError> {
        self.count += cx.input().multiplicity();

        if (cx.step() + 1) % self.window == 0 {
            let secs = cx.resolution().as_secs_f64() * self.window as f64;
            self.port
                .set(vec![self.count as f64 / secs])
                .map_err(NodeError::from_error)?;
            self.count = 0;
        }

        Ok(())
    }
}

fn simulate(comm: LocalComm, adapter: Option<ChannelAdapter>) -> Result<KernelStats, KernelError> {
    let config = KernelConfig::new(RESOLUTION).with_num_threads(NUM_THREADS);
    let mut init = KernelInit::with_communicator(config, comm);
    let grid = TimeGrid::new(RESOLUTION)?;
    let rank = init.rank();

    // Nodes, declared in the same order on all ranks.
    let mut noise = Vec::new();
    for i in 0..NUM_RANKS {
        noise.push(init.add_node_on(i % NUM_RANKS, || {
            let mut generator = InhomogeneousPoissonGenerator::new(grid);
            generator.extend_from_pairs(&NOISE_RATES).unwrap();
            generator
        })?);
    }
    let mut chain = Vec::new();
    for i in 0..CHAIN_LEN {
        chain.push(init.add_node_on(i % NUM_RANKS, Parrot::new)?);
    }
    let mut port = if rank == 0 {
        Some(init.add_continuous_source("activity", 1)?)
    } else {
        None
    };
    let meter = init.add_node_on(0, || RateMeter::new(port.take().unwrap(), METER_WINDOW))?;

    // Connections.
    for &source in &noise {
        init.connect(source, chain[0], NOISE_DELAY, Payload::default())?;
    }
    for pair in chain.windows(2) {
        init.connect(pair[0], pair[1], CHAIN_DELAY, Payload::default())?;
    }
    init.connect(chain[CHAIN_LEN - 1], meter, CHAIN_DELAY, Payload::default())?;

    // Run.
    let init = match adapter {
        Some(adapter) => init.set_adapter(adapter),
        None => init,
    };
    let mut kernel = init.init()?;
    kernel.advance_to(DURATION)?;

    Ok(kernel.stats())
}

fn main() -> Result<(), KernelError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (adapter, endpoint) = channel_adapter();
    let mut adapter = Some(adapter);
    let comms = LocalCluster::new(NUM_RANKS).build();

    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                // Ports are only declared on rank 0.
                let adapter = adapter.take();
                s.spawn(move || simulate(comm, adapter))
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for (rank, result) in results.into_iter().enumerate() {
        let stats = result?;
        println!(
            "rank {}: {} intervals, {} events emitted, {} spikes sent, {} received",
            rank, stats.intervals, stats.emitted, stats.sent, stats.received
        );
    }

    for published in endpoint.drain() {
        if let PortData::Continuous(rate) = published.data {
            let grid = TimeGrid::new(RESOLUTION)?;
            println!(
                "t = {:>4} ms: {:>7.1} spikes/s",
                grid.time(published.interval.end()).as_millis(),
                rate[0]
            );
        }
    }

    Ok(())
}
