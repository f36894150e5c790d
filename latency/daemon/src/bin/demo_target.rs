//! Demo process for the latency monitor
//!
//! Calls an unmangled `handle_request` from a few worker threads, each call
//! sleeping a random 0-100 ms, so the monitor has a function to attach to:
//!
//! ```bash
//! cargo build -p latency-monitor --bin demo-target
//! ./target/debug/demo-target &
//! sudo ./target/debug/latency-monitor --binary ./target/debug/demo-target \
//!     --function handle_request --ebpf-object target/bpfel-unknown-none/release/latency-probe
//! ```
//!
//! With `--measure` the workers also bracket each call with the in-process
//! correlation core and log the latencies they saw, for comparison with the
//! monitor's numbers.

use clap::Parser;
use latency_common::constants::MAX_IN_FLIGHT_CALLS;
use latency_monitor::{collector::MetricsCollector, local::LocalProbe, types::TargetInfo};
use log::info;
use rand::Rng;
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

/// Repeatedly call a function worth measuring
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Number of worker threads
    #[clap(short, long, default_value_t = 4)]
    workers: u32,

    /// Upper bound of the simulated work per call, in milliseconds
    #[clap(short, long, default_value_t = 100)]
    max_delay_ms: u64,

    /// Measure calls in-process and log a report every interval
    #[clap(long)]
    measure: bool,

    /// Report interval in seconds for --measure
    #[clap(long, default_value_t = 10)]
    report_interval: u64,
}

/// Events buffered between two reports
const CHANNEL_CAPACITY: usize = 65536;

/// The function the monitor attaches to
#[no_mangle]
#[inline(never)]
pub extern "C" fn handle_request(delay_ms: u64) -> u64 {
    thread::sleep(Duration::from_millis(delay_ms));
    delay_ms
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let pid = std::process::id();
    info!(
        "demo-target pid {}: {} workers calling handle_request",
        pid, args.workers
    );

    let probe = args
        .measure
        .then(|| Arc::new(LocalProbe::new(MAX_IN_FLIGHT_CALLS as usize, CHANNEL_CAPACITY)));

    let workers: Vec<_> = (0..args.workers)
        .map(|i| {
            let max_delay_ms = args.max_delay_ms;
            let probe = probe.clone();
            // Worker index stands in for the tid
            let ctx = (u64::from(pid) << 32) | u64::from(i + 1);

            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                loop {
                    let delay = rng.gen_range(0..=max_delay_ms);
                    let elapsed = match &probe {
                        Some(probe) => probe.measure(ctx, || handle_request(delay)),
                        None => handle_request(delay),
                    };
                    log::debug!("worker {} handled request in {} ms", i, elapsed);
                }
            })
        })
        .collect();

    if let Some(probe) = probe {
        report_loop(&probe, Duration::from_secs(args.report_interval.max(1)));
    }

    for worker in workers {
        let _ = worker.join();
    }
}

fn report_loop(probe: &LocalProbe, interval: Duration) -> ! {
    let mut collector = MetricsCollector::new();
    let started = Instant::now();
    let target = TargetInfo {
        binary: "self".to_string(),
        function: "handle_request".to_string(),
        pid: None,
    };

    loop {
        thread::sleep(interval);
        probe.drain_into(&mut collector);

        let metrics = collector.generate_metrics(
            started.elapsed().as_secs(),
            target.clone(),
            probe.probe_stats(),
        );
        info!(
            "in-process: {} calls, p50 {:.0} μs, p99 {:.0} μs, {} dropped",
            metrics.total_events,
            metrics.percentiles.p50,
            metrics.percentiles.p99,
            metrics.probe_stats.events_dropped
        );
    }
}
